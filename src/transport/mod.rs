//! Bidirectional control and media transports (§4.6, §4.7).

pub mod control;
pub mod media;

pub use control::{ControlTransport, WsControlTransport};
pub use media::{MediaTransport, RoomClient, SfuMedia, WebSocketMedia};
