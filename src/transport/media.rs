//! Media-channel transport (§4.7): publishes a local PCM track and
//! consumes the remote translated track, either over the control
//! WebSocket (`output_audio_data`/`input_audio_data`) or over a WebRTC
//! SFU room. The SFU path is specified by interface only (§1
//! "Concrete WebRTC... client libraries... internals are not [in
//! scope]") via the `RoomClient` trait.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::audio::AudioFrame;
use crate::error::{PalabraError, Result};
use crate::fanout::Subscription;
use crate::message::ControlMessage;
use crate::timing::{BOOT_TIMEOUT, TRACK_CLOSE_TIMEOUT, TRACK_RETRY_DELAY, TRACK_RETRY_MAX_ATTEMPTS};
use crate::transport::control::{ControlTransport, WsControlTransport};

pub const TRANSLATOR_IDENTITY_PREFIX: &str = "palabra_translator_";
pub const TRANSLATION_TRACK_PREFIX: &str = "translation_";

#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Publish one local frame. Backpressure-aware: blocks no longer than
    /// one chunk duration.
    async fn publish_frame(&self, frame: AudioFrame) -> Result<()>;

    /// Next inbound translated frame, or `None` once the remote stream
    /// closes.
    async fn recv_frame(&mut self) -> Option<AudioFrame>;

    /// Next inbound control-style message riding this transport's own
    /// channel, if it carries one separate from the control transport
    /// (§4.8: the SFU data channel does; the WS-media path doesn't, since
    /// its control-style traffic already rides the shared control socket
    /// and is routed by `Realtime`'s control-transport task). The default
    /// never resolves, matching "this transport has no such channel."
    async fn recv_control(&mut self) -> Option<ControlMessage> {
        std::future::pending().await
    }

    async fn close(&self) -> Result<()>;
}

/// WS-media mode: audio rides the control socket as base64-encoded
/// `input_audio_data`/`output_audio_data` frames.
pub struct WebSocketMedia {
    control: Arc<WsControlTransport>,
    inbound: Mutex<Subscription<ControlMessage>>,
    sample_rate: u32,
    num_channels: u16,
}

impl WebSocketMedia {
    pub fn new(control: Arc<WsControlTransport>, sample_rate: u32, num_channels: u16) -> Self {
        let inbound = control.subscribe_inbound("media-ws");
        Self {
            control,
            inbound: Mutex::new(inbound),
            sample_rate,
            num_channels,
        }
    }
}

#[async_trait]
impl MediaTransport for WebSocketMedia {
    async fn publish_frame(&self, frame: AudioFrame) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(frame.to_bytes());
        self.control
            .send(ControlMessage::InputAudioData { base64_pcm: encoded })
            .await
    }

    async fn recv_frame(&mut self) -> Option<AudioFrame> {
        let mut inbound = self.inbound.lock().await;
        loop {
            match inbound.recv().await {
                Some(ControlMessage::OutputAudioData { base64_pcm }) => {
                    let bytes = match base64::engine::general_purpose::STANDARD.decode(&base64_pcm)
                    {
                        Ok(b) => b,
                        Err(e) => {
                            warn!("failed to decode output_audio_data: {e}");
                            continue;
                        }
                    };
                    match AudioFrame::from_bytes(&bytes, self.sample_rate, self.num_channels) {
                        Ok(frame) => return Some(frame),
                        Err(e) => {
                            warn!("malformed output_audio_data frame: {e}");
                            continue;
                        }
                    }
                }
                Some(_) => continue,
                None => return None,
            }
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A discovered remote audio track to subscribe to.
#[derive(Debug, Clone)]
pub struct RemoteTrackHandle {
    pub participant_identity: String,
    pub track_name: String,
}

/// Interface-only abstraction over a WebRTC SFU room client (§1, §9
/// "dynamic dispatch... as capability records, not inheritance").
/// Production code plugs in a concrete LiveKit-style client; tests use
/// an in-process fake.
#[async_trait]
pub trait RoomClient: Send + Sync {
    async fn join(&self, stream_url: &str, jwt_token: &str) -> Result<()>;
    async fn publish_track(&self, sample_rate: u32, num_channels: u16) -> Result<()>;
    async fn publish_frame(&self, frame: AudioFrame) -> Result<()>;
    /// One probe for a remote participant/track matching the translator
    /// identity and track-name prefixes. Returns `None` if not (yet)
    /// present; `SfuMedia` owns the retry loop.
    async fn find_remote_track(
        &self,
        identity_prefix: &str,
        track_name_prefix: &str,
    ) -> Result<Option<RemoteTrackHandle>>;
    async fn subscribe(&self, handle: &RemoteTrackHandle) -> Result<()>;
    async fn recv_frame(&self) -> Option<AudioFrame>;
    /// Next control-style message off the room's data channel, or `None`
    /// once it closes (grounded in `webrtc.py`'s `on_data_received`
    /// decoding a `Message` off the WebRTC data channel alongside audio).
    async fn recv_control(&self) -> Option<ControlMessage>;
    async fn leave(&self) -> Result<()>;
}

/// SFU-mode `MediaTransport`: joins a room, publishes the source track,
/// and discovers+subscribes to the target-language translation track
/// with bounded retry.
pub struct SfuMedia<R: RoomClient> {
    room: Arc<R>,
    target_lang: String,
}

impl<R: RoomClient> SfuMedia<R> {
    pub async fn connect(
        room: Arc<R>,
        stream_url: &str,
        jwt_token: &str,
        sample_rate: u32,
        num_channels: u16,
        target_lang: impl Into<String>,
    ) -> Result<Self> {
        room.join(stream_url, jwt_token).await?;
        room.publish_track(sample_rate, num_channels).await?;
        let media = Self {
            room,
            target_lang: target_lang.into(),
        };
        media.discover_remote_track().await?;
        Ok(media)
    }

    async fn discover_remote_track(&self) -> Result<()> {
        let track_prefix = format!("{TRANSLATION_TRACK_PREFIX}{}", self.target_lang);
        let deadline = tokio::time::Instant::now() + BOOT_TIMEOUT;
        for attempt in 0..TRACK_RETRY_MAX_ATTEMPTS {
            if tokio::time::Instant::now() > deadline {
                break;
            }
            match self
                .room
                .find_remote_track(TRANSLATOR_IDENTITY_PREFIX, &track_prefix)
                .await?
            {
                Some(handle) => {
                    self.room.subscribe(&handle).await?;
                    return Ok(());
                }
                None => {
                    debug!(
                        "translation track not found yet (attempt {}/{})",
                        attempt + 1,
                        TRACK_RETRY_MAX_ATTEMPTS
                    );
                    tokio::time::sleep(TRACK_RETRY_DELAY).await;
                }
            }
        }
        Err(PalabraError::Boot(format!(
            "translation track for '{}' not found after {} attempts",
            self.target_lang, TRACK_RETRY_MAX_ATTEMPTS
        )))
    }
}

#[async_trait]
impl<R: RoomClient> MediaTransport for SfuMedia<R> {
    async fn publish_frame(&self, frame: AudioFrame) -> Result<()> {
        self.room.publish_frame(frame).await
    }

    async fn recv_frame(&mut self) -> Option<AudioFrame> {
        self.room.recv_frame().await
    }

    async fn recv_control(&mut self) -> Option<ControlMessage> {
        self.room.recv_control().await
    }

    async fn close(&self) -> Result<()> {
        tokio::time::timeout(TRACK_CLOSE_TIMEOUT, self.room.leave())
            .await
            .unwrap_or_else(|_| {
                warn!("SFU leave exceeded TRACK_CLOSE_TIMEOUT, abandoning");
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct FakeRoom {
        joined: AtomicU32,
        frames: TokioMutex<Vec<AudioFrame>>,
        discover_after: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl RoomClient for FakeRoom {
        async fn join(&self, _stream_url: &str, _jwt_token: &str) -> Result<()> {
            self.joined.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn publish_track(&self, _sample_rate: u32, _num_channels: u16) -> Result<()> {
            Ok(())
        }
        async fn publish_frame(&self, frame: AudioFrame) -> Result<()> {
            self.frames.lock().await.push(frame);
            Ok(())
        }
        async fn find_remote_track(
            &self,
            identity_prefix: &str,
            track_name_prefix: &str,
        ) -> Result<Option<RemoteTrackHandle>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n + 1 >= self.discover_after {
                Ok(Some(RemoteTrackHandle {
                    participant_identity: format!("{identity_prefix}1"),
                    track_name: format!("{track_name_prefix}"),
                }))
            } else {
                Ok(None)
            }
        }
        async fn subscribe(&self, _handle: &RemoteTrackHandle) -> Result<()> {
            Ok(())
        }
        async fn recv_frame(&self) -> Option<AudioFrame> {
            None
        }
        async fn recv_control(&self) -> Option<ControlMessage> {
            None
        }
        async fn leave(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn discovers_track_within_retry_budget() {
        let room = Arc::new(FakeRoom {
            joined: AtomicU32::new(0),
            frames: TokioMutex::new(vec![]),
            discover_after: 2,
            attempts: AtomicU32::new(0),
        });
        let media = SfuMedia::connect(room.clone(), "wss://x", "tok", 24000, 1, "es").await;
        assert!(media.is_ok());
        assert_eq!(room.joined.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn boot_error_after_retry_budget_exhausted() {
        let room = Arc::new(FakeRoom {
            joined: AtomicU32::new(0),
            frames: TokioMutex::new(vec![]),
            discover_after: u32::MAX,
            attempts: AtomicU32::new(0),
        });
        let media = SfuMedia::connect(room, "wss://x", "tok", 24000, 1, "es").await;
        assert!(media.is_err());
    }
}
