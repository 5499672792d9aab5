//! Control-channel transport (§4.6): a bidirectional, framed, ordered,
//! reliable JSON-message channel over WebSocket, with auto-reconnect
//! while the owning component is alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, warn};

use crate::error::{PalabraError, Result};
use crate::fanout::{FanoutBus, Subscription};
use crate::message::{ControlMessage, EndTaskData};

const RECONNECT_DELAY: Duration = Duration::from_millis(500);
const CLOSE_GRACE: Duration = Duration::from_secs(3);
const OUTBOUND_QUEUE_CAPACITY: usize = 32;

#[async_trait]
pub trait ControlTransport: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<()>;
    async fn send(&self, msg: ControlMessage) -> Result<()>;
    fn subscribe_inbound(&self, id: &str) -> Subscription<ControlMessage>;
    async fn close(&self) -> Result<()>;
}

/// WebSocket-backed `ControlTransport`. Inbound frames are decoded and
/// fanned out to every subscriber (Realtime's routing task, and
/// `WebSocketMedia` when media rides the same socket).
pub struct WsControlTransport {
    outbound_tx: mpsc::Sender<WsMessage>,
    outbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<WsMessage>>>,
    inbound_bus: Arc<FanoutBus<ControlMessage>>,
    closing: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    io_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WsControlTransport {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        Self {
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(Some(outbound_rx)),
            inbound_bus: Arc::new(FanoutBus::new()),
            closing: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            io_task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Default for WsControlTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlTransport for WsControlTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<()> {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| PalabraError::Boot("WsControlTransport already connected".into()))?;

        let url = format!("{url}?token={token}");
        let inbound_bus = self.inbound_bus.clone();
        let closing = self.closing.clone();
        let connected = self.connected.clone();

        // First connection attempt happens synchronously so boot errors
        // surface to the caller; subsequent reconnects happen in the
        // background task and are logged, not propagated.
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| PalabraError::Transport(format!("control connect failed: {e}")))?;
        connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let mut ws_stream = ws_stream;
            loop {
                let (mut write, mut read) = ws_stream.split();
                loop {
                    tokio::select! {
                        outbound = outbound_rx.recv() => {
                            match outbound {
                                Some(msg) => {
                                    if let Err(e) = write.send(msg).await {
                                        warn!("control send failed: {e}");
                                        break;
                                    }
                                }
                                None => {
                                    let _ = write.close().await;
                                    return;
                                }
                            }
                        }
                        inbound = read.next() => {
                            match inbound {
                                Some(Ok(WsMessage::Text(text))) => {
                                    let decoded = ControlMessage::decode(&text);
                                    if let Err(e) = inbound_bus.publish(Some(decoded)) {
                                        debug!("control inbound publish failed: {e}");
                                    }
                                }
                                Some(Ok(WsMessage::Binary(bytes))) => {
                                    let text = String::from_utf8_lossy(&bytes);
                                    let decoded = ControlMessage::decode(&text);
                                    let _ = inbound_bus.publish(Some(decoded));
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Ok(_)) => continue,
                                Some(Err(e)) => {
                                    warn!("control recv error: {e}");
                                    break;
                                }
                            }
                        }
                    }
                }

                connected.store(false, Ordering::SeqCst);
                if closing.load(Ordering::SeqCst) {
                    return;
                }
                warn!("control transport disconnected, reconnecting...");
                loop {
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    match tokio_tungstenite::connect_async(&url).await {
                        Ok((stream, _)) => {
                            ws_stream = stream;
                            connected.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(e) => {
                            error!("control reconnect failed: {e}");
                        }
                    }
                }
            }
        });

        *self.io_task.lock().await = Some(handle);
        Ok(())
    }

    async fn send(&self, msg: ControlMessage) -> Result<()> {
        let encoded = msg.encode()?;
        self.outbound_tx
            .send(WsMessage::Text(encoded.into()))
            .await
            .map_err(|_| PalabraError::Transport("control outbound channel closed".into()))
    }

    fn subscribe_inbound(&self, id: &str) -> Subscription<ControlMessage> {
        self.inbound_bus.subscribe(id, 256)
    }

    async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self
            .send(ControlMessage::EndTask {
                data: EndTaskData { force: true },
            })
            .await;
        tokio::time::sleep(CLOSE_GRACE).await;
        if let Some(handle) = self.io_task.lock().await.take() {
            handle.abort();
        }
        self.inbound_bus.close();
        Ok(())
    }
}
