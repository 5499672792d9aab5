//! Composition root for the two transports (§4.8): owns `in_bus` (outbound
//! to the service) and `out_bus` (inbound from the service, deduplicated),
//! runs the routing tasks between them and the transports, and performs
//! the task-config handshake during boot.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::capped_set::CappedSet;
use crate::config::Config;
use crate::error::{PalabraError, Result};
use crate::fanout::FanoutBus;
use crate::message::ControlMessage;
use crate::task::{Task, TaskEvents};
use crate::timing::{BOOT_TIMEOUT, DEDUP_CAPACITY, HANDSHAKE_RETRY_INTERVAL};
use crate::transport::{ControlTransport, MediaTransport};

/// Object-safe source of control-style messages riding a `MediaTransport`'s
/// own channel (the SFU data channel; WS-media has none of its own — see
/// `MediaTransport::recv_control`'s default). `Realtime` holds one of
/// these type-erased so it doesn't need to become generic over the media
/// transport's concrete type the way `Manager`/`Receiver`/`Sender` are.
#[async_trait]
pub trait MediaControlSource: Send + Sync {
    async fn recv_control(&self) -> Option<ControlMessage>;
}

struct MediaControlAdapter<M: MediaTransport + 'static>(Arc<Mutex<M>>);

#[async_trait]
impl<M: MediaTransport + 'static> MediaControlSource for MediaControlAdapter<M> {
    async fn recv_control(&self) -> Option<ControlMessage> {
        self.0.lock().await.recv_control().await
    }
}

/// Wraps a shared media transport as a `MediaControlSource` for `Realtime`.
pub fn media_control_source<M: MediaTransport + 'static>(
    media: Arc<Mutex<M>>,
) -> Arc<dyn MediaControlSource> {
    Arc::new(MediaControlAdapter(media))
}

/// A `MediaControlSource` that never yields anything, for tests of
/// components that need a `Realtime` but exercise only the control
/// transport's path.
#[cfg(test)]
pub(crate) fn no_media_control() -> Arc<dyn MediaControlSource> {
    struct NoMediaControl;
    #[async_trait]
    impl MediaControlSource for NoMediaControl {
        async fn recv_control(&self) -> Option<ControlMessage> {
            std::future::pending().await
        }
    }
    Arc::new(NoMediaControl)
}

/// Shared dedup check used by every routing task that can deliver
/// transcription messages: non-transcription messages always pass.
async fn dedup_ok(dedup: &Mutex<CappedSet<String>>, msg: &ControlMessage) -> bool {
    match msg.as_transcription() {
        None => true,
        Some(t) => {
            let key = t.dedup_key();
            let mut d = dedup.lock().await;
            if d.contains(&key) {
                false
            } else {
                d.add(key);
                true
            }
        }
    }
}

/// Owns both transports and the two buses. In WS-media sessions the media
/// transport shares the control socket and so already rides
/// `control.subscribe_inbound`; an SFU media transport's data channel
/// carries control-style messages of its own (§4.8 bullet 3, grounded in
/// `webrtc.py`'s `on_data_received`), routed here by `media_control`.
pub struct Realtime {
    events: TaskEvents,
    control: Arc<dyn ControlTransport>,
    media_control: Arc<dyn MediaControlSource>,
    pub in_bus: Arc<FanoutBus<ControlMessage>>,
    pub out_bus: Arc<FanoutBus<ControlMessage>>,
    config: Config,
}

impl Realtime {
    pub fn new(
        control: Arc<dyn ControlTransport>,
        media_control: Arc<dyn MediaControlSource>,
        config: Config,
    ) -> Self {
        Self {
            events: TaskEvents::new("realtime"),
            control,
            media_control,
            in_bus: Arc::new(FanoutBus::new()),
            out_bus: Arc::new(FanoutBus::new()),
            config,
        }
    }

    /// Thin wrapper around `in_bus.publish`.
    pub fn send(&self, msg: ControlMessage) -> Result<()> {
        self.in_bus.publish(Some(msg))
    }

    fn spawn_route_in_to_control(&self) -> tokio::task::JoinHandle<()> {
        let mut sub = self.in_bus.subscribe("realtime-out-to-control", 64);
        let control = self.control.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.recv().await {
                if let Err(e) = control.send(msg).await {
                    warn!("realtime: failed forwarding to control transport: {e}");
                }
            }
        })
    }

    async fn boot_task_config_handshake(&self) -> Result<()> {
        self.send(ControlMessage::SetTask {
            data: self.config.to_canonical(),
        })?;

        let mut sub = self.control.subscribe_inbound("realtime-handshake");
        let deadline = tokio::time::Instant::now() + BOOT_TIMEOUT;

        loop {
            if tokio::time::Instant::now() > deadline {
                return Err(PalabraError::Boot(
                    "task-config handshake timed out waiting for current_task".into(),
                ));
            }
            self.send(ControlMessage::GetTask)?;

            match tokio::time::timeout(HANDSHAKE_RETRY_INTERVAL, sub.recv()).await {
                Ok(Some(ControlMessage::CurrentTask { .. })) => return Ok(()),
                Ok(Some(_)) => continue,
                Ok(None) => {
                    return Err(PalabraError::Boot(
                        "control transport closed during handshake".into(),
                    ))
                }
                Err(_) => continue,
            }
        }
    }
}

impl Realtime {
    pub fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot_impl(&self) -> Result<()> {
        self.boot_task_config_handshake().await
    }

    async fn do_work_impl(&self) -> Result<()> {
        let mut handles = Vec::new();
        handles.push(self.spawn_route_in_to_control());

        // Both the control transport and (when present) the media
        // transport's own data channel can deliver transcription
        // messages; one shared dedup set means a message arriving on
        // either is suppressed the second time it's seen on the other,
        // exactly as the original routes both `ws.out_foq` and
        // `webrtc.out_foq` through the same `self._dedup`.
        let dedup = Arc::new(Mutex::new(CappedSet::<String>::new(DEDUP_CAPACITY)));

        {
            let mut sub = self.control.subscribe_inbound("realtime-control-in");
            let out_bus = self.out_bus.clone();
            let dedup = dedup.clone();
            handles.push(tokio::spawn(async move {
                while let Some(msg) = sub.recv().await {
                    if dedup_ok(&dedup, &msg).await {
                        let _ = out_bus.publish(Some(msg));
                    } else {
                        debug!("realtime: suppressed duplicate transcription message from control transport");
                    }
                }
                out_bus.close();
            }));
        }

        {
            let media_control = self.media_control.clone();
            let out_bus = self.out_bus.clone();
            let dedup = dedup.clone();
            handles.push(tokio::spawn(async move {
                while let Some(msg) = media_control.recv_control().await {
                    if dedup_ok(&dedup, &msg).await {
                        let _ = out_bus.publish(Some(msg));
                    } else {
                        debug!("realtime: suppressed duplicate transcription message from media transport");
                    }
                }
            }));
        }

        self.events.stopper.wait().await;
        for handle in handles {
            handle.abort();
        }
        Ok(())
    }

    async fn exit_impl(&self) -> Result<()> {
        self.in_bus.close();
        self.control.close().await
    }
}

/// Drives a shared `Realtime` through the `Task` lifecycle. Kept separate
/// from `Realtime` itself (mirroring `ReaderTask`/`WriterTask`) because
/// every other component holds the same `Arc<Realtime>` for its buses —
/// `Realtime`'s own lifecycle methods only ever need `&self`, so the task
/// wrapper is the only place that needs to exist at all.
pub struct RealtimeTask {
    inner: Arc<Realtime>,
}

impl RealtimeTask {
    pub fn new(inner: Arc<Realtime>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Task for RealtimeTask {
    fn name(&self) -> &str {
        "realtime"
    }

    fn events(&self) -> &TaskEvents {
        &self.inner.events
    }

    async fn boot(&mut self) -> Result<()> {
        self.inner.boot_impl().await
    }

    async fn do_work(&mut self) -> Result<()> {
        self.inner.do_work_impl().await
    }

    async fn exit(&mut self) -> Result<()> {
        self.inner.exit_impl().await
    }
}
