//! Sender task (§4.9): paces Reader output into MediaTransport at
//! real-time cadence. The `sleep(chunk_duration_ms)` is the pacing anchor
//! (§9 "Cooperative sleep as pacing") — never remove it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::audio::ChunkFraming;
use crate::error::Result;
use crate::message::{ControlMessage, EndTaskData};
use crate::realtime::Realtime;
use crate::reader::Reader;
use crate::task::{Task, TaskEvent, TaskEvents};
use crate::transport::MediaTransport;

pub struct Sender<M: MediaTransport> {
    events: TaskEvents,
    reader: Arc<Mutex<dyn Reader>>,
    reader_ready: Arc<TaskEvent>,
    media: Arc<Mutex<M>>,
    realtime: Arc<Realtime>,
    framing: ChunkFraming,
}

impl<M: MediaTransport> Sender<M> {
    pub fn new(
        reader: Arc<Mutex<dyn Reader>>,
        reader_ready: Arc<TaskEvent>,
        media: Arc<Mutex<M>>,
        realtime: Arc<Realtime>,
        framing: ChunkFraming,
    ) -> Self {
        Self {
            events: TaskEvents::new("sender"),
            reader,
            reader_ready,
            media,
            realtime,
            framing,
        }
    }
}

#[async_trait]
impl<M: MediaTransport> Task for Sender<M> {
    fn name(&self) -> &str {
        "sender"
    }

    fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot(&mut self) -> Result<()> {
        Ok(())
    }

    async fn do_work(&mut self) -> Result<()> {
        let chunk_bytes = self.framing.chunk_bytes();
        let pacing = std::time::Duration::from_millis(self.framing.chunk_duration_ms as u64);

        // `read` is only valid once the Reader has announced `ready` (§4.2).
        tokio::select! {
            _ = self.reader_ready.wait() => {}
            _ = self.events.stopper.wait() => return Ok(()),
        }

        loop {
            if self.events.stopper.is_raised() {
                break;
            }

            let chunk = {
                let mut reader = self.reader.lock().await;
                reader.read(chunk_bytes).await
            };

            let Some(chunk) = chunk else {
                debug!("sender: reader EOF");
                self.events.eof.raise();
                let _ = self.realtime.send(ControlMessage::EndTask {
                    data: EndTaskData { force: false },
                });
                break;
            };

            if chunk.is_empty() {
                continue;
            }

            let frame = self.framing.pad_to_full_frame(chunk)?;
            {
                let media = self.media.lock().await;
                media.publish_frame(frame).await?;
            }
            tokio::time::sleep(pacing).await;
        }
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        Ok(())
    }
}
