//! Receiver task (§4.10): drains translated audio from MediaTransport
//! into the Writer's input queue.
//!
//! Remote-track discovery retry (`TRACK_RETRY_MAX_ATTEMPTS` /
//! `TRACK_RETRY_DELAY`) is driven by the `MediaTransport` itself during
//! construction (`SfuMedia::connect`), not duplicated here — by the time
//! `Receiver` boots, Manager has already connected media successfully or
//! failed construction with a boot error.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::task::{Task, TaskEvents};
use crate::transport::MediaTransport;
use crate::writer::Writer;

pub struct Receiver<M: MediaTransport> {
    events: TaskEvents,
    media: Arc<Mutex<M>>,
    writer: Arc<dyn Writer>,
}

impl<M: MediaTransport> Receiver<M> {
    pub fn new(media: Arc<Mutex<M>>, writer: Arc<dyn Writer>) -> Self {
        Self {
            events: TaskEvents::new("receiver"),
            media,
            writer,
        }
    }
}

#[async_trait]
impl<M: MediaTransport> Task for Receiver<M> {
    fn name(&self) -> &str {
        "receiver"
    }

    fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot(&mut self) -> Result<()> {
        Ok(())
    }

    async fn do_work(&mut self) -> Result<()> {
        loop {
            if self.events.stopper.is_raised() {
                break;
            }
            let frame = {
                let mut media = self.media.lock().await;
                tokio::select! {
                    frame = media.recv_frame() => frame,
                    _ = self.events.stopper.wait() => None,
                }
            };
            match frame {
                Some(frame) => {
                    self.writer.write_frame(Some(frame)).await?;
                }
                None => {
                    debug!("receiver: inbound media stream ended");
                    break;
                }
            }
        }
        self.writer.write_frame(None).await?;
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        let media = self.media.lock().await;
        media.close().await
    }
}
