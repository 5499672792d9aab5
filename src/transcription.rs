//! Transcription dispatcher (§4.11): subscribes to Realtime's `out_bus`
//! and dispatches transcription events to per-language user callbacks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::error::Result;
use crate::message::TranscriptionMessage;
use crate::realtime::Realtime;
use crate::task::{Task, TaskEvents};

/// A synchronous callback, run on `tokio`'s blocking-task pool so it never
/// blocks the dispatch task.
pub type SyncCallback = Arc<dyn Fn(TranscriptionMessage) + Send + Sync>;

/// An asynchronous callback, scheduled as an independent supervised task.
pub type AsyncCallback = Arc<
    dyn Fn(TranscriptionMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

#[derive(Clone)]
pub enum Callback {
    Sync(SyncCallback),
    Async(AsyncCallback),
}

pub struct Transcription {
    events: TaskEvents,
    realtime: Arc<Realtime>,
    callbacks: HashMap<String, Callback>,
    suppress_callback_errors: bool,
}

impl Transcription {
    pub fn new(realtime: Arc<Realtime>, callbacks: HashMap<String, Callback>) -> Self {
        Self {
            events: TaskEvents::new("transcription"),
            realtime,
            callbacks,
            suppress_callback_errors: true,
        }
    }

    pub fn with_suppress_callback_errors(mut self, suppress: bool) -> Self {
        self.suppress_callback_errors = suppress;
        self
    }

    fn dispatch(&self, msg: TranscriptionMessage) {
        let Some(callback) = self.callbacks.get(&msg.language).cloned() else {
            return;
        };
        let suppress = self.suppress_callback_errors;
        match callback {
            Callback::Sync(f) => {
                tokio::task::spawn_blocking(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(msg)));
                    if let Err(panic) = result {
                        if suppress {
                            error!("transcription callback panicked: {panic:?}");
                        } else {
                            std::panic::resume_unwind(panic);
                        }
                    }
                });
            }
            Callback::Async(f) => {
                tokio::spawn(async move {
                    f(msg).await;
                });
            }
        }
    }
}

#[async_trait]
impl Task for Transcription {
    fn name(&self) -> &str {
        "transcription"
    }

    fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot(&mut self) -> Result<()> {
        Ok(())
    }

    async fn do_work(&mut self) -> Result<()> {
        let mut sub = self.realtime.out_bus.subscribe("transcription", 256);
        loop {
            tokio::select! {
                msg = sub.recv() => {
                    match msg {
                        Some(msg) => {
                            if let Some(t) = msg.as_transcription() {
                                self.dispatch(t.clone());
                            }
                        }
                        None => break,
                    }
                }
                _ = self.events.stopper.wait() => break,
            }
        }
        Ok(())
    }

    async fn exit(&mut self) -> Result<()> {
        Ok(())
    }
}
