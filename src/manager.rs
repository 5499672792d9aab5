//! Manager (§4.12): constructs, starts, supervises, and shuts down every
//! other component in the defined order.

use std::collections::HashMap;
use std::collections::HashMap as Map;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::audio::ChunkFraming;
use crate::config::Config;
use crate::error::{PalabraError, Result};
use crate::logger::Logger;
use crate::monitor::Monitor;
use crate::reader::{Reader, ReaderTask};
use crate::realtime::{media_control_source, Realtime, RealtimeTask};
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::stat::{Stat, TaskIntrospector, TaskSnapshot};
use crate::task::{run_task, Task, TaskEvents};
use crate::timing::{BOOT_TIMEOUT, SAFE_PUBLICATION_END_DELAY, SHUTDOWN_TIMEOUT};
use crate::transcription::{Callback, Transcription};
use crate::transport::{ControlTransport, MediaTransport};
use crate::writer::{Writer, WriterTask};

/// Manager's one-way publication surface for Stat (§9 "Cyclic/back
/// references"): Stat reads through this, never through an `Arc<Manager>`.
#[derive(Clone, Default)]
pub struct TaskRegistry(Arc<RwLock<Map<String, TaskEvents>>>);

impl TaskRegistry {
    fn register(&self, name: impl Into<String>, events: TaskEvents) {
        self.0.write().unwrap().insert(name.into(), events);
    }
}

impl TaskIntrospector for TaskRegistry {
    fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.0
            .read()
            .unwrap()
            .iter()
            .map(|(name, events)| TaskSnapshot {
                name: name.clone(),
                ready: events.ready.is_raised(),
                eof: events.eof.is_raised(),
                stopper: events.stopper.is_raised(),
            })
            .collect()
    }
}

struct TaskHandle {
    events: TaskEvents,
    join: tokio::task::JoinHandle<Result<()>>,
}

fn spawn_task<T: Task + 'static>(task: T) -> TaskHandle {
    let events = task.events().clone();
    let join = tokio::spawn(async move {
        let mut task = task;
        run_task(&mut task).await
    });
    TaskHandle { events, join }
}

/// Session construction parameters: source reader, target writer, both
/// transports, config, and optional per-language transcription callbacks.
pub struct ManagerConfig<M: MediaTransport + 'static> {
    pub reader: Arc<tokio::sync::Mutex<dyn Reader>>,
    pub writer: Arc<dyn Writer>,
    pub control: Arc<dyn ControlTransport>,
    pub media: Arc<tokio::sync::Mutex<M>>,
    pub config: Config,
    pub callbacks: HashMap<String, Callback>,
    pub sample_rate: u32,
    pub num_channels: u16,
    pub chunk_duration_ms: u32,
    pub log_file: Option<PathBuf>,
    pub debug: bool,
}

pub struct Manager {
    events: TaskEvents,
    tasks: Map<String, TaskHandle>,
    registry: TaskRegistry,
}

impl Manager {
    /// Construction validates `|targets| == 1` (enforced by `Config`'s
    /// type, see config.rs), applies track settings to the Reader, and
    /// spawns every subordinate task. Tasks begin running immediately
    /// (tokio tasks are cheap to spawn and idle until polled); `start`
    /// below sequences only the *observation* of each `ready` latch, which
    /// is what the specified startup order actually requires.
    pub async fn new<M: MediaTransport + 'static>(cfg: ManagerConfig<M>) -> Result<Self> {
        crate::process_registry::init();

        {
            let mut reader = cfg.reader.lock().await;
            reader.set_track_settings(crate::reader::TrackSettings {
                sample_rate: cfg.sample_rate,
                num_channels: cfg.num_channels,
            });
        }

        let registry = TaskRegistry::default();
        let mut tasks = Map::new();

        let realtime = Arc::new(Realtime::new(
            cfg.control.clone(),
            media_control_source(cfg.media.clone()),
            cfg.config.clone(),
        ));

        let logger = Logger::new(
            realtime.clone(),
            cfg.log_file.clone(),
            cfg.config.clone(),
            cfg.debug,
            0.0,
        );
        let logger_handle = spawn_task(logger);
        registry.register("logger", logger_handle.events.clone());
        tasks.insert("logger".to_string(), logger_handle);

        let stat = Stat::new(Arc::new(registry.clone()));
        let stat_handle = spawn_task(stat);
        registry.register("stat", stat_handle.events.clone());
        tasks.insert("stat".to_string(), stat_handle);

        let monitor = Monitor::new(realtime.clone());
        let monitor_handle = spawn_task(monitor);
        registry.register("monitor", monitor_handle.events.clone());
        tasks.insert("monitor".to_string(), monitor_handle);

        let realtime_handle = spawn_task(RealtimeTask::new(realtime.clone()));
        registry.register("realtime", realtime_handle.events.clone());
        tasks.insert("realtime".to_string(), realtime_handle);

        let transcription = Transcription::new(realtime.clone(), cfg.callbacks);
        let transcription_handle = spawn_task(transcription);
        registry.register("transcription", transcription_handle.events.clone());
        tasks.insert("transcription".to_string(), transcription_handle);

        let writer_task = WriterTask::new(cfg.writer.clone());
        let writer_handle = spawn_task(writer_task);
        registry.register("writer", writer_handle.events.clone());
        tasks.insert("writer".to_string(), writer_handle);

        let receiver = Receiver::new(cfg.media.clone(), cfg.writer.clone());
        let receiver_handle = spawn_task(receiver);
        registry.register("receiver", receiver_handle.events.clone());
        tasks.insert("receiver".to_string(), receiver_handle);

        let reader_task = ReaderTask::new(cfg.reader.clone());
        let reader_ready = reader_task.events().ready.clone();

        let framing = ChunkFraming::new(cfg.sample_rate, cfg.num_channels, cfg.chunk_duration_ms);
        let sender = Sender::new(
            cfg.reader.clone(),
            reader_ready,
            cfg.media.clone(),
            realtime.clone(),
            framing,
        );
        let sender_handle = spawn_task(sender);
        registry.register("sender", sender_handle.events.clone());
        tasks.insert("sender".to_string(), sender_handle);

        let reader_handle = spawn_task(reader_task);
        registry.register("reader", reader_handle.events.clone());
        tasks.insert("reader".to_string(), reader_handle);

        Ok(Self {
            events: TaskEvents::new("manager"),
            tasks,
            registry,
        })
    }

    fn ready_of(&self, name: &str) -> Arc<crate::task::TaskEvent> {
        self.tasks[name].events.ready.clone()
    }

    /// Handle onto Manager's own stopper latch (§4.12), so a caller running
    /// `run()` on another task can request shutdown from the outside.
    pub fn stopper(&self) -> Arc<crate::task::TaskEvent> {
        self.events.stopper.clone()
    }

    /// Await the specified startup order, bounded by `BOOT_TIMEOUT`.
    pub async fn start(&mut self) -> Result<()> {
        let startup = async {
            self.ready_of("logger").wait().await;
            self.ready_of("stat").wait().await;

            let parallel_group = ["monitor", "realtime", "transcription", "writer", "receiver", "sender"];
            let waits = parallel_group.iter().map(|n| self.ready_of(n));
            futures::future::join_all(waits.map(|ev| async move { ev.wait().await })).await;

            self.ready_of("reader").wait().await;
        };

        tokio::time::timeout(BOOT_TIMEOUT, startup)
            .await
            .map_err(|_| PalabraError::Boot("system startup exceeded BOOT_TIMEOUT".into()))?;

        debug!("manager: startup complete");
        Ok(())
    }

    /// Steady-state loop: watches for the first `eof`/`stopper` raised by
    /// any subordinate task and, on observing one, begins graceful
    /// shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let triggered = self.events.stopper.is_raised()
                || self
                    .tasks
                    .values()
                    .any(|h| h.events.eof.is_raised() || h.events.stopper.is_raised());
            if triggered {
                break;
            }
        }

        self.events.stopper.raise();
        self.shutdown().await
    }

    async fn stop_with_retries(&mut self, name: &str, timeout: Duration, attempts: u32) {
        let Some(handle) = self.tasks.get_mut(name) else {
            return;
        };
        handle.events.stopper.raise();
        for attempt in 0..attempts {
            match tokio::time::timeout(timeout, &mut handle.join).await {
                Ok(Ok(Ok(()))) => return,
                Ok(Ok(Err(e))) => {
                    warn!("{name} exited with error: {e}");
                    return;
                }
                Ok(Err(e)) => {
                    warn!("{name} task panicked: {e}");
                    return;
                }
                Err(_) => {
                    warn!(
                        "{name} did not stop within {timeout:?} (attempt {}/{attempts})",
                        attempt + 1
                    );
                }
            }
        }
        error!("{name} exceeded all stop attempts, force-cancelling");
        handle.join.abort();
    }

    /// Raise `stopper` on every named task and await them all concurrently,
    /// one bounded `timeout` attempt each, force-cancelling stragglers —
    /// the group analog of `stop_with_retries`. A single `iter_mut` pass
    /// hands out disjoint `&mut TaskHandle`s so every task's join can be
    /// polled inside one `join_all` without the self-borrow conflicts a
    /// per-name `get_mut` inside the future itself would hit.
    async fn stop_parallel(&mut self, names: &[&str], timeout: Duration) {
        let futures = self
            .tasks
            .iter_mut()
            .filter(|(name, _)| names.contains(&name.as_str()))
            .map(|(name, handle)| async move {
                handle.events.stopper.raise();
                match tokio::time::timeout(timeout, &mut handle.join).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => warn!("{name} exited with error: {e}"),
                    Ok(Err(e)) => warn!("{name} task panicked: {e}"),
                    Err(_) => {
                        warn!("{name} did not stop within {timeout:?}, force-cancelling");
                        handle.join.abort();
                    }
                }
            });
        futures::future::join_all(futures).await;
    }

    /// Graceful shutdown protocol (§4.12).
    async fn shutdown(&mut self) -> Result<()> {
        self.stop_parallel(&["reader", "sender"], SHUTDOWN_TIMEOUT).await;

        tokio::time::sleep(SAFE_PUBLICATION_END_DELAY).await;

        self.stop_parallel(&["receiver", "monitor", "transcription", "realtime"], SHUTDOWN_TIMEOUT)
            .await;

        // Writer mercy: protect trailing audio that was in flight when EOS
        // was declared with extra retry budget before force-cancelling.
        self.stop_with_retries("writer", SHUTDOWN_TIMEOUT, 3).await;

        self.events.stopper.raise();
        self.stop_with_retries("stat", SHUTDOWN_TIMEOUT, 1).await;
        self.stop_with_retries("logger", SHUTDOWN_TIMEOUT, 1).await;

        crate::process_registry::drain_on_exit();
        Ok(())
    }
}
