//! Stat task (§4.12 design note, §9 "Cyclic/back references"): a periodic
//! task-state snapshot for diagnostics. Stat does not hold a reference to
//! Manager; it consumes an immutable snapshot through the one-way
//! `TaskIntrospector` interface, breaking the cycle the original's
//! Stat<->Manager back-reference would otherwise create.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::task::{Task, TaskEvents};

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);
const STALL_THRESHOLD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub name: String,
    pub ready: bool,
    pub eof: bool,
    pub stopper: bool,
}

/// One-way view Manager publishes of its own task tree; Stat only reads
/// through this trait and never holds an `Arc<Manager>` directly.
pub trait TaskIntrospector: Send + Sync {
    fn snapshot(&self) -> Vec<TaskSnapshot>;
}

pub struct Stat {
    events: TaskEvents,
    introspector: Arc<dyn TaskIntrospector>,
    last_eof_seen_at: std::sync::Mutex<Option<tokio::time::Instant>>,
}

impl Stat {
    pub fn new(introspector: Arc<dyn TaskIntrospector>) -> Self {
        Self {
            events: TaskEvents::new("stat"),
            introspector,
            last_eof_seen_at: std::sync::Mutex::new(None),
        }
    }

    /// Logs a stall warning if a task has been stuck between `eof` and
    /// `stopper` longer than `STALL_THRESHOLD` (dbg_hang_coro-style
    /// diagnosis, without porting coroutine-frame internals).
    fn diagnose(&self, snapshots: &[TaskSnapshot]) {
        let any_stalled = snapshots.iter().any(|s| s.eof && !s.stopper);
        let mut last_seen = self.last_eof_seen_at.lock().unwrap();
        if any_stalled {
            let now = tokio::time::Instant::now();
            let since = last_seen.get_or_insert(now);
            if now.duration_since(*since) > STALL_THRESHOLD {
                warn!("stat: one or more tasks stalled between eof and stopper for over {STALL_THRESHOLD:?}");
            }
        } else {
            *last_seen = None;
        }
    }
}

#[async_trait]
impl Task for Stat {
    fn name(&self) -> &str {
        "stat"
    }

    fn events(&self) -> &TaskEvents {
        &self.events
    }

    async fn boot(&mut self) -> Result<()> {
        Ok(())
    }

    async fn do_work(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SNAPSHOT_INTERVAL) => {
                    let snapshots = self.introspector.snapshot();
                    debug!("stat snapshot: {} tasks tracked", snapshots.len());
                    self.diagnose(&snapshots);
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

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeIntrospector;
    impl TaskIntrospector for FakeIntrospector {
        fn snapshot(&self) -> Vec<TaskSnapshot> {
            vec![TaskSnapshot {
                name: "reader".into(),
                ready: true,
                eof: false,
                stopper: false,
            }]
        }
    }

    #[tokio::test]
    async fn stat_stops_on_stopper() {
        let stat = Stat::new(Arc::new(FakeIntrospector));
        let events = stat.events.clone();
        let handle = tokio::spawn(async move {
            let mut stat = stat;
            crate::task::run_task(&mut stat).await
        });
        events.ready.wait().await;
        events.stopper.raise();
        let result = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok());
    }
}
