//! Task supervision core: a monotone latch (`TaskEvent`) and a minimal
//! `boot -> ready -> do_work -> exit` lifecycle (`Task`), replacing the
//! original implementation's `asyncio.Event` arithmetic sugar (`+event`,
//! `-event`, `bool(event)`) with a plain `raise`/`lower`/`is_raised`/`wait`
//! API, per the "cooperative events" redesign note.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::Result;

/// A monotone, broadcastable latch with a named owner, used for a task's
/// `ready`, `eof`, and `stopper` signals.
///
/// Transitions are idempotent: raising an already-raised event, or
/// lowering an already-lowered one, is a no-op beyond logging. Production
/// code paths only ever raise; `lower` exists for tests and for the rare
/// latch that is deliberately reusable.
pub struct TaskEvent {
    owner: std::sync::Mutex<String>,
    flag: AtomicBool,
    notify: Notify,
}

impl Default for TaskEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskEvent {
    pub fn new() -> Self {
        Self {
            owner: std::sync::Mutex::new(String::new()),
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn set_owner(&self, owner: impl Into<String>) {
        *self.owner.lock().unwrap() = owner.into();
    }

    fn log(&self) {
        let status = if self.is_raised() { "[+]" } else { "[-]" };
        debug!("{status} {}", self.owner.lock().unwrap());
    }

    /// Set the latch and wake every waiter. Idempotent.
    pub fn raise(&self) {
        let was_set = self.flag.swap(true, Ordering::SeqCst);
        self.log();
        if !was_set {
            self.notify.notify_waiters();
        }
    }

    /// Clear the latch. Idempotent. Not used by production set-only paths.
    pub fn lower(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.log();
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Await the latch being raised. Returns immediately if already raised.
    pub async fn wait(&self) {
        loop {
            if self.is_raised() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for TaskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskEvent({})", self.is_raised())
    }
}

/// The three latches every task owns, grouped so a supervisor can hold
/// cheap `Arc` handles to them independently of the task it spawned.
#[derive(Clone)]
pub struct TaskEvents {
    pub ready: Arc<TaskEvent>,
    pub eof: Arc<TaskEvent>,
    pub stopper: Arc<TaskEvent>,
}

impl TaskEvents {
    pub fn new(name: &str) -> Self {
        let ready = Arc::new(TaskEvent::new());
        ready.set_owner(format!("{name}.ready"));
        let eof = Arc::new(TaskEvent::new());
        eof.set_owner(format!("{name}.eof"));
        let stopper = Arc::new(TaskEvent::new());
        stopper.set_owner(format!("{name}.stopper"));
        Self { ready, eof, stopper }
    }
}

/// A long-running cooperative task in the supervision tree.
///
/// `run_task` drives the lifecycle: `boot` (load resources), raise
/// `ready`, `do_work` (the task's main loop, runs until `stopper` or
/// `eof`), then `exit` (cleanup, always called, even on error or
/// cancellation unwind).
#[async_trait]
pub trait Task: Send {
    fn name(&self) -> &str;
    fn events(&self) -> &TaskEvents;

    async fn boot(&mut self) -> Result<()>;
    async fn do_work(&mut self) -> Result<()>;
    async fn exit(&mut self) -> Result<()>;
}

/// Drive one task through its full lifecycle. Used by `Manager` inside a
/// `tokio::spawn`, and directly by tests that don't need supervision.
pub async fn run_task<T: Task + ?Sized>(task: &mut T) -> Result<()> {
    let name = task.name().to_string();
    debug!("{name} starting...");
    let boot_res = task.boot().await;
    if let Err(e) = &boot_res {
        tracing::error!("{name} failed to boot: {e}");
        task.events().stopper.raise();
        let _ = task.exit().await;
        return boot_res;
    }
    task.events().ready.raise();
    debug!("{name} ready, doing...");
    let do_res = task.do_work().await;
    if let Err(e) = &do_res {
        tracing::error!("{name} failed: {e}");
    }
    debug!("{name} done, exiting...");
    task.events().stopper.raise();
    let exit_res = task.exit().await;
    do_res.and(exit_res)
}
