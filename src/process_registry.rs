//! Process-wide registry of child processes spawned by pipe readers, so
//! they can be reaped on shutdown or on a terminating signal (§9 "Global
//! mutable state"). A `OnceLock<Mutex<...>>` singleton plus a
//! `tokio::signal::ctrl_c` listener installed exactly once stand in for
//! the original's `atexit`/signal-handler registration.

use std::process::Child;
use std::sync::{Mutex, OnceLock};

use tracing::{error, info, warn};

static REGISTRY: OnceLock<Mutex<Vec<Child>>> = OnceLock::new();
static SIGNAL_HANDLER_INSTALLED: OnceLock<()> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<Child>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Register a child process for cleanup. Idempotent to call repeatedly;
/// each call tracks one additional process.
pub fn register(child: Child) {
    registry().lock().unwrap().push(child);
}

/// Kill and reap every tracked child. Safe to call more than once.
fn drain() {
    let mut children = registry().lock().unwrap();
    for mut child in children.drain(..) {
        match child.kill() {
            Ok(()) => {
                let _ = child.wait();
            }
            Err(e) => warn!("failed to kill child pid {:?}: {e}", child.id()),
        }
    }
}

pub fn drain_on_exit() {
    info!("draining process registry on exit");
    drain();
}

/// Install a `ctrl_c` listener exactly once that drains the registry
/// before letting the process terminate. Chained: we drain, then the
/// default Ctrl-C disposition still applies since we do not `exit()`
/// ourselves, only clean up and return.
pub fn init() {
    if SIGNAL_HANDLER_INSTALLED.set(()).is_err() {
        return;
    }
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("signal received, draining process registry");
            drain();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn register_and_drain_kills_process() {
        let child = Command::new("sleep").arg("5").spawn().unwrap();
        let pid = child.id();
        register(child);
        drain();
        // A second drain on an already-empty registry must not panic.
        drain();
        assert!(pid > 0);
    }
}
