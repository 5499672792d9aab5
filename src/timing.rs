//! The timeout inventory (§5 "Timeout inventory"): every bounded wait in
//! the supervision tree is named here so the same constant is shared
//! wherever the spec refers to it by name, rather than re-declared per
//! module with values that could drift apart.

use std::time::Duration;

/// Bounds system startup (Manager's `wait_for(start_system, ...)`) and the
/// Realtime task-config handshake.
pub const BOOT_TIMEOUT: Duration = Duration::from_secs(45);

/// Per-task graceful-stop budget during shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period after EOS before stopping Receiver/Monitor/Transcription/
/// Realtime, so trailing frames already in flight finish traversing the
/// remote pipeline.
pub const SAFE_PUBLICATION_END_DELAY: Duration = Duration::from_millis(1500);

/// Media track release timeout.
pub const TRACK_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote-track discovery retry cadence and budget.
pub const TRACK_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const TRACK_RETRY_MAX_ATTEMPTS: u32 = 15;

/// Handshake retry interval within `BOOT_TIMEOUT`.
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Sliding-window capacity for Monitor's silence detection, and the
/// CappedSet dedup bound.
pub const EMPTY_MESSAGE_THRESHOLD: usize = 100;
pub const DEDUP_CAPACITY: usize = 100;
