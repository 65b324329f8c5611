//! Monotonic time since boot, and the optional wall clock for ABC.

use std::sync::OnceLock;
use std::time::Instant;

fn boot_instant() -> Instant {
    static BOOT: OnceLock<Instant> = OnceLock::new();
    *BOOT.get_or_init(Instant::now)
}

/// Milliseconds since the process started. Monotonic, never wraps in
/// practice (u64 ms is ~584 million years).
#[must_use]
pub fn boot_millis() -> u64 {
    // First call anchors the epoch.
    let anchor = boot_instant();
    u64::try_from(anchor.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Source of synchronized local wall-clock time.
///
/// The ABC night detector needs the local time of day; a monotonic clock
/// cannot provide it. Implementations return `None` until their time source
/// is actually synchronized; ABC stays dormant on `None` rather than
/// learning baselines at made-up hours.
pub trait WallClock: Send {
    /// Minutes since local midnight, or `None` when not synchronized.
    fn local_minutes(&self) -> Option<u16>;
}

/// A fixed wall clock for tests and demos.
pub struct FixedWallClock(pub Option<u16>);

impl WallClock for FixedWallClock {
    fn local_minutes(&self) -> Option<u16> {
        self.0
    }
}
