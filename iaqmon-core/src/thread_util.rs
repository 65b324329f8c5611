//! Helper for spawning named worker threads.
//!
//! Task names show up in thread dumps and watchdog reports; keep them short
//! (the embedded convention is under 16 characters).

use std::thread::JoinHandle;

/// Spawn a thread with a name.
///
/// # Panics
/// Panics if the OS refuses to spawn the thread (startup-critical).
pub fn spawn_named<F, T>(name: &str, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .unwrap_or_else(|e| panic!("failed to spawn thread '{name}': {e}"))
}
