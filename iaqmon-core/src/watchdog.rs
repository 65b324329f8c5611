//! Soft task watchdog.
//!
//! Each long-running task registers a handle and feeds it once per outer
//! loop iteration. A starved entry means the task is wedged; the main loop
//! (or a test) polls [`starved_tasks`] and reports. The handle unregisters
//! on drop so finished tasks don't read as starved forever.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use log::{debug, error};

/// A task is considered starved after this long without a feed.
pub const STARVATION_TIMEOUT: Duration = Duration::from_secs(5);

fn registry() -> &'static Mutex<HashMap<&'static str, Instant>> {
    static REGISTRY: OnceLock<Mutex<HashMap<&'static str, Instant>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A registered watchdog user. Automatically unregisters on drop.
pub struct WatchdogHandle {
    name: &'static str,
}

impl WatchdogHandle {
    /// Register a new watchdog user with the given task name.
    pub fn register(name: &'static str) -> Self {
        registry().lock().unwrap().insert(name, Instant::now());
        debug!("Watchdog: registered '{name}'");
        Self { name }
    }

    /// Feed the watchdog. Call once per outer loop iteration.
    pub fn feed(&self) {
        if let Some(entry) = registry().lock().unwrap().get_mut(self.name) {
            *entry = Instant::now();
        } else {
            error!("Watchdog: feed for unregistered '{}'", self.name);
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        debug!("Watchdog: unregistering '{}'", self.name);
        registry().lock().unwrap().remove(self.name);
    }
}

/// Names of tasks that have not fed within [`STARVATION_TIMEOUT`].
#[must_use]
pub fn starved_tasks() -> Vec<&'static str> {
    let now = Instant::now();
    registry()
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, last)| now.duration_since(**last) > STARVATION_TIMEOUT)
        .map(|(name, _)| *name)
        .collect()
}
