//! Single-flight guards: at most one outstanding action per key.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone, Default)]
pub struct SingleFlight {
    active: Arc<Mutex<HashSet<String>>>,
}

/// Held while the action runs; dropping it frees the key on every exit path.
pub struct FlightGuard {
    key: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl SingleFlight {
    pub fn new() -> Self { Self::default() }

    /// Claim `key`, or `None` when an action for it is already outstanding.
    pub fn try_begin(&self, key: &str) -> Option<FlightGuard> {
        let mut set = self.active.lock();
        if !set.insert(key.to_string()) { return None; }
        Some(FlightGuard { key: key.to_string(), active: self.active.clone() })
    }

    pub fn is_active(&self, key: &str) -> bool { self.active.lock().contains(key) }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}
