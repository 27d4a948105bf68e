//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on handing a value to the opposite side.
    pub propagation_timeout: Duration,
    /// Events buffered per subscriber before new ones are dropped for it.
    pub event_capacity: usize,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            propagation_timeout: Duration::from_millis(100),
            event_capacity: 1024,
        }
    }

    /// Sets the propagation timeout.
    pub fn with_propagation_timeout(mut self, timeout: Duration) -> Self {
        self.propagation_timeout = timeout;
        self
    }

    /// Sets the per-subscriber event buffer.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
