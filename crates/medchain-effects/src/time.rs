//! Physical time handlers.

use async_trait::async_trait;
use medchain_core::effects::PhysicalTimeEffects;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl PhysicalTimeEffects for SystemClock {
    async fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced time for tests and simulation.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    current_time: Arc<Mutex<u64>>,
}

impl SimulatedClock {
    /// Create a clock starting at `start_time_ms`.
    pub fn new(start_time_ms: u64) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start_time_ms)),
        }
    }

    /// Advance by `duration_ms`.
    pub fn advance(&self, duration_ms: u64) {
        *self.current_time.lock() += duration_ms;
    }

    /// Set the absolute time.
    pub fn set(&self, time_ms: u64) {
        *self.current_time.lock() = time_ms;
    }

    /// Current simulated time.
    pub fn get(&self) -> u64 {
        *self.current_time.lock()
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl PhysicalTimeEffects for SimulatedClock {
    async fn now_ms(&self) -> u64 {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_clock_advances() {
        let clock = SimulatedClock::new(1_000);
        assert_eq!(clock.now_ms().await, 1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms().await, 1_250);
        clock.set(5);
        assert_eq!(clock.clone().now_ms().await, 5);
    }

    #[tokio::test]
    async fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_ms().await > 1_577_836_800_000);
    }
}
