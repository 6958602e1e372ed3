//! Handle generation.
//!
//! Handles combine a monotonic time component with a random component. The
//! clock and the random source are injected so tests can make them
//! deterministic.

use crate::types::Handle;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the time component of new handles.
pub trait Clock: Send {
    /// Microseconds since the Unix epoch.
    fn now_micros(&self) -> u64;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default()
    }
}

/// Clock that always reports the same instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_micros(&self) -> u64 {
        self.0
    }
}

/// Generates unique record handles.
pub struct HandleGenerator {
    clock: Box<dyn Clock>,
    rng: Box<dyn RngCore + Send>,
    last_time: u64,
}

impl HandleGenerator {
    pub fn new(clock: Box<dyn Clock>, rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            clock,
            rng,
            last_time: 0,
        }
    }

    /// Wall clock plus an entropy-seeded RNG.
    pub fn from_entropy() -> Self {
        Self::new(Box::new(SystemClock), Box::new(StdRng::from_entropy()))
    }

    /// Deterministic generator for tests.
    pub fn seeded(clock: impl Clock + 'static, seed: u64) -> Self {
        Self::new(Box::new(clock), Box::new(StdRng::seed_from_u64(seed)))
    }

    /// Produce the next handle.
    ///
    /// The time component never repeats or goes backwards within one
    /// generator, even when the clock stalls.
    pub fn next_handle(&mut self) -> Handle {
        let now = self.clock.now_micros();
        let time = if now > self.last_time {
            now
        } else {
            self.last_time + 1
        };
        self.last_time = time;

        let mut random = [0u8; 4];
        self.rng.fill_bytes(&mut random);
        Handle::new(format!("{:012x}{}", time, hex::encode(random)))
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}
