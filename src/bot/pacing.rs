//! Pause between attack cycles
//!
//! A fixed rhythm is easy to spot, so the pause can be drawn at random
//! between the configured bounds.

use std::time::Duration;

use rand::Rng;

use crate::config::{PauseMode, PauseSettings};

/// Picks the idle time between cycles
pub struct Pacer<R: Rng> {
    rng: R,
}

impl Default for Pacer<rand::rngs::ThreadRng> {
    fn default() -> Self {
        Self::new(rand::thread_rng())
    }
}

impl<R: Rng> Pacer<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Pause for the given settings. Bounds given in the wrong order are swapped.
    pub fn pause(&mut self, settings: &PauseSettings) -> Duration {
        let (low, high) = if settings.max < settings.min {
            (settings.max, settings.min)
        } else {
            (settings.min, settings.max)
        };
        if low == high {
            return low;
        }
        match settings.mode {
            PauseMode::Midpoint => low + (high - low) / 2,
            PauseMode::Random => {
                let millis = self
                    .rng
                    .gen_range(low.as_millis() as u64..=high.as_millis() as u64);
                Duration::from_millis(millis)
            }
        }
    }
}
