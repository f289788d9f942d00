//! Test RNG — deterministic `DeterministicRng` implementations for tests.

use threadquest_core::rng::DeterministicRng;

/// A no-op RNG that always returns `min` for `next_u32_range`. Short ids drawn from it are all the first alphabet symbol.
#[derive(Debug)]
pub struct MockRng;

impl DeterministicRng for MockRng {
    fn next_u32_range(&mut self, min: u32, _max: u32) -> u32 {
        min
    }
}

/// An RNG that returns values from a predetermined sequence, wrapping around
/// when exhausted. Used where a test needs a specific short id.
#[derive(Debug)]
pub struct SequenceRng {
    values: Vec<u32>,
    index: usize,
}

impl SequenceRng {
    /// Create a new `SequenceRng` with the given values.
    #[must_use]
    pub fn new(values: Vec<u32>) -> Self {
        Self { values, index: 0 }
    }
}

impl DeterministicRng for SequenceRng {
    fn next_u32_range(&mut self, min: u32, max: u32) -> u32 {
        if self.values.is_empty() {
            return min;
        }
        let val = self.values[self.index % self.values.len()];
        self.index += 1;
        val.clamp(min, max)
    }
}
