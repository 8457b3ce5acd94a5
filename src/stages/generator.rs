use crate::stage::{Capability, Stage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::warn;

/// Pure producer emitting random `i32` values
pub struct Int32RandomGenerator {
    name: String,
    rng: StdRng,
    range: RangeInclusive<i32>,
    limit: Option<u64>,
    emitted: u64,
    interval: Option<Duration>,
}

impl Int32RandomGenerator {
    pub const STAGE_NAME: &'static str = "Int32RandomGenerator";

    /// Unbounded generator over the full `i32` range
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic generator, useful for reproducible pipelines
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            name: Self::STAGE_NAME.to_string(),
            rng,
            range: i32::MIN..=i32::MAX,
            limit: None,
            emitted: 0,
            interval: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Restrict values to `range`; an empty range ends the stream at once
    pub fn with_range(mut self, range: RangeInclusive<i32>) -> Self {
        self.range = range;
        self
    }

    /// Stop after `limit` values
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Pause between values
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl Default for Int32RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Int32RandomGenerator {
    type In = ();
    type Out = i32;

    const CAPABILITY: Capability = Capability::Producer;

    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self) -> Option<i32> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return None;
        }
        if self.range.is_empty() {
            warn!(stage = %self.name, range = ?self.range, "empty value range, ending stream");
            return None;
        }
        if let Some(interval) = self.interval {
            if self.emitted > 0 {
                std::thread::sleep(interval);
            }
        }
        self.emitted += 1;
        Some(self.rng.random_range(self.range.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_ends_stream() {
        let mut generator = Int32RandomGenerator::seeded(1).with_limit(3);
        assert!(generator.produce().is_some());
        assert!(generator.produce().is_some());
        assert!(generator.produce().is_some());
        assert!(generator.produce().is_none());
        assert_eq!(generator.emitted(), 3);
    }

    #[test]
    fn test_values_stay_in_range() {
        let mut generator = Int32RandomGenerator::seeded(7).with_range(-5..=5);
        for _ in 0..100 {
            let value = generator.produce().unwrap();
            assert!((-5..=5).contains(&value));
        }
    }

    #[test]
    fn test_empty_range_ends_stream() {
        let mut generator = Int32RandomGenerator::seeded(3).with_range(5..=1);
        assert_eq!(generator.produce(), None);
        assert_eq!(generator.emitted(), 0);

        let mut single = Int32RandomGenerator::seeded(3).with_range(4..=4);
        assert_eq!(single.produce(), Some(4));
    }

    #[test]
    fn test_seeded_generators_agree() {
        let mut a = Int32RandomGenerator::seeded(42).with_limit(5);
        let mut b = Int32RandomGenerator::seeded(42).with_limit(5);
        let left: Vec<_> = std::iter::from_fn(|| a.produce()).collect();
        let right: Vec<_> = std::iter::from_fn(|| b.produce()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_declared_as_producer() {
        assert_eq!(Int32RandomGenerator::CAPABILITY, Capability::Producer);
        assert_eq!(Int32RandomGenerator::new().name(), "Int32RandomGenerator");
    }
}
