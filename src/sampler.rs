//! Counting-based admission of observed requests.

use std::num::NonZeroU64;

/// Decides which observed requests get trace spans created.
///
/// Keeps a monotonically increasing counter of every observed request,
/// sampled or not, and admits one out of every `rate`: an observation is
/// admitted when the counter is a multiple of the rate. The rate is a
/// positive integer (invalid rates are unrepresentable) and may be
/// replaced at runtime, taking effect for the next decision.
#[derive(Clone, Debug)]
pub(crate) struct CountingSampler {
    rate: NonZeroU64,
    observed: u64,
}

impl CountingSampler {
    /// Creates a sampler admitting one of every `rate` observations.
    pub(crate) fn new(rate: NonZeroU64) -> Self {
        CountingSampler { rate, observed: 0 }
    }

    /// Replaces the sampling rate for subsequent observations.
    pub(crate) fn set_rate(&mut self, rate: NonZeroU64) {
        self.rate = rate;
    }

    /// Records one observation and reports whether it is admitted.
    pub(crate) fn observe(&mut self) -> bool {
        self.observed = self.observed.wrapping_add(1);
        self.observed % self.rate == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn rate_one_admits_everything() {
        let mut sampler = CountingSampler::new(rate(1));
        assert!((0..100).all(|_| sampler.observe()));
    }

    #[test]
    fn admits_one_of_every_n() {
        let mut sampler = CountingSampler::new(rate(4));
        let admitted = (0..100).filter(|_| sampler.observe()).count();
        assert_eq!(admitted, 25);
    }

    #[test]
    fn rate_change_applies_to_next_decision() {
        let mut sampler = CountingSampler::new(rate(1));
        assert!(sampler.observe());
        assert!(sampler.observe());
        sampler.set_rate(rate(1000));
        let admitted = (0..100).filter(|_| sampler.observe()).count();
        assert_eq!(admitted, 0);
    }
}
