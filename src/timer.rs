use std::time::{Duration, Instant};

use crate::rng::SeededRng;

// In seconds.
const JITTER_RANGE: f32 = 0.5;

/// Retransmission schedule for one handshake flight.
///
/// The timeout doubles on every attempt and carries a jitter of ±0.25s.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    start_rto: Duration,
    retries: usize,
    rto: Duration,
    jitter: f32,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, retries: usize, rng: &mut SeededRng) -> Self {
        Self {
            start_rto,
            retries,
            rto: start_rto,
            jitter: Self::jitter(rng),
            left: retries,
        }
    }

    pub fn reset(&mut self, rng: &mut SeededRng) {
        self.rto = self.start_rto;
        self.jitter = Self::jitter(rng);
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        // Jitter never dominates a short start rto.
        let jitter = Duration::from_secs_f32(self.jitter.abs()).min(self.rto / 4);
        if self.jitter < 0.0 {
            self.rto.saturating_sub(jitter)
        } else {
            self.rto.saturating_add(jitter)
        }
        .max(Duration::from_millis(10))
    }

    /// Deadline for the current attempt counted from `now`, `None` when it
    /// lies beyond what an [`Instant`] can represent.
    pub fn deadline(&self, now: Instant) -> Option<Instant> {
        now.checked_add(self.rto())
    }

    fn jitter(rng: &mut SeededRng) -> f32 {
        rng.random::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    /// Record one retransmission.
    pub fn attempt(&mut self, rng: &mut SeededRng) {
        let Some(n) = self.left.checked_sub(1) else {
            return;
        };

        self.left = n;
        self.jitter = Self::jitter(rng);
        self.rto = self.rto.saturating_mul(2);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rto_grows_until_retries_exhausted() {
        let mut rng = SeededRng::new(Some(42));
        let mut exp = ExponentialBackoff::new(Duration::from_secs(1), 3, &mut rng);

        let mut last = exp.rto();
        for _ in 0..3 {
            assert!(exp.can_retry());
            exp.attempt(&mut rng);
            let next = exp.rto();
            assert!(next > last);
            last = next;
        }

        assert!(!exp.can_retry());
        exp.attempt(&mut rng);
        assert_eq!(exp.rto(), last);
    }

    #[test]
    fn reset_restores_start() {
        let mut rng = SeededRng::new(Some(7));
        let mut exp = ExponentialBackoff::new(Duration::from_millis(200), 2, &mut rng);
        exp.attempt(&mut rng);
        exp.attempt(&mut rng);
        assert!(!exp.can_retry());

        exp.reset(&mut rng);
        assert!(exp.can_retry());
        assert!(exp.rto() <= Duration::from_millis(250));
    }

    #[test]
    fn unbounded_rto_has_no_deadline() {
        let mut rng = SeededRng::new(Some(3));
        let mut exp = ExponentialBackoff::new(Duration::MAX, 2, &mut rng);
        exp.attempt(&mut rng);
        assert!(exp.rto() >= Duration::from_secs(u64::MAX / 2));
        assert!(exp.deadline(Instant::now()).is_none());
    }
}
