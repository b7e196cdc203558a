//! Rolling revenue window.
//!
//! Sixty one-second buckets of hack earnings.  Old buckets are zeroed lazily
//! whenever the ledger is touched, so recording and reading are both O(1)
//! amortised.

use std::time::{Duration, Instant};

const WINDOW_SECS: usize = 60;

#[derive(Debug, Clone)]
pub struct RevenueLedger {
    origin: Instant,
    buckets: [f64; WINDOW_SECS],
    /// Second (since `origin`) the newest bucket belongs to.
    head: u64,
    lifetime: f64,
}

impl RevenueLedger {
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            buckets: [0.0; WINDOW_SECS],
            head: 0,
            lifetime: 0.0,
        }
    }

    pub fn record(&mut self, at: Instant, amount: f64) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        let sec = self.second(at);
        self.advance(sec);
        if sec + (WINDOW_SECS as u64) <= self.head {
            // Older than the window.
            self.lifetime += amount;
            return;
        }
        self.buckets[(sec % WINDOW_SECS as u64) as usize] += amount;
        self.lifetime += amount;
    }

    /// Earnings inside the window ending at `now`.
    pub fn window_total(&mut self, now: Instant) -> f64 {
        self.advance(self.second(now));
        self.buckets.iter().sum()
    }

    /// Average income per second over the window (or over the time since
    /// `origin`, while that is shorter).
    pub fn per_second(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.origin);
        let span = elapsed.min(Duration::from_secs(WINDOW_SECS as u64)).as_secs_f64().max(1.0);
        self.window_total(now) / span
    }

    /// Everything ever recorded.
    pub fn lifetime(&self) -> f64 {
        self.lifetime
    }

    fn second(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_secs()
    }

    fn advance(&mut self, sec: u64) {
        if sec <= self.head {
            return;
        }
        let gap = (sec - self.head).min(WINDOW_SECS as u64);
        for s in (sec + 1 - gap)..=sec {
            self.buckets[(s % WINDOW_SECS as u64) as usize] = 0.0;
        }
        self.head = sec;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(origin: Instant, secs: u64) -> Instant {
        origin + Duration::from_secs(secs)
    }

    #[test]
    fn sums_within_the_window() {
        let t0 = Instant::now();
        let mut l = RevenueLedger::new(t0);
        l.record(at(t0, 0), 100.0);
        l.record(at(t0, 10), 50.0);
        l.record(at(t0, 10), 25.0);
        assert_eq!(l.window_total(at(t0, 30)), 175.0);
        assert_eq!(l.lifetime(), 175.0);
    }

    #[test]
    fn old_buckets_fall_out() {
        let t0 = Instant::now();
        let mut l = RevenueLedger::new(t0);
        l.record(at(t0, 0), 100.0);
        l.record(at(t0, 30), 10.0);
        assert_eq!(l.window_total(at(t0, 60)), 10.0);
        assert_eq!(l.window_total(at(t0, 500)), 0.0);
        assert_eq!(l.lifetime(), 110.0);
    }

    #[test]
    fn late_records_outside_the_window_only_count_toward_lifetime() {
        let t0 = Instant::now();
        let mut l = RevenueLedger::new(t0);
        l.window_total(at(t0, 200));
        l.record(at(t0, 5), 40.0);
        assert_eq!(l.window_total(at(t0, 200)), 0.0);
        assert_eq!(l.lifetime(), 40.0);
    }

    #[test]
    fn per_second_uses_elapsed_time_until_the_window_fills() {
        let t0 = Instant::now();
        let mut l = RevenueLedger::new(t0);
        l.record(at(t0, 1), 100.0);
        assert_eq!(l.per_second(at(t0, 10)), 10.0);
        l.record(at(t0, 100), 600.0);
        assert_eq!(l.per_second(at(t0, 100)), 10.0);
    }

    #[test]
    fn ignores_non_positive_amounts() {
        let t0 = Instant::now();
        let mut l = RevenueLedger::new(t0);
        l.record(t0, -5.0);
        l.record(t0, f64::NAN);
        assert_eq!(l.lifetime(), 0.0);
    }
}
