//! Reconnect backoff policy.
//!
//! Exponential delay starting at `initial`, multiplied after every failed
//! attempt and capped at `max`. An optional retry ceiling turns an endless
//! outage into a terminal error instead of retrying forever.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    max_retries: Option<u32>,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, max_retries: Option<u32>) -> Self {
        Self { initial, max, multiplier: multiplier.max(1.0), max_retries, current: initial, attempts: 0 }
    }

    /// Delay to wait before the next attempt, or `None` once the retry budget
    /// is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.max_retries {
            if self.attempts >= limit {
                return None;
            }
        }
        self.attempts += 1;
        let delay = self.current;
        let next_ns = (self.current.as_nanos() as f64 * self.multiplier) as u64;
        self.current = Duration::from_nanos(next_ns).min(self.max);
        Some(delay)
    }

    /// Call after a successful handshake.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Consecutive failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn doubles_up_to_cap() {
        let mut b = Backoff::new(ms(100), ms(500), 2.0, None);
        let delays: Vec<_> = (0..5).map(|_| b.next_delay().unwrap()).collect();
        assert_eq!(delays, vec![ms(100), ms(200), ms(400), ms(500), ms(500)]);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut b = Backoff::new(ms(100), ms(10_000), 2.0, None);
        b.next_delay();
        b.next_delay();
        assert_eq!(b.attempts(), 2);
        b.reset();
        assert_eq!(b.attempts(), 0);
        assert_eq!(b.next_delay(), Some(ms(100)));
    }

    #[test]
    fn retry_ceiling_stops() {
        let mut b = Backoff::new(ms(10), ms(10), 2.0, Some(2));
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert_eq!(b.next_delay(), None);
        b.reset();
        assert!(b.next_delay().is_some());
    }
}
