use std::time::{Duration, Instant};

/// An absolute monotonic deadline. Built from a duration relative to "now"
/// so retry loops and readiness probes can consult remaining budget without
/// caring about wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    target: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Deadline {
            target: Instant::now() + duration,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.target.saturating_duration_since(Instant::now())
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining().as_millis().min(u64::MAX as u128) as u64
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_is_not_expired_and_reports_remaining_time() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining_ms() > 0);
    }

    #[test]
    fn zero_duration_deadline_is_immediately_expired() {
        let deadline = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(1));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining_ms(), 0);
    }
}
