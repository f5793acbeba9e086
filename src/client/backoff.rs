use std::time::Duration;

/// Delay before the very first connection.
pub const INITIAL_DELAY: Duration = Duration::from_millis(500);
pub const MAX_ATTEMPTS: u32 = 5;

/// Reconnect schedule: 1, 2, 4, 8 and 16 seconds, then give up.
/// A successful open starts the schedule over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wait before the next retry, or `None` once attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= MAX_ATTEMPTS {
            return None;
        }
        let delay = Duration::from_secs(1 << self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_gives_up() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|delay| delay.as_secs())
            .collect();
        assert_eq!(delays, [1, 2, 4, 8, 16]);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), MAX_ATTEMPTS);
    }

    #[test]
    fn open_resets_the_schedule() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }
}
