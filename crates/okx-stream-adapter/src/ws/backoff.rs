/*
[INPUT]:  Consecutive failed connection attempts
[OUTPUT]: Exponential reconnect delays with an upper bound
[POS]:    WebSocket layer - reconnect pacing for the supervisor loop
[UPDATE]: When changing reconnect pacing
*/

use std::time::Duration;

/// Doubling delay, capped at `max`. Reset once a connection is healthy.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempts: 0,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempts.min(31);
        self.attempts = self.attempts.saturating_add(1);
        self.initial
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
