//! Incremental backoff for broker consume errors (uncapped retries: broker outages are
//! expected to be transient and the worker should keep trying rather than exit the process).
use std::time::Duration;

const START_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(30);
const MULTIPLIER: u32 = 2;

pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff { delay: START_DELAY }
    }

    /// Sleep for the current delay, then grow it (capped) for the next consecutive error.
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.delay).await;
        self.delay = (self.delay * MULTIPLIER).min(MAX_DELAY);
    }

    /// Clear the tracked failure streak.
    pub fn reset(&mut self) {
        self.delay = START_DELAY;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
