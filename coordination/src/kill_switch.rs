//! Process-wide circuit breaker over recent task outcomes.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use tokio::sync::watch;
use tokio::sync::Mutex;

/// Whether the kill switch is currently admitting work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KillSwitchState {
    Active,
    Tripped,
}

struct Outcome {
    at: DateTime<Utc>,
    failed: bool,
}

struct Inner {
    window: Duration,
    activation_threshold: u32,
    trip_threshold: f64,
    restart_timeout: Duration,
    trip_on_exceptions: Vec<String>,
    ignore_exceptions: Vec<String>,
    outcomes: VecDeque<Outcome>,
    tripped_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn prune(&mut self, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.window).unwrap_or_default();
        while let Some(front) = self.outcomes.front() {
            if now - front.at > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failed = self.outcomes.iter().filter(|o| o.failed).count();
        failed as f64 / self.outcomes.len() as f64
    }

    /// This exception counts toward the kill switch's tracked outcomes.
    ///
    /// `trip_on_exceptions`, when non-empty, is a whitelist: only listed exception kinds count.
    /// Otherwise every exception counts except those in `ignore_exceptions`.
    fn counts(&self, exception_kind: Option<&str>) -> bool {
        match exception_kind {
            None => true,
            Some(kind) => {
                if self.ignore_exceptions.iter().any(|e| e == kind) {
                    return false;
                }
                if !self.trip_on_exceptions.is_empty() {
                    return self.trip_on_exceptions.iter().any(|e| e == kind);
                }
                true
            }
        }
    }
}

/// Tracks successes/failures over a rolling window and trips consumption when the failure
/// rate crosses a threshold.
///
/// **Active -> Tripped** when `trackedCount >= activationThreshold` AND
/// `failureRate >= tripThreshold`. **Tripped -> Active** after `restartTimeout` or a manual
/// [`reset`](Self::reset). [`wait_until_ready`](Self::wait_until_ready) suspends callers while
/// tripped.
#[derive(Clone)]
pub struct KillSwitch {
    inner: Arc<Mutex<Inner>>,
    state_tx: Arc<watch::Sender<KillSwitchState>>,
    state_rx: watch::Receiver<KillSwitchState>,
}

impl KillSwitch {
    pub fn new(
        window: Duration,
        activation_threshold: u32,
        trip_threshold: f64,
        restart_timeout: Duration,
        trip_on_exceptions: Vec<String>,
        ignore_exceptions: Vec<String>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(KillSwitchState::Active);
        KillSwitch {
            inner: Arc::new(Mutex::new(Inner {
                window,
                activation_threshold,
                trip_threshold,
                restart_timeout,
                trip_on_exceptions,
                ignore_exceptions,
                outcomes: VecDeque::new(),
                tripped_at: None,
            })),
            state_tx: Arc::new(state_tx),
            state_rx,
        }
    }

    pub fn state(&self) -> KillSwitchState {
        *self.state_rx.borrow()
    }

    /// The configured restart timeout, for callers that want to report how long a trip is
    /// expected to hold before [`wait_until_ready`](Self::wait_until_ready) returns.
    pub async fn restart_timeout(&self) -> Duration {
        self.inner.lock().await.restart_timeout
    }

    /// Record a successful outcome.
    pub async fn record_success(&self) {
        self.record(false, None).await;
    }

    /// Record a failed outcome; `exception_kind` is matched against the configured
    /// allow/ignore lists.
    pub async fn record_failure(&self, exception_kind: Option<&str>) {
        self.record(true, exception_kind).await;
    }

    async fn record(&self, failed: bool, exception_kind: Option<&str>) {
        let mut inner = self.inner.lock().await;
        if !inner.counts(exception_kind) {
            return;
        }
        let now = Utc::now();
        inner.prune(now);
        inner.outcomes.push_back(Outcome { at: now, failed });

        self.maybe_recover(&mut inner, now);

        let tracked = inner.outcomes.len() as u32;
        let should_trip =
            tracked >= inner.activation_threshold && inner.failure_rate() >= inner.trip_threshold;
        if should_trip && inner.tripped_at.is_none() {
            inner.tripped_at = Some(now);
            let _ = self.state_tx.send(KillSwitchState::Tripped);
        }
    }

    fn maybe_recover(&self, inner: &mut Inner, now: DateTime<Utc>) {
        if let Some(tripped_at) = inner.tripped_at {
            let restart_timeout = chrono::Duration::from_std(inner.restart_timeout).unwrap_or_default();
            if now - tripped_at >= restart_timeout {
                inner.tripped_at = None;
                inner.outcomes.clear();
                let _ = self.state_tx.send(KillSwitchState::Active);
            }
        }
    }

    /// Manually reset the kill switch to `Active`, clearing the tracked window.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.tripped_at = None;
        inner.outcomes.clear();
        let _ = self.state_tx.send(KillSwitchState::Active);
    }

    /// Suspend while the kill switch is tripped. Also re-checks on every state change so a
    /// `restartTimeout` elapsing (observed the next time `record_*` prunes) unblocks callers
    /// promptly rather than on the next delivery's own prune.
    pub async fn wait_until_ready(&self) {
        loop {
            {
                let mut inner = self.inner.lock().await;
                self.maybe_recover(&mut inner, Utc::now());
            }
            if *self.state_rx.borrow() == KillSwitchState::Active {
                return;
            }
            let mut rx = self.state_rx.clone();
            let restart_timeout = self.inner.lock().await.restart_timeout;
            tokio::select! {
                _ = rx.changed() => {}
                _ = tokio::time::sleep(restart_timeout) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trips_once_failure_rate_and_activation_threshold_are_met() {
        let switch = KillSwitch::new(Duration::from_secs(60), 4, 0.5, Duration::from_millis(50), vec![], vec![]);
        assert_eq!(switch.state(), KillSwitchState::Active);
        switch.record_failure(None).await;
        switch.record_failure(None).await;
        switch.record_success().await;
        assert_eq!(switch.state(), KillSwitchState::Active);
        switch.record_failure(None).await;
        assert_eq!(switch.state(), KillSwitchState::Tripped);
    }

    #[tokio::test]
    async fn recovers_after_restart_timeout() {
        let switch = KillSwitch::new(Duration::from_secs(60), 2, 0.5, Duration::from_millis(10), vec![], vec![]);
        switch.record_failure(None).await;
        switch.record_failure(None).await;
        assert_eq!(switch.state(), KillSwitchState::Tripped);
        tokio::time::sleep(Duration::from_millis(30)).await;
        switch.wait_until_ready().await;
        assert_eq!(switch.state(), KillSwitchState::Active);
    }

    #[tokio::test]
    async fn manual_reset_clears_tripped_state() {
        let switch = KillSwitch::new(Duration::from_secs(60), 2, 0.5, Duration::from_secs(60), vec![], vec![]);
        switch.record_failure(None).await;
        switch.record_failure(None).await;
        assert_eq!(switch.state(), KillSwitchState::Tripped);
        switch.reset().await;
        assert_eq!(switch.state(), KillSwitchState::Active);
    }

    #[tokio::test]
    async fn ignored_exceptions_do_not_count() {
        let switch = KillSwitch::new(
            Duration::from_secs(60),
            2,
            0.5,
            Duration::from_secs(60),
            vec![],
            vec!["ValidationError".into()],
        );
        switch.record_failure(Some("ValidationError")).await;
        switch.record_failure(Some("ValidationError")).await;
        assert_eq!(switch.state(), KillSwitchState::Active);
    }

    #[tokio::test]
    async fn trip_on_exceptions_whitelist_is_exclusive() {
        let switch = KillSwitch::new(
            Duration::from_secs(60),
            2,
            0.5,
            Duration::from_secs(60),
            vec!["DatabaseUnavailable".into()],
            vec![],
        );
        switch.record_failure(Some("ValidationError")).await;
        switch.record_failure(Some("ValidationError")).await;
        assert_eq!(switch.state(), KillSwitchState::Active);
        switch.record_failure(Some("DatabaseUnavailable")).await;
        switch.record_failure(Some("DatabaseUnavailable")).await;
        assert_eq!(switch.state(), KillSwitchState::Tripped);
    }
}
