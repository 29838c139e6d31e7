//! Per-submission overrides validated before a task is sent.
use std::collections::HashMap;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;

use crate::error::InvalidSendOptions;

/// Overrides applied to a single [`crate::Client::send`] call.
#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    pub priority: Option<u8>,
    pub max_retries: Option<u32>,
    pub countdown: Option<Duration>,
    pub eta: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub parent_id: Option<String>,
    pub root_id: Option<String>,
    pub tenant_id: Option<String>,
    pub partition_key: Option<String>,
    pub headers: HashMap<String, String>,
    pub batch_id: Option<String>,
    /// Route this submission through the outbox instead of publishing directly to the broker.
    pub via_outbox: bool,
}

impl SendOptions {
    pub fn new() -> SendOptions {
        SendOptions::default()
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn countdown(mut self, countdown: Duration) -> Self {
        self.countdown = Some(countdown);
        self
    }

    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn tenant_id(mut self, id: impl Into<String>) -> Self {
        self.tenant_id = Some(id.into());
        self
    }

    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn via_outbox(mut self) -> Self {
        self.via_outbox = true;
        self
    }

    /// Validate the invariants required before a [`crate::Client::send`] call
    /// commits anything: `priority in [0, 9]`; if both `eta` and `expires` are set, `expires >
    /// eta`; if both `countdown` and `expires` are set, `expires > now + countdown`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), InvalidSendOptions> {
        if let Some(priority) = self.priority {
            if priority > 9 {
                return Err(InvalidSendOptions::PriorityOutOfRange(priority));
            }
        }
        if let (Some(eta), Some(expires)) = (self.eta, self.expires) {
            if expires <= eta {
                return Err(InvalidSendOptions::ExpiresBeforeEta);
            }
        }
        if let (Some(countdown), Some(expires)) = (self.countdown, self.expires) {
            let countdown = chrono::Duration::from_std(countdown).unwrap_or_default();
            if expires <= now + countdown {
                return Err(InvalidSendOptions::ExpiresBeforeCountdown);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_above_nine_is_rejected() {
        let options = SendOptions::new().priority(10);
        assert_eq!(options.validate(Utc::now()), Err(InvalidSendOptions::PriorityOutOfRange(10)));
    }

    #[test]
    fn expires_must_be_after_eta() {
        let now = Utc::now();
        let options = SendOptions::new().eta(now + chrono::Duration::seconds(10)).expires(now);
        assert_eq!(options.validate(now), Err(InvalidSendOptions::ExpiresBeforeEta));
    }

    #[test]
    fn expires_must_be_after_now_plus_countdown() {
        let now = Utc::now();
        let options = SendOptions::new().countdown(Duration::from_secs(30)).expires(now + chrono::Duration::seconds(5));
        assert_eq!(options.validate(now), Err(InvalidSendOptions::ExpiresBeforeCountdown));
    }

    #[test]
    fn consistent_options_pass() {
        let now = Utc::now();
        let options = SendOptions::new().priority(7).countdown(Duration::from_secs(5)).expires(now + chrono::Duration::seconds(30));
        assert!(options.validate(now).is_ok());
    }
}
