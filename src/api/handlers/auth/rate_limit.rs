//! Login throttling over the `login_attempts` ledger.
//!
//! Flow Overview:
//! 1) `check` counts failures inside the rolling window for the app's scope.
//! 2) `record_failure` appends a failed row.
//! 3) `record_success` clears the scope and appends a successful row.
//!
//! Ledger errors fail open: a broken ledger must not lock every user out.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error};

use super::storage::{AttemptLedger, AttemptRecord, AttemptScope, NewAttempt};

const DEFAULT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_WINDOW_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many failed attempts ({attempts}), retry in {window_minutes} minutes")]
    Limited { attempts: i64, window_minutes: i64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    max_attempts: i64,
    window_minutes: i64,
    scope: AttemptScope,
    clear_failures_only: bool,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(scope: AttemptScope) -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_minutes: DEFAULT_WINDOW_MINUTES,
            scope,
            clear_failures_only: false,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_window_minutes(mut self, minutes: i64) -> Self {
        self.window_minutes = minutes;
        self
    }

    /// Keep successful rows when a login clears its scope.
    #[must_use]
    pub fn with_clear_failures_only(mut self, failures_only: bool) -> Self {
        self.clear_failures_only = failures_only;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    #[must_use]
    pub fn window_minutes(&self) -> i64 {
        self.window_minutes
    }

    #[must_use]
    pub fn scope(&self) -> AttemptScope {
        self.scope
    }
}

pub struct LoginRateLimiter {
    ledger: Arc<dyn AttemptLedger>,
    policy: RateLimitPolicy,
}

impl LoginRateLimiter {
    #[must_use]
    pub fn new(ledger: Arc<dyn AttemptLedger>, policy: RateLimitPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Reject when the scope already holds `max_attempts` failures in the window.
    ///
    /// # Errors
    /// Returns `RateLimitError::Limited` when locked out.
    pub async fn check(&self, username: &str, ip: Option<&str>) -> Result<(), RateLimitError> {
        let since = Utc::now() - Duration::minutes(self.policy.window_minutes);
        match self
            .ledger
            .count_failures(username, ip, self.policy.scope, since)
            .await
        {
            Ok(attempts) if attempts >= self.policy.max_attempts => Err(RateLimitError::Limited {
                attempts,
                window_minutes: self.policy.window_minutes,
            }),
            Ok(attempts) => {
                debug!(attempts, "Login attempts within window");
                Ok(())
            }
            Err(err) => {
                // Fail open
                error!("Failed to count login attempts: {err}");
                Ok(())
            }
        }
    }

    pub async fn record_failure(&self, username: &str, ip: Option<&str>, user_agent: Option<&str>) {
        let attempt = NewAttempt {
            username,
            ip,
            user_agent,
            success: false,
        };
        if let Err(err) = self.ledger.record_attempt(attempt).await {
            error!("Failed to record failed login attempt: {err}");
        }
    }

    pub async fn record_success(&self, username: &str, ip: Option<&str>, user_agent: Option<&str>) {
        if let Err(err) = self
            .ledger
            .clear_attempts(
                username,
                ip,
                self.policy.scope,
                self.policy.clear_failures_only,
            )
            .await
        {
            error!("Failed to clear login attempts: {err}");
        }

        let attempt = NewAttempt {
            username,
            ip,
            user_agent,
            success: true,
        };
        if let Err(err) = self.ledger.record_attempt(attempt).await {
            error!("Failed to record successful login attempt: {err}");
        }
    }

    /// Lift a lockout for a username regardless of address.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be updated.
    pub async fn unlock(&self, username: &str) -> anyhow::Result<u64> {
        self.ledger.clear_user_failures(username).await
    }

    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn recent(
        &self,
        username: Option<&str>,
        limit: i64,
    ) -> anyhow::Result<Vec<AttemptRecord>> {
        self.ledger.recent_attempts(username, limit).await
    }
}
