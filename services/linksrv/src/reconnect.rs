//! Reconnection pacing
//!
//! Fixed retry interval, no attempt limit. The helper owns the waiting
//! between attempts so the supervisor stays a plain state machine; the
//! counters live in [`crate::stats::LinkStats`].

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a single attempt did not produce a connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Reconnection cancelled")]
    Cancelled,
}

/// Reconnection timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Pause between closing a faulted session and the first attempt
    pub cooldown: Duration,
    /// Pause between failed attempts
    pub retry_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(2),
            retry_interval: Duration::from_secs(2),
        }
    }
}

impl ReconnectPolicy {
    /// Create from configuration values
    pub fn from_config(cooldown_ms: u64, retry_interval_ms: u64) -> Self {
        Self {
            cooldown: Duration::from_millis(cooldown_ms),
            retry_interval: Duration::from_millis(retry_interval_ms),
        }
    }
}

/// Attempt counter for the current outage
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Start counting a new outage
    pub fn mark_disconnected(&mut self) {
        self.attempt = 0;
        debug!("Connection marked as disconnected");
    }

    /// Run one connection attempt
    ///
    /// Every attempt after the first in an outage waits `retry_interval`
    /// first. Both the wait and `connect_fn` are abandoned when `cancel`
    /// fires.
    pub async fn execute_reconnect<F, Fut, T, E>(
        &mut self,
        cancel: &CancellationToken,
        connect_fn: F,
    ) -> Result<T, ReconnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.attempt = self.attempt.saturating_add(1);

        if self.attempt > 1 {
            debug!(
                "Waiting {:?} before reconnection attempt",
                self.policy.retry_interval
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
                _ = tokio::time::sleep(self.policy.retry_interval) => {},
            }
        }

        debug!("Connection attempt {}", self.attempt);
        let start_time = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            result = connect_fn() => result,
        };

        match result {
            Ok(value) => {
                info!(
                    "Connected after {:?} (attempt {})",
                    start_time.elapsed(),
                    self.attempt
                );
                self.attempt = 0;
                Ok(value)
            },
            Err(e) => {
                warn!("Connection attempt {} failed: {}", self.attempt, e);
                Err(ReconnectError::ConnectionFailed(e.to_string()))
            },
        }
    }
}
