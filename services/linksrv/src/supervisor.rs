//! Reconnection supervisor
//!
//! ```text
//!   start ──► Reconnecting ──► Connected ──► Faulted ──► (cooldown) ─┐
//!                 ▲                                                   │
//!                 └───────────────────────────────────────────────────┘
//!   any state ──► Stopped   (cancellation only)
//! ```
//!
//! The supervisor is the only writer of the session lease. A new session is
//! opened only after the previous one has been closed. Device faults never
//! stop the link; it retries until cancelled.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use errors::OmnitorErrorTrait;

use crate::error::LinkError;
use crate::reconnect::{ReconnectError, ReconnectHelper, ReconnectPolicy};
use crate::session::{Connector, Session, SessionLease};
use crate::stats::LinkStats;

/// Externally visible link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Reconnecting,
    Connected,
    Faulted,
    Stopped,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Which task observed a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultSource {
    Reader,
    Writer,
}

impl fmt::Display for FaultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        })
    }
}

/// An I/O failure reported against a connection epoch
#[derive(Debug, Clone)]
pub(crate) struct Fault {
    pub epoch: u64,
    pub source: FaultSource,
    pub error: LinkError,
}

pub(crate) type FaultSender = mpsc::UnboundedSender<Fault>;

/// Report a fault; the supervisor may already be gone during shutdown
pub(crate) fn report_fault(tx: &FaultSender, epoch: u64, source: FaultSource, error: LinkError) {
    if tx
        .send(Fault {
            epoch,
            source,
            error,
        })
        .is_err()
    {
        debug!("Fault from {} after supervisor exit ignored", source);
    }
}

pub(crate) struct Supervisor {
    pub connector: Arc<dyn Connector>,
    pub policy: ReconnectPolicy,
    pub lease_tx: Arc<watch::Sender<Option<SessionLease>>>,
    pub state_tx: Arc<watch::Sender<LinkState>>,
    pub fault_rx: mpsc::UnboundedReceiver<Fault>,
    pub stats: Arc<LinkStats>,
    pub cancel: CancellationToken,
}

impl Supervisor {
    fn set_state(&self, state: LinkState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Link state: {} -> {}", previous, state);
        }
    }

    /// Retry until a session opens; `None` only on cancellation
    async fn open_session(&self, helper: &mut ReconnectHelper) -> Option<Arc<dyn Session>> {
        self.set_state(LinkState::Reconnecting);
        info!("Connecting to {}", self.connector.describe());

        loop {
            let connector = self.connector.clone();
            match helper
                .execute_reconnect(&self.cancel, || async move { connector.connect().await })
                .await
            {
                Ok(session) => return Some(session),
                Err(ReconnectError::ConnectionFailed(_)) => {
                    self.stats.record_failed_connect();
                },
                Err(ReconnectError::Cancelled) => return None,
            }
        }
    }

    /// Wait for a fault on `epoch`; `false` on shutdown
    async fn wait_for_fault(&mut self, epoch: u64) -> bool {
        loop {
            let fault = tokio::select! {
                _ = self.cancel.cancelled() => return false,
                fault = self.fault_rx.recv() => fault,
            };
            match fault {
                None => return false,
                Some(fault) if fault.epoch != epoch => {
                    debug!(
                        "Ignoring stale fault from {} (epoch {}, current {}): {}",
                        fault.source, fault.epoch, epoch, fault.error
                    );
                },
                Some(fault) => {
                    errors::log_at!(
                        fault.error.log_level(),
                        port = %fault.error_port(),
                        class = fault.error.failure_class(),
                        "Link fault reported by {}: {}",
                        fault.source,
                        fault.error
                    );
                    return true;
                },
            }
        }
    }

    pub async fn run(mut self) {
        let mut helper = ReconnectHelper::new(self.policy.clone());
        let mut epoch: u64 = 0;

        loop {
            let Some(session) = self.open_session(&mut helper).await else {
                break;
            };

            epoch += 1;
            self.stats.record_connect();
            self.lease_tx.send_replace(Some(SessionLease {
                epoch,
                session: session.clone(),
            }));
            self.set_state(LinkState::Connected);
            info!("Link up on {} (epoch {})", session.port_name(), epoch);

            let faulted = self.wait_for_fault(epoch).await;

            // Withdraw the lease before closing so neither task picks it up again
            self.lease_tx.send_replace(None);
            if !faulted {
                session.close().await;
                break;
            }

            self.stats.record_fault();
            self.set_state(LinkState::Faulted);
            session.close().await;
            helper.mark_disconnected();
            drop(session);

            info!("Reconnecting in {:?}", self.policy.cooldown);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.policy.cooldown) => {},
            }
        }

        self.lease_tx.send_replace(None);
        self.set_state(LinkState::Stopped);
        info!("Supervisor stopped");
    }
}

impl Fault {
    fn error_port(&self) -> &str {
        match &self.error {
            LinkError::IoFailure { port, .. } | LinkError::Closed { port } => port,
            _ => "-",
        }
    }
}
