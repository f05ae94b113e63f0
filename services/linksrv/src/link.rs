//! Device link handle
//!
//! [`DeviceLink::start`] spawns three tasks that share one cancellation
//! token:
//!
//! - supervisor: opens sessions and publishes them as leases
//! - reader: decodes inbound bytes into the latest-reading cell
//! - writer: drains the outbound queue onto the current session
//!
//! Consumers poll [`DeviceLink::get_latest_reading`] and enqueue commands
//! with [`DeviceLink::send_command`]; neither call blocks on the device.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{Command, Reading};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::reader::Reader;
use crate::session::{Connector, SerialConnector, SessionLease};
use crate::state::{LatestReading, Sample};
use crate::stats::{LinkStats, LinkStatsSnapshot};
use crate::supervisor::{LinkState, Supervisor};
use crate::writer::{Outbound, Writer};

/// Handle to a running device link
pub struct DeviceLink {
    latest: Arc<LatestReading>,
    outbound: mpsc::UnboundedSender<Outbound>,
    state_tx: Arc<watch::Sender<LinkState>>,
    lease_rx: watch::Receiver<Option<SessionLease>>,
    stats: Arc<LinkStats>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl DeviceLink {
    /// Start the link on the serial port described by `config`
    pub fn serial(config: &LinkConfig) -> Self {
        Self::start(config, Arc::new(SerialConnector::new(config)))
    }

    /// Start the link over `connector`; must be called inside a tokio runtime
    pub fn start(config: &LinkConfig, connector: Arc<dyn Connector>) -> Self {
        let (lease_tx, lease_rx) = watch::channel(None);
        let lease_tx = Arc::new(lease_tx);
        let (state_tx, _) = watch::channel(LinkState::Reconnecting);
        let state_tx = Arc::new(state_tx);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (outbound, queue) = mpsc::unbounded_channel();
        let latest = Arc::new(LatestReading::new());
        let stats = Arc::new(LinkStats::new());
        let cancel = CancellationToken::new();

        info!("Starting device link on {}", connector.describe());

        let supervisor = Supervisor {
            connector,
            policy: config.reconnect_policy(),
            lease_tx: lease_tx.clone(),
            state_tx: state_tx.clone(),
            fault_rx,
            stats: stats.clone(),
            cancel: cancel.clone(),
        };
        let reader = Reader {
            lease_rx: lease_tx.subscribe(),
            latest: latest.clone(),
            faults: fault_tx.clone(),
            stats: stats.clone(),
            cancel: cancel.clone(),
            idle: config.read_idle(),
        };
        let writer = Writer {
            queue,
            lease_rx: lease_tx.subscribe(),
            faults: fault_tx,
            stats: stats.clone(),
            cancel: cancel.clone(),
            pacing: config.write_pacing(),
        };

        let tasks = vec![
            tokio::spawn(supervisor.run()),
            tokio::spawn(reader.run()),
            tokio::spawn(writer.run()),
        ];

        Self {
            latest,
            outbound,
            state_tx,
            lease_rx,
            stats,
            cancel,
            tasks: Mutex::new(tasks),
            stop_timeout: config.stop_timeout(),
        }
    }

    /// Most recent reading, `None` before the first frame
    pub fn get_latest_reading(&self) -> Option<Reading> {
        self.latest.reading()
    }

    /// Most recent reading with its decode time
    pub fn latest_sample(&self) -> Option<Sample> {
        self.latest.sample()
    }

    /// Queue an opcode for the device
    ///
    /// Returns once queued. Delivery is not confirmed; a command whose write
    /// fails is logged and dropped.
    pub fn send_command(&self, opcode: i32) -> Result<()> {
        self.enqueue(Outbound::Command(Command(opcode)))
    }

    /// Queue an already framed packet
    pub fn send_raw(&self, frame: impl Into<Bytes>) -> Result<()> {
        self.enqueue(Outbound::Raw(frame.into()))
    }

    fn enqueue(&self, item: Outbound) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(LinkError::Stopped);
        }
        self.outbound.send(item).map_err(|_| LinkError::Stopped)
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Wait until the link enters `target`
    ///
    /// Fails with [`LinkError::Stopped`] if the link stops first.
    pub async fn wait_for_state(&self, target: LinkState) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let reached = {
            let state = rx
                .wait_for(|s| *s == target || *s == LinkState::Stopped)
                .await
                .map_err(|_| LinkError::Stopped)?;
            *state == target
        };
        if reached {
            Ok(())
        } else {
            Err(LinkError::Stopped)
        }
    }

    /// Epoch of the current session, `None` while disconnected
    pub fn current_epoch(&self) -> Option<u64> {
        self.lease_rx.borrow().as_ref().map(|lease| lease.epoch)
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Token that stops the link when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop all tasks and close the session
    ///
    /// Tasks that do not finish within the stop timeout are aborted.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now() + self.stop_timeout;

        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!("Link task ended abnormally: {}", e),
                Err(_) => {
                    warn!(
                        "Link task still running after {:?}, aborting",
                        self.stop_timeout
                    );
                    handle.abort();
                },
            }
        }

        // Only left behind when the supervisor was aborted
        let leftover = self.lease_rx.borrow().clone();
        if let Some(lease) = leftover {
            lease.session.close().await;
        }

        self.state_tx.send_replace(LinkState::Stopped);
        debug!("Device link stopped: {:?}", self.stats.snapshot());
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
