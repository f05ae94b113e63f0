//! Reader task: bytes in, readings out

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::{DecodeOutcome, FrameDecoder};
use crate::session::SessionLease;
use crate::state::LatestReading;
use crate::stats::LinkStats;
use crate::supervisor::{report_fault, FaultSender, FaultSource};

pub(crate) struct Reader {
    pub lease_rx: watch::Receiver<Option<SessionLease>>,
    pub latest: Arc<LatestReading>,
    pub faults: FaultSender,
    pub stats: Arc<LinkStats>,
    pub cancel: CancellationToken,
    pub idle: Duration,
}

/// Wait for a lease newer than `last_epoch`; `None` on shutdown
pub(crate) async fn next_lease(
    rx: &mut watch::Receiver<Option<SessionLease>>,
    cancel: &CancellationToken,
    last_epoch: u64,
) -> Option<SessionLease> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        lease = rx.wait_for(|l| matches!(l, Some(l) if l.epoch > last_epoch)) => {
            lease.ok().and_then(|l| l.clone())
        },
    }
}

impl Reader {
    pub async fn run(mut self) {
        let mut last_epoch = 0;

        while let Some(lease) = next_lease(&mut self.lease_rx, &self.cancel, last_epoch).await {
            last_epoch = lease.epoch;
            debug!(
                "Reader attached to {} (epoch {})",
                lease.session.port_name(),
                lease.epoch
            );
            // Each epoch starts with an empty buffer
            let mut decoder = FrameDecoder::new();
            if !self.read_session(&lease, &mut decoder).await {
                break;
            }
        }
        debug!("Reader task stopped");
    }

    /// Read until the lease changes or fails; `false` on shutdown
    async fn read_session(&mut self, lease: &SessionLease, decoder: &mut FrameDecoder) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            // Lease withdrawn or replaced
            if self.lease_rx.has_changed().unwrap_or(true) {
                return true;
            }

            match lease.session.read_available().await {
                Ok(bytes) if bytes.is_empty() => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return false,
                        _ = tokio::time::sleep(self.idle) => {},
                    }
                },
                Ok(bytes) => {
                    self.stats.record_bytes_received(bytes.len());
                    decoder.extend(&bytes);
                    self.drain(decoder);
                },
                Err(e) => {
                    report_fault(&self.faults, lease.epoch, FaultSource::Reader, e);
                    return true;
                },
            }
        }
    }

    fn drain(&self, decoder: &mut FrameDecoder) {
        loop {
            let step = decoder.next_step();
            if step.discarded > 0 {
                self.stats.record_bytes_discarded(step.discarded);
            }
            match step.outcome {
                DecodeOutcome::Reading(reading) => {
                    self.stats.record_frame_decoded();
                    self.latest.publish(reading);
                    trace!("Reading published: {:?}", reading);
                },
                DecodeOutcome::Corrupt(_) => self.stats.record_frame_dropped(),
                DecodeOutcome::NeedMoreData => break,
            }
        }
    }
}
