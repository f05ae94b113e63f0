//! Writer task: drains the outbound queue onto the current session

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{encode_command, Command};
use crate::reader::next_lease;
use crate::session::{hex, SessionLease};
use crate::stats::LinkStats;
use crate::supervisor::{report_fault, FaultSender, FaultSource};

/// Item on the outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Command(Command),
    /// Pre-encoded frame written verbatim
    Raw(Bytes),
}

impl Outbound {
    pub fn to_frame(&self) -> Bytes {
        match self {
            Self::Command(command) => encode_command(*command),
            Self::Raw(bytes) => bytes.clone(),
        }
    }
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(command) => write!(f, "command {}", command.opcode()),
            Self::Raw(bytes) => write!(f, "raw frame [{}]", hex(bytes)),
        }
    }
}

pub(crate) struct Writer {
    pub queue: mpsc::UnboundedReceiver<Outbound>,
    pub lease_rx: watch::Receiver<Option<SessionLease>>,
    pub faults: FaultSender,
    pub stats: Arc<LinkStats>,
    pub cancel: CancellationToken,
    pub pacing: Duration,
}

impl Writer {
    pub async fn run(mut self) {
        // Epoch of the last failed write; that session is never written again
        let mut failed_epoch = 0;

        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => break,
                item = self.queue.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            let frame = item.to_frame();

            // Waits here while the link is reconnecting
            let Some(lease) = next_lease(&mut self.lease_rx, &self.cancel, failed_epoch).await
            else {
                break;
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = lease.session.write_all(&frame) => result,
            };
            match result {
                Ok(()) => {
                    self.stats.record_bytes_sent(frame.len());
                    self.stats.record_command_sent();
                    debug!("Sent {} on {}", item, lease.session.port_name());
                },
                Err(e) => {
                    warn!(
                        "Dropping {} after write failure on {}: {}",
                        item,
                        lease.session.port_name(),
                        e
                    );
                    self.stats.record_command_dropped();
                    failed_epoch = lease.epoch;
                    report_fault(&self.faults, lease.epoch, FaultSource::Writer, e);
                    continue;
                },
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.pacing) => {},
            }
        }
        debug!("Writer task stopped");
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::session::MockSession;

    struct Harness {
        queue: mpsc::UnboundedSender<Outbound>,
        lease_tx: watch::Sender<Option<SessionLease>>,
        fault_rx: mpsc::UnboundedReceiver<crate::supervisor::Fault>,
        stats: Arc<LinkStats>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start() -> Harness {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (lease_tx, lease_rx) = watch::channel(None);
        let (faults, fault_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(LinkStats::new());
        let cancel = CancellationToken::new();
        let writer = Writer {
            queue: queue_rx,
            lease_rx,
            faults,
            stats: stats.clone(),
            cancel: cancel.clone(),
            pacing: Duration::from_millis(10),
        };
        Harness {
            queue,
            lease_tx,
            fault_rx,
            stats,
            cancel,
            handle: tokio::spawn(writer.run()),
        }
    }

    fn lease(epoch: u64, session: &Arc<MockSession>) -> Option<SessionLease> {
        Some(SessionLease {
            epoch,
            session: session.clone(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_sent_fifo_with_pacing() {
        let h = start();
        let session = Arc::new(MockSession::new("mock#1"));
        h.lease_tx.send_replace(lease(1, &session));

        let start = tokio::time::Instant::now();
        for opcode in [1, 2, 3] {
            h.queue.send(Outbound::Command(Command(opcode))).unwrap();
        }
        session.wait_for_writes(3).await;
        // Pacing follows each write, so the third lands after two pauses
        assert_eq!(start.elapsed(), Duration::from_millis(20));

        let written = session.written();
        assert_eq!(written[0], encode_command(Command(1)));
        assert_eq!(written[1], encode_command(Command(2)));
        assert_eq!(written[2], encode_command(Command(3)));
        assert_eq!(h.stats.snapshot().commands_sent, 3);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_frames_pass_through() {
        let h = start();
        let session = Arc::new(MockSession::new("mock#1"));
        h.lease_tx.send_replace(lease(1, &session));

        h.queue
            .send(Outbound::Raw(Bytes::from_static(&[0xDE, 0xAD])))
            .unwrap();
        session.wait_for_writes(1).await;
        assert_eq!(session.written(), vec![Bytes::from_static(&[0xDE, 0xAD])]);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_waits_for_session() {
        let h = start();
        h.queue.send(Outbound::Command(Command(9))).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let session = Arc::new(MockSession::new("mock#1"));
        h.lease_tx.send_replace(lease(1, &session));
        session.wait_for_writes(1).await;
        assert_eq!(session.written()[0], encode_command(Command(9)));

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_drops_command_and_reports() {
        let mut h = start();
        let first = Arc::new(MockSession::new("mock#1"));
        first.fail_writes();
        h.lease_tx.send_replace(lease(1, &first));

        h.queue.send(Outbound::Command(Command(1))).unwrap();
        let fault = h.fault_rx.recv().await.unwrap();
        assert_eq!(fault.epoch, 1);
        assert_eq!(fault.source, FaultSource::Writer);

        // Next command waits for a new epoch instead of hitting the broken session
        h.queue.send(Outbound::Command(Command(2))).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.fault_rx.try_recv().is_err());

        let second = Arc::new(MockSession::new("mock#2"));
        h.lease_tx.send_replace(lease(2, &second));
        second.wait_for_writes(1).await;
        assert_eq!(second.written(), vec![encode_command(Command(2))]);

        let snap = h.stats.snapshot();
        assert_eq!(snap.commands_dropped, 1);
        assert_eq!(snap.commands_sent, 1);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }
}
