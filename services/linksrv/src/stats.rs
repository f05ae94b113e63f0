//! Link counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters updated by the link tasks
#[derive(Debug, Default)]
pub struct LinkStats {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    frames_decoded: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_discarded: AtomicU64,
    commands_sent: AtomicU64,
    commands_dropped: AtomicU64,
    faults: AtomicU64,
    connects: AtomicU64,
    failed_connects: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatsSnapshot {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub bytes_discarded: u64,
    pub commands_sent: u64,
    pub commands_dropped: u64,
    pub faults: u64,
    /// Successful opens, the initial one included
    pub connects: u64,
    pub failed_connects: u64,
}

impl LinkStatsSnapshot {
    /// Successful opens after the first one
    pub fn reconnects(&self) -> u64 {
        self.connects.saturating_sub(1)
    }
}

fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bytes_received(&self, n: usize) {
        add(&self.bytes_received, n as u64);
    }

    pub fn record_bytes_sent(&self, n: usize) {
        add(&self.bytes_sent, n as u64);
    }

    pub fn record_frame_decoded(&self) {
        add(&self.frames_decoded, 1);
    }

    pub fn record_frame_dropped(&self) {
        add(&self.frames_dropped, 1);
    }

    pub fn record_bytes_discarded(&self, n: usize) {
        add(&self.bytes_discarded, n as u64);
    }

    pub fn record_command_sent(&self) {
        add(&self.commands_sent, 1);
    }

    pub fn record_command_dropped(&self) {
        add(&self.commands_dropped, 1);
    }

    pub fn record_fault(&self) {
        add(&self.faults, 1);
    }

    pub fn record_connect(&self) {
        add(&self.connects, 1);
    }

    pub fn record_failed_connect(&self) {
        add(&self.failed_connects, 1);
    }

    pub fn snapshot(&self) -> LinkStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LinkStatsSnapshot {
            bytes_received: get(&self.bytes_received),
            bytes_sent: get(&self.bytes_sent),
            frames_decoded: get(&self.frames_decoded),
            frames_dropped: get(&self.frames_dropped),
            bytes_discarded: get(&self.bytes_discarded),
            commands_sent: get(&self.commands_sent),
            commands_dropped: get(&self.commands_dropped),
            faults: get(&self.faults),
            connects: get(&self.connects),
            failed_connects: get(&self.failed_connects),
        }
    }
}
