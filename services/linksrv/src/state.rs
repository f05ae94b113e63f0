//! Latest-reading cell shared between the reader task and consumers

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::codec::Reading;

/// A reading and the time it was decoded
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub reading: Reading,
    pub received_at: DateTime<Utc>,
}

/// Holds the most recent [`Sample`], or nothing before the first frame
///
/// One producer overwrites, any number of consumers copy out. A reader never
/// sees a partially written sample.
#[derive(Debug, Default)]
pub struct LatestReading {
    inner: RwLock<Option<Sample>>,
}

impl LatestReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current value with `reading` stamped now
    pub fn publish(&self, reading: Reading) -> Sample {
        let sample = Sample {
            reading,
            received_at: Utc::now(),
        };
        *self.inner.write() = Some(sample);
        sample
    }

    pub fn sample(&self) -> Option<Sample> {
        *self.inner.read()
    }

    pub fn reading(&self) -> Option<Reading> {
        self.inner.read().map(|s| s.reading)
    }
}
