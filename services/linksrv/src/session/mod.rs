//! Link sessions
//!
//! A [`Session`] is one open connection to the device. A [`Connector`] finds
//! the device and opens a new session. The supervisor is the only caller of
//! [`Connector::connect`] and [`Session::close`]; the reader and writer tasks
//! only read and write through a [`SessionLease`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub mod mock;
pub mod serial;

pub use mock::{MockConnector, MockSession};
pub use serial::{list_ports, PortDescriptor, SerialConnector, SerialSession};

/// One open connection to the device
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Device path or other identifier used in logs
    fn port_name(&self) -> &str;

    /// Return whatever bytes are available right now, possibly none
    async fn read_available(&self) -> Result<Bytes>;

    /// Write the whole frame, bounded by the write timeout
    async fn write_all(&self, data: &[u8]) -> Result<()>;

    /// Release the port; safe to call more than once
    async fn close(&self);

    fn is_open(&self) -> bool;
}

/// Discovers and opens the device
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human readable target, e.g. the configured patterns
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn Session>>;
}

/// A session tagged with the connection epoch it belongs to
#[derive(Clone)]
pub struct SessionLease {
    pub epoch: u64,
    pub session: Arc<dyn Session>,
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("epoch", &self.epoch)
            .field("port", &self.session.port_name())
            .finish()
    }
}

/// Space-separated uppercase hex, for raw packet debug logs
pub(crate) fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
