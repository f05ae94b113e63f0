//! In-memory sessions for tests
//!
//! A [`MockConnector`] hands out [`MockSession`]s and keeps every session it
//! opened, so a test can feed inbound bytes, inspect written frames and
//! break the "cable" at will.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::{Connector, Session};
use crate::error::{LinkError, Result};

/// Scriptable session
#[derive(Debug)]
pub struct MockSession {
    port_name: String,
    inbound: Mutex<BytesMut>,
    written: Mutex<Vec<Bytes>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    open: AtomicBool,
    closes: AtomicU32,
    write_notify: Notify,
}

impl MockSession {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            inbound: Mutex::new(BytesMut::new()),
            written: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            open: AtomicBool::new(true),
            closes: AtomicU32::new(0),
            write_notify: Notify::new(),
        }
    }

    /// Queue bytes for the next `read_available`
    pub fn push_inbound(&self, data: &[u8]) {
        self.inbound.lock().extend_from_slice(data);
    }

    /// Frames written so far, one entry per `write_all`
    pub fn written(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }

    /// Make every following read fail, as if the cable were pulled
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Make every following write fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// How many times `close` was called
    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` frames have been written
    pub async fn wait_for_writes(&self, count: usize) {
        loop {
            let notified = self.write_notify.notified();
            if self.written.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Session for MockSession {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn read_available(&self) -> Result<Bytes> {
        if !self.is_open() {
            return Err(LinkError::Closed {
                port: self.port_name.clone(),
            });
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LinkError::io(&self.port_name, "simulated read failure"));
        }
        Ok(self.inbound.lock().split().freeze())
    }

    async fn write_all(&self, data: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(LinkError::Closed {
                port: self.port_name.clone(),
            });
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LinkError::io(&self.port_name, "simulated write failure"));
        }
        self.written.lock().push(Bytes::copy_from_slice(data));
        self.write_notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Connector producing [`MockSession`]s named `<port>#<n>`
#[derive(Debug)]
pub struct MockConnector {
    port_name: String,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    fail_next: AtomicU32,
    attempts: AtomicU64,
    connected: Notify,
}

impl MockConnector {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            sessions: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            attempts: AtomicU64::new(0),
            connected: Notify::new(),
        }
    }

    /// Report `PortNotFound` for the next `n` connect attempts
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn latest_session(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().last().cloned()
    }

    /// Wait until `count` sessions have been opened and return the last one
    pub async fn wait_for_session(&self, count: usize) -> Arc<MockSession> {
        loop {
            let notified = self.connected.notified();
            {
                let sessions = self.sessions.lock();
                if sessions.len() >= count {
                    if let Some(session) = sessions.last() {
                        return session.clone();
                    }
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn describe(&self) -> String {
        format!("mock port {}", self.port_name)
    }

    async fn connect(&self) -> Result<Arc<dyn Session>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(LinkError::PortNotFound {
                patterns: vec![self.port_name.clone()],
            });
        }

        let session = {
            let mut sessions = self.sessions.lock();
            let session = Arc::new(MockSession::new(format!(
                "{}#{}",
                self.port_name,
                sessions.len() + 1
            )));
            sessions.push(session.clone());
            session
        };
        debug!("Mock session opened: {}", session.port_name());
        self.connected.notify_waiters();
        Ok(session)
    }
}
