//! In-process stand-in for the greenhouse controller
//!
//! Emits a slightly noisy reading frame every `frame_interval_ms` and
//! records the commands it receives. With `disconnect_after_frames` set,
//! every session "loses its cable" after that many frames so the
//! reconnection path can be exercised without hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{decode_command, encode_reading, Command, Reading};
use crate::config::SimulatorConfig;
use crate::error::{LinkError, Result};
use crate::session::{hex, Connector, Session};

/// Nominal greenhouse values the simulated sensors jitter around
const BASELINE: [f32; 8] = [22.0, 55.0, 420.0, 300.0, 512.0, 2.0, 1.3, 19.5];
const JITTER: [f32; 8] = [0.5, 2.0, 15.0, 25.0, 3.0, 0.05, 0.05, 0.2];

fn noisy_reading() -> Reading {
    let mut rng = rand::thread_rng();
    let mut values = BASELINE;
    for (value, jitter) in values.iter_mut().zip(JITTER) {
        *value += rng.gen_range(-jitter..=jitter);
    }
    Reading::from_array(values)
}

/// Connector that opens a fresh [`SimulatedSession`] on every call
#[derive(Debug)]
pub struct SimulatedConnector {
    config: SimulatorConfig,
    sessions: AtomicU64,
    received: Arc<Mutex<Vec<Command>>>,
}

impl SimulatedConnector {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            sessions: AtomicU64::new(0),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Commands received across all sessions, oldest first
    pub fn received_commands(&self) -> Vec<Command> {
        self.received.lock().clone()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    fn describe(&self) -> String {
        format!(
            "simulated device (frame every {} ms)",
            self.config.frame_interval_ms
        )
    }

    async fn connect(&self) -> Result<Arc<dyn Session>> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let session = SimulatedSession {
            port_name: format!("sim#{n}"),
            interval: Duration::from_millis(self.config.frame_interval_ms),
            disconnect_after: self.config.disconnect_after_frames,
            device: Mutex::new(DeviceClock {
                next_frame: Instant::now(),
                frames_sent: 0,
            }),
            received: self.received.clone(),
            open: AtomicBool::new(true),
        };
        info!("Simulated device attached as {}", session.port_name);
        Ok(Arc::new(session))
    }
}

#[derive(Debug)]
struct DeviceClock {
    next_frame: Instant,
    frames_sent: u32,
}

/// One simulated connection
#[derive(Debug)]
pub struct SimulatedSession {
    port_name: String,
    interval: Duration,
    disconnect_after: u32,
    device: Mutex<DeviceClock>,
    received: Arc<Mutex<Vec<Command>>>,
    open: AtomicBool,
}

impl SimulatedSession {
    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(LinkError::Closed {
                port: self.port_name.clone(),
            })
        }
    }
}

#[async_trait]
impl Session for SimulatedSession {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn read_available(&self) -> Result<Bytes> {
        self.ensure_open()?;
        let mut device = self.device.lock();

        if self.disconnect_after > 0 && device.frames_sent >= self.disconnect_after {
            return Err(LinkError::io(&self.port_name, "simulated cable pull"));
        }

        let now = Instant::now();
        if now < device.next_frame {
            return Ok(Bytes::new());
        }
        device.next_frame = now + self.interval;
        device.frames_sent += 1;

        let frame = encode_reading(&noisy_reading());
        debug!("Simulated frame {} on {}", device.frames_sent, self.port_name);
        Ok(frame)
    }

    async fn write_all(&self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        match decode_command(data) {
            Some(command) => {
                info!(
                    "Simulated device received command {} on {}",
                    command.opcode(),
                    self.port_name
                );
                self.received.lock().push(command);
            },
            None => warn!(
                "Simulated device ignored malformed frame [{}]",
                hex(data)
            ),
        }
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Simulated device detached from {}", self.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
