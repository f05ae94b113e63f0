//! Serial port session over `tokio-serial`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};
use tracing::{debug, info};

use super::{hex, Connector, Session};
use crate::config::LinkConfig;
use crate::error::{ErrorExt, LinkError, Result};

/// Upper bound on bytes pulled in one `read_available` call
const MAX_READ_CHUNK: usize = 4096;

/// An enumerated serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDescriptor {
    pub path: String,
    /// USB product and manufacturer, or `n/a`
    pub description: String,
    /// Whether the port matches one of the configured patterns
    pub matched: bool,
}

/// Case-sensitive substring match over description or path
pub fn matches_patterns(path: &str, description: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| description.contains(p.as_str()) || path.contains(p.as_str()))
}

/// First matching port in enumeration order
pub fn select_port(ports: &[PortDescriptor]) -> Option<&PortDescriptor> {
    ports.iter().find(|p| p.matched)
}

fn describe_port(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let parts: Vec<&str> = [usb.product.as_deref(), usb.manufacturer.as_deref()]
                .into_iter()
                .flatten()
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                format!("USB {:04x}:{:04x}", usb.vid, usb.pid)
            } else {
                parts.join(" - ")
            }
        },
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "n/a".to_string(),
    }
}

/// Enumerate system serial ports and flag the ones matching `patterns`
pub fn list_ports(patterns: &[String]) -> Result<Vec<PortDescriptor>> {
    let ports = tokio_serial::available_ports().io_failure("<enumerate>")?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let description = describe_port(&info.port_type);
            let matched = matches_patterns(&info.port_name, &description, patterns);
            PortDescriptor {
                path: info.port_name,
                description,
                matched,
            }
        })
        .collect())
}

/// Finds the device by pattern (or fixed path) and opens it
#[derive(Debug, Clone)]
pub struct SerialConnector {
    patterns: Vec<String>,
    port: Option<String>,
    baud_rate: u32,
    read_timeout: Duration,
    write_timeout: Duration,
    settle_delay: Duration,
}

impl SerialConnector {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            patterns: config.device_patterns.clone(),
            port: config.port.clone(),
            baud_rate: config.baud_rate,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            settle_delay: config.settle_delay(),
        }
    }

    fn resolve_port(&self) -> Result<String> {
        if let Some(port) = &self.port {
            return Ok(port.clone());
        }
        let ports = list_ports(&self.patterns)?;
        debug!("Enumerated {} serial ports", ports.len());
        select_port(&ports)
            .map(|p| {
                debug!("Selected {} ({})", p.path, p.description);
                p.path.clone()
            })
            .ok_or_else(|| LinkError::PortNotFound {
                patterns: self.patterns.clone(),
            })
    }
}

#[async_trait]
impl Connector for SerialConnector {
    fn describe(&self) -> String {
        match &self.port {
            Some(port) => port.clone(),
            None => format!("serial port matching {:?}", self.patterns),
        }
    }

    async fn connect(&self) -> Result<Arc<dyn Session>> {
        let port_name = self.resolve_port()?;
        debug!("Opening serial port: {} @ {}", port_name, self.baud_rate);

        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(&port_name, self.baud_rate)
            .timeout(self.read_timeout)
            .open_native_async()
            .io_failure(&port_name)?;

        #[cfg(unix)]
        stream
            .set_exclusive(false)
            .map_err(|e| LinkError::io(&port_name, format!("set exclusive mode: {e}")))?;

        // Opening the port resets the board
        tokio::time::sleep(self.settle_delay).await;

        info!("Opened serial port: {}", port_name);
        Ok(Arc::new(SerialSession::new(
            port_name,
            stream,
            self.write_timeout,
        )))
    }
}

/// An open serial port, split so reads and writes do not wait on each other
pub struct SerialSession {
    port_name: String,
    reader: Mutex<Option<ReadHalf<SerialStream>>>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    open: AtomicBool,
    write_timeout: Duration,
}

impl SerialSession {
    fn new(port_name: String, stream: SerialStream, write_timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            port_name,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            open: AtomicBool::new(true),
            write_timeout,
        }
    }

    fn closed(&self) -> LinkError {
        LinkError::Closed {
            port: self.port_name.clone(),
        }
    }
}

impl std::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSession")
            .field("port_name", &self.port_name)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl Session for SerialSession {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn read_available(&self) -> Result<Bytes> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(|| self.closed())?;

        let mut out = BytesMut::new();
        let mut chunk = [0u8; 256];
        while out.len() < MAX_READ_CHUNK {
            // Poll once; a pending read means nothing is buffered
            match reader.read(&mut chunk).now_or_never() {
                None => break,
                Some(Ok(0)) => {
                    return Err(LinkError::io(&self.port_name, "device closed the stream"));
                },
                Some(Ok(n)) => out.extend_from_slice(&chunk[..n]),
                Some(Err(e)) => return Err(LinkError::io(&self.port_name, e)),
            }
        }

        if !out.is_empty() {
            debug!(hex_data = %hex(&out), length = out.len(), direction = "recv", "Raw packet");
        }
        Ok(out.freeze())
    }

    async fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| self.closed())?;

        let send = async {
            writer.write_all(data).await?;
            writer.flush().await
        };
        match timeout(self.write_timeout, send).await {
            Ok(Ok(())) => {
                debug!(hex_data = %hex(data), length = data.len(), direction = "send", "Raw packet");
                Ok(())
            },
            Ok(Err(e)) => Err(LinkError::io(&self.port_name, e)),
            Err(_) => Err(LinkError::io(
                &self.port_name,
                format!("write timed out after {:?}", self.write_timeout),
            )),
        }
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            // Serial port is closed when both halves are dropped
            self.reader.lock().await.take();
            self.writer.lock().await.take();
            info!("Closed serial port: {}", self.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> Vec<String> {
        vec!["Arduino".to_string(), "ttyACM".to_string()]
    }

    fn port(path: &str, description: &str) -> PortDescriptor {
        PortDescriptor {
            path: path.to_string(),
            description: description.to_string(),
            matched: matches_patterns(path, description, &patterns()),
        }
    }

    #[test]
    fn test_match_by_description_or_path() {
        assert!(matches_patterns("/dev/ttyUSB0", "Arduino Uno", &patterns()));
        assert!(matches_patterns("/dev/ttyACM0", "n/a", &patterns()));
        assert!(!matches_patterns("/dev/ttyS0", "n/a", &patterns()));
        // Case-sensitive
        assert!(!matches_patterns("/dev/ttyUSB0", "arduino clone", &patterns()));
        // Empty patterns never match everything
        assert!(!matches_patterns("/dev/ttyS0", "n/a", &[String::new()]));
    }

    #[test]
    fn test_select_first_match() {
        let ports = vec![
            port("/dev/ttyS0", "n/a"),
            port("/dev/ttyUSB0", "CP2102 USB to UART - Silicon Labs"),
            port("/dev/ttyACM0", "Arduino Mega 2560 - Arduino (www.arduino.cc)"),
            port("/dev/ttyACM1", "n/a"),
        ];
        assert_eq!(select_port(&ports).map(|p| p.path.as_str()), Some("/dev/ttyACM0"));
        assert!(select_port(&ports[..2]).is_none());
    }

    #[test]
    fn test_describe_usb_port() {
        let usb = SerialPortType::UsbPort(tokio_serial::UsbPortInfo {
            vid: 0x2341,
            pid: 0x0043,
            serial_number: None,
            manufacturer: Some("Arduino (www.arduino.cc)".into()),
            product: Some("Arduino Uno".into()),
        });
        assert_eq!(describe_port(&usb), "Arduino Uno - Arduino (www.arduino.cc)");
        assert_eq!(describe_port(&SerialPortType::Unknown), "n/a");
    }

    #[test]
    fn test_connector_describe() {
        let connector = SerialConnector::new(&LinkConfig::default());
        assert!(connector.describe().contains("Arduino"));

        let connector = SerialConnector::new(&LinkConfig {
            port: Some("/dev/ttyACM7".into()),
            ..Default::default()
        });
        assert_eq!(connector.describe(), "/dev/ttyACM7");
    }
}
