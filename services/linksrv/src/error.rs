//! Error types for the device link

use errors::{ErrorCategory, OmnitorError, OmnitorErrorTrait};
use thiserror::Error;

/// Why a complete frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("checksum mismatch: computed {computed:#06X}, received {received:#06X}")]
    ChecksumMismatch { computed: u16, received: u16 },

    #[error("unexpected payload length {actual} (expected {expected})")]
    UnexpectedLength { expected: usize, actual: usize },
}

/// Device link error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// No enumerated port matched; retried by the supervisor
    #[error("no serial port matching {patterns:?}")]
    PortNotFound { patterns: Vec<String> },

    /// Open, read or write failed; triggers reconnection
    #[error("I/O failure on {port}: {reason}")]
    IoFailure { port: String, reason: String },

    /// A complete frame was dropped
    #[error("corrupt frame: {0}")]
    FrameCorrupt(#[from] FrameError),

    /// Caller broke an encoding contract; never retried
    #[error("encoding invariant violated: {0}")]
    EncodingInvariantViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation on a session that has already been closed
    #[error("session on {port} is closed")]
    Closed { port: String },

    #[error("device link stopped")]
    Stopped,
}

/// Result type for the device link
pub type Result<T> = std::result::Result<T, LinkError>;

impl LinkError {
    pub fn io(port: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::IoFailure {
            port: port.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the current session is unusable
    pub fn triggers_reconnect(&self) -> bool {
        matches!(self, Self::IoFailure { .. } | Self::Closed { .. })
    }

    /// Short failure class used in log lines
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::PortNotFound { .. } => "port_not_found",
            Self::IoFailure { .. } => "io_failure",
            Self::FrameCorrupt(_) => "frame_corrupt",
            Self::EncodingInvariantViolation(_) => "encoding_invariant",
            Self::Config(_) => "config",
            Self::Closed { .. } => "closed",
            Self::Stopped => "stopped",
        }
    }
}

/// Context helpers for foreign results
pub trait ErrorExt<T> {
    /// Map any error to [`LinkError::IoFailure`] on `port`
    fn io_failure(self, port: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn io_failure(self, port: &str) -> Result<T> {
        self.map_err(|e| LinkError::io(port, e))
    }
}

impl OmnitorErrorTrait for LinkError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::PortNotFound { .. } => "LINK_PORT_NOT_FOUND",
            Self::IoFailure { .. } => "LINK_IO_FAILURE",
            Self::FrameCorrupt(_) => "LINK_FRAME_CORRUPT",
            Self::EncodingInvariantViolation(_) => "LINK_ENCODING_INVARIANT",
            Self::Config(_) => "LINK_CONFIG_ERROR",
            Self::Closed { .. } => "LINK_SESSION_CLOSED",
            Self::Stopped => "LINK_STOPPED",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::PortNotFound { .. } | Self::IoFailure { .. } | Self::Closed { .. } => {
                ErrorCategory::Connection
            },
            Self::FrameCorrupt(_) => ErrorCategory::DataCorruption,
            Self::EncodingInvariantViolation(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Stopped => ErrorCategory::Internal,
        }
    }
}

impl From<LinkError> for OmnitorError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::PortNotFound { patterns } => {
                OmnitorError::DeviceNotFound(format!("no serial port matching {:?}", patterns))
            },
            LinkError::IoFailure { port, reason } => OmnitorError::ConnectionFailed {
                endpoint: port,
                reason,
            },
            LinkError::Closed { port } => OmnitorError::ConnectionFailed {
                endpoint: port,
                reason: "session closed".to_string(),
            },
            LinkError::FrameCorrupt(e) => OmnitorError::Protocol {
                protocol: "frame".to_string(),
                message: e.to_string(),
            },
            LinkError::EncodingInvariantViolation(msg) => OmnitorError::Protocol {
                protocol: "frame".to_string(),
                message: msg,
            },
            LinkError::Config(msg) => OmnitorError::Configuration(msg),
            LinkError::Stopped => OmnitorError::ShutdownError("device link stopped".to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_classification() {
        assert!(LinkError::io("/dev/ttyACM0", "broken pipe").triggers_reconnect());
        assert!(LinkError::Closed {
            port: "/dev/ttyACM0".into()
        }
        .triggers_reconnect());
        assert!(!LinkError::Stopped.triggers_reconnect());
        assert!(!LinkError::FrameCorrupt(FrameError::UnexpectedLength {
            expected: 32,
            actual: 4
        })
        .triggers_reconnect());
    }

    #[test]
    fn test_error_trait() {
        let err = LinkError::PortNotFound {
            patterns: vec!["Arduino".into()],
        };
        assert_eq!(err.error_code(), "LINK_PORT_NOT_FOUND");
        assert_eq!(err.log_level(), tracing::Level::WARN);

        let err = LinkError::EncodingInvariantViolation("payload too long".into());
        assert_eq!(err.log_level(), tracing::Level::INFO);

        let err = LinkError::FrameCorrupt(FrameError::ChecksumMismatch {
            computed: 0x1234,
            received: 0x4321,
        });
        assert_eq!(err.category(), ErrorCategory::DataCorruption);
        assert_eq!(err.log_level(), tracing::Level::WARN);
    }

    #[test]
    fn test_display_includes_port() {
        let err = LinkError::io("/dev/ttyACM1", "device disconnected");
        assert_eq!(
            err.to_string(),
            "I/O failure on /dev/ttyACM1: device disconnected"
        );
        assert_eq!(err.failure_class(), "io_failure");
    }

    #[test]
    fn test_error_ext() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = res.io_failure("/dev/ttyACM0").unwrap_err();
        assert!(matches!(err, LinkError::IoFailure { ref port, .. } if port == "/dev/ttyACM0"));
    }

    #[test]
    fn test_into_omnitor_error() {
        let err: OmnitorError = LinkError::io("/dev/ttyACM0", "gone").into();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");

        let err: OmnitorError = LinkError::config("baud_rate must be > 0").into();
        assert_eq!(err.exit_code(), 2);

        let err: OmnitorError = LinkError::PortNotFound {
            patterns: vec!["Arduino".into()],
        }
        .into();
        assert_eq!(err.exit_code(), 3);
    }
}
