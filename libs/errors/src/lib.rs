//! Unified error handling for omnitor services
//!
//! Every service keeps its own domain error type (e.g. `LinkError` in
//! linksrv) and converts into [`OmnitorError`] at the process boundary.
//! [`OmnitorErrorTrait`] classifies all of them so a fault is logged at a
//! level that matches its category, and a failed binary exits with a code
//! that tells configuration problems apart from an absent device.

use thiserror::Error;

/// Main error type for all omnitor services
#[derive(Debug, Error)]
pub enum OmnitorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Device & Communication Errors
    // ======================================
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using OmnitorError
pub type OmnitorResult<T> = Result<T, OmnitorError>;

impl OmnitorError {
    /// Process exit code for this error when it terminates a binary
    pub fn exit_code(&self) -> u8 {
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Validation => 2,
            ErrorCategory::Connection | ErrorCategory::Timeout => 3,
            _ => 1,
        }
    }
}

impl From<figment::Error> for OmnitorError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl OmnitorErrorTrait for OmnitorError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::ShutdownError(_) => "SHUTDOWN_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::DeviceNotFound(_) | Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Communication(_) => ErrorCategory::Network,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::ShutdownError(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category, drives log level and exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Timeout,
    Validation,
    Protocol,
    Connection,
    Internal,
    DataCorruption,
    Unknown,
}

/// Omnitor error capability trait
///
/// Service error types keep their own domain variants and gain a common
/// interface by implementing this trait.
pub trait OmnitorErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable code for logs
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Level the error is logged at
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Unknown | ErrorCategory::Configuration => {
                Level::ERROR
            },
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::Connection
            | ErrorCategory::Protocol
            | ErrorCategory::DataCorruption => Level::WARN,
            ErrorCategory::Validation => Level::INFO,
        }
    }
}

/// Emit a tracing event at a level chosen at runtime
///
/// ```ignore
/// errors::log_at!(err.log_level(), code = err.error_code(), "send failed: {}", err);
/// ```
#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            ::tracing::Level::ERROR => ::tracing::error!($($arg)+),
            ::tracing::Level::WARN => ::tracing::warn!($($arg)+),
            ::tracing::Level::INFO => ::tracing::info!($($arg)+),
            ::tracing::Level::DEBUG => ::tracing::debug!($($arg)+),
            _ => ::tracing::trace!($($arg)+),
        }
    };
}
