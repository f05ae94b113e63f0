//! Command-line arguments shared by omnitor services
//!
//! Services flatten [`ServiceArgs`] into their own clap parser.

use std::path::PathBuf;

use clap::Args;

/// Common service startup arguments
#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    pub log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log directory (OMNITOR_LOG_DIR takes precedence)
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            config: None,
            log_level: "info".to_string(),
            no_color: false,
            log_dir: None,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self.parse_log_level(), tracing::Level::DEBUG | tracing::Level::TRACE)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ServiceArgs,
    }

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.log_level, "info");
        assert!(!args.no_color);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_parse_log_level() {
        let args = ServiceArgs {
            log_level: "WARN".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);

        let args = ServiceArgs {
            log_level: "invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_is_development() {
        assert!(!ServiceArgs::default().is_development());
        let args = ServiceArgs {
            log_level: "trace".to_string(),
            ..Default::default()
        };
        assert!(args.is_development());
    }

    #[test]
    fn test_flatten_into_cli() {
        let cli = TestCli::try_parse_from([
            "svc",
            "--config",
            "config/linksrv.yaml",
            "-l",
            "debug",
            "--no-color",
        ])
        .unwrap();
        assert_eq!(cli.args.config, Some(PathBuf::from("config/linksrv.yaml")));
        assert_eq!(cli.args.parse_log_level(), tracing::Level::DEBUG);
        assert!(cli.args.no_color);
        assert!(cli.args.log_dir.is_none());
    }
}
