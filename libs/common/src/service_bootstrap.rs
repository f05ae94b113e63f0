//! Service startup helpers: banner and logging initialization

use errors::{OmnitorError, OmnitorResult};
use tracing::info;

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "linksrv")
    pub name: String,
    /// Service version
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Log the startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
  ██████╗ ███╗   ███╗███╗   ██╗██╗████████╗ ██████╗ ██████╗
 ██╔═══██╗████╗ ████║████╗  ██║██║╚══██╔══╝██╔═══██╗██╔══██╗
 ██║   ██║██╔████╔██║██╔██╗ ██║██║   ██║   ██║   ██║██████╔╝
 ██║   ██║██║╚██╔╝██║██║╚██╗██║██║   ██║   ██║   ██║██╔══██╗
 ╚██████╔╝██║ ╚═╝ ██║██║ ╚████║██║   ██║   ╚██████╔╝██║  ██║
  ╚═════╝ ╚═╝     ╚═╝╚═╝  ╚═══╝╚═╝   ╚═╝    ╚═════╝ ╚═╝  ╚═╝
"#;

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
}

/// Build the logging configuration for a service from its CLI arguments
pub fn log_config(service: &ServiceInfo, args: &ServiceArgs) -> LogConfig {
    let log_dir = logging::init_log_root(args.log_dir.as_deref()).join(&service.name);
    LogConfig {
        service_name: service.name.clone(),
        log_dir,
        level: args.parse_log_level(),
        ansi: !args.no_color,
        ..Default::default()
    }
}

/// Initialize logging for a service
pub fn init_logging(service: &ServiceInfo, args: &ServiceArgs) -> OmnitorResult<()> {
    logging::init_with_config(log_config(service, args))
        .map_err(|e| OmnitorError::Configuration(format!("Failed to initialize logging: {}", e)))
}
