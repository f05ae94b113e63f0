//! Basic library shared by omnitor services
//!
//! - logging bootstrap
//! - layered configuration loading
//! - shutdown signal handling
//! - service startup helpers

pub mod bootstrap_args;
pub mod config_loader;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use service_bootstrap::ServiceInfo;
