//! Device link service (`linksrv`)
//!
//! Talks to the greenhouse controller over USB serial and logs what it
//! reports.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::service_bootstrap::{self, ServiceInfo};
use common::{logging, shutdown, ServiceArgs};
use errors::{OmnitorError, OmnitorErrorTrait, OmnitorResult};
use linksrv::config::SERVICE_NAME;
use linksrv::session::list_ports;
use linksrv::{DeviceLink, LinkConfig, LinkState, SimulatedConnector};

#[derive(Parser, Debug)]
#[command(name = "linksrv", version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serial device link for greenhouse telemetry")]
struct Cli {
    #[command(flatten)]
    args: ServiceArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the link and log the latest reading every poll interval (default)
    Run {
        /// Use the built-in simulated device instead of a serial port
        #[arg(long)]
        simulate: bool,
    },
    /// Send one opcode to the device and exit
    Send {
        #[arg(allow_negative_numbers = true)]
        opcode: i32,

        #[arg(long)]
        simulate: bool,

        /// How long to wait for the device to connect
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
    /// List serial ports and whether they match the configured patterns
    Ports,
    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Command::Run { simulate: false });

    let service_info = ServiceInfo::new(
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        "Serial device link for greenhouse telemetry",
    );
    if let Err(e) = service_bootstrap::init_logging(&service_info, &cli.args) {
        eprintln!("{}: {}", SERVICE_NAME, e);
        return ExitCode::from(e.exit_code());
    }
    if matches!(command, Command::Run { .. }) && !cli.args.no_color {
        service_bootstrap::print_startup_banner(&service_info);
    }

    let result = match LinkConfig::load(cli.args.config.as_deref()) {
        Ok(config) => dispatch(command, config).await,
        Err(e) => Err(e),
    };
    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            errors::log_at!(
                e.log_level(),
                code = e.error_code(),
                "{} failed: {}",
                SERVICE_NAME,
                e
            );
            ExitCode::from(e.exit_code())
        },
    };
    logging::shutdown();
    code
}

async fn dispatch(command: Command, config: LinkConfig) -> OmnitorResult<()> {
    match command {
        Command::Run { simulate } => run(&config, simulate).await,
        Command::Send {
            opcode,
            simulate,
            wait_secs,
        } => send(&config, opcode, simulate, Duration::from_secs(wait_secs)).await,
        Command::Ports => print_ports(&config),
        Command::Config => {
            let yaml = serde_yaml::to_string(&config).context("render configuration")?;
            print!("{yaml}");
            Ok(())
        },
    }
}

fn start_link(config: &LinkConfig, simulate: bool) -> DeviceLink {
    if simulate {
        info!("Using simulated device");
        DeviceLink::start(
            config,
            Arc::new(SimulatedConnector::new(config.simulator.clone())),
        )
    } else {
        DeviceLink::serial(config)
    }
}

/// Poll the latest reading until a shutdown signal arrives
///
/// Device faults never end this loop; the link keeps reconnecting.
async fn run(config: &LinkConfig, simulate: bool) -> OmnitorResult<()> {
    let link = start_link(config, simulate);
    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown::cancel_on_shutdown(shutdown_token.clone()));

    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_seen = None;

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        match link.latest_sample() {
            Some(sample) => {
                let fresh = last_seen != Some(sample.received_at);
                last_seen = Some(sample.received_at);
                let json = serde_json::to_string(&sample).context("serialize sample")?;
                info!(state = %link.state(), fresh, "{}", json);
            },
            None => debug!("No reading yet (link {})", link.state()),
        }
    }

    link.stop().await;
    let stats = serde_json::to_string(&link.stats()).context("serialize link statistics")?;
    info!("Link statistics: {}", stats);
    info!("Shutdown complete");
    Ok(())
}

/// Connect, send one opcode, wait for it to leave the queue
async fn send(
    config: &LinkConfig,
    opcode: i32,
    simulate: bool,
    wait: Duration,
) -> OmnitorResult<()> {
    let link = start_link(config, simulate);

    match tokio::time::timeout(wait, link.wait_for_state(LinkState::Connected)).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => {
            link.stop().await;
            return Err(e.into());
        },
        Err(_) => {
            link.stop().await;
            return Err(OmnitorError::Timeout(format!(
                "device connection ({}s)",
                wait.as_secs()
            )));
        },
    }

    link.send_command(opcode)?;
    let drained = tokio::time::timeout(wait, async {
        loop {
            let stats = link.stats();
            if stats.commands_sent + stats.commands_dropped > 0 {
                return stats.commands_sent > 0;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    link.stop().await;

    match drained {
        Ok(true) => {
            info!("Sent opcode {}", opcode);
            Ok(())
        },
        Ok(false) => Err(OmnitorError::Communication(format!(
            "opcode {} dropped after a write failure",
            opcode
        ))),
        Err(_) => {
            warn!("Opcode {} still queued at shutdown", opcode);
            Err(OmnitorError::Timeout(format!("opcode {} to be written", opcode)))
        },
    }
}

fn print_ports(config: &LinkConfig) -> OmnitorResult<()> {
    let ports = list_ports(&config.device_patterns)?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in &ports {
        let marker = if port.matched { "*" } else { " " };
        println!("{} {:<24} {}", marker, port.path, port.description);
    }
    println!("\n* matches {:?}", config.device_patterns);
    Ok(())
}
