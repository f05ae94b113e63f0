//! Serial device link for the greenhouse controller
//!
//! Frames sensor readings in from, and opcodes out to, an Arduino-class
//! board on a USB serial port. The link resynchronizes on corrupt input and
//! reconnects on its own when the board disappears.
//!
//! ```no_run
//! use linksrv::{DeviceLink, LinkConfig};
//!
//! # async fn demo() -> linksrv::Result<()> {
//! let link = DeviceLink::serial(&LinkConfig::default());
//! link.send_command(1)?;
//! if let Some(reading) = link.get_latest_reading() {
//!     println!("air temperature: {}", reading.air_temperature);
//! }
//! link.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod link;
mod reader;
pub mod reconnect;
pub mod session;
pub mod simulator;
pub mod state;
pub mod stats;
pub mod supervisor;
mod writer;

pub use codec::{Command, DecodeOutcome, DecodeStep, FrameDecoder, Reading};
pub use config::{LinkConfig, SimulatorConfig};
pub use error::{FrameError, LinkError, Result};
pub use link::DeviceLink;
pub use session::{Connector, MockConnector, MockSession, SerialConnector, Session};
pub use simulator::SimulatedConnector;
pub use state::Sample;
pub use stats::LinkStatsSnapshot;
pub use supervisor::LinkState;
pub use writer::Outbound;
