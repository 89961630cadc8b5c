//! # ipmi_fand
//!
//! A Linux daemon that keeps server fans matched to CPU temperature through
//! the IPMI management controller.
//!
//! Every tick it reads the CPU temperature sensors, takes the hottest
//! reading, looks up the duty cycle in a static speed table and applies it.
//! Failed ticks are logged and skipped; the loop only stops on SIGINT or
//! SIGTERM.
//!
//! ## Architecture
//!
//! - [`SensorReader`](sensors::SensorReader) - parses the sensor table into one temperature
//! - [`map_speed`](speed_table::map_speed) - pure temperature to duty-cycle lookup
//! - [`Actuator`](actuator::Actuator) - applies the duty cycle
//! - [`ControlLoop`](control_loop::ControlLoop) - sequences the above on a fixed interval
//! - [`ManagementInterface`](transport::ManagementInterface) - the seam to `ipmitool`,
//!   implemented by [`IpmiTool`](drivers::IpmiTool)
//!
//! ## Example
//!
//! ```no_run
//! use ipmi_fand::{application::Application, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (config, _) = Config::load(None)?;
//!     Application::builder()
//!         .with_config(config)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod actuator;
pub mod application;
pub mod cli;
pub mod config;
pub mod control_loop;
pub mod drivers;
pub mod logging;
pub mod sensors;
pub mod speed_table;
pub mod transport;
