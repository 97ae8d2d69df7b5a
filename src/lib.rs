//! This crate polls hybrid solar inverters over Modbus and keeps their latest
//! readings in a shared, lock-protected snapshot.
//!
//! Inverter models are described by register profiles. Supported profiles:
//! * Solinteg hybrid inverters (register table V00.17)
//!
//! Profiles which exist but are not mapped yet:
//! * Sermatec 10kW
//!
//! Two physical layers are supported:
//! * Modbus RTU over a serial/RS485 line, through any [embedded_io] byte stream
//!   (a host serial port adapter is provided in [port])
//! * Modbus TCP
//!
//! The serial line should be configured like so:
//! * Default baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! A typical setup builds an [InverterDriver] from a [DriverConfig] and hands it
//! to the [poller], while display and telemetry code read copies of the
//! snapshot:
//!
//! ```no_run
//! use inverter_link::{DriverConfig, poller};
//!
//! let config = DriverConfig::network("192.168.1.50", 502);
//! let handle = poller::start(&config, None)?;
//! if let Some(snapshot) = handle.driver().snapshot_copy() {
//!     if snapshot.valid {
//!         println!("PV: {} W", snapshot.pv_power_w);
//!     }
//! }
//! # Ok::<(), inverter_link::error::InitError>(())
//! ```

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod poller;
pub mod port;
pub mod profile;
pub mod rtu;
pub mod scaling;
pub mod tcp;
pub mod transport;
pub mod types;

pub use config::{DriverConfig, TransportConfig};
pub use driver::InverterDriver;
pub use types::{InverterSnapshot, InverterStatus, WorkMode};

#[cfg(test)]
mod mock_serial;
