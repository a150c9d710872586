//! This crate provides a client for monitoring and configuring Wallbox eM4 EV charging stations.
//!
//! It uses Modbus TCP under the hood and talks to a single device at a time.
//! Measurements (phase currents and voltages, power, energy, status) can be read
//! for any outlet; the only value ever written is the maximum charging current
//! (Icmax), and only after checking it against the limits the device reports:
//! * the configured minimum current (6 A by default)
//! * the installation limit (Idefault)
//! * the rated current of the device (Irated)
//!
//! The device is expected to be configured like so:
//! * Port: 502
//! * Unit ID: 255
//! * Modbus TCP server enabled on the eM4 web interface
//!
//! ```no_run
//! use em4_modbus::{config::ClientConfig, evse::Em4Client};
//!
//! let mut client = Em4Client::connect(ClientConfig::default())?;
//! for reading in client.read_all(1)? {
//!     println!("{reading}");
//! }
//! client.set_icmax(1, 10.0)?;
//! # Ok::<(), em4_modbus::error::Error>(())
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod evse;
pub mod model;
pub mod register;
pub mod retry;
pub mod safety;
pub mod scaling;
pub mod transport;

#[cfg(test)]
mod mock_transport;

pub use error::{Error, Result};
pub use evse::Em4Client;
