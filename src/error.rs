//! Our error types for the eM4 client.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong between the caller and the charging station.
///
/// The validation variants (`BelowMinimum`, `ExceedsInstallationLimit`,
/// `ExceedsRatedCapacity`) are only ever produced before a write frame is
/// encoded, so seeing one guarantees nothing was sent to the device.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {context}")]
    Connection {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Modbus protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("Requested {requested} A is below the minimum of {minimum} A")]
    BelowMinimum { requested: f64, minimum: f64 },
    #[error("Requested {requested} A exceeds installation limit {limit} A")]
    ExceedsInstallationLimit { requested: f64, limit: f64 },
    #[error("Requested {requested} A exceeds rated capacity {rated} A")]
    ExceedsRatedCapacity { requested: f64, rated: f64 },
    #[error("Device reports {observed} A after writing {requested} A")]
    WriteNotApplied { requested: f64, observed: f64 },
    #[error("Value {value} does not fit a register scaled by {divisor}")]
    Range { value: f64, divisor: u32 },
    #[error("Outlet numbers start at 1 (got {0})")]
    InvalidOutlet(u16),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reasons a frame from the device was not accepted.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Exception response or broken frame, as reported by the frame parser.
    #[error("{0}")]
    Modbus(rmodbus::ErrorKind),
    #[error("expected {expected} registers, received {received}")]
    CountMismatch { expected: u16, received: usize },
    #[error("frame of {len} bytes is too short")]
    ShortFrame { len: usize },
    #[error("invalid MBAP header (protocol {protocol}, length {remaining})")]
    InvalidHeader { protocol: u16, remaining: usize },
    #[error("{0} did not decode to the expected kind of value")]
    UnexpectedValue(crate::model::Metric),
}

impl Error {
    /// Shorthand for a connection error wrapping an I/O failure.
    pub(crate) fn connection(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Connection {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Only timeouts are worth retrying without reconnecting first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<rmodbus::ErrorKind> for Error {
    fn from(err: rmodbus::ErrorKind) -> Self {
        Error::Protocol(ProtocolError::Modbus(err))
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}
