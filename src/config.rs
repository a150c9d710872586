//! Static installation settings: where the charging station lives and which limits apply.
//!
//! ```yaml
//! device:
//!   host: 192.168.1.157
//!   port: 502
//!   unit_id: 255
//!   timeout_ms: 3000
//! limits:
//!   minimum: 6.0
//! retries: 2
//! confirm_delay_ms: 500
//! default_outlet: 1
//! ```

use std::{fmt, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn port_default() -> u16 {
    502
}
fn unit_id_default() -> u8 {
    0xFF
}
fn timeout_ms_default() -> u64 {
    3000
}

/// Address of a single eM4 on the network.
///
/// Once a session has been opened with a target it is not mutated; pass a new
/// target to [`Em4Client::reconnect`](crate::evse::Em4Client::reconnect) instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub host: String,
    #[serde(default = "port_default")]
    pub port: u16,
    /// The eM4 answers on unit `0xFF`.
    #[serde(default = "unit_id_default")]
    pub unit_id: u8,
    /// Per-exchange timeout, also used when connecting.
    #[serde(default = "timeout_ms_default")]
    pub timeout_ms: u64,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port_default(),
            unit_id: unit_id_default(),
            timeout_ms: timeout_ms_default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Same target with a different host, used for one-shot IP overrides.
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn minimum_default() -> f64 {
    6.0
}

/// Installation-side current limits which the device itself does not report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentLimits {
    /// Smallest current a vehicle may be offered, in amperes. IEC 61851 puts this at 6 A.
    #[serde(default = "minimum_default")]
    pub minimum: f64,
}

impl Default for CurrentLimits {
    fn default() -> Self {
        Self {
            minimum: minimum_default(),
        }
    }
}

fn device_default() -> ConnectionTarget {
    ConnectionTarget::new("192.168.1.157")
}
fn retries_default() -> u32 {
    2
}
fn confirm_delay_ms_default() -> u64 {
    500
}
fn default_outlet_default() -> u16 {
    1
}

/// Everything [`Em4Client`](crate::evse::Em4Client) needs to know up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "device_default")]
    pub device: ConnectionTarget,
    #[serde(default)]
    pub limits: CurrentLimits,
    /// Additional attempts after a timed-out exchange.
    #[serde(default = "retries_default")]
    pub retries: u32,
    /// How long the device gets to apply a write before it is read back.
    #[serde(default = "confirm_delay_ms_default")]
    pub confirm_delay_ms: u64,
    #[serde(default = "default_outlet_default")]
    pub default_outlet: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device: device_default(),
            limits: CurrentLimits::default(),
            retries: retries_default(),
            confirm_delay_ms: confirm_delay_ms_default(),
            default_outlet: default_outlet_default(),
        }
    }
}

impl ClientConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ClientConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&contents)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.device.host.is_empty() {
            return Err(Error::Config("device.host must not be empty".into()));
        }
        if self.device.timeout_ms == 0 {
            return Err(Error::Config("device.timeout_ms must be positive".into()));
        }
        if !self.limits.minimum.is_finite() || self.limits.minimum < 0.0 {
            return Err(Error::Config(format!(
                "limits.minimum must be a non-negative current (got {})",
                self.limits.minimum
            )));
        }
        if self.default_outlet == 0 {
            return Err(Error::InvalidOutlet(0));
        }
        Ok(())
    }
}
