//! Named metrics of an eM4 outlet and how to turn their registers into physical values.

use strum_macros::{EnumCount, EnumIter};

use crate::{
    error::{ProtocolError, Result},
    register::{DeviceStatus, Em4Register},
    scaling::{Scale, Unit, ValueKind},
};

/// Every value reported by [`Em4Client::read_all`](crate::evse::Em4Client::read_all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, strum_macros::Display)]
pub enum Metric {
    Status,
    #[strum(serialize = "Ic")]
    Ic,
    #[strum(serialize = "Icmax")]
    IcMax,
    #[strum(serialize = "Idefault")]
    IDefault,
    #[strum(serialize = "Irated")]
    IRated,
    #[strum(serialize = "I L1")]
    CurrentL1,
    #[strum(serialize = "I L2")]
    CurrentL2,
    #[strum(serialize = "I L3")]
    CurrentL3,
    #[strum(serialize = "U L1")]
    VoltageL1,
    #[strum(serialize = "U L2")]
    VoltageL2,
    #[strum(serialize = "U L3")]
    VoltageL3,
    #[strum(serialize = "Active power")]
    ActivePower,
    Energy,
}

/// Where a metric lives and how its raw words are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMapEntry {
    pub metric: Metric,
    pub register: Em4Register,
    /// Absolute start address for the outlet this entry was built for.
    pub address: u16,
    /// 1 or 2.
    pub count: u16,
    pub kind: ValueKind,
    pub scale: Scale,
    pub unit: Unit,
}

impl Metric {
    /// Static layout of this metric: (register, count, kind, scale, unit).
    const fn layout(&self) -> (Em4Register, u16, ValueKind, Scale, Unit) {
        use Metric as M;
        use ValueKind::{Status, Unsigned};
        match self {
            M::Status => (Em4Register::Status, 1, Status, Scale::UNITY, Unit::None),
            M::Ic => (Em4Register::Ic, 1, Unsigned, Scale::DECI, Unit::Ampere),
            M::IcMax => (Em4Register::IcMax, 1, Unsigned, Scale::DECI, Unit::Ampere),
            M::IDefault => (Em4Register::IDefault, 1, Unsigned, Scale::DECI, Unit::Ampere),
            M::IRated => (Em4Register::IRated, 1, Unsigned, Scale::DECI, Unit::Ampere),
            M::CurrentL1 => (Em4Register::CurrentL1, 2, Unsigned, Scale::DECI, Unit::Ampere),
            M::CurrentL2 => (Em4Register::CurrentL2, 2, Unsigned, Scale::DECI, Unit::Ampere),
            M::CurrentL3 => (Em4Register::CurrentL3, 2, Unsigned, Scale::DECI, Unit::Ampere),
            M::VoltageL1 => (Em4Register::VoltageL1, 2, Unsigned, Scale::DECI, Unit::Volt),
            M::VoltageL2 => (Em4Register::VoltageL2, 2, Unsigned, Scale::DECI, Unit::Volt),
            M::VoltageL3 => (Em4Register::VoltageL3, 2, Unsigned, Scale::DECI, Unit::Volt),
            M::ActivePower => (Em4Register::ActivePower, 2, Unsigned, Scale::MILLI, Unit::Kilowatt),
            M::Energy => (Em4Register::Energy, 2, Unsigned, Scale::CENTI, Unit::KilowattHour),
        }
    }

    /// Register map entry of this metric for `outlet`.
    pub fn entry(&self, outlet: u16) -> Result<RegisterMapEntry> {
        let (register, count, kind, scale, unit) = self.layout();
        Ok(RegisterMapEntry {
            metric: *self,
            register,
            address: register.address(outlet)?,
            count,
            kind,
            scale,
            unit,
        })
    }
}

/// Start address of `metric` for `outlet`.
pub fn base_address(metric: Metric, outlet: u16) -> Result<u16> {
    metric.layout().0.address(outlet)
}

/// The metrics fetched by a status read, in reporting order.
pub const READ_ORDER: [Metric; 13] = [
    Metric::Status,
    Metric::Ic,
    Metric::IcMax,
    Metric::IDefault,
    Metric::IRated,
    Metric::CurrentL1,
    Metric::CurrentL2,
    Metric::CurrentL3,
    Metric::VoltageL1,
    Metric::VoltageL2,
    Metric::VoltageL3,
    Metric::ActivePower,
    Metric::Energy,
];

/// Register map for a full status read of `outlet`, in [`READ_ORDER`].
pub fn metrics_to_read(outlet: u16) -> Result<Vec<RegisterMapEntry>> {
    READ_ORDER.iter().map(|metric| metric.entry(outlet)).collect()
}

/// A decoded value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Quantity(f64),
    Status(DeviceStatus),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Quantity(value) => Some(*value),
            MetricValue::Status(_) => None,
        }
    }

    pub fn as_status(&self) -> Option<DeviceStatus> {
        match self {
            MetricValue::Status(status) => Some(*status),
            MetricValue::Quantity(_) => None,
        }
    }
}

/// One metric as read from the device. Created per read, nothing refers back to it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub metric: Metric,
    pub raw: Vec<u16>,
    pub value: MetricValue,
    pub unit: Unit,
}

impl core::fmt::Display for MetricReading {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.value {
            MetricValue::Status(status) => write!(f, "{}: {}", self.metric, status),
            MetricValue::Quantity(value) => write!(f, "{}: {} {}", self.metric, value, self.unit),
        }
    }
}

/// Apply an entry's value kind and scale to the words read for it.
pub fn decode(entry: &RegisterMapEntry, raw: &[u16]) -> Result<MetricReading> {
    if raw.len() != entry.count as usize {
        return Err(ProtocolError::CountMismatch {
            expected: entry.count,
            received: raw.len(),
        }
        .into());
    }
    let value = match entry.kind {
        ValueKind::Status => MetricValue::Status(DeviceStatus::from_code(raw[0])),
        kind => MetricValue::Quantity(entry.scale.decode(kind, raw)),
    };
    Ok(MetricReading {
        metric: entry.metric,
        raw: raw.to_vec(),
        value,
        unit: entry.unit,
    })
}

/// Register words for writing `amps` to the Icmax register of `outlet`.
pub fn encode_icmax_write(outlet: u16, amps: f64) -> Result<Vec<u16>> {
    let entry = Metric::IcMax.entry(outlet)?;
    let word = entry.scale.encode_u16(amps)?;
    Ok(vec![word])
}
