//! Scaling factors for the eM4 registers.
//!
//! The eM4 stores physical quantities as integers with a fixed decimal
//! resolution. E.g. currents are in deci-amps, so a raw `160` is 16.0 A.

use crate::{
    codec::assemble_wide,
    error::{Error, Result},
};

/// How the register words of a value are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Unsigned,
    Signed,
    /// Enumerated status code, never scaled.
    Status,
}

/// Physical unit of a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Unit {
    #[strum(serialize = "A")]
    Ampere,
    #[strum(serialize = "V")]
    Volt,
    #[strum(serialize = "kW")]
    Kilowatt,
    #[strum(serialize = "kWh")]
    KilowattHour,
    #[strum(serialize = "")]
    None,
}

/// Divisor converting a raw register value into its physical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub divisor: u32,
}

impl Default for Scale {
    /// Default to no scaling.
    fn default() -> Self {
        Self::UNITY
    }
}

impl Scale {
    pub const UNITY: Scale = Scale::new(1);
    /// Tenths, used for currents and voltages.
    pub const DECI: Scale = Scale::new(10);
    /// Hundredths, used for energy in kWh.
    pub const CENTI: Scale = Scale::new(100);
    /// Thousandths, used for power reported in W but presented in kW.
    pub const MILLI: Scale = Scale::new(1000);

    pub const fn new(divisor: u32) -> Self {
        Self { divisor }
    }

    /// Smallest step representable with this scale.
    pub fn resolution(&self) -> f64 {
        1.0 / self.divisor as f64
    }

    /// Convert raw register words into a physical value.
    ///
    /// One word is a 16-bit value, two words are a 32-bit value, high word first.
    pub fn decode(&self, kind: ValueKind, words: &[u16]) -> f64 {
        let raw = match (kind, words) {
            (ValueKind::Signed, [word]) => *word as i16 as f64,
            (ValueKind::Signed, [high, low]) => assemble_wide([*high, *low]) as i32 as f64,
            (_, [word]) => *word as f64,
            (_, [high, low]) => assemble_wide([*high, *low]) as f64,
            _ => 0.0,
        };
        match kind {
            ValueKind::Status => raw,
            _ => raw / self.divisor as f64,
        }
    }

    /// Convert a physical value into a single unsigned register word.
    ///
    /// Rounds to the nearest representable value.
    pub fn encode_u16(&self, value: f64) -> Result<u16> {
        let scaled = (value * self.divisor as f64).round();
        if !scaled.is_finite() || scaled < 0.0 || scaled > u16::MAX as f64 {
            return Err(Error::Range {
                value,
                divisor: self.divisor,
            });
        }
        Ok(scaled as u16)
    }
}
