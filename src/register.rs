//! This module is used to define the registers on the Wallbox eM4.
//!
//! The eM4 exposes one product block shared by all outlets, followed by one
//! block per outlet:
//!
//! * product block at [`PRODUCT_BASE`]
//! * outlet `n` block at [`OUTLET_BASE`] `+ (n - 1) *` [`OUTLET_STRIDE`]

use modular_bitfield::prelude::*;
use strum_macros::EnumIter;

use crate::error::{Error, Result};

/// Base address of the stand-alone product registers.
pub const PRODUCT_BASE: u16 = 0x0100;

/// Base address of the registers belonging to outlet 1.
pub const OUTLET_BASE: u16 = 0x3000;

/// Distance between the register blocks of two neighbouring outlets.
pub const OUTLET_STRIDE: u16 = 0x0100;

/// Highest outlet number whose block still fits below the end of the address space.
pub const MAX_OUTLET: u16 = 1 + (u16::MAX - OUTLET_BASE) / OUTLET_STRIDE;

/// Whether a register lives in the shared product block or in an outlet block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Product,
    Outlet,
}

/// Register offsets within their block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
#[repr(u16)]
pub enum Em4Register {
    /// __R__ - Rated current of the device (Irated).
    ///
    /// Value is u16 in deci-amps. E.g. 32.0A => `320`.
    IRated = 0x23,
    /// __R__ - Installation current limit (Idefault).
    ///
    /// Value is u16 in deci-amps.
    IDefault = 0x24,
    /// __R__ - Phase L1 current, u32 high word first, deci-amps.
    CurrentL1 = 0x01,
    /// __R__ - Phase L2 current.
    CurrentL2 = 0x03,
    /// __R__ - Phase L3 current.
    CurrentL3 = 0x05,
    /// __R__ - Phase L1 voltage, u32 high word first, deci-volts.
    VoltageL1 = 0x07,
    /// __R__ - Phase L2 voltage.
    VoltageL2 = 0x09,
    /// __R__ - Phase L3 voltage.
    VoltageL3 = 0x0B,
    /// __R__ - Active power, u32 in watts.
    ActivePower = 0x0D,
    /// __R__ - Delivered energy, u32 in units of 0.01 kWh.
    Energy = 0x0F,
    /// __R__ - Outlet status.
    ///
    /// See [`DeviceStatus`] for possible values.
    Status = 0x31,
    /// __R/W__ - Maximum current requested by the energy manager (Icmax).
    ///
    /// Value is u16 in deci-amps. `0` pauses charging.
    IcMax = 0x32,
    /// __R__ - Current the outlet actually allows the vehicle to draw (Ic).
    Ic = 0x33,
}

impl Em4Register {
    pub const fn scope(&self) -> Scope {
        match self {
            Em4Register::IRated | Em4Register::IDefault => Scope::Product,
            _ => Scope::Outlet,
        }
    }

    pub const fn offset(&self) -> u16 {
        *self as u16
    }

    /// Absolute address of this register for the given (1-based) outlet.
    ///
    /// Product registers are shared, so their address ignores `outlet`.
    pub fn address(&self, outlet: u16) -> Result<u16> {
        match self.scope() {
            Scope::Product => {
                check_outlet(outlet)?;
                Ok(PRODUCT_BASE + self.offset())
            }
            Scope::Outlet => Ok(outlet_base(outlet)? + self.offset()),
        }
    }
}

/// First address of the block belonging to `outlet`.
pub fn outlet_base(outlet: u16) -> Result<u16> {
    check_outlet(outlet)?;
    Ok(OUTLET_BASE + (outlet - 1) * OUTLET_STRIDE)
}

/// Outlets are numbered from 1 and must fit the register address space.
pub fn check_outlet(outlet: u16) -> Result<()> {
    if outlet == 0 || outlet > MAX_OUTLET {
        Err(Error::InvalidOutlet(outlet))
    } else {
        Ok(())
    }
}

/// Bit layout of the status register.
///
/// The upper nibble of the low byte follows the IEC 61851 pilot states
/// (`A` no vehicle, `B` vehicle connected, `C` charging, `E`/`F` fault), the
/// lower nibble refines it.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct StatusWord {
    pub detail: B4,
    pub pilot_state: B4,
    #[skip]
    __: B8,
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        StatusWord::from_bytes(value.to_le_bytes())
    }
}

/// "Outlet status register".
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum DeviceStatus {
    /// 0xA0: Outlet blocked, EV is recognised.
    BlockedEvRecognised,
    /// 0xA1: Outlet is waiting for EV.
    WaitingForEv,
    /// 0xA2: Outlet reserved.
    Reserved,
    /// 0xB0: EV recognised, authentication failed.
    AuthenticationFailed,
    /// 0xB1: EV recognised, authentication.
    Authenticating,
    /// 0xB2: Outlet can provide energy for charging.
    ReadyToCharge,
    /// 0xB3: EV has ended or interrupted charging.
    ChargingEnded,
    /// 0xC1: EV requests energy, outlet not yet providing it.
    ChargingRequested,
    /// 0xC2: Outlet provides energy for charging (request by EV).
    Charging,
    /// 0xE0: Outlet blocked, EV is not recognised.
    BlockedEvNotRecognised,
    /// 0xE2: Outlet in boot process.
    Booting,
    /// 0xF0 - 0xFF: Error, the payload is the lower nibble.
    Error(u8),
    /// Anything the status table does not list.
    Unknown(u16),
}

impl DeviceStatus {
    pub fn from_code(code: u16) -> Self {
        use DeviceStatus as DS;
        match code {
            0x00A0 => DS::BlockedEvRecognised,
            0x00A1 => DS::WaitingForEv,
            0x00A2 => DS::Reserved,
            0x00B0 => DS::AuthenticationFailed,
            0x00B1 => DS::Authenticating,
            0x00B2 => DS::ReadyToCharge,
            0x00B3 => DS::ChargingEnded,
            0x00C1 => DS::ChargingRequested,
            0x00C2 => DS::Charging,
            0x00E0 => DS::BlockedEvNotRecognised,
            0x00E2 => DS::Booting,
            0x00F0..=0x00FF => DS::Error(StatusWord::from(code).detail()),
            other => DS::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        use DeviceStatus as DS;
        match *self {
            DS::BlockedEvRecognised => 0x00A0,
            DS::WaitingForEv => 0x00A1,
            DS::Reserved => 0x00A2,
            DS::AuthenticationFailed => 0x00B0,
            DS::Authenticating => 0x00B1,
            DS::ReadyToCharge => 0x00B2,
            DS::ChargingEnded => 0x00B3,
            DS::ChargingRequested => 0x00C1,
            DS::Charging => 0x00C2,
            DS::BlockedEvNotRecognised => 0x00E0,
            DS::Booting => 0x00E2,
            DS::Error(detail) => 0x00F0 | (detail & 0x0F) as u16,
            DS::Unknown(code) => code,
        }
    }

    /// Human readable description, as printed on the eM4 web interface.
    pub fn label(&self) -> &'static str {
        use DeviceStatus as DS;
        match self {
            DS::BlockedEvRecognised => "Outlet blocked, EV is recognised",
            DS::WaitingForEv => "Outlet is waiting for EV",
            DS::Reserved => "Outlet reserved",
            DS::AuthenticationFailed => "EV recognised, authentication failed",
            DS::Authenticating => "EV recognised, authentication",
            DS::ReadyToCharge => "Outlet can provide energy for charging",
            DS::ChargingEnded => "EV has ended or interrupted charging",
            DS::ChargingRequested => "EV requests energy for charging",
            DS::Charging => "Outlet provides energy for charging (request by EV)",
            DS::BlockedEvNotRecognised => "Outlet blocked, EV is not recognised",
            DS::Booting => "Outlet in boot process",
            DS::Error(_) => "Error",
            DS::Unknown(_) => "Unknown",
        }
    }

    pub fn is_error(&self) -> bool {
        StatusWord::from(self.code()).pilot_state() == 0x0F
    }

    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            DeviceStatus::BlockedEvRecognised | DeviceStatus::BlockedEvNotRecognised
        )
    }

    /// States in which a vehicle is attached and a current limit takes effect immediately.
    pub fn is_charging_state(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Authenticating
                | DeviceStatus::ReadyToCharge
                | DeviceStatus::ChargingRequested
                | DeviceStatus::Charging
        )
    }
}

impl From<u16> for DeviceStatus {
    fn from(value: u16) -> Self {
        DeviceStatus::from_code(value)
    }
}

impl core::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} (0x{:04X})", self.label(), self.code())
    }
}
