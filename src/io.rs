//! Collaborator interfaces the controller drives.

use crate::context::{AdapterType, ChargeMode};
use crate::error::NegotiateError;

/// Register access to the charger IC.
pub trait RegisterIo {
    type Error: core::fmt::Debug;

    fn read(&mut self, reg: u8) -> Result<u8, Self::Error>;

    fn write(&mut self, reg: u8, value: u8) -> Result<(), Self::Error>;

    /// Read `buf.len()` consecutive registers starting at `reg`.
    fn bulk_read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Reset the IC register file to power-on defaults.
    fn soft_reset(&mut self) -> Result<(), Self::Error>;

    /// Update masked bits in a register (read-modify-write).
    fn update(&mut self, reg: u8, mask: u8, value: u8) -> Result<(), Self::Error> {
        let cur = self.read(reg)?;
        self.write(reg, (cur & !mask) | (value & mask))
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdcChannel {
    Vin,
    Iin,
    Vbat,
    Ibat,
    Vout,
    Ntc,
    DieTemp,
}

/// Calibrated ADC sample tagged with its unit.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhysicalValue {
    Microvolts(i32),
    Microamps(i32),
    Millidegrees(i32),
}

impl PhysicalValue {
    pub fn microvolts(self) -> Option<i32> {
        match self {
            PhysicalValue::Microvolts(v) => Some(v),
            _ => None,
        }
    }

    pub fn microamps(self) -> Option<i32> {
        match self {
            PhysicalValue::Microamps(v) => Some(v),
            _ => None,
        }
    }

    pub fn millidegrees(self) -> Option<i32> {
        match self {
            PhysicalValue::Millidegrees(v) => Some(v),
            _ => None,
        }
    }
}

pub trait AdcReader {
    type Error: core::fmt::Debug;

    fn sample(&mut self, channel: AdcChannel) -> Result<PhysicalValue, Self::Error>;
}

/// What the preset asks the source for when looking up its best object.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PowerQuery {
    pub mode: ChargeMode,
    /// Lowest acceptable maximum voltage of the object.
    pub max_voltage_uv: i32,
    /// Current wanted from the object.
    pub max_current_ua: i32,
}

/// Capability of the object the source picked for a query.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SourceCapability {
    pub object_index: u8,
    pub max_voltage_uv: i32,
    pub max_current_ua: i32,
    pub max_power_uw: i64,
}

/// Adapter negotiation channel (USB-PD policy engine or wireless receiver).
///
/// Requests return once the message is accepted; the source output settles later.
pub trait PowerNegotiator {
    fn adapter_type(&mut self) -> AdapterType;

    fn request_apdo(&mut self, object_index: u8, voltage_uv: i32, current_ua: i32) -> Result<(), NegotiateError>;

    fn request_fixed_pdo(&mut self, object_index: u8, max_current_ua: i32) -> Result<(), NegotiateError>;

    fn request_wireless_voltage(&mut self, voltage_uv: i32) -> Result<(), NegotiateError>;

    fn get_max_power(&mut self, query: PowerQuery) -> Result<SourceCapability, NegotiateError>;
}

/// Conventional switching charger sharing the battery path.
pub trait SwitchingCharger {
    type Error: core::fmt::Debug;

    fn is_enabled(&mut self) -> Result<bool, Self::Error>;

    fn set_enabled(&mut self, enable: bool) -> Result<(), Self::Error>;

    fn set_input_current_limit(&mut self, ua: i32) -> Result<(), Self::Error>;
}
