//! Register map, bit fields and value encoders for the PCA9482.

/// Default 7-bit I2C address.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x57;

/// OR-ed into the start register of a burst to enable auto-increment.
pub const AUTO_INCREMENT: u8 = 0x80;

/// Number of consecutive status (or interrupt) registers.
pub const STATUS_REG_COUNT: usize = 7;

/// Register addresses.
pub mod addr {
    // Latched interrupt registers, clear-on-read.
    pub const INT_DEVICE_0: u8 = 0x01;
    pub const INT_DEVICE_1: u8 = 0x02;
    pub const INT_DEVICE_2: u8 = 0x03;
    pub const INT_DEVICE_3: u8 = 0x04;
    pub const INT_CHARGING: u8 = 0x05;
    pub const INT_SC_0: u8 = 0x06;
    pub const INT_SC_1: u8 = 0x07;

    // Live status registers.
    pub const DEVICE_0_STS: u8 = 0x0F;
    pub const DEVICE_1_STS: u8 = 0x10;
    pub const DEVICE_2_STS: u8 = 0x11;
    pub const DEVICE_3_STS: u8 = 0x12;
    pub const CHARGING_STS: u8 = 0x13;
    pub const SC_0_STS: u8 = 0x14;
    pub const SC_1_STS: u8 = 0x15;

    pub const DEVICE_CNTL_0: u8 = 0x16;
    pub const DEVICE_CNTL_1: u8 = 0x17;
    pub const DEVICE_CNTL_2: u8 = 0x18;
    pub const RCP_CNTL: u8 = 0x1C;
    pub const CHARGING_CNTL_0: u8 = 0x1D;
    /// Input current regulation.
    pub const CHARGING_CNTL_1: u8 = 0x1E;
    /// Battery voltage regulation.
    pub const CHARGING_CNTL_2: u8 = 0x1F;
    /// Battery current regulation.
    pub const CHARGING_CNTL_3: u8 = 0x20;
    /// VIN over-current protection for 1:2 / reverse 1:1.
    pub const CHARGING_CNTL_5: u8 = 0x22;
    pub const NTC_0_CNTL: u8 = 0x24;
    pub const NTC_1_CNTL: u8 = 0x25;
    /// Switching frequency.
    pub const SC_CNTL_0: u8 = 0x26;
    pub const SC_CNTL_2: u8 = 0x28;
    /// Standby and switched-capacitor operation mode.
    pub const SC_CNTL_3: u8 = 0x29;
    pub const ADC_CNTL: u8 = 0x2A;
}

bitflags::bitflags! {
    /// DEVICE_0 status/interrupt bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Device0: u8 {
        const VOUT_MAX_OV     = 1 << 7;
        const RCP_DETECTED    = 1 << 6;
        const VIN_UNPLUG      = 1 << 5;
        const VIN_OVP         = 1 << 4;
        const VIN_OV_TRACKING = 1 << 3;
        const VIN_UV_TRACKING = 1 << 2;
        const VIN_NOT_VALID   = 1 << 1;
        const VIN_VALID       = 1 << 0;
    }

    /// DEVICE_1 status/interrupt bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Device1: u8 {
        const NTC_1_DETECTED   = 1 << 6;
        const NTC_0_DETECTED   = 1 << 5;
        const ADC_READ_DONE    = 1 << 4;
        const VIN_OCP_21_11    = 1 << 2;
        const SINK_RCP_TIMEOUT = 1 << 1;
        const SINK_RCP_ENABLED = 1 << 0;
    }

    /// DEVICE_2 status/interrupt bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Device2: u8 {
        const VIN_OCP_12_11      = 1 << 4;
        const THEM_REG           = 1 << 3;
        const THSD               = 1 << 1;
        const WATCHDOG_TIMER_OUT = 1 << 0;
    }

    /// CHARGING status/interrupt bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Charging: u8 {
        const SAFETY_TIMER   = 1 << 5;
        const VBAT_OVP       = 1 << 3;
        const VBAT_REG_LOOP  = 1 << 2;
        const I_VBAT_CC_LOOP = 1 << 1;
        const I_VIN_CC_LOOP  = 1 << 0;
    }

    /// SC_0 status/interrupt bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Sc0: u8 {
        const PHASE_B_FAULT = 1 << 6;
        const PHASE_A_FAULT = 1 << 5;
    }

    /// SC_1 status/interrupt bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Sc1: u8 {
        const CBST_SHORT        = 1 << 6;
        const CFLY_SHORT        = 1 << 5;
        const VIN_SHORT         = 1 << 4;
        const OVPOUT_SHORT      = 1 << 3;
        const OVPOUT_ERRLO      = 1 << 2;
        const SW_SHORT          = 1 << 1;
        const REVERSE_SW_SS_OC  = 1 << 0;
    }

    /// DEVICE_CNTL_0 bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct DeviceCntl0: u8 {
        const STANDBY_BY_NTC_EN = 1 << 1;
        const SOFT_RESET        = 1 << 0;
    }

    /// DEVICE_CNTL_1 bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct DeviceCntl1: u8 {
        const HALF_VIN_OVP_EN = 1 << 4;
    }

    /// DEVICE_CNTL_2 bits. EN_CFG set means the EN pin is active high, which
    /// with EN tied low keeps the switcher disabled.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct DeviceCntl2: u8 {
        const EN_CFG = 1 << 1;
    }

    /// RCP_CNTL bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct RcpCntl: u8 {
        const RCP_EN = 1 << 0;
    }

    /// CHARGING_CNTL_5 bits (bits 3..0 hold the VIN OCP current code).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ChargingCntl5: u8 {
        const VIN_OCP_12_11_EN = 1 << 7;
    }

    /// SC_CNTL_2 bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ScCntl2: u8 {
        const OV_TRACKING_EN = 1 << 0;
    }

    /// SC_CNTL_3 bits (bits 6..5 hold the operation mode).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ScCntl3: u8 {
        const STANDBY_EN = 1 << 7;
    }
}

/// DEVICE_3 power-state field.
pub const STATUS_CHANGE_MASK: u8 = 0xC0;
/// SC_CNTL_3 operation-mode field.
pub const SC_OPERATION_MODE_MASK: u8 = 0x60;
/// CHARGING_CNTL_5 VIN OCP current field.
pub const VIN_OCP_CURRENT_MASK: u8 = 0x0F;
/// ADC_CNTL mode field.
pub const ADC_MODE_MASK: u8 = 0x03;

/// Device power state decoded from DEVICE_3_STS.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerState {
    Shutdown,
    Standby,
    /// 2:1 switching or forward 1:1.
    ForwardActive,
    /// 1:2 switching or reverse 1:1.
    ReverseActive,
}

pub fn decode_power_state(device3: u8) -> PowerState {
    match device3 & STATUS_CHANGE_MASK {
        0x00 => PowerState::Shutdown,
        0x40 => PowerState::Standby,
        0x80 => PowerState::ForwardActive,
        _ => PowerState::ReverseActive,
    }
}

/// Switched-capacitor operation mode (SC_CNTL_3 bits 6..5).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationMode {
    TwoToOne,
    OneToTwo,
    Forward1to1,
    Reverse1to1,
}

impl OperationMode {
    pub fn bits(self) -> u8 {
        match self {
            OperationMode::TwoToOne => 0x00,
            OperationMode::OneToTwo => 0x20,
            OperationMode::Forward1to1 => 0x40,
            OperationMode::Reverse1to1 => 0x60,
        }
    }
}

/// ADC conversion mode (ADC_CNTL bits 1..0).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdcMode {
    Auto,
    ForceEnable,
    ForceShutdown,
}

impl AdcMode {
    pub fn bits(self) -> u8 {
        match self {
            AdcMode::Auto => 0b00,
            AdcMode::ForceEnable => 0b01,
            AdcMode::ForceShutdown => 0b10,
        }
    }
}

/// The seven status registers read in one burst from DEVICE_0_STS.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatusSnapshot {
    pub raw: [u8; STATUS_REG_COUNT],
}

impl StatusSnapshot {
    pub fn from_bytes(raw: [u8; STATUS_REG_COUNT]) -> Self {
        Self { raw }
    }

    pub fn device0(&self) -> Device0 {
        Device0::from_bits_truncate(self.raw[0])
    }

    pub fn device1(&self) -> Device1 {
        Device1::from_bits_truncate(self.raw[1])
    }

    pub fn device2(&self) -> Device2 {
        Device2::from_bits_truncate(self.raw[2])
    }

    pub fn power_state(&self) -> PowerState {
        decode_power_state(self.raw[3])
    }

    pub fn charging(&self) -> Charging {
        Charging::from_bits_truncate(self.raw[4])
    }

    pub fn sc0(&self) -> Sc0 {
        Sc0::from_bits_truncate(self.raw[5])
    }

    pub fn sc1(&self) -> Sc1 {
        Sc1::from_bits_truncate(self.raw[6])
    }
}

// Regulation ranges (uA / uV).
pub const IIN_REG_MIN_UA: u32 = 500_000;
pub const IIN_REG_MAX_UA: u32 = 3_500_000;
pub const IIN_REG_STEP_UA: u32 = 25_000;
/// Headroom added over the target so the IIN loop does not regulate in normal CC.
pub const IIN_REG_OFFSET_UA: u32 = 200_000;
pub const IBAT_REG_MIN_UA: u32 = 1_000_000;
pub const IBAT_REG_MAX_UA: u32 = 7_000_000;
pub const IBAT_REG_STEP_UA: u32 = 50_000;
pub const IBAT_REG_OFFSET_UA: u32 = 100_000;
pub const VBAT_REG_MIN_UV: u32 = 3_725_000;
pub const VBAT_REG_MAX_UV: u32 = 5_000_000;
pub const VBAT_REG_STEP_UV: u32 = 5_000;
pub const FSW_MIN_KHZ: u32 = 200;
pub const FSW_MAX_KHZ: u32 = 1_600;
pub const FSW_STEP_KHZ: u32 = 50;
pub const NTC_TH_STEP_UV: u32 = 15_000;
pub const VIN_OCP_MIN_UA: u32 = 500_000;
pub const VIN_OCP_MAX_UA: u32 = 2_000_000;
pub const VIN_OCP_STEP_UA: u32 = 100_000;

/// Input-current regulation code for an already offset and rounded value; clamps to range.
pub fn iin_to_code(ua: u32) -> u8 {
    let ua = ua.clamp(IIN_REG_MIN_UA, IIN_REG_MAX_UA);
    ((ua - IIN_REG_MIN_UA) / IIN_REG_STEP_UA) as u8
}

pub fn ibat_to_code(ua: u32) -> u8 {
    let ua = ua.clamp(IBAT_REG_MIN_UA, IBAT_REG_MAX_UA);
    ((ua - IBAT_REG_MIN_UA) / IBAT_REG_STEP_UA) as u8
}

pub fn vbat_to_code(uv: u32) -> u8 {
    let uv = uv.clamp(VBAT_REG_MIN_UV, VBAT_REG_MAX_UV);
    ((uv - VBAT_REG_MIN_UV) / VBAT_REG_STEP_UV) as u8
}

pub fn fsw_to_code(khz: u32) -> u8 {
    let khz = khz.clamp(FSW_MIN_KHZ, FSW_MAX_KHZ);
    ((khz - FSW_MIN_KHZ) / FSW_STEP_KHZ) as u8
}

pub fn ntc_threshold_to_code(uv: u32) -> u8 {
    (uv / NTC_TH_STEP_UV).min(u8::MAX as u32) as u8
}

pub fn vin_ocp_to_code(ua: u32) -> u8 {
    let ua = ua.clamp(VIN_OCP_MIN_UA, VIN_OCP_MAX_UA);
    ((ua - VIN_OCP_MIN_UA) / VIN_OCP_STEP_UA) as u8 & VIN_OCP_CURRENT_MASK
}

/// Round `value` up to the next multiple of `step`.
pub(crate) fn round_up(value: u32, step: u32) -> u32 {
    value.div_ceil(step) * step
}
