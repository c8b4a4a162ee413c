//! Register-level PCA9482 driver.
//! Typed setters over any `RegisterIo`; the control loop only talks to the IC through here.

use crate::config::Config;
use crate::context::{AdapterType, DcTopology, ReverseMode};
use crate::error::Error;
use crate::io::RegisterIo;
use crate::registers::{
    addr, fsw_to_code, ibat_to_code, iin_to_code, ntc_threshold_to_code, round_up, vbat_to_code,
    vin_ocp_to_code, AdcMode, Charging, ChargingCntl5, DeviceCntl0, DeviceCntl1, DeviceCntl2,
    OperationMode, RcpCntl, ScCntl2, ScCntl3, StatusSnapshot, ADC_MODE_MASK, IBAT_REG_OFFSET_UA,
    IBAT_REG_STEP_UA, IIN_REG_OFFSET_UA, IIN_REG_STEP_UA, SC_OPERATION_MODE_MASK,
    STATUS_REG_COUNT, VIN_OCP_CURRENT_MASK,
};

/// PCA9482 register driver.
pub struct Pca9482<R> {
    io: R,
}

impl<R> Pca9482<R> {
    pub fn new(io: R) -> Self {
        Self { io }
    }

    /// Release the register transport.
    pub fn free(self) -> R {
        self.io
    }

    pub fn io(&self) -> &R {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut R {
        &mut self.io
    }
}

fn bus<T, E: core::fmt::Debug>(res: Result<T, E>) -> Result<T, Error> {
    res.map_err(|_e| {
        #[cfg(feature = "defmt")]
        defmt::error!("register bus error: {}", defmt::Debug2Format(&_e));
        Error::Bus
    })
}

impl<R> Pca9482<R>
where
    R: RegisterIo,
{
    pub fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        bus(self.io.read(reg))
    }

    pub fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        bus(self.io.write(reg, value))
    }

    /// Update masked bits in a register (read-modify-write).
    pub fn update_reg(&mut self, reg: u8, mask: u8, value: u8) -> Result<(), Error> {
        bus(self.io.update(reg, mask, value))
    }

    pub fn soft_reset(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::info!("pca9482: soft reset");
        bus(self.io.soft_reset())
    }

    /// Read all live status registers in one burst.
    pub fn status(&mut self) -> Result<StatusSnapshot, Error> {
        let mut raw = [0u8; STATUS_REG_COUNT];
        bus(self.io.bulk_read(addr::DEVICE_0_STS, &mut raw))?;
        Ok(StatusSnapshot::from_bytes(raw))
    }

    /// Read (and so clear) the latched interrupt registers.
    pub fn clear_interrupts(&mut self) -> Result<StatusSnapshot, Error> {
        let mut raw = [0u8; STATUS_REG_COUNT];
        bus(self.io.bulk_read(addr::INT_DEVICE_0, &mut raw))?;
        Ok(StatusSnapshot::from_bytes(raw))
    }

    pub fn charging_status(&mut self) -> Result<Charging, Error> {
        Ok(Charging::from_bits_truncate(self.read_reg(addr::CHARGING_STS)?))
    }

    /// Program input-current regulation. Rounds up to the register step and adds
    /// regulation headroom; fixed-PDO sources get no headroom but a lower limit.
    pub fn set_input_current(&mut self, ua: i32, adapter: AdapterType, config: &Config) -> Result<(), Error> {
        let mut iin = round_up(ua.max(0) as u32, IIN_REG_STEP_UA);
        if adapter == AdapterType::UsbPdFixedPdo {
            iin = iin.max(config.fpdo_dc_iin_lowest_limit_ua.max(0) as u32);
        } else {
            iin += IIN_REG_OFFSET_UA;
        }
        self.write_reg(addr::CHARGING_CNTL_1, iin_to_code(iin))
    }

    /// Program battery-current regulation with 100 mA headroom.
    pub fn set_charging_current(&mut self, ua: i32) -> Result<(), Error> {
        let ichg = round_up(ua.max(0) as u32, IBAT_REG_STEP_UA) + IBAT_REG_OFFSET_UA;
        self.write_reg(addr::CHARGING_CNTL_3, ibat_to_code(ichg))
    }

    pub fn set_vfloat(&mut self, uv: i32) -> Result<(), Error> {
        self.write_reg(addr::CHARGING_CNTL_2, vbat_to_code(uv.max(0) as u32))
    }

    pub fn set_switching_frequency(&mut self, khz: u32) -> Result<(), Error> {
        self.write_reg(addr::SC_CNTL_0, fsw_to_code(khz))
    }

    pub fn set_ntc_thresholds(&mut self, ntc0_uv: u32, ntc1_uv: u32) -> Result<(), Error> {
        self.write_reg(addr::NTC_0_CNTL, ntc_threshold_to_code(ntc0_uv))?;
        self.write_reg(addr::NTC_1_CNTL, ntc_threshold_to_code(ntc1_uv))
    }

    /// Enable or disable reverse-current protection.
    pub fn set_rcp(&mut self, enable: bool) -> Result<(), Error> {
        let val = if enable { RcpCntl::RCP_EN.bits() } else { 0 };
        self.update_reg(addr::RCP_CNTL, RcpCntl::RCP_EN.bits(), val)
    }

    pub fn set_ov_tracking(&mut self, enable: bool) -> Result<(), Error> {
        let val = if enable { ScCntl2::OV_TRACKING_EN.bits() } else { 0 };
        self.update_reg(addr::SC_CNTL_2, ScCntl2::OV_TRACKING_EN.bits(), val)
    }

    /// VIN over-current limit for 1:2 and reverse 1:1.
    pub fn set_vin_ocp(&mut self, ua: u32) -> Result<(), Error> {
        self.update_reg(addr::CHARGING_CNTL_5, VIN_OCP_CURRENT_MASK, vin_ocp_to_code(ua))
    }

    pub fn set_vin_ocp_enable(&mut self, enable: bool) -> Result<(), Error> {
        let bit = ChargingCntl5::VIN_OCP_12_11_EN.bits();
        self.update_reg(addr::CHARGING_CNTL_5, bit, if enable { bit } else { 0 })
    }

    pub fn set_adc_mode(&mut self, mode: AdcMode) -> Result<(), Error> {
        self.update_reg(addr::ADC_CNTL, ADC_MODE_MASK, mode.bits())
    }

    fn set_ntc_standby(&mut self, enable: bool) -> Result<(), Error> {
        let bit = DeviceCntl0::STANDBY_BY_NTC_EN.bits();
        self.update_reg(addr::DEVICE_CNTL_0, bit, if enable { bit } else { 0 })
    }

    fn set_standby(&mut self, standby: bool, mode: OperationMode) -> Result<(), Error> {
        let mut val = mode.bits();
        if standby {
            val |= ScCntl3::STANDBY_EN.bits();
        }
        self.update_reg(
            addr::SC_CNTL_3,
            ScCntl3::STANDBY_EN.bits() | SC_OPERATION_MODE_MASK,
            val,
        )
    }

    /// EN active-low enables the switcher (EN is tied low); active-high disables it.
    fn set_en_active_low(&mut self, active_low: bool) -> Result<(), Error> {
        let bit = DeviceCntl2::EN_CFG.bits();
        self.update_reg(addr::DEVICE_CNTL_2, bit, if active_low { 0 } else { bit })
    }

    fn disable_half_vin_ovp(&mut self) -> Result<(), Error> {
        self.update_reg(addr::DEVICE_CNTL_1, DeviceCntl1::HALF_VIN_OVP_EN.bits(), 0)
    }

    /// Start or stop forward conversion.
    pub fn set_charging(&mut self, enable: bool, topology: DcTopology, ntc_en: bool) -> Result<(), Error> {
        let mode = if topology == DcTopology::Bypass1to1 {
            OperationMode::Forward1to1
        } else {
            self.disable_half_vin_ovp()?;
            OperationMode::TwoToOne
        };
        if enable {
            self.set_ntc_standby(ntc_en)?;
            self.set_standby(true, mode)?;
            self.set_en_active_low(true)?;
            self.set_standby(false, mode)?;
        } else {
            self.set_ntc_standby(false)?;
            self.set_en_active_low(false)?;
        }
        #[cfg(feature = "defmt")]
        defmt::debug!("pca9482: charging enable={} mode={}", enable, mode);
        Ok(())
    }

    /// Start or stop reverse conversion.
    pub fn set_reverse(&mut self, enable: bool, reverse: ReverseMode, ntc_en: bool) -> Result<(), Error> {
        let mode = if reverse == ReverseMode::OneToTwo {
            self.disable_half_vin_ovp()?;
            OperationMode::OneToTwo
        } else {
            OperationMode::Reverse1to1
        };
        if enable {
            self.set_vin_ocp_enable(true)?;
            self.set_ntc_standby(ntc_en)?;
            self.set_standby(false, mode)?;
            self.set_standby(true, mode)?;
            self.set_en_active_low(true)?;
            self.set_standby(false, mode)?;
        } else {
            self.set_ntc_standby(false)?;
            self.set_vin_ocp_enable(false)?;
            self.set_en_active_low(false)?;
        }
        #[cfg(feature = "defmt")]
        defmt::debug!("pca9482: reverse enable={} mode={}", enable, mode);
        Ok(())
    }

    /// Bring the IC to a known disabled configuration at the start of a session.
    pub fn init(&mut self, config: &Config, fsw_khz: u32) -> Result<(), Error> {
        self.set_ov_tracking(false)?;
        self.set_switching_frequency(fsw_khz)?;
        self.set_en_active_low(false)?;
        self.set_ntc_thresholds(config.ntc0_th_uv, config.ntc1_th_uv)?;
        self.clear_interrupts()?;
        Ok(())
    }
}
