//! Calibration values and algorithm constants.
//!
//! Units: voltages in microvolts, currents in microamps, power in microwatts,
//! periods in milliseconds.

use crate::context::ChargeMode;

// Battery.
/// Below this battery voltage direct charging is unsafe.
pub const DC_VBAT_MIN_UV: i32 = 3_100_000;

// Adapter limits.
pub const TA_MAX_VOL_UV: i32 = 10_200_000;
pub const TA_MIN_VOL_UV: i32 = 7_000_000;
pub const TA_MIN_CUR_UA: i32 = 1_000_000;
pub const TA_MIN_VOL_PRESET_UV: i32 = 7_700_000;
pub const TA_VOL_PRE_OFFSET_UV: i32 = 500_000;
/// Below this maximum voltage the adapter is treated as power limited.
pub const TA_MAX_VOL_CP_UV: i32 = 10_000_000;

// Adapter steps.
pub const TA_VOL_STEP_ADJ_CC_UV: i32 = 40_000;
pub const TA_VOL_STEP_PRE_CC_UV: i32 = 100_000;
pub const TA_VOL_STEP_PRE_CV_UV: i32 = 20_000;
pub const PD_MSG_TA_VOL_STEP_UV: i32 = 20_000;
pub const PD_MSG_TA_CUR_STEP_UA: i32 = 50_000;
pub const WCRX_MAX_VOL_UV: i32 = 10_000_000;
pub const WCRX_VOL_STEP_UV: i32 = 100_000;

// Compensation bands.
pub const IIN_ADC_OFFSET_UA: i32 = 20_000;
pub const IIN_CC_COMP_OFFSET_UA: i32 = 50_000;
pub const IIN_CC_COMP_OFFSET_CP_UA: i32 = 20_000;
pub const TA_IIN_OFFSET_UA: i32 = 100_000;
pub const TA_CUR_LOW_OFFSET_UA: i32 = 200_000;

// Bypass voltage offsets.
pub const TA_VOL_OFFSET_1TO1_BYPASS_UV: i32 = 100_000;
pub const TA_VOL_OFFSET_2TO1_BYPASS_UV: i32 = 200_000;

// Fixed PDO.
pub const FPDO_VOL_UV: i32 = 9_000_000;
pub const FPDO_OBJECT_INDEX: u8 = 2;
pub const FPDO_DONE_CNT: u8 = 3;

pub const MAX_RETRIES: u8 = 3;
/// Consecutive CHARGING_STS reads that must agree before the IIN loop is trusted.
pub const IIN_LOOP_CONFIRM_READS: usize = 4;

// Timer periods.
pub const VBATMIN_CHECK_T: u32 = 0;
pub const CCMODE_CHECK_T: u32 = 2_000;
pub const CVMODE_CHECK_T: u32 = 2_000;
pub const CVMODE_CHECK_FAST_T: u32 = 1_000;
pub const FPDO_CVMODE_CHECK_T: u32 = 5_000;
pub const BYPMODE_CHECK_T: u32 = 10_000;
pub const PDMSG_WAIT_T: u32 = 200;
pub const ENABLE_DELAY_T: u32 = 150;
pub const IIN_CFG_WAIT_T: u32 = 150;
pub const PPS_PERIODIC_T: u64 = 10_000;
pub const BYPASS_WAIT_T: u32 = 200;
pub const DISABLE_DELAY_T: u32 = 300;
pub const REVERSE_WAIT_T: u32 = 10;
pub const REVERSE_CHECK_T: u32 = 5_000;
pub const REQUEST_SETTLE_T: u32 = 1_000;

/// Long-lived calibration supplied at construction. Survives every session.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// Default input current target.
    pub iin_cfg_ua: i32,
    /// Default battery charge current.
    pub ichg_cfg_ua: i32,
    pub vfloat_uv: i32,
    /// Ceiling for float voltage; CV steps get coarser at this level.
    pub max_vfloat_uv: i32,
    /// CV completes when input current falls below this.
    pub iin_topoff_ua: i32,
    /// Preferred conversion ratio.
    pub chg_mode: ChargeMode,
    pub fsw_cfg_khz: u32,
    /// Frequency used when the input current target is at or below `iin_low_freq_ua`.
    pub fsw_cfg_low_khz: u32,
    pub fsw_cfg_bypass_khz: u32,
    pub fsw_cfg_fpdo_khz: u32,
    pub iin_low_freq_ua: i32,
    /// NTC standby protection; when off, NTC trips are ignored.
    pub ntc_en: bool,
    pub ntc0_th_uv: u32,
    pub ntc1_th_uv: u32,
    /// Lowest adapter voltage used for the preset.
    pub ta_min_vol_uv: i32,
    /// Float voltage is tracked against the fuel gauge instead of the IC loop.
    pub fg_vfloat: bool,
    /// Lower limit for the IIN register with a fixed-PDO source.
    pub fpdo_dc_iin_lowest_limit_ua: i32,
    /// VIN over-current limit in reverse mode.
    pub reverse_ocp_ua: u32,
    /// Switching charger input limit restored when a session ends.
    pub swchg_icl_normal_ua: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iin_cfg_ua: 2_500_000,
            ichg_cfg_ua: 5_000_000,
            vfloat_uv: 4_350_000,
            max_vfloat_uv: 4_450_000,
            iin_topoff_ua: 500_000,
            chg_mode: ChargeMode::TwoToOne,
            fsw_cfg_khz: 1_000,
            fsw_cfg_low_khz: 500,
            fsw_cfg_bypass_khz: 500,
            fsw_cfg_fpdo_khz: 500,
            iin_low_freq_ua: 1_100_000,
            ntc_en: false,
            ntc0_th_uv: 1_110_000,
            ntc1_th_uv: 495_000,
            ta_min_vol_uv: TA_MIN_VOL_PRESET_UV,
            fg_vfloat: false,
            fpdo_dc_iin_lowest_limit_ua: 1_000_000,
            reverse_ocp_ua: 1_200_000,
            swchg_icl_normal_ua: 3_000_000,
        }
    }
}

impl Config {
    /// Reject calibrations the control loop cannot work with.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.iin_cfg_ua <= 0
            || self.iin_topoff_ua < 0
            || self.vfloat_uv > self.max_vfloat_uv
            || self.chg_mode == ChargeMode::None
        {
            return Err(crate::error::Error::OutOfRange);
        }
        Ok(())
    }
}
