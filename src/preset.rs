//! Session preset: pick the adapter object and the initial request.

use crate::config::{
    Config, DC_VBAT_MIN_UV, FPDO_OBJECT_INDEX, FPDO_VOL_UV, IIN_CC_COMP_OFFSET_UA, PD_MSG_TA_CUR_STEP_UA,
    PD_MSG_TA_VOL_STEP_UV, TA_MAX_VOL_UV, TA_MIN_CUR_UA, TA_VOL_PRE_OFFSET_UV, WCRX_MAX_VOL_UV,
    WCRX_VOL_STEP_UV,
};
use crate::context::{floor_to, AdapterType, ChargeMode, TaControl, TaParams};
use crate::error::{NegotiateError, PresetError};
use crate::io::{PowerNegotiator, PowerQuery, SourceCapability};

/// Inputs to a preset.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PresetInput {
    pub adapter_type: AdapterType,
    pub battery_voltage_uv: i32,
    /// Input current the session is configured for.
    pub requested_iin_ua: i32,
    /// Adapter control mode carried over from earlier presets of the session.
    pub control_mode: TaControl,
}

/// Outcome of a preset.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Preset {
    pub ta: TaParams,
    pub charge_mode: ChargeMode,
    pub input_current_cc_ua: i32,
    pub input_current_cfg_ua: i32,
}

/// Per-adapter-type negotiation rules.
pub trait AdapterStrategy {
    /// One adapter voltage step at ratio multiplier `mode`.
    fn voltage_step(&self, mode: i32) -> i32;

    /// Only the output voltage can be negotiated; input current follows it.
    fn voltage_only(&self) -> bool {
        false
    }

    /// Half-width of the input current band a voltage-only adjustment settles in.
    fn input_band(&self) -> i32 {
        PD_MSG_TA_CUR_STEP_UA
    }

    fn preset(
        &self,
        engine: &PresetEngine,
        negotiator: &mut dyn PowerNegotiator,
        input: &PresetInput,
    ) -> Result<Preset, PresetError>;

    /// Send `ta` to the source, first flooring it to the channel resolution.
    fn request(&self, negotiator: &mut dyn PowerNegotiator, ta: &mut TaParams) -> Result<(), NegotiateError>;
}

pub struct ApdoStrategy;
pub struct FixedPdoStrategy;
pub struct WirelessStrategy;

static APDO: ApdoStrategy = ApdoStrategy;
static FIXED_PDO: FixedPdoStrategy = FixedPdoStrategy;
static WIRELESS: WirelessStrategy = WirelessStrategy;

/// Strategy for an adapter type, `None` for `Unknown`.
pub fn strategy_for(adapter_type: AdapterType) -> Option<&'static dyn AdapterStrategy> {
    match adapter_type {
        AdapterType::UsbPdApdo => Some(&APDO),
        AdapterType::UsbPdFixedPdo => Some(&FIXED_PDO),
        AdapterType::Wireless => Some(&WIRELESS),
        AdapterType::Unknown => None,
    }
}

/// Computes the initial adapter request for a session.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PresetEngine {
    pub preferred_mode: ChargeMode,
    pub ta_min_vol_uv: i32,
}

impl PresetEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            preferred_mode: config.chg_mode,
            ta_min_vol_uv: config.ta_min_vol_uv,
        }
    }

    pub fn preset(&self, negotiator: &mut dyn PowerNegotiator, input: &PresetInput) -> Result<Preset, PresetError> {
        if input.battery_voltage_uv <= DC_VBAT_MIN_UV {
            #[cfg(feature = "defmt")]
            defmt::warn!("preset: vbat {} uV below direct-charging floor", input.battery_voltage_uv);
            return Err(PresetError::Unsafe);
        }
        let strategy = strategy_for(input.adapter_type).ok_or(PresetError::NoCapableSource)?;
        let preset = strategy.preset(self, negotiator, input)?;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "preset: {} mode={} ta={}uV/{}uA max={}uV/{}uA iin_cc={}uA",
            preset.ta.adapter_type,
            preset.charge_mode,
            preset.ta.voltage_uv,
            preset.ta.current_ua,
            preset.ta.max_voltage_uv,
            preset.ta.max_current_ua,
            preset.input_current_cc_ua
        );
        Ok(preset)
    }

    /// Query the source for the preferred ratio, falling back from 4:1 to 2:1.
    fn best_object(
        &self,
        negotiator: &mut dyn PowerNegotiator,
        requested_iin_ua: i32,
        ceiling_uv: i32,
    ) -> Result<(SourceCapability, ChargeMode), PresetError> {
        let mut mode = self.preferred_mode;
        if mode == ChargeMode::None {
            mode = ChargeMode::TwoToOne;
        }
        let query = PowerQuery {
            mode,
            max_voltage_uv: ceiling_uv * mode.multiplier(),
            max_current_ua: requested_iin_ua,
        };
        match negotiator.get_max_power(query) {
            Ok(cap) => Ok((cap, mode)),
            Err(_) if mode == ChargeMode::FourToOne => {
                #[cfg(feature = "defmt")]
                defmt::warn!("preset: no 4:1 capable object, trying 2:1");
                let query = PowerQuery {
                    mode: ChargeMode::TwoToOne,
                    max_voltage_uv: ceiling_uv,
                    max_current_ua: requested_iin_ua,
                };
                negotiator
                    .get_max_power(query)
                    .map(|cap| (cap, ChargeMode::TwoToOne))
                    .map_err(|_| PresetError::NoCapableSource)
            }
            Err(_) => Err(PresetError::NoCapableSource),
        }
    }

    /// Starting adapter voltage: enough headroom over twice the battery, never
    /// below the configured preset minimum.
    pub fn initial_voltage(&self, vbat_uv: i32, mode: i32) -> i32 {
        (self.ta_min_vol_uv * mode).max(2 * vbat_uv * mode + TA_VOL_PRE_OFFSET_UV)
    }
}

/// Highest adapter voltage a power-limited object can hold at input current
/// `iin_ua`, floored to the 20 mV resolution and capped at the ratio's ceiling.
pub fn power_limited_voltage(max_power_uw: i64, iin_ua: i32, mode: i32) -> i32 {
    let ceiling = TA_MAX_VOL_UV * mode;
    let ta_cur = (iin_ua / mode) as i64;
    if ta_cur <= 0 {
        return ceiling;
    }
    let uv = (max_power_uw * 1_000_000 / ta_cur).min(ceiling as i64) as i32;
    floor_to(uv, PD_MSG_TA_VOL_STEP_UV)
}

impl AdapterStrategy for ApdoStrategy {
    fn voltage_step(&self, mode: i32) -> i32 {
        PD_MSG_TA_VOL_STEP_UV * mode
    }

    fn preset(
        &self,
        engine: &PresetEngine,
        negotiator: &mut dyn PowerNegotiator,
        input: &PresetInput,
    ) -> Result<Preset, PresetError> {
        let (cap, charge_mode) = engine.best_object(negotiator, input.requested_iin_ua, TA_MAX_VOL_UV)?;
        let mode = charge_mode.multiplier();

        let iin_cfg = input.requested_iin_ua.min(cap.max_current_ua * mode);
        let iin_cc = floor_to(iin_cfg, PD_MSG_TA_CUR_STEP_UA * mode);
        if iin_cc <= 0 {
            return Err(PresetError::NoCapableSource);
        }
        let max_voltage_uv = power_limited_voltage(cap.max_power_uw, iin_cc, mode).min(cap.max_voltage_uv);
        let voltage_uv = floor_to(engine.initial_voltage(input.battery_voltage_uv, mode), PD_MSG_TA_VOL_STEP_UV)
            .min(max_voltage_uv);

        Ok(Preset {
            ta: TaParams {
                voltage_uv,
                current_ua: iin_cc / mode,
                target_voltage_uv: TA_MAX_VOL_UV,
                max_voltage_uv,
                max_current_ua: cap.max_current_ua,
                max_power_uw: cap.max_power_uw,
                object_index: cap.object_index,
                adapter_type: AdapterType::UsbPdApdo,
                control_mode: input.control_mode,
            },
            charge_mode,
            input_current_cc_ua: iin_cfg,
            input_current_cfg_ua: iin_cfg,
        })
    }

    fn request(&self, negotiator: &mut dyn PowerNegotiator, ta: &mut TaParams) -> Result<(), NegotiateError> {
        ta.voltage_uv = floor_to(ta.voltage_uv, PD_MSG_TA_VOL_STEP_UV);
        ta.current_ua = floor_to(ta.current_ua, PD_MSG_TA_CUR_STEP_UA).max(TA_MIN_CUR_UA.min(ta.max_current_ua));
        negotiator.request_apdo(ta.object_index, ta.voltage_uv, ta.current_ua)
    }
}

impl AdapterStrategy for FixedPdoStrategy {
    fn voltage_step(&self, mode: i32) -> i32 {
        PD_MSG_TA_VOL_STEP_UV * mode
    }

    fn preset(
        &self,
        _engine: &PresetEngine,
        _negotiator: &mut dyn PowerNegotiator,
        input: &PresetInput,
    ) -> Result<Preset, PresetError> {
        let iin = input.requested_iin_ua;
        Ok(Preset {
            ta: TaParams {
                voltage_uv: FPDO_VOL_UV,
                current_ua: iin,
                target_voltage_uv: FPDO_VOL_UV,
                max_voltage_uv: FPDO_VOL_UV,
                max_current_ua: iin,
                max_power_uw: FPDO_VOL_UV as i64 * iin as i64 / 1_000_000,
                object_index: FPDO_OBJECT_INDEX,
                adapter_type: AdapterType::UsbPdFixedPdo,
                control_mode: TaControl::ConstantVoltage,
            },
            charge_mode: ChargeMode::TwoToOne,
            input_current_cc_ua: iin,
            input_current_cfg_ua: iin,
        })
    }

    fn request(&self, negotiator: &mut dyn PowerNegotiator, ta: &mut TaParams) -> Result<(), NegotiateError> {
        negotiator.request_fixed_pdo(ta.object_index, ta.current_ua)
    }
}

impl AdapterStrategy for WirelessStrategy {
    fn voltage_step(&self, _mode: i32) -> i32 {
        WCRX_VOL_STEP_UV
    }

    fn voltage_only(&self) -> bool {
        true
    }

    fn input_band(&self) -> i32 {
        IIN_CC_COMP_OFFSET_UA
    }

    fn preset(
        &self,
        engine: &PresetEngine,
        negotiator: &mut dyn PowerNegotiator,
        input: &PresetInput,
    ) -> Result<Preset, PresetError> {
        let (cap, charge_mode) = engine.best_object(negotiator, input.requested_iin_ua, WCRX_MAX_VOL_UV)?;
        let mode = charge_mode.multiplier();

        let iin_cc = input.requested_iin_ua.min(cap.max_current_ua * mode);
        let max_voltage_uv = floor_to(cap.max_voltage_uv, WCRX_VOL_STEP_UV);
        let voltage_uv =
            floor_to(engine.initial_voltage(input.battery_voltage_uv, mode), WCRX_VOL_STEP_UV).min(max_voltage_uv);

        Ok(Preset {
            ta: TaParams {
                voltage_uv,
                current_ua: iin_cc / mode,
                target_voltage_uv: max_voltage_uv,
                max_voltage_uv,
                max_current_ua: cap.max_current_ua,
                max_power_uw: cap.max_power_uw,
                object_index: cap.object_index,
                adapter_type: AdapterType::Wireless,
                control_mode: TaControl::ConstantVoltage,
            },
            charge_mode,
            input_current_cc_ua: iin_cc,
            input_current_cfg_ua: iin_cc,
        })
    }

    fn request(&self, negotiator: &mut dyn PowerNegotiator, ta: &mut TaParams) -> Result<(), NegotiateError> {
        ta.voltage_uv = floor_to(ta.voltage_uv, WCRX_VOL_STEP_UV);
        negotiator.request_wireless_voltage(ta.voltage_uv)
    }
}
