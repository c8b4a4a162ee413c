//! Per-tick adapter adjustment policy.
//!
//! Every step is a deterministic function of the session context and the latest
//! sample. The context is updated in place; the returned [`Adjustment`] tells
//! the control loop what to do next.

use crate::config::{
    CCMODE_CHECK_T, CVMODE_CHECK_FAST_T, CVMODE_CHECK_T, BYPMODE_CHECK_T, IIN_ADC_OFFSET_UA,
    IIN_CC_COMP_OFFSET_CP_UA, IIN_CC_COMP_OFFSET_UA, PD_MSG_TA_CUR_STEP_UA, TA_CUR_LOW_OFFSET_UA,
    TA_IIN_OFFSET_UA, TA_MAX_VOL_CP_UV, TA_MIN_CUR_UA, TA_VOL_STEP_ADJ_CC_UV, TA_VOL_STEP_PRE_CV_UV,
};
use crate::context::{ChargerContext, StepKind, TaControl};
use crate::preset::power_limited_voltage;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompMode {
    Cc,
    Cv,
    Bypass,
}

/// Which analog regulation loop of the IC is active.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoopStatus {
    Inactive,
    InputCurrent,
    ChargeCurrent,
    FloatVoltage,
}

/// Measurements taken for one step.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sample {
    pub iin_ua: i32,
    pub ichg_ua: i32,
    pub vbat_uv: i32,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Adjustment {
    /// The adapter request changed and has to be sent.
    Negotiate,
    /// Nothing to change; poll again after this many milliseconds.
    Hold(u32),
    /// Float-voltage loop took over; move to CV.
    EnterCv,
    /// Pre-CV back-off finished; settle in CV.
    Settled,
    /// Input current fell below top-off.
    Done,
}

/// Adjustment policy for the CC, CV and bypass phases.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Compensator {
    pub max_vfloat_uv: i32,
}

impl Compensator {
    pub fn new(max_vfloat_uv: i32) -> Self {
        Self { max_vfloat_uv }
    }

    /// One adjustment. The adapter request in `ctx` is left inside its voltage
    /// and current bounds.
    pub fn step(&self, ctx: &mut ChargerContext, mode: CompMode, sample: Sample, loop_status: LoopStatus) -> Adjustment {
        let adj = match mode {
            CompMode::Cc => self.cc_step(ctx, sample, loop_status),
            CompMode::Cv => self.cv_step(ctx, sample, loop_status),
            CompMode::Bypass => self.bypass_step(ctx, loop_status),
        };
        let min = ctx.min_ta_voltage_uv();
        ctx.ta.clamp(min);
        #[cfg(feature = "defmt")]
        defmt::debug!(
            "comp {}: iin={}uA loop={} -> {} ta={}uV/{}uA",
            mode,
            sample.iin_ua,
            loop_status,
            adj,
            ctx.ta.voltage_uv,
            ctx.ta.current_ua
        );
        adj
    }

    fn cc_step(&self, ctx: &mut ChargerContext, sample: Sample, loop_status: LoopStatus) -> Adjustment {
        match loop_status {
            LoopStatus::Inactive => {
                if ctx.voltage_only() {
                    rx_voltage_comp(ctx, sample)
                } else if ctx.ta.current_ua <= TA_MIN_CUR_UA || ctx.ta.control_mode == TaControl::ConstantVoltage {
                    ta_voltage_comp(ctx, sample)
                } else if ctx.ta.max_voltage_uv >= TA_MAX_VOL_CP_UV * ctx.mode() {
                    ta_current_comp(ctx, sample)
                } else {
                    ta_current_comp_cp(ctx, sample)
                }
            }
            LoopStatus::FloatVoltage => Adjustment::EnterCv,
            LoopStatus::InputCurrent | LoopStatus::ChargeCurrent => {
                back_off(ctx);
                Adjustment::Negotiate
            }
        }
    }

    fn cv_step(&self, ctx: &mut ChargerContext, sample: Sample, loop_status: LoopStatus) -> Adjustment {
        match loop_status {
            LoopStatus::Inactive => {
                if sample.iin_ua < ctx.targets.input_topoff_ua {
                    Adjustment::Done
                } else if ctx.dec_vfloat || ctx.targets.float_voltage_uv >= self.max_vfloat_uv {
                    Adjustment::Hold(CVMODE_CHECK_FAST_T)
                } else {
                    Adjustment::Hold(CVMODE_CHECK_T)
                }
            }
            LoopStatus::InputCurrent | LoopStatus::ChargeCurrent => {
                back_off(ctx);
                Adjustment::Negotiate
            }
            LoopStatus::FloatVoltage => {
                ctx.ta.voltage_uv -= ctx.voltage_step();
                ctx.ta.target_voltage_uv = ctx.ta.voltage_uv;
                Adjustment::Negotiate
            }
        }
    }

    fn bypass_step(&self, ctx: &mut ChargerContext, loop_status: LoopStatus) -> Adjustment {
        match loop_status {
            LoopStatus::InputCurrent | LoopStatus::ChargeCurrent => {
                if ctx.ta.current_ua <= ctx.targets.input_current_cc_ua - TA_CUR_LOW_OFFSET_UA {
                    ctx.ta.voltage_uv -= ctx.voltage_step();
                } else {
                    ctx.ta.current_ua -= PD_MSG_TA_CUR_STEP_UA;
                }
                Adjustment::Negotiate
            }
            _ => Adjustment::Hold(BYPMODE_CHECK_T),
        }
    }

    /// Pre-CV back-off used in StartCv until no loop is active.
    pub fn pre_cv_step(&self, ctx: &mut ChargerContext, sample: Sample, loop_status: LoopStatus) -> Adjustment {
        let voltage_only = ctx.voltage_only();
        match loop_status {
            LoopStatus::InputCurrent | LoopStatus::ChargeCurrent => {
                if voltage_only {
                    ctx.ta.voltage_uv -= ctx.voltage_step();
                } else if ctx.ta.current_ua > TA_MIN_CUR_UA && ctx.ta.control_mode == TaControl::CurrentLimit {
                    ctx.ta.current_ua -= PD_MSG_TA_CUR_STEP_UA;
                } else {
                    ctx.ta.voltage_uv -= ctx.voltage_step();
                }
                Adjustment::Negotiate
            }
            LoopStatus::FloatVoltage => {
                if voltage_only {
                    ctx.ta.voltage_uv -= ctx.voltage_step();
                } else if ctx.targets.float_voltage_uv >= self.max_vfloat_uv {
                    ctx.ta.voltage_uv -= 2 * TA_VOL_STEP_PRE_CV_UV * ctx.mode();
                } else {
                    ctx.ta.voltage_uv -= TA_VOL_STEP_PRE_CV_UV * ctx.mode();
                }
                ctx.ta.target_voltage_uv = ctx.ta.voltage_uv;
                Adjustment::Negotiate
            }
            LoopStatus::Inactive => {
                if sample.iin_ua < ctx.targets.input_topoff_ua {
                    Adjustment::Done
                } else {
                    Adjustment::Settled
                }
            }
        }
    }
}

/// Response to an active IIN/CHG loop: give up current first while the
/// adapter still has it to spare, voltage otherwise.
fn back_off(ctx: &mut ChargerContext) {
    if ctx.voltage_only() {
        ctx.ta.voltage_uv -= ctx.voltage_step();
    } else if ctx.ta.current_ua <= TA_MIN_CUR_UA
        || ctx.ta.control_mode == TaControl::ConstantVoltage
        || ctx.ta.current_ua <= ctx.targets.input_current_cc_ua - TA_CUR_LOW_OFFSET_UA
    {
        ctx.ta.voltage_uv -= ctx.voltage_step();
    } else {
        ctx.ta.current_ua -= PD_MSG_TA_CUR_STEP_UA;
    }
}

fn raise_voltage(ctx: &mut ChargerContext, step: i32) {
    ctx.ta.voltage_uv = (ctx.ta.voltage_uv + step).min(ctx.ta.max_voltage_uv);
    ctx.ta.target_voltage_uv = ctx.ta.voltage_uv;
}

fn raise_current(ctx: &mut ChargerContext) {
    ctx.ta.current_ua = (ctx.ta.current_ua + PD_MSG_TA_CUR_STEP_UA).min(ctx.ta.max_current_ua);
}

/// Lower the request when the input overshoots the band.
fn trim_overshoot(ctx: &mut ChargerContext) {
    if ctx.ta.current_ua > ctx.targets.input_current_cc_ua - TA_CUR_LOW_OFFSET_UA {
        // Adapter is in current limit: trim current.
        ctx.ta.current_ua -= PD_MSG_TA_CUR_STEP_UA;
    } else {
        ctx.ta.voltage_uv -= ctx.voltage_step();
        ctx.ta.target_voltage_uv = ctx.ta.voltage_uv;
    }
}

/// Current compensation for adapters with enough power at full voltage.
fn ta_current_comp(ctx: &mut ChargerContext, sample: Sample) -> Adjustment {
    let iin = sample.iin_ua;
    let iin_cc = ctx.targets.input_current_cc_ua;
    let prev_iin = ctx.compensation.prev_input_current_ua.unwrap_or(0);
    let vstep = ctx.voltage_step();

    let adj = if iin > iin_cc + IIN_CC_COMP_OFFSET_UA {
        trim_overshoot(ctx);
        Adjustment::Negotiate
    } else if iin < iin_cc - IIN_CC_COMP_OFFSET_UA {
        if ctx.ta.voltage_at_max() {
            if ctx.ta.current_at_max() {
                // Both at maximum: accept.
                Adjustment::Hold(CCMODE_CHECK_T)
            } else {
                raise_current(ctx);
                ctx.compensation.prev_step_kind = StepKind::Current;
                Adjustment::Negotiate
            }
        } else if iin > prev_iin + IIN_ADC_OFFSET_UA {
            // Still rising with voltage.
            raise_voltage(ctx, vstep);
            ctx.compensation.prev_step_kind = StepKind::Voltage;
            Adjustment::Negotiate
        } else if ctx.compensation.prev_step_kind == StepKind::Voltage {
            // The voltage step did not move the input; try the other axis.
            if ctx.ta.current_at_max() || ctx.ta.current_ua >= iin_cc + TA_IIN_OFFSET_UA {
                raise_voltage(ctx, vstep);
                ctx.compensation.prev_step_kind = StepKind::Voltage;
            } else {
                raise_current(ctx);
                ctx.compensation.prev_step_kind = StepKind::Current;
            }
            Adjustment::Negotiate
        } else {
            raise_voltage(ctx, vstep);
            ctx.compensation.prev_step_kind = StepKind::Voltage;
            Adjustment::Negotiate
        }
    } else {
        ctx.compensation.prev_step_kind = StepKind::None;
        Adjustment::Hold(CCMODE_CHECK_T)
    };
    ctx.compensation.prev_input_current_ua = Some(iin);
    adj
}

/// Current compensation for power-limited adapters.
///
/// When voltage is pinned at the power-derived maximum and the input still
/// falls short, the target input current is lowered one step and the maximum
/// voltage re-derived from `max_power`, which lets voltage rise again. The
/// target never drops below the adapter's minimum current so the re-derivation
/// terminates.
fn ta_current_comp_cp(ctx: &mut ChargerContext, sample: Sample) -> Adjustment {
    let iin = sample.iin_ua;
    let mode = ctx.mode();
    let iin_cc = ctx.targets.input_current_cc_ua;

    let adj = if iin > ctx.targets.input_current_cfg_ua + IIN_CC_COMP_OFFSET_UA {
        trim_overshoot(ctx);
        Adjustment::Negotiate
    } else if iin < iin_cc - IIN_CC_COMP_OFFSET_CP_UA {
        if ctx.ta.voltage_at_max() {
            if iin >= iin_cc - IIN_CC_COMP_OFFSET_UA {
                Adjustment::Hold(CCMODE_CHECK_T)
            } else if ctx.ta.current_ua >= iin_cc / mode || ctx.ta.current_at_max() {
                let lowered = iin_cc - IIN_CC_COMP_OFFSET_UA;
                if lowered < TA_MIN_CUR_UA * mode {
                    Adjustment::Hold(CCMODE_CHECK_T)
                } else {
                    ctx.targets.input_current_cc_ua = lowered;
                    let iin_apdo = lowered / PD_MSG_TA_CUR_STEP_UA * PD_MSG_TA_CUR_STEP_UA;
                    ctx.ta.max_voltage_uv = power_limited_voltage(ctx.ta.max_power_uw, iin_apdo, mode);
                    raise_voltage(ctx, TA_VOL_STEP_ADJ_CC_UV);
                    Adjustment::Negotiate
                }
            } else {
                raise_current(ctx);
                Adjustment::Negotiate
            }
        } else {
            raise_voltage(ctx, TA_VOL_STEP_ADJ_CC_UV);
            Adjustment::Negotiate
        }
    } else {
        Adjustment::Hold(CCMODE_CHECK_T)
    };
    ctx.compensation.prev_input_current_ua = Some(iin);
    adj
}

/// Voltage-only compensation (adapter current at its floor or CV control).
fn ta_voltage_comp(ctx: &mut ChargerContext, sample: Sample) -> Adjustment {
    let iin_cc = ctx.targets.input_current_cc_ua;
    let vstep = ctx.voltage_step();
    if sample.iin_ua > iin_cc + IIN_CC_COMP_OFFSET_UA {
        ctx.ta.voltage_uv -= vstep;
        Adjustment::Negotiate
    } else if sample.iin_ua < iin_cc - IIN_CC_COMP_OFFSET_UA && !ctx.ta.voltage_at_max() {
        raise_voltage(ctx, vstep);
        Adjustment::Negotiate
    } else {
        Adjustment::Hold(CCMODE_CHECK_T)
    }
}

/// Receiver voltage compensation for voltage-only sources.
fn rx_voltage_comp(ctx: &mut ChargerContext, sample: Sample) -> Adjustment {
    let iin_cc = ctx.targets.input_current_cc_ua;
    let vstep = ctx.voltage_step();
    let adj = if sample.iin_ua > iin_cc + IIN_CC_COMP_OFFSET_UA {
        ctx.ta.voltage_uv -= vstep;
        Adjustment::Negotiate
    } else if sample.iin_ua < iin_cc - IIN_CC_COMP_OFFSET_UA && !ctx.ta.voltage_at_max() {
        ctx.ta.voltage_uv = (ctx.ta.voltage_uv + vstep).min(ctx.ta.max_voltage_uv);
        Adjustment::Negotiate
    } else {
        Adjustment::Hold(CCMODE_CHECK_T)
    };
    ctx.ta.target_voltage_uv = ctx.ta.voltage_uv;
    adj
}
