//! Session state owned by the controller.

use crate::config::{Config, PD_MSG_TA_VOL_STEP_UV, TA_MAX_VOL_UV};
use crate::preset::{strategy_for, AdapterStrategy};

/// Control-loop state.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChargingState {
    NoCharging,
    CheckVbat,
    PresetDc,
    CheckActive,
    AdjustCc,
    StartCc,
    CcMode,
    StartCv,
    CvMode,
    ChargingDone,
    AdjustTaVol,
    AdjustTaCur,
    BypassMode,
    DcModeChange,
    ReverseMode,
    FpdoCvMode,
}

impl ChargingState {
    /// States that run the forward conversion and may come back here after a
    /// voltage/current request sub-routine.
    pub fn is_charging(self) -> bool {
        !matches!(self, ChargingState::NoCharging | ChargingState::ReverseMode)
    }

    /// Transition table. Any state may stop.
    pub fn can_transition_to(self, next: ChargingState) -> bool {
        use ChargingState::*;
        if next == NoCharging || next == self {
            return true;
        }
        // Retry and restart paths re-enter the preset from every charging state.
        if next == PresetDc && self.is_charging() {
            return true;
        }
        match self {
            NoCharging => matches!(next, CheckVbat | ReverseMode),
            CheckVbat => false,
            PresetDc => matches!(next, CheckActive),
            CheckActive => matches!(next, AdjustCc | FpdoCvMode),
            AdjustCc => matches!(next, StartCc | CcMode | StartCv),
            StartCc => matches!(next, CcMode),
            CcMode => matches!(next, StartCv | AdjustCc | AdjustTaVol | AdjustTaCur | DcModeChange),
            StartCv => matches!(next, CvMode | ChargingDone),
            CvMode => matches!(
                next,
                ChargingDone | StartCv | AdjustCc | AdjustTaVol | AdjustTaCur | DcModeChange
            ),
            ChargingDone => false,
            AdjustTaVol | AdjustTaCur => matches!(
                next,
                AdjustTaVol | AdjustTaCur | AdjustCc | CcMode | CvMode
            ),
            BypassMode => matches!(next, DcModeChange),
            DcModeChange => matches!(next, BypassMode),
            ReverseMode => false,
            FpdoCvMode => matches!(next, ChargingDone),
        }
    }
}

/// Switched-capacitor conversion ratio between adapter and battery.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChargeMode {
    None,
    TwoToOne,
    FourToOne,
}

impl ChargeMode {
    /// Multiplier applied on top of the base 2:1 relation.
    ///
    /// Input current is measured on the adapter side, so a 2:1 session has
    /// `iin == ta_cur` and multiplier 1; 4:1 doubles adapter voltage and halves
    /// adapter current again. `None` maps to 1 so divisions stay defined.
    pub fn multiplier(self) -> i32 {
        match self {
            ChargeMode::None | ChargeMode::TwoToOne => 1,
            ChargeMode::FourToOne => 2,
        }
    }
}

/// Forward path topology.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DcTopology {
    /// Switched-capacitor conversion.
    Normal,
    /// Forward 1:1 pass-through.
    Bypass1to1,
    /// 2:1 switching with the adapter in voltage-follow pass-through.
    Bypass2to1,
}

impl DcTopology {
    pub fn is_bypass(self) -> bool {
        !matches!(self, DcTopology::Normal)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdapterType {
    UsbPdApdo,
    UsbPdFixedPdo,
    Wireless,
    Unknown,
}

/// How the adapter is steered.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaControl {
    /// Adapter current limits the input; current and voltage both move.
    CurrentLimit,
    /// Only adapter voltage moves.
    ConstantVoltage,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReverseMode {
    Stopped,
    OneToTwo,
    ReverseOneToOne,
}

/// Which adapter quantity the last increasing step moved.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepKind {
    None,
    Voltage,
    Current,
}

/// Adapter request and limits.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaParams {
    pub voltage_uv: i32,
    pub current_ua: i32,
    pub target_voltage_uv: i32,
    pub max_voltage_uv: i32,
    pub max_current_ua: i32,
    pub max_power_uw: i64,
    pub object_index: u8,
    pub adapter_type: AdapterType,
    pub control_mode: TaControl,
}

impl Default for TaParams {
    fn default() -> Self {
        Self {
            voltage_uv: 0,
            current_ua: 0,
            target_voltage_uv: TA_MAX_VOL_UV,
            max_voltage_uv: 0,
            max_current_ua: 0,
            max_power_uw: 0,
            object_index: 0,
            adapter_type: AdapterType::Unknown,
            control_mode: TaControl::CurrentLimit,
        }
    }
}

impl TaParams {
    /// Pull voltage into `[min_voltage, max_voltage]` and current into `[0, max_current]`.
    pub fn clamp(&mut self, min_voltage_uv: i32) {
        let min = min_voltage_uv.min(self.max_voltage_uv);
        self.voltage_uv = self.voltage_uv.clamp(min, self.max_voltage_uv);
        self.current_ua = self.current_ua.clamp(0, self.max_current_ua);
    }

    pub fn voltage_at_max(&self) -> bool {
        self.voltage_uv >= self.max_voltage_uv
    }

    pub fn current_at_max(&self) -> bool {
        self.current_ua >= self.max_current_ua
    }
}

/// Charge targets for the running session.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Targets {
    pub input_current_cc_ua: i32,
    pub input_current_cfg_ua: i32,
    pub charge_current_cfg_ua: i32,
    pub float_voltage_uv: i32,
    pub max_float_voltage_uv: i32,
    pub input_topoff_ua: i32,
}

/// Targets the owning framework asked for. Kept across sessions.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UserTargets {
    pub input_current_ua: i32,
    pub charge_current_ua: i32,
    pub float_voltage_uv: i32,
    pub input_topoff_ua: i32,
}

impl UserTargets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            input_current_ua: config.iin_cfg_ua,
            charge_current_ua: config.ichg_cfg_ua,
            float_voltage_uv: config.vfloat_uv,
            input_topoff_ua: config.iin_topoff_ua,
        }
    }
}

/// Memory for the anti-oscillation rule.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Compensation {
    pub prev_input_current_ua: Option<i32>,
    pub prev_step_kind: StepKind,
}

impl Default for Compensation {
    fn default() -> Self {
        Self {
            prev_input_current_ua: None,
            prev_step_kind: StepKind::None,
        }
    }
}

/// Pending changes requested while a session runs, consumed by the loop.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Requests {
    pub dc_topology: Option<DcTopology>,
    pub input_current_ua: Option<i32>,
    pub float_voltage_uv: Option<i32>,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReverseState {
    pub mode: ReverseMode,
    pub ocp_current_ua: u32,
}

/// Mutable record of one charging session.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChargerContext {
    pub state: ChargingState,
    /// State to go back to after an AdjustTaVol/AdjustTaCur sub-routine.
    pub ret_state: ChargingState,
    pub ta: TaParams,
    pub targets: Targets,
    pub charge_mode: ChargeMode,
    pub dc_topology: DcTopology,
    pub requested: Requests,
    pub compensation: Compensation,
    pub retry_count: u8,
    pub reverse: ReverseState,
    pub done_count: u8,
    /// Last enable request from the owning framework.
    pub enabled_request: bool,
    /// IC switching is enabled.
    pub enabled: bool,
    /// Switching frequency currently programmed.
    pub fsw_khz: u32,
    /// Float voltage was lowered while charging.
    pub dec_vfloat: bool,
    /// Battery voltage observed by the last fault check.
    pub prev_vbat_uv: i32,
    /// Scheduler time of the last accepted APDO request.
    pub last_apdo_request_ms: Option<u64>,
}

impl ChargerContext {
    /// Session defaults.
    pub fn new(config: &Config, user: &UserTargets) -> Self {
        Self {
            state: ChargingState::NoCharging,
            ret_state: ChargingState::NoCharging,
            ta: TaParams::default(),
            targets: Targets {
                input_current_cc_ua: user.input_current_ua,
                input_current_cfg_ua: user.input_current_ua,
                charge_current_cfg_ua: user.charge_current_ua,
                float_voltage_uv: user.float_voltage_uv,
                max_float_voltage_uv: config.max_vfloat_uv,
                input_topoff_ua: user.input_topoff_ua,
            },
            charge_mode: ChargeMode::None,
            dc_topology: DcTopology::Normal,
            requested: Requests::default(),
            compensation: Compensation::default(),
            retry_count: 0,
            reverse: ReverseState {
                mode: ReverseMode::Stopped,
                ocp_current_ua: config.reverse_ocp_ua,
            },
            done_count: 0,
            enabled_request: false,
            enabled: false,
            fsw_khz: config.fsw_cfg_khz,
            dec_vfloat: false,
            prev_vbat_uv: 0,
            last_apdo_request_ms: None,
        }
    }

    /// Multiplier of the active conversion ratio.
    pub fn mode(&self) -> i32 {
        self.charge_mode.multiplier()
    }

    /// Negotiation rules of the session's adapter, `None` before a preset.
    pub fn strategy(&self) -> Option<&'static dyn AdapterStrategy> {
        strategy_for(self.ta.adapter_type)
    }

    /// One adapter voltage step for the session's adapter and ratio.
    pub fn voltage_step(&self) -> i32 {
        let mode = self.mode();
        self.strategy()
            .map_or(PD_MSG_TA_VOL_STEP_UV * mode, |s| s.voltage_step(mode))
    }

    /// The adapter is steered by voltage alone.
    pub fn voltage_only(&self) -> bool {
        self.strategy().is_some_and(|s| s.voltage_only())
    }

    /// Lowest adapter voltage the session may request.
    pub fn min_ta_voltage_uv(&self) -> i32 {
        match (self.ta.adapter_type, self.dc_topology) {
            (_, DcTopology::Bypass1to1) => 0,
            (AdapterType::UsbPdApdo, _) => crate::config::TA_MIN_VOL_UV,
            _ => 0,
        }
    }

    pub fn reset_compensation(&mut self) {
        self.compensation = Compensation::default();
    }
}

/// Round down to a multiple of `step`.
pub(crate) fn floor_to(value: i32, step: i32) -> i32 {
    value.div_euclid(step) * step
}
