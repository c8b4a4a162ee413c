//! Servicing input current, float voltage and topology requests made while
//! a session runs.

use crate::config::{
    BYPASS_WAIT_T, DISABLE_DELAY_T, IIN_CFG_WAIT_T, PD_MSG_TA_CUR_STEP_UA, PD_MSG_TA_VOL_STEP_UV,
    REQUEST_SETTLE_T, TA_MIN_CUR_UA, TA_VOL_OFFSET_1TO1_BYPASS_UV, TA_VOL_OFFSET_2TO1_BYPASS_UV,
    TA_VOL_PRE_OFFSET_UV,
};
use crate::context::{floor_to, ChargingState, DcTopology};
use crate::controller::DirectCharger;
use crate::error::Error;
use crate::io::{AdcChannel, AdcReader, PowerNegotiator, RegisterIo, SwitchingCharger};
use crate::preset::power_limited_voltage;
use crate::scheduler::Action;

/// Adapter current that realises input current `iin_ua` at ratio `mode`.
fn adapter_current(iin_ua: i32, mode: i32) -> i32 {
    floor_to(iin_ua / mode, PD_MSG_TA_CUR_STEP_UA)
}

/// Adapter voltage that passes the battery voltage straight through.
fn bypass_voltage(topology: DcTopology, vbat_uv: i32) -> i32 {
    match topology {
        DcTopology::Bypass1to1 => vbat_uv + TA_VOL_OFFSET_1TO1_BYPASS_UV,
        _ => 2 * vbat_uv + TA_VOL_OFFSET_2TO1_BYPASS_UV,
    }
}

impl<R, A, N, S> DirectCharger<R, A, N, S>
where
    R: RegisterIo,
    A: AdcReader,
    N: PowerNegotiator,
    S: SwitchingCharger,
{
    /// Run the first pending request. `Ok(true)` means the step is handled
    /// and the state's normal progression must not run.
    pub(crate) fn service_requests(&mut self) -> Result<bool, Error> {
        if let Some(topology) = self.ctx.requested.dc_topology {
            self.set_new_dc_mode(topology)?;
            return Ok(true);
        }
        if let Some(iin) = self.ctx.requested.input_current_ua {
            self.set_new_iin(iin)?;
            return Ok(true);
        }
        if let Some(vfloat) = self.ctx.requested.float_voltage_uv {
            return self.set_new_vfloat(vfloat);
        }
        Ok(false)
    }

    fn set_new_iin(&mut self, iin: i32) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::info!("dc: new input current {}uA in {}", iin, self.ctx.state);
        let mode = self.ctx.mode();

        if self.ctx.dc_topology.is_bypass() {
            self.ctx.requested.input_current_ua = None;
            self.ctx.targets.input_current_cc_ua = iin;
            self.ctx.targets.input_current_cfg_ua = iin;
            self.dev.set_input_current(iin, self.ctx.ta.adapter_type, &self.config)?;
            self.ctx.ta.current_ua = adapter_current(iin, mode);
            self.negotiate();
            return Ok(());
        }

        self.ctx.ret_state = self.ctx.state;
        self.ctx.targets.input_current_cc_ua = iin;

        if self.ctx.voltage_only() {
            self.set_state(ChargingState::AdjustTaVol)?;
            return self.adjust_ta_voltage();
        }
        if self.select_frequency() != self.ctx.fsw_khz {
            return self.restart_for_frequency(iin);
        }
        if iin < TA_MIN_CUR_UA * mode {
            self.ctx.ta.current_ua = TA_MIN_CUR_UA;
            self.set_state(ChargingState::AdjustTaVol)?;
            self.negotiate();
            return Ok(());
        }
        self.set_state(ChargingState::AdjustTaCur)?;
        self.adjust_ta_current()
    }

    /// The switching frequency only changes while switching is stopped, so
    /// the session goes back through the preset.
    fn restart_for_frequency(&mut self, iin: i32) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::info!("dc: {}uA needs a frequency change, restarting", iin);
        self.ctx.requested.input_current_ua = None;
        self.ctx.targets.input_current_cfg_ua = iin;
        self.dev.set_charging(false, self.ctx.dc_topology, false)?;
        self.ctx.enabled = false;
        self.set_state(ChargingState::PresetDc)?;
        self.scheduler.schedule(Action::PresetDc, DISABLE_DELAY_T);
        Ok(())
    }

    /// Return from an adjustment sub-routine to the state that started it.
    fn return_to_saved(&mut self) -> Result<(), Error> {
        let ret = self.ctx.ret_state;
        self.set_state(ret)?;
        let action = if ret == ChargingState::CcMode {
            Action::CheckCcMode
        } else {
            Action::CheckCvMode
        };
        self.scheduler.schedule(action, REQUEST_SETTLE_T);
        Ok(())
    }

    fn commit_input_current(&mut self, iin: i32) -> Result<(), Error> {
        self.ctx.requested.input_current_ua = None;
        self.ctx.targets.input_current_cc_ua = iin;
        self.ctx.targets.input_current_cfg_ua = iin;
        self.dev.set_input_current(iin, self.ctx.ta.adapter_type, &self.config)
    }

    /// Move adapter current to the requested input current.
    pub(crate) fn adjust_ta_current(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::AdjustTaCur)?;
        if !self.guard()? {
            return Ok(());
        }
        let Some(iin) = self.ctx.requested.input_current_ua else {
            return self.return_to_saved();
        };
        let mode = self.ctx.mode();
        // The source cannot deliver more than its object allows.
        let iin_cc = iin.min(self.ctx.ta.max_current_ua * mode);
        let ta_cur = adapter_current(iin_cc, mode);

        if self.ctx.ta.current_ua == ta_cur {
            self.commit_input_current(iin_cc)?;
            return self.return_to_saved();
        }

        self.ctx.targets.input_current_cc_ua = iin_cc;
        let vbat = self.read_uv(AdcChannel::Vbat)?;
        if iin_cc > self.ctx.targets.input_current_cfg_ua {
            // Higher target: redo the preset arithmetic and ramp again.
            self.commit_input_current(iin_cc)?;
            let ichg = self.ctx.targets.charge_current_cfg_ua.max(2 * iin_cc);
            self.ctx.targets.charge_current_cfg_ua = ichg;
            self.dev.set_charging_current(ichg)?;

            let iin_apdo = floor_to(iin_cc, PD_MSG_TA_CUR_STEP_UA * mode);
            let ta = &mut self.ctx.ta;
            ta.max_voltage_uv = power_limited_voltage(ta.max_power_uw, iin_apdo, mode).min(ta.max_voltage_uv);
            ta.voltage_uv = floor_to(self.preset_engine.initial_voltage(vbat, mode), PD_MSG_TA_VOL_STEP_UV)
                .min(ta.max_voltage_uv);
            ta.current_ua = iin_apdo / mode;
            self.ctx.reset_compensation();
            self.set_state(ChargingState::AdjustCc)?;
            self.scheduler.schedule(Action::PdMsgSend, IIN_CFG_WAIT_T);
        } else {
            // Lower target: drop voltage to the preset level with the new current.
            let ta = &mut self.ctx.ta;
            ta.voltage_uv = floor_to(2 * vbat * mode + TA_VOL_PRE_OFFSET_UV, PD_MSG_TA_VOL_STEP_UV);
            ta.current_ua = ta_cur;
            self.negotiate();
        }
        Ok(())
    }

    /// Move adapter voltage until the input current sits in the band around
    /// the request. Used with adapter current pinned at its floor and for
    /// voltage-only sources.
    ///
    /// At the lowest adapter voltage the request is committed as is and the
    /// IC's input-current loop holds the remainder.
    pub(crate) fn adjust_ta_voltage(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::AdjustTaVol)?;
        if !self.guard()? {
            return Ok(());
        }
        let Some(target) = self.ctx.requested.input_current_ua else {
            return self.return_to_saved();
        };
        let step = self.ctx.voltage_step();
        let band = self
            .ctx
            .strategy()
            .map_or(PD_MSG_TA_CUR_STEP_UA, |s| s.input_band());
        let min = self.ctx.min_ta_voltage_uv();
        let iin = self.read_ua(AdcChannel::Iin)?;

        if iin > target + band && self.ctx.ta.voltage_uv > min {
            self.ctx.ta.voltage_uv = (self.ctx.ta.voltage_uv - step).max(min);
            self.negotiate();
        } else if iin < target - band && !self.ctx.ta.voltage_at_max() {
            self.ctx.ta.voltage_uv = (self.ctx.ta.voltage_uv + step).min(self.ctx.ta.max_voltage_uv);
            self.negotiate();
        } else {
            self.commit_input_current(target)?;
            self.return_to_saved()?;
        }
        Ok(())
    }

    /// Returns `Ok(false)` when the request matched the current target and
    /// was simply dropped.
    fn set_new_vfloat(&mut self, vfloat: i32) -> Result<bool, Error> {
        self.ctx.requested.float_voltage_uv = None;
        let current = self.ctx.targets.float_voltage_uv;
        #[cfg(feature = "defmt")]
        defmt::info!("dc: float voltage {}uV -> {}uV in {}", current, vfloat, self.ctx.state);
        let register = if self.config.fg_vfloat {
            self.ctx.targets.max_float_voltage_uv
        } else {
            vfloat
        };

        if self.ctx.dc_topology.is_bypass() {
            self.ctx.targets.float_voltage_uv = vfloat;
            self.dev.set_vfloat(register)?;
            let vbat = self.read_uv(AdcChannel::Vbat)?;
            self.ctx.ta.voltage_uv = bypass_voltage(self.ctx.dc_topology, vbat);
            self.negotiate();
            return Ok(true);
        }

        if vfloat == current {
            return Ok(false);
        }
        self.ctx.targets.float_voltage_uv = vfloat;
        self.dev.set_vfloat(register)?;

        if vfloat > current {
            self.ctx.dec_vfloat = false;
            let mode = self.ctx.mode();
            let vbat = self.read_uv(AdcChannel::Vbat)?;
            let iin_cc = self.ctx.targets.input_current_cfg_ua.min(self.ctx.ta.max_current_ua * mode);
            let ta = &mut self.ctx.ta;
            ta.voltage_uv = floor_to(self.preset_engine.initial_voltage(vbat, mode), PD_MSG_TA_VOL_STEP_UV)
                .min(ta.max_voltage_uv);
            ta.current_ua = floor_to(iin_cc, PD_MSG_TA_CUR_STEP_UA * mode) / mode;
            self.ctx.targets.input_current_cc_ua = iin_cc;
            self.ctx.reset_compensation();
            self.set_state(ChargingState::AdjustCc)?;
            self.negotiate();
        } else {
            self.ctx.dec_vfloat = true;
            self.set_state(ChargingState::StartCv)?;
            self.scheduler.schedule(Action::EnterCvMode, 0);
        }
        Ok(true)
    }

    fn set_new_dc_mode(&mut self, topology: DcTopology) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::info!("dc: topology {} -> {}", self.ctx.dc_topology, topology);
        self.dev.set_charging(false, self.ctx.dc_topology, false)?;
        self.ctx.enabled = false;

        if topology.is_bypass() {
            let vbat = self.read_uv(AdcChannel::Vbat)?;
            self.ctx.dc_topology = topology;
            self.ctx.ta.voltage_uv = bypass_voltage(topology, vbat);
            self.set_state(ChargingState::DcModeChange)?;
            self.negotiate();
        } else {
            self.ctx.requested.dc_topology = None;
            self.dev.set_rcp(true)?;
            self.ctx.dc_topology = DcTopology::Normal;
            self.set_state(ChargingState::PresetDc)?;
            self.scheduler.schedule(Action::PresetDc, 0);
        }
        Ok(())
    }

    /// Adapter output has moved to the bypass voltage: switch the IC over.
    pub(crate) fn dc_mode_change(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::DcModeChange)?;
        self.dev.set_rcp(false)?;
        self.dev.set_switching_frequency(self.config.fsw_cfg_bypass_khz)?;
        self.ctx.fsw_khz = self.config.fsw_cfg_bypass_khz;
        self.dev.set_charging(true, self.ctx.dc_topology, self.config.ntc_en)?;
        self.ctx.enabled = true;
        if self.ctx.requested.dc_topology == Some(self.ctx.dc_topology) {
            self.ctx.requested.dc_topology = None;
        }
        self.set_state(ChargingState::BypassMode)?;
        self.scheduler.schedule(Action::CheckBypassMode, BYPASS_WAIT_T);
        Ok(())
    }
}
