//! Charging state handlers, one per scheduler action.

use crate::compensator::{Adjustment, CompMode, LoopStatus, Sample};
use crate::config::{
    CCMODE_CHECK_T, CVMODE_CHECK_FAST_T, CVMODE_CHECK_T, DC_VBAT_MIN_UV, ENABLE_DELAY_T, FPDO_CVMODE_CHECK_T,
    FPDO_DONE_CNT, IIN_ADC_OFFSET_UA, PD_MSG_TA_CUR_STEP_UA, PD_MSG_TA_VOL_STEP_UV, TA_IIN_OFFSET_UA,
    TA_MIN_CUR_UA, TA_VOL_STEP_ADJ_CC_UV, TA_VOL_STEP_PRE_CC_UV, VBATMIN_CHECK_T,
};
use crate::context::{floor_to, AdapterType, ChargingState, DcTopology, StepKind, TaControl};
use crate::controller::DirectCharger;
use crate::error::{Error, FaultOutcome, FaultReason};
use crate::fault::FaultWindow;
use crate::io::{AdcChannel, AdcReader, PowerNegotiator, RegisterIo, SwitchingCharger};
use crate::preset::PresetInput;
use crate::scheduler::Action;

impl<R, A, N, S> DirectCharger<R, A, N, S>
where
    R: RegisterIo,
    A: AdcReader,
    N: PowerNegotiator,
    S: SwitchingCharger,
{
    /// Wait for the switching charger to let go of the battery.
    pub(crate) fn check_vbatmin(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::CheckVbat)?;
        let vbat = self.read_uv(AdcChannel::Vbat)?;

        if !self.swchg_enabled()? {
            self.ctx.retry_count = 0;
            self.scheduler.schedule(Action::PresetDc, 0);
            return Ok(());
        }
        if vbat > DC_VBAT_MIN_UV {
            #[cfg(feature = "defmt")]
            defmt::info!("dc: vbat {}uV, handing over from switching charger", vbat);
            self.swchg_disable()?;
        }
        self.scheduler.schedule(Action::VbatMinCheck, VBATMIN_CHECK_T);
        Ok(())
    }

    /// Initialise the IC and compute the session's first adapter request.
    pub(crate) fn preset_dc(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::PresetDc)?;
        self.ctx.fsw_khz = self.config.fsw_cfg_khz;
        self.dev.init(&self.config, self.ctx.fsw_khz)?;

        let adapter_type = self.negotiator.adapter_type();
        let vbat = self.read_uv(AdcChannel::Vbat)?;
        let control_mode = if adapter_type == self.ctx.ta.adapter_type {
            self.ctx.ta.control_mode
        } else {
            TaControl::CurrentLimit
        };
        let input = PresetInput {
            adapter_type,
            battery_voltage_uv: vbat,
            requested_iin_ua: self.user.input_current_ua,
            control_mode,
        };
        let preset = self.preset_engine.preset(&mut self.negotiator, &input)?;

        self.ctx.ta = preset.ta;
        self.ctx.charge_mode = preset.charge_mode;
        self.ctx.dc_topology = DcTopology::Normal;
        self.ctx.targets.input_current_cc_ua = preset.input_current_cc_ua;
        self.ctx.targets.input_current_cfg_ua = preset.input_current_cfg_ua;
        self.ctx.targets.float_voltage_uv = self.user.float_voltage_uv;
        self.ctx.reset_compensation();
        self.negotiate();
        Ok(())
    }

    /// Program the regulation registers and enable switching.
    pub(crate) fn preset_config(&mut self) -> Result<(), Error> {
        let adapter = self.ctx.ta.adapter_type;
        let iin_cfg = self.ctx.targets.input_current_cfg_ua;
        self.dev.set_input_current(iin_cfg, adapter, &self.config)?;

        let ichg = self.ctx.targets.charge_current_cfg_ua.max(2 * iin_cfg);
        self.ctx.targets.charge_current_cfg_ua = ichg;
        self.dev.set_charging_current(ichg)?;

        let vfloat = if self.config.fg_vfloat {
            self.ctx.targets.max_float_voltage_uv
        } else {
            self.ctx.targets.float_voltage_uv
        };
        self.dev.set_vfloat(vfloat)?;

        let fsw = self.select_frequency();
        self.dev.set_switching_frequency(fsw)?;
        self.ctx.fsw_khz = fsw;

        self.dev.set_charging(true, self.ctx.dc_topology, self.config.ntc_en)?;
        self.ctx.enabled = true;
        self.ctx.reset_compensation();
        self.set_state(ChargingState::CheckActive)?;
        self.scheduler.schedule(Action::CheckActive, ENABLE_DELAY_T);
        Ok(())
    }

    /// Confirm the IC is switching after the preset.
    pub(crate) fn check_active(&mut self) -> Result<(), Error> {
        match self.check_error(FaultWindow::Activation)? {
            FaultOutcome::Ok => {
                self.health = FaultOutcome::Ok;
                if self.ctx.ta.adapter_type == AdapterType::UsbPdFixedPdo {
                    self.ctx.done_count = 0;
                    self.set_state(ChargingState::FpdoCvMode)?;
                    self.scheduler.schedule(Action::CheckFpdoCvMode, CVMODE_CHECK_FAST_T);
                } else {
                    self.set_state(ChargingState::AdjustCc)?;
                    self.scheduler.schedule(Action::AdjustCcMode, 0);
                }
                Ok(())
            }
            FaultOutcome::Retryable(reason) => self.recover(reason),
            FaultOutcome::Fatal(reason) => Err(Error::Fault(reason)),
            // Activation checks never report completion.
            FaultOutcome::ChargingDone => self.recover(FaultReason::NotActive),
        }
    }

    /// Coarse ramp toward the input current target.
    pub(crate) fn adjust_cc(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::AdjustCc)?;
        if !self.guard()? {
            return Ok(());
        }
        let sample = self.sample()?;
        let loop_status = self.loop_status(sample.vbat_uv)?;
        let voltage_only = self.ctx.voltage_only();
        let vstep = self.ctx.voltage_step();

        match loop_status {
            LoopStatus::InputCurrent | LoopStatus::ChargeCurrent => {
                if voltage_only {
                    self.ctx.ta.voltage_uv -= vstep;
                    self.set_state(ChargingState::CcMode)?;
                } else if self.ctx.ta.current_ua > TA_MIN_CUR_UA && self.ctx.ta.control_mode == TaControl::CurrentLimit {
                    self.ctx.ta.current_ua -= PD_MSG_TA_CUR_STEP_UA;
                    self.set_cc_target(sample.vbat_uv);
                    self.set_state(ChargingState::StartCc)?;
                } else {
                    self.ctx.ta.voltage_uv -= vstep;
                    self.set_state(ChargingState::CcMode)?;
                }
                self.negotiate();
            }
            LoopStatus::FloatVoltage => {
                self.set_state(ChargingState::StartCv)?;
                self.scheduler.schedule(Action::EnterCvMode, 0);
            }
            LoopStatus::Inactive if voltage_only => {
                let iin_cc = self.ctx.targets.input_current_cc_ua;
                if sample.iin_ua > iin_cc - IIN_ADC_OFFSET_UA || self.ctx.ta.voltage_at_max() {
                    self.set_state(ChargingState::CcMode)?;
                    self.scheduler.schedule(Action::CheckCcMode, CCMODE_CHECK_T);
                } else {
                    self.ctx.ta.voltage_uv = (self.ctx.ta.voltage_uv + vstep).min(self.ctx.ta.max_voltage_uv);
                    self.negotiate();
                }
            }
            LoopStatus::Inactive => self.ramp_cc(sample)?,
        }
        Ok(())
    }

    /// Inactive-loop ramp for USB-PD sources. Alternates between voltage and
    /// current when a step did not move the input.
    fn ramp_cc(&mut self, sample: Sample) -> Result<(), Error> {
        let iin = sample.iin_ua;
        let iin_cc = self.ctx.targets.input_current_cc_ua;
        let prev_iin = self.ctx.compensation.prev_input_current_ua.unwrap_or(0);
        let vstep = self.ctx.voltage_step();
        let cv_control = self.ctx.ta.control_mode == TaControl::ConstantVoltage;
        let ta = &mut self.ctx.ta;

        let mut step = StepKind::Voltage;
        if iin > iin_cc - IIN_ADC_OFFSET_UA {
            self.ctx.compensation.prev_input_current_ua = Some(iin);
            return self.enter_cc(sample.vbat_uv);
        } else if ta.voltage_at_max() {
            if ta.current_at_max() || cv_control {
                self.set_state(ChargingState::CcMode)?;
                self.scheduler.schedule(Action::CheckCcMode, CCMODE_CHECK_T);
                return Ok(());
            }
            step = StepKind::Current;
        } else if iin < iin_cc - TA_IIN_OFFSET_UA {
            ta.voltage_uv += TA_VOL_STEP_ADJ_CC_UV * self.ctx.charge_mode.multiplier();
        } else if cv_control
            || iin > prev_iin + IIN_ADC_OFFSET_UA
            || self.ctx.compensation.prev_step_kind == StepKind::Current
        {
            ta.voltage_uv += vstep;
        } else if ta.current_at_max() {
            self.ctx.compensation.prev_input_current_ua = Some(iin);
            return self.enter_cc(sample.vbat_uv);
        } else if ta.current_ua >= iin_cc + TA_IIN_OFFSET_UA {
            ta.voltage_uv += vstep;
        } else {
            step = StepKind::Current;
        }

        match step {
            StepKind::Current => ta.current_ua = (ta.current_ua + PD_MSG_TA_CUR_STEP_UA).min(ta.max_current_ua),
            _ => ta.voltage_uv = ta.voltage_uv.min(ta.max_voltage_uv),
        }
        self.ctx.compensation.prev_step_kind = step;
        self.ctx.compensation.prev_input_current_ua = Some(iin);
        self.negotiate();
        Ok(())
    }

    /// Ramp finished: fine-tune voltage in StartCc when the adapter limits
    /// current, otherwise go straight to CC polling.
    fn enter_cc(&mut self, vbat_uv: i32) -> Result<(), Error> {
        self.ctx.compensation.prev_step_kind = StepKind::None;
        if self.ctx.ta.control_mode == TaControl::CurrentLimit {
            self.set_cc_target(vbat_uv);
            self.set_state(ChargingState::StartCc)?;
            self.scheduler.schedule(Action::EnterCcMode, 0);
        } else {
            self.ctx.ta.target_voltage_uv = self.ctx.ta.voltage_uv;
            self.set_state(ChargingState::CcMode)?;
            self.scheduler.schedule(Action::CheckCcMode, CCMODE_CHECK_T);
        }
        Ok(())
    }

    /// Target voltage for StartCc: enough headroom for the battery to reach
    /// float voltage behind the converter.
    fn set_cc_target(&mut self, vbat_uv: i32) {
        let mode = self.ctx.mode();
        let target = self.ctx.ta.voltage_uv + (self.ctx.targets.float_voltage_uv - vbat_uv) * 2 * mode + 100_000;
        self.ctx.ta.target_voltage_uv = floor_to(target, PD_MSG_TA_VOL_STEP_UV).min(self.ctx.ta.max_voltage_uv);
        self.ctx.compensation.prev_step_kind = StepKind::None;
    }

    /// Step adapter voltage up to the CC target.
    pub(crate) fn start_cc(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::StartCc)?;
        if !self.guard()? {
            return Ok(());
        }
        let ta = &mut self.ctx.ta;
        ta.voltage_uv += TA_VOL_STEP_PRE_CC_UV * self.ctx.charge_mode.multiplier();
        if ta.voltage_uv >= ta.target_voltage_uv {
            ta.voltage_uv = ta.target_voltage_uv;
            self.set_state(ChargingState::CcMode)?;
        }
        self.negotiate();
        Ok(())
    }

    /// Steady-state constant current.
    pub(crate) fn cc_mode(&mut self) -> Result<(), Error> {
        if self.ctx.state == ChargingState::ChargingDone {
            return self.hold_done();
        }
        self.set_state(ChargingState::CcMode)?;
        if !self.guard()? || self.service_requests()? {
            return Ok(());
        }
        let sample = self.sample()?;
        let loop_status = self.loop_status(sample.vbat_uv)?;
        match self.compensator.step(&mut self.ctx, CompMode::Cc, sample, loop_status) {
            Adjustment::Negotiate => self.negotiate(),
            Adjustment::EnterCv => {
                self.set_state(ChargingState::StartCv)?;
                self.scheduler.schedule(Action::EnterCvMode, 0);
            }
            Adjustment::Hold(ms) => self.hold(Action::CheckCcMode, ms),
            Adjustment::Settled | Adjustment::Done => self.hold(Action::CheckCcMode, CCMODE_CHECK_T),
        }
        Ok(())
    }

    /// Pre-CV back-off.
    pub(crate) fn start_cv(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::StartCv)?;
        if !self.guard()? {
            return Ok(());
        }
        let sample = self.sample()?;
        let loop_status = self.loop_status(sample.vbat_uv)?;
        match self.compensator.pre_cv_step(&mut self.ctx, sample, loop_status) {
            Adjustment::Negotiate => self.negotiate(),
            Adjustment::Done => self.finish()?,
            _ => {
                self.set_state(ChargingState::CvMode)?;
                self.scheduler.schedule(Action::CheckCvMode, CVMODE_CHECK_T);
            }
        }
        Ok(())
    }

    /// Steady-state constant voltage.
    pub(crate) fn cv_mode(&mut self) -> Result<(), Error> {
        if self.ctx.state == ChargingState::ChargingDone {
            return self.hold_done();
        }
        self.set_state(ChargingState::CvMode)?;
        if !self.guard()? || self.service_requests()? {
            return Ok(());
        }
        let sample = self.sample()?;
        let loop_status = self.loop_status(sample.vbat_uv)?;
        match self.compensator.step(&mut self.ctx, CompMode::Cv, sample, loop_status) {
            Adjustment::Negotiate => self.negotiate(),
            Adjustment::Done => self.finish()?,
            Adjustment::Hold(ms) => self.hold(Action::CheckCvMode, ms),
            Adjustment::EnterCv | Adjustment::Settled => self.hold(Action::CheckCvMode, CVMODE_CHECK_T),
        }
        Ok(())
    }

    /// Enter ChargingDone. The state is held until the session is stopped.
    pub(crate) fn finish(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::info!("dc: charging done");
        self.ctx.done_count = 0;
        self.set_state(ChargingState::ChargingDone)?;
        self.hold(Action::CheckCvMode, CVMODE_CHECK_T);
        Ok(())
    }

    /// ChargingDone only keeps watching for faults.
    fn hold_done(&mut self) -> Result<(), Error> {
        if self.guard()? {
            self.hold(Action::CheckCvMode, CVMODE_CHECK_T);
        }
        Ok(())
    }

    /// CV-only loop for fixed-PDO sources.
    pub(crate) fn fpdo_cv_mode(&mut self) -> Result<(), Error> {
        if self.ctx.state == ChargingState::ChargingDone {
            return self.hold_done();
        }
        self.set_state(ChargingState::FpdoCvMode)?;
        if !self.guard()? {
            return Ok(());
        }
        // Fixed sources cannot follow a bypass topology.
        self.ctx.requested.dc_topology = None;
        if let Some(iin) = self.ctx.requested.input_current_ua.take() {
            self.ctx.targets.input_current_cc_ua = iin;
            self.ctx.targets.input_current_cfg_ua = iin;
            self.dev.set_input_current(iin, self.ctx.ta.adapter_type, &self.config)?;
            self.scheduler.schedule(Action::CheckFpdoCvMode, CVMODE_CHECK_FAST_T);
            return Ok(());
        }
        if let Some(vfloat) = self.ctx.requested.float_voltage_uv.take() {
            self.ctx.targets.float_voltage_uv = vfloat;
            self.dev.set_vfloat(vfloat)?;
            self.scheduler.schedule(Action::CheckFpdoCvMode, CVMODE_CHECK_FAST_T);
            return Ok(());
        }

        let sample = self.sample()?;
        match self.loop_status(sample.vbat_uv)? {
            LoopStatus::Inactive => {
                if sample.iin_ua < self.ctx.targets.input_topoff_ua {
                    self.ctx.done_count += 1;
                    #[cfg(feature = "defmt")]
                    defmt::debug!("dc: fpdo top-off {}/{}", self.ctx.done_count, FPDO_DONE_CNT);
                    if self.ctx.done_count >= FPDO_DONE_CNT {
                        return self.finish();
                    }
                } else {
                    self.ctx.done_count = 0;
                }
                self.scheduler.schedule(Action::CheckFpdoCvMode, FPDO_CVMODE_CHECK_T);
            }
            _ => self.scheduler.schedule(Action::CheckFpdoCvMode, CVMODE_CHECK_FAST_T),
        }
        Ok(())
    }

    /// Pass-through: only the input and charge current loops are defended.
    pub(crate) fn bypass_mode(&mut self) -> Result<(), Error> {
        self.set_state(ChargingState::BypassMode)?;
        if !self.guard()? || self.service_requests()? {
            return Ok(());
        }
        let sample = self.sample()?;
        let loop_status = self.loop_status(sample.vbat_uv)?;
        match self.compensator.step(&mut self.ctx, CompMode::Bypass, sample, loop_status) {
            Adjustment::Negotiate => self.negotiate(),
            Adjustment::Hold(ms) => self.hold(Action::CheckBypassMode, ms),
            _ => self.hold(Action::CheckBypassMode, crate::config::BYPMODE_CHECK_T),
        }
        Ok(())
    }
}
