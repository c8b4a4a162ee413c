//! Direct-charging controller.
//!
//! [`DirectCharger`] owns the register driver, the collaborators and the
//! session context. All work happens inside [`DirectCharger::tick`] (or
//! [`DirectCharger::poll`]), which runs the single pending [`Action`]. The
//! state handlers live in `control_loop.rs`, request servicing in
//! `requests.rs` and the reverse path in `reverse.rs`.

use crate::compensator::{Compensator, LoopStatus, Sample};
use crate::config::{Config, IIN_LOOP_CONFIRM_READS, MAX_RETRIES, PDMSG_WAIT_T, PPS_PERIODIC_T};
use crate::context::{AdapterType, ChargerContext, ChargingState, DcTopology, TaControl, UserTargets};
use crate::driver::Pca9482;
use crate::error::{Error, FaultOutcome, FaultReason, NegotiateError, PresetError};
use crate::fault::{FaultClassifier, FaultWindow};
use crate::io::{AdcChannel, AdcReader, PowerNegotiator, RegisterIo, SwitchingCharger};
use crate::preset::{strategy_for, PresetEngine};
use crate::registers::Charging;
use crate::scheduler::{Action, Scheduler};

/// PCA9482 direct-charging controller.
pub struct DirectCharger<R, A, N, S> {
    pub(crate) dev: Pca9482<R>,
    pub(crate) adc: A,
    pub(crate) negotiator: N,
    pub(crate) swchg: S,
    pub(crate) config: Config,
    pub(crate) user: UserTargets,
    pub(crate) ctx: ChargerContext,
    pub(crate) scheduler: Scheduler,
    pub(crate) preset_engine: PresetEngine,
    pub(crate) compensator: Compensator,
    pub(crate) classifier: FaultClassifier,
    pub(crate) health: FaultOutcome,
}

impl<R, A, N, S> DirectCharger<R, A, N, S> {
    pub fn get_status(&self) -> ChargingState {
        self.ctx.state
    }

    /// Last fault outcome. `Fatal` stays until the next session is enabled.
    pub fn get_health(&self) -> FaultOutcome {
        self.health
    }

    pub fn context(&self) -> &ChargerContext {
        &self.ctx
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Next action and the milliseconds left until it is due.
    pub fn pending(&self) -> Option<(Action, u32)> {
        self.scheduler.pending()
    }

    /// Controller clock in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.scheduler.now_ms()
    }

    pub fn device(&self) -> &Pca9482<R> {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut Pca9482<R> {
        &mut self.dev
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }

    pub fn negotiator(&self) -> &N {
        &self.negotiator
    }

    pub fn negotiator_mut(&mut self) -> &mut N {
        &mut self.negotiator
    }

    pub fn switching_charger_mut(&mut self) -> &mut S {
        &mut self.swchg
    }

    /// Release the collaborators.
    pub fn free(self) -> (R, A, N, S) {
        (self.dev.free(), self.adc, self.negotiator, self.swchg)
    }
}

impl<R, A, N, S> DirectCharger<R, A, N, S>
where
    R: RegisterIo,
    A: AdcReader,
    N: PowerNegotiator,
    S: SwitchingCharger,
{
    pub fn new(io: R, adc: A, negotiator: N, swchg: S, config: Config) -> Result<Self, Error> {
        config.validate()?;
        let user = UserTargets::from_config(&config);
        Ok(Self {
            dev: Pca9482::new(io),
            adc,
            negotiator,
            swchg,
            ctx: ChargerContext::new(&config, &user),
            scheduler: Scheduler::new(),
            preset_engine: PresetEngine::new(&config),
            compensator: Compensator::new(config.max_vfloat_uv),
            classifier: FaultClassifier::new(config.ntc_en),
            health: FaultOutcome::Ok,
            user,
            config,
        })
    }

    /// Start or stop direct charging.
    ///
    /// Stopping is observed by the next tick, which is made due immediately;
    /// a negotiation resume that is already armed never continues.
    pub fn enable(&mut self, enable: bool) -> Result<(), Error> {
        if !enable {
            self.ctx.enabled_request = false;
            if self.ctx.state.is_charging() {
                if self.scheduler.pending().is_some() {
                    self.scheduler.expedite();
                } else {
                    self.stop()?;
                }
            }
            return Ok(());
        }

        match self.ctx.state {
            ChargingState::NoCharging => {}
            ChargingState::ReverseMode => return Err(Error::InvalidState),
            _ => {
                self.ctx.enabled_request = true;
                return Ok(());
            }
        }
        #[cfg(feature = "defmt")]
        defmt::info!("dc: enable");
        self.ctx = ChargerContext::new(&self.config, &self.user);
        self.ctx.enabled_request = true;
        self.health = FaultOutcome::Ok;
        self.set_state(ChargingState::CheckVbat)?;
        self.scheduler.schedule(Action::VbatMinCheck, 0);
        Ok(())
    }

    /// New input current target. Applied at once when idle, otherwise
    /// serviced by the next steady-state step.
    pub fn set_input_current_limit(&mut self, ua: i32) -> Result<(), Error> {
        if ua <= 0 {
            return Err(Error::OutOfRange);
        }
        self.user.input_current_ua = ua;
        if self.session_preset() {
            self.ctx.requested.input_current_ua = Some(ua);
        } else {
            self.ctx.targets.input_current_cc_ua = ua;
            self.ctx.targets.input_current_cfg_ua = ua;
        }
        Ok(())
    }

    /// New float voltage target, at most the configured ceiling.
    pub fn set_float_voltage(&mut self, uv: i32) -> Result<(), Error> {
        if uv <= 0 || uv > self.config.max_vfloat_uv {
            return Err(Error::OutOfRange);
        }
        self.user.float_voltage_uv = uv;
        if self.session_preset() {
            self.ctx.requested.float_voltage_uv = Some(uv);
        } else {
            self.ctx.targets.float_voltage_uv = uv;
        }
        Ok(())
    }

    /// Switch between normal conversion and a bypass topology. Only valid
    /// while a session runs.
    pub fn set_dc_topology(&mut self, topology: DcTopology) -> Result<(), Error> {
        if !self.ctx.state.is_charging() {
            return Err(Error::InvalidState);
        }
        if topology.is_bypass() && self.ctx.ta.adapter_type != AdapterType::UsbPdApdo {
            return Err(Error::InvalidState);
        }
        self.ctx.requested.dc_topology = if topology == self.ctx.dc_topology {
            None
        } else {
            Some(topology)
        };
        Ok(())
    }

    /// Fire the pending action now.
    pub fn tick(&mut self) -> Result<(), Error> {
        match self.scheduler.fire() {
            Some(action) => self.run(action),
            None => Ok(()),
        }
    }

    /// Advance the clock by `elapsed_ms` and fire the pending action if it is due.
    pub fn poll(&mut self, elapsed_ms: u32) -> Result<(), Error> {
        match self.scheduler.advance(elapsed_ms) {
            Some(action) => self.run(action),
            None => Ok(()),
        }
    }

    fn run(&mut self, action: Action) -> Result<(), Error> {
        if !self.ctx.enabled_request && self.ctx.state.is_charging() {
            #[cfg(feature = "defmt")]
            defmt::info!("dc: disabled, dropping {}", action);
            return self.stop();
        }

        #[cfg(feature = "defmt")]
        defmt::trace!("dc: {} in {}", action, self.ctx.state);
        let res = match action {
            Action::VbatMinCheck => self.check_vbatmin(),
            Action::PresetDc => self.preset_dc(),
            Action::PresetConfig => self.preset_config(),
            Action::CheckActive => self.check_active(),
            Action::AdjustCcMode => self.adjust_cc(),
            Action::EnterCcMode => self.start_cc(),
            Action::CheckCcMode => self.cc_mode(),
            Action::EnterCvMode => self.start_cv(),
            Action::CheckCvMode => self.cv_mode(),
            Action::CheckFpdoCvMode => self.fpdo_cv_mode(),
            Action::PdMsgSend => self.pd_msg_send(),
            Action::AdjustTaVol => self.adjust_ta_voltage(),
            Action::AdjustTaCur => self.adjust_ta_current(),
            Action::CheckBypassMode => self.bypass_mode(),
            Action::DcModeChange => self.dc_mode_change(),
            Action::StartReverse => self.start_reverse(),
            Action::CheckReverseActive => self.check_reverse_active(),
            Action::CheckReverseMode => self.reverse_mode(),
        };

        if let Err(e) = res {
            #[cfg(feature = "defmt")]
            defmt::error!("dc: {} failed in {}: {}", action, self.ctx.state, e);
            self.health = FaultOutcome::Fatal(e.reason());
            if let Err(_stop) = self.stop() {
                #[cfg(feature = "defmt")]
                defmt::error!("dc: stop sequence failed: {}", _stop);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop sequence: cancel the pending action, disable the IC, soft-reset it,
    /// give the switching charger its input limit back and reset the session.
    ///
    /// Safe from any state. A second call finds nothing to do.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.scheduler.cancel();
        if self.ctx.state == ChargingState::NoCharging && !self.ctx.enabled {
            return Ok(());
        }
        #[cfg(feature = "defmt")]
        defmt::info!("dc: stop from {}", self.ctx.state);

        let hw = if self.ctx.state == ChargingState::ReverseMode {
            self.disable_reverse()
        } else {
            self.disable_forward()
        };
        let swchg = self
            .swchg
            .set_input_current_limit(self.config.swchg_icl_normal_ua)
            .map_err(|_e| {
                #[cfg(feature = "defmt")]
                defmt::error!("dc: switching charger: {}", defmt::Debug2Format(&_e));
                Error::Bus
            });

        self.ctx = ChargerContext::new(&self.config, &self.user);
        hw.and(swchg)
    }

    fn disable_forward(&mut self) -> Result<(), Error> {
        self.dev.set_charging(false, self.ctx.dc_topology, false)?;
        self.ctx.enabled = false;
        self.dev.soft_reset()
    }

    /// Requests go to the loop once the session has a preset; before that
    /// they only change the targets the preset starts from.
    fn session_preset(&self) -> bool {
        !matches!(
            self.ctx.state,
            ChargingState::NoCharging | ChargingState::CheckVbat | ChargingState::ReverseMode
        )
    }

    pub(crate) fn set_state(&mut self, next: ChargingState) -> Result<(), Error> {
        let cur = self.ctx.state;
        if !cur.can_transition_to(next) {
            #[cfg(feature = "defmt")]
            defmt::error!("dc: illegal transition {} -> {}", cur, next);
            return Err(Error::InvalidState);
        }
        if cur != next {
            #[cfg(feature = "defmt")]
            defmt::info!("dc: {} -> {}", cur, next);
        }
        self.ctx.state = next;
        Ok(())
    }

    /// Send the current adapter request next.
    pub(crate) fn negotiate(&mut self) {
        self.scheduler.schedule(Action::PdMsgSend, 0);
    }

    /// Arm a steady-state poll. An APDO source whose request is about to go
    /// stale gets it refreshed instead.
    pub(crate) fn hold(&mut self, action: Action, delay_ms: u32) {
        match self.pps_refresh_in() {
            Some(0) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("dc: PPS keep-alive");
                self.negotiate();
            }
            Some(left) => self.scheduler.schedule(action, delay_ms.min(left)),
            None => self.scheduler.schedule(action, delay_ms),
        }
    }

    /// Milliseconds until the APDO request must be refreshed.
    fn pps_refresh_in(&self) -> Option<u32> {
        if self.ctx.ta.adapter_type != AdapterType::UsbPdApdo {
            return None;
        }
        let last = self.ctx.last_apdo_request_ms?;
        let elapsed = self.scheduler.now_ms().saturating_sub(last);
        Some(PPS_PERIODIC_T.saturating_sub(elapsed) as u32)
    }

    pub(crate) fn read_uv(&mut self, channel: AdcChannel) -> Result<i32, Error> {
        let value = self.adc.sample(channel).map_err(|_e| {
            #[cfg(feature = "defmt")]
            defmt::error!("adc {}: {}", channel, defmt::Debug2Format(&_e));
            Error::Adc
        })?;
        value.microvolts().ok_or(Error::Adc)
    }

    pub(crate) fn read_ua(&mut self, channel: AdcChannel) -> Result<i32, Error> {
        let value = self.adc.sample(channel).map_err(|_e| {
            #[cfg(feature = "defmt")]
            defmt::error!("adc {}: {}", channel, defmt::Debug2Format(&_e));
            Error::Adc
        })?;
        value.microamps().ok_or(Error::Adc)
    }

    pub(crate) fn sample(&mut self) -> Result<Sample, Error> {
        Ok(Sample {
            iin_ua: self.read_ua(AdcChannel::Iin)?,
            ichg_ua: self.read_ua(AdcChannel::Ibat)?,
            vbat_uv: self.read_uv(AdcChannel::Vbat)?,
        })
    }

    pub(crate) fn swchg_enabled(&mut self) -> Result<bool, Error> {
        self.swchg.is_enabled().map_err(|_e| {
            #[cfg(feature = "defmt")]
            defmt::error!("dc: switching charger: {}", defmt::Debug2Format(&_e));
            Error::Bus
        })
    }

    pub(crate) fn swchg_disable(&mut self) -> Result<(), Error> {
        self.swchg.set_enabled(false).map_err(|_e| {
            #[cfg(feature = "defmt")]
            defmt::error!("dc: switching charger: {}", defmt::Debug2Format(&_e));
            Error::Bus
        })
    }

    /// Read the status registers and battery voltage and classify them.
    pub(crate) fn check_error(&mut self, window: FaultWindow) -> Result<FaultOutcome, Error> {
        let status = self.dev.status()?;
        let vbat = self.read_uv(AdcChannel::Vbat)?;
        let outcome = self.classifier.classify(&status, vbat, window);
        self.ctx.prev_vbat_uv = vbat;
        if outcome != FaultOutcome::Ok {
            #[cfg(feature = "defmt")]
            defmt::warn!("dc: {} in {} status={}", outcome, self.ctx.state, status);
        }
        Ok(outcome)
    }

    /// Fault check at the top of a running step. `Ok(true)` lets the step
    /// continue; `Ok(false)` means a retry or completion was already armed.
    pub(crate) fn guard(&mut self) -> Result<bool, Error> {
        let done_eligible = matches!(
            self.ctx.state,
            ChargingState::StartCv | ChargingState::CvMode | ChargingState::ChargingDone
        ) && self.ctx.prev_vbat_uv > self.ctx.targets.float_voltage_uv;

        match self.check_error(FaultWindow::Running { done_eligible })? {
            FaultOutcome::Ok => Ok(true),
            FaultOutcome::Retryable(reason) => {
                self.recover(reason)?;
                Ok(false)
            }
            FaultOutcome::Fatal(reason) => Err(Error::Fault(reason)),
            FaultOutcome::ChargingDone => {
                self.finish()?;
                Ok(false)
            }
        }
    }

    /// Retry path: disable, soft-reset and re-enter the preset, at most
    /// `MAX_RETRIES` times per session.
    pub(crate) fn recover(&mut self, reason: FaultReason) -> Result<(), Error> {
        if self.ctx.retry_count >= MAX_RETRIES {
            #[cfg(feature = "defmt")]
            defmt::error!("dc: retries exhausted, last {}", reason);
            return Err(Error::Fault(FaultReason::RetryExhausted));
        }
        self.ctx.retry_count += 1;
        #[cfg(feature = "defmt")]
        defmt::warn!("dc: retry {}/{} after {}", self.ctx.retry_count, MAX_RETRIES, reason);

        if self.ctx.state == ChargingState::CcMode
            && self.ctx.ta.adapter_type == AdapterType::UsbPdApdo
            && self.ctx.ta.control_mode == TaControl::CurrentLimit
        {
            #[cfg(feature = "defmt")]
            defmt::warn!("dc: falling back to constant-voltage adapter control");
            self.ctx.ta.control_mode = TaControl::ConstantVoltage;
        }

        self.dev.set_charging(false, self.ctx.dc_topology, false)?;
        self.ctx.enabled = false;
        self.dev.soft_reset()?;
        self.ctx.dc_topology = DcTopology::Normal;
        self.health = FaultOutcome::Retryable(reason);
        self.set_state(ChargingState::PresetDc)?;
        self.scheduler.schedule(Action::PresetDc, 0);
        Ok(())
    }

    /// Which regulation loop is active.
    ///
    /// An input-current reading must survive `IIN_LOOP_CONFIRM_READS` re-reads.
    /// With fuel-gauge float tracking, a battery above float counts as the
    /// float-voltage loop.
    pub(crate) fn loop_status(&mut self, vbat_uv: i32) -> Result<LoopStatus, Error> {
        if self.config.fg_vfloat && vbat_uv > self.ctx.targets.float_voltage_uv {
            return Ok(LoopStatus::FloatVoltage);
        }
        let chg = self.dev.charging_status()?;
        let status = if chg.contains(Charging::VBAT_REG_LOOP) {
            LoopStatus::FloatVoltage
        } else if chg.contains(Charging::I_VIN_CC_LOOP) {
            let mut confirmed = true;
            for _ in 0..IIN_LOOP_CONFIRM_READS {
                if !self.dev.charging_status()?.contains(Charging::I_VIN_CC_LOOP) {
                    confirmed = false;
                    break;
                }
            }
            if confirmed {
                LoopStatus::InputCurrent
            } else {
                LoopStatus::Inactive
            }
        } else if chg.contains(Charging::I_VBAT_CC_LOOP) {
            LoopStatus::ChargeCurrent
        } else {
            LoopStatus::Inactive
        };
        Ok(status)
    }

    /// Frequency for the session's input current target.
    pub(crate) fn select_frequency(&self) -> u32 {
        if self.ctx.ta.adapter_type == AdapterType::UsbPdFixedPdo {
            self.config.fsw_cfg_fpdo_khz
        } else if self.ctx.targets.input_current_cc_ua > self.config.iin_low_freq_ua {
            self.config.fsw_cfg_khz
        } else {
            self.config.fsw_cfg_low_khz
        }
    }

    /// Send the adapter request, then resume the state's own action after the
    /// message turnaround.
    pub(crate) fn pd_msg_send(&mut self) -> Result<(), Error> {
        let strategy = strategy_for(self.ctx.ta.adapter_type).ok_or(Error::Preset(PresetError::NoCapableSource))?;
        let min = self.ctx.min_ta_voltage_uv();
        self.ctx.ta.clamp(min);

        let mut res = strategy.request(&mut self.negotiator, &mut self.ctx.ta);
        if res == Err(NegotiateError::Busy) {
            #[cfg(feature = "defmt")]
            defmt::debug!("dc: negotiator busy, retrying");
            res = strategy.request(&mut self.negotiator, &mut self.ctx.ta);
        }
        match res {
            Ok(()) => {}
            Err(NegotiateError::Offline) => return Err(Error::Negotiation(NegotiateError::Offline)),
            Err(_e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("dc: request failed: {}", _e);
                return self.recover(FaultReason::Negotiation);
            }
        }
        #[cfg(feature = "defmt")]
        defmt::info!(
            "dc: requested {}uV/{}uA (obj {}) in {}",
            self.ctx.ta.voltage_uv,
            self.ctx.ta.current_ua,
            self.ctx.ta.object_index,
            self.ctx.state
        );
        if self.ctx.ta.adapter_type == AdapterType::UsbPdApdo {
            self.ctx.last_apdo_request_ms = Some(self.scheduler.now_ms());
        }

        let resume = match self.ctx.state {
            ChargingState::PresetDc => Action::PresetConfig,
            ChargingState::AdjustCc => Action::AdjustCcMode,
            ChargingState::StartCc => Action::EnterCcMode,
            ChargingState::CcMode => Action::CheckCcMode,
            ChargingState::StartCv => Action::EnterCvMode,
            ChargingState::CvMode | ChargingState::ChargingDone => Action::CheckCvMode,
            ChargingState::AdjustTaVol => Action::AdjustTaVol,
            ChargingState::AdjustTaCur => Action::AdjustTaCur,
            ChargingState::BypassMode => Action::CheckBypassMode,
            ChargingState::DcModeChange => Action::DcModeChange,
            _ => return Err(Error::InvalidState),
        };
        self.scheduler.schedule(resume, PDMSG_WAIT_T);
        Ok(())
    }
}
