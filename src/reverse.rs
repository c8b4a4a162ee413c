//! Reverse (OTG) operation: the IC boosts battery voltage back out to VIN.

use crate::config::{MAX_RETRIES, REVERSE_CHECK_T, REVERSE_WAIT_T};
use crate::context::{ChargerContext, ChargingState, ReverseMode};
use crate::controller::DirectCharger;
use crate::error::{Error, FaultOutcome, FaultReason};
use crate::io::{AdcChannel, AdcReader, PowerNegotiator, RegisterIo, SwitchingCharger};
use crate::registers::AdcMode;
use crate::scheduler::Action;

impl<R, A, N, S> DirectCharger<R, A, N, S>
where
    R: RegisterIo,
    A: AdcReader,
    N: PowerNegotiator,
    S: SwitchingCharger,
{
    /// Start reverse operation, or stop it with [`ReverseMode::Stopped`].
    ///
    /// Starting needs an idle controller.
    pub fn set_reverse_mode(&mut self, mode: ReverseMode) -> Result<(), Error> {
        if mode == ReverseMode::Stopped {
            return match self.ctx.state {
                ChargingState::ReverseMode => self.stop(),
                _ => Ok(()),
            };
        }
        match self.ctx.state {
            ChargingState::ReverseMode if self.ctx.reverse.mode == mode => return Ok(()),
            ChargingState::NoCharging => {}
            _ => return Err(Error::InvalidState),
        }

        #[cfg(feature = "defmt")]
        defmt::info!("reverse: start {}", mode);
        self.ctx = ChargerContext::new(&self.config, &self.user);
        self.ctx.reverse.mode = mode;
        self.health = FaultOutcome::Ok;
        self.set_state(ChargingState::ReverseMode)?;
        self.scheduler.schedule(Action::StartReverse, 0);
        Ok(())
    }

    pub(crate) fn start_reverse(&mut self) -> Result<(), Error> {
        self.dev.clear_interrupts()?;
        self.dev.set_adc_mode(AdcMode::ForceShutdown)?;
        self.dev.set_vin_ocp(self.ctx.reverse.ocp_current_ua)?;
        self.dev.set_reverse(true, self.ctx.reverse.mode, self.config.ntc_en)?;
        self.ctx.enabled = true;
        self.scheduler.schedule(Action::CheckReverseActive, REVERSE_WAIT_T);
        Ok(())
    }

    pub(crate) fn check_reverse_active(&mut self) -> Result<(), Error> {
        if self.check_reverse()? {
            self.scheduler.schedule(Action::CheckReverseMode, REVERSE_CHECK_T);
        }
        Ok(())
    }

    /// Periodic poll while the reverse path runs.
    pub(crate) fn reverse_mode(&mut self) -> Result<(), Error> {
        if !self.check_reverse()? {
            return Ok(());
        }
        let _vin = self.read_uv(AdcChannel::Vin)?;
        let _iin = self.read_ua(AdcChannel::Iin)?;
        let _vbat = self.read_uv(AdcChannel::Vbat)?;
        #[cfg(feature = "defmt")]
        defmt::info!("reverse: vin={}uV iin={}uA vbat={}uV", _vin, _iin, _vbat);
        self.scheduler.schedule(Action::CheckReverseMode, REVERSE_CHECK_T);
        Ok(())
    }

    /// `Ok(true)` when reverse operation is healthy. A retryable fault
    /// restarts the path while the retry budget lasts.
    fn check_reverse(&mut self) -> Result<bool, Error> {
        let status = self.dev.status()?;
        let outcome = self.classifier.classify_reverse(&status);
        match outcome {
            FaultOutcome::Ok | FaultOutcome::ChargingDone => {
                self.health = FaultOutcome::Ok;
                Ok(true)
            }
            FaultOutcome::Retryable(_reason) if self.ctx.retry_count < MAX_RETRIES => {
                self.ctx.retry_count += 1;
                #[cfg(feature = "defmt")]
                defmt::warn!("reverse: {} retry {}/{}", _reason, self.ctx.retry_count, MAX_RETRIES);
                self.health = outcome;
                self.dev.set_reverse(false, self.ctx.reverse.mode, false)?;
                self.ctx.enabled = false;
                self.dev.soft_reset()?;
                self.scheduler.schedule(Action::StartReverse, 0);
                Ok(false)
            }
            FaultOutcome::Retryable(_) => Err(Error::Fault(FaultReason::RetryExhausted)),
            FaultOutcome::Fatal(reason) => Err(Error::Fault(reason)),
        }
    }

    /// Turn the reverse path off and hand the ADC back to automatic mode.
    pub(crate) fn disable_reverse(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::info!("reverse: stop");
        self.dev.set_reverse(false, self.ctx.reverse.mode, false)?;
        self.ctx.enabled = false;
        self.dev.set_adc_mode(AdcMode::Auto)
    }
}
