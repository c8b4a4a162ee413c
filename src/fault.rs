//! Status-register fault classification.

use crate::config::DC_VBAT_MIN_UV;
use crate::error::{FaultOutcome, FaultReason};
use crate::registers::{Charging, Device0, Device1, Device2, PowerState, Sc0, Sc1, StatusSnapshot};

/// Where in the session the status is being checked.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultWindow {
    /// Confirming the device came up after a negotiation; transient trips are expected.
    Activation,
    /// Regular charging. `done_eligible` is set in StartCv/CvMode once the
    /// battery has passed float voltage.
    Running { done_eligible: bool },
}

/// Maps the latched status of the IC to a retry/abort decision.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FaultClassifier {
    /// NTC standby protection is administratively enabled.
    pub ntc_protection: bool,
}

impl FaultClassifier {
    pub fn new(ntc_protection: bool) -> Self {
        Self { ntc_protection }
    }

    /// Classify a forward-mode status snapshot together with the battery voltage.
    pub fn classify(&self, status: &StatusSnapshot, vbat_uv: i32, window: FaultWindow) -> FaultOutcome {
        if status.power_state() == PowerState::ForwardActive {
            return if vbat_uv <= DC_VBAT_MIN_UV {
                FaultOutcome::Fatal(FaultReason::VbatTooLow)
            } else if status.device2().contains(Device2::THEM_REG) {
                FaultOutcome::Fatal(FaultReason::ThermalRegulation)
            } else {
                FaultOutcome::Ok
            };
        }

        let activation = window == FaultWindow::Activation;
        let d0 = status.device0();
        let d1 = status.device1();

        if !d0.contains(Device0::VIN_VALID) {
            return match vin_reason(d0) {
                FaultReason::VinOvTracking => FaultOutcome::Retryable(FaultReason::VinOvTracking),
                reason => FaultOutcome::Fatal(reason),
            };
        }

        if d0.contains(Device0::RCP_DETECTED)
            || d1.intersects(Device1::SINK_RCP_ENABLED | Device1::SINK_RCP_TIMEOUT)
        {
            let reason = if d1.contains(Device1::SINK_RCP_TIMEOUT) {
                FaultReason::SinkRcpTimeout
            } else {
                FaultReason::ReverseCurrent
            };
            return match window {
                FaultWindow::Activation => FaultOutcome::Retryable(reason),
                FaultWindow::Running { done_eligible: true } => FaultOutcome::ChargingDone,
                FaultWindow::Running { done_eligible: false } => FaultOutcome::Fatal(reason),
            };
        }

        if d1.intersects(Device1::NTC_0_DETECTED | Device1::NTC_1_DETECTED) {
            return if self.ntc_protection {
                FaultOutcome::Fatal(FaultReason::ThermalNtc)
            } else {
                FaultOutcome::Retryable(FaultReason::ThermalNtc)
            };
        }

        if let Some(reason) = hard_fault(status) {
            return FaultOutcome::Fatal(reason);
        }

        if activation {
            FaultOutcome::Retryable(FaultReason::NotActive)
        } else {
            FaultOutcome::Fatal(FaultReason::NotActive)
        }
    }

    /// Classify a reverse-mode status snapshot.
    pub fn classify_reverse(&self, status: &StatusSnapshot) -> FaultOutcome {
        if status.power_state() == PowerState::ReverseActive {
            return if status.device2().contains(Device2::THEM_REG) {
                FaultOutcome::Fatal(FaultReason::ThermalRegulation)
            } else {
                FaultOutcome::Ok
            };
        }

        let d1 = status.device1();
        let d2 = status.device2();
        let sc0 = status.sc0();
        let sc1 = status.sc1();
        let reason = if status.device0().contains(Device0::VOUT_MAX_OV) {
            FaultReason::VoutMaxOv
        } else if d1.intersects(Device1::NTC_0_DETECTED | Device1::NTC_1_DETECTED) {
            if !self.ntc_protection {
                return FaultOutcome::Retryable(FaultReason::ThermalNtc);
            }
            FaultReason::ThermalNtc
        } else if d2.contains(Device2::VIN_OCP_12_11) {
            FaultReason::VinOcp
        } else if d2.contains(Device2::THSD) {
            FaultReason::ThermalShutdown
        } else if d2.contains(Device2::WATCHDOG_TIMER_OUT) {
            FaultReason::WatchdogTimeout
        } else if sc0.intersects(Sc0::PHASE_A_FAULT | Sc0::PHASE_B_FAULT) {
            FaultReason::PhaseFault
        } else if sc1.contains(Sc1::CBST_SHORT) {
            FaultReason::CbstShort
        } else if sc1.contains(Sc1::CFLY_SHORT) {
            FaultReason::CflyShort
        } else if sc1.contains(Sc1::VIN_SHORT) {
            FaultReason::VinShort
        } else if sc1.contains(Sc1::OVPOUT_SHORT) {
            FaultReason::OvpOutShort
        } else if sc1.contains(Sc1::SW_SHORT) {
            FaultReason::SwitchShort
        } else if sc1.contains(Sc1::REVERSE_SW_SS_OC) {
            FaultReason::ReverseSoftStartOc
        } else {
            return FaultOutcome::Retryable(FaultReason::NotActive);
        };
        FaultOutcome::Fatal(reason)
    }
}

/// Reason for an invalid input, highest priority first.
fn vin_reason(d0: Device0) -> FaultReason {
    if d0.contains(Device0::VOUT_MAX_OV) {
        FaultReason::VoutMaxOv
    } else if d0.contains(Device0::RCP_DETECTED) {
        FaultReason::ReverseCurrent
    } else if d0.contains(Device0::VIN_UNPLUG) {
        FaultReason::VinUnplug
    } else if d0.contains(Device0::VIN_OVP) {
        FaultReason::VinOvp
    } else if d0.contains(Device0::VIN_OV_TRACKING) {
        FaultReason::VinOvTracking
    } else if d0.contains(Device0::VIN_UV_TRACKING) {
        FaultReason::VinUvTracking
    } else {
        FaultReason::VinInvalid
    }
}

fn hard_fault(status: &StatusSnapshot) -> Option<FaultReason> {
    let d1 = status.device1();
    let d2 = status.device2();
    let chg = status.charging();
    let sc0 = status.sc0();
    let sc1 = status.sc1();
    let table = [
        (d1.contains(Device1::VIN_OCP_21_11), FaultReason::VinOcp),
        (d2.contains(Device2::THEM_REG), FaultReason::ThermalRegulation),
        (d2.contains(Device2::THSD), FaultReason::ThermalShutdown),
        (d2.contains(Device2::WATCHDOG_TIMER_OUT), FaultReason::WatchdogTimeout),
        (chg.contains(Charging::SAFETY_TIMER), FaultReason::SafetyTimeout),
        (chg.contains(Charging::VBAT_OVP), FaultReason::VbatOvp),
        (sc0.intersects(Sc0::PHASE_A_FAULT | Sc0::PHASE_B_FAULT), FaultReason::PhaseFault),
        (sc1.contains(Sc1::CBST_SHORT), FaultReason::CbstShort),
        (sc1.contains(Sc1::CFLY_SHORT), FaultReason::CflyShort),
        (sc1.contains(Sc1::VIN_SHORT), FaultReason::VinShort),
        (sc1.contains(Sc1::OVPOUT_SHORT), FaultReason::OvpOutShort),
        (sc1.contains(Sc1::OVPOUT_ERRLO), FaultReason::OvpOutErrLo),
        (sc1.contains(Sc1::SW_SHORT), FaultReason::SwitchShort),
    ];
    table.iter().find(|(hit, _)| *hit).map(|(_, reason)| *reason)
}
