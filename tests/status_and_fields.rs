use pca9482::error::{FaultOutcome, FaultReason};
use pca9482::fault::{FaultClassifier, FaultWindow};
use pca9482::registers::{Charging, Device0, Device1, Device2, Sc1, StatusSnapshot};

const VBAT: i32 = 4_000_000;
const RUNNING: FaultWindow = FaultWindow::Running { done_eligible: false };

fn status(d0: Device0, d1: Device1, d2: Device2, d3: u8, chg: Charging, sc1: Sc1) -> StatusSnapshot {
    StatusSnapshot::from_bytes([d0.bits(), d1.bits(), d2.bits(), d3, chg.bits(), 0, sc1.bits()])
}

fn standby(d0: Device0, d1: Device1) -> StatusSnapshot {
    status(d0, d1, Device2::empty(), 0x40, Charging::empty(), Sc1::empty())
}

#[test]
fn forward_active_is_ok_unless_battery_or_thermal() {
    let c = FaultClassifier::new(true);
    let active = status(Device0::VIN_VALID, Device1::empty(), Device2::empty(), 0x80, Charging::empty(), Sc1::empty());
    assert_eq!(c.classify(&active, VBAT, RUNNING), FaultOutcome::Ok);
    assert_eq!(
        c.classify(&active, 3_000_000, RUNNING),
        FaultOutcome::Fatal(FaultReason::VbatTooLow)
    );

    let hot = status(Device0::VIN_VALID, Device1::empty(), Device2::THEM_REG, 0x80, Charging::empty(), Sc1::empty());
    assert_eq!(
        c.classify(&hot, VBAT, RUNNING),
        FaultOutcome::Fatal(FaultReason::ThermalRegulation)
    );
}

#[test]
fn invalid_input_reports_highest_priority_reason() {
    let c = FaultClassifier::new(false);
    let s = standby(Device0::VIN_UNPLUG | Device0::VIN_UV_TRACKING, Device1::empty());
    assert_eq!(c.classify(&s, VBAT, RUNNING), FaultOutcome::Fatal(FaultReason::VinUnplug));

    let s = standby(Device0::empty(), Device1::empty());
    assert_eq!(c.classify(&s, VBAT, RUNNING), FaultOutcome::Fatal(FaultReason::VinInvalid));

    let s = standby(Device0::VIN_OV_TRACKING, Device1::empty());
    assert_eq!(
        c.classify(&s, VBAT, FaultWindow::Activation),
        FaultOutcome::Retryable(FaultReason::VinOvTracking)
    );
}

#[test]
fn reverse_current_depends_on_window() {
    let c = FaultClassifier::new(false);
    let s = standby(Device0::VIN_VALID | Device0::RCP_DETECTED, Device1::empty());
    assert_eq!(
        c.classify(&s, VBAT, FaultWindow::Activation),
        FaultOutcome::Retryable(FaultReason::ReverseCurrent)
    );
    assert_eq!(
        c.classify(&s, VBAT, FaultWindow::Running { done_eligible: true }),
        FaultOutcome::ChargingDone
    );
    assert_eq!(
        c.classify(&s, VBAT, RUNNING),
        FaultOutcome::Fatal(FaultReason::ReverseCurrent)
    );

    let s = standby(Device0::VIN_VALID, Device1::SINK_RCP_TIMEOUT);
    assert_eq!(
        c.classify(&s, VBAT, RUNNING),
        FaultOutcome::Fatal(FaultReason::SinkRcpTimeout)
    );
}

#[test]
fn ntc_trip_follows_protection_setting() {
    let s = standby(Device0::VIN_VALID, Device1::NTC_1_DETECTED);
    assert_eq!(
        FaultClassifier::new(true).classify(&s, VBAT, RUNNING),
        FaultOutcome::Fatal(FaultReason::ThermalNtc)
    );
    assert_eq!(
        FaultClassifier::new(false).classify(&s, VBAT, RUNNING),
        FaultOutcome::Retryable(FaultReason::ThermalNtc)
    );
}

#[test]
fn hard_faults_are_fatal() {
    let c = FaultClassifier::new(false);
    let timer = status(Device0::VIN_VALID, Device1::empty(), Device2::empty(), 0x40, Charging::SAFETY_TIMER, Sc1::empty());
    assert_eq!(c.classify(&timer, VBAT, RUNNING), FaultOutcome::Fatal(FaultReason::SafetyTimeout));

    let cfly = status(Device0::VIN_VALID, Device1::empty(), Device2::empty(), 0x40, Charging::empty(), Sc1::CFLY_SHORT);
    assert_eq!(c.classify(&cfly, VBAT, FaultWindow::Activation), FaultOutcome::Fatal(FaultReason::CflyShort));

    let wdt = status(Device0::VIN_VALID, Device1::empty(), Device2::WATCHDOG_TIMER_OUT, 0x40, Charging::empty(), Sc1::empty());
    assert_eq!(c.classify(&wdt, VBAT, RUNNING), FaultOutcome::Fatal(FaultReason::WatchdogTimeout));
}

#[test]
fn inactive_without_reason_retries_only_on_activation() {
    let c = FaultClassifier::new(false);
    let s = standby(Device0::VIN_VALID, Device1::empty());
    assert_eq!(
        c.classify(&s, VBAT, FaultWindow::Activation),
        FaultOutcome::Retryable(FaultReason::NotActive)
    );
    assert_eq!(c.classify(&s, VBAT, RUNNING), FaultOutcome::Fatal(FaultReason::NotActive));
}

#[test]
fn reverse_classification() {
    let c = FaultClassifier::new(false);
    let active = status(Device0::empty(), Device1::empty(), Device2::empty(), 0xC0, Charging::empty(), Sc1::empty());
    assert_eq!(c.classify_reverse(&active), FaultOutcome::Ok);

    let ocp = status(Device0::empty(), Device1::empty(), Device2::VIN_OCP_12_11, 0x40, Charging::empty(), Sc1::empty());
    assert_eq!(c.classify_reverse(&ocp), FaultOutcome::Fatal(FaultReason::VinOcp));

    let ss = status(Device0::empty(), Device1::empty(), Device2::empty(), 0x40, Charging::empty(), Sc1::REVERSE_SW_SS_OC);
    assert_eq!(c.classify_reverse(&ss), FaultOutcome::Fatal(FaultReason::ReverseSoftStartOc));

    let idle = status(Device0::empty(), Device1::empty(), Device2::empty(), 0x40, Charging::empty(), Sc1::empty());
    assert_eq!(c.classify_reverse(&idle), FaultOutcome::Retryable(FaultReason::NotActive));
}
