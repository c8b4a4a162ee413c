use pca9482::compensator::{Adjustment, CompMode, Compensator, LoopStatus, Sample};
use pca9482::context::{
    AdapterType, ChargeMode, ChargerContext, ChargingState, StepKind, TaControl, TaParams, UserTargets,
};
use pca9482::config::{IIN_ADC_OFFSET_UA, IIN_CC_COMP_OFFSET_UA, TA_CUR_LOW_OFFSET_UA, TA_MIN_CUR_UA};
use pca9482::preset::power_limited_voltage;
use pca9482::Config;

fn context(mode: ChargeMode, iin_cc: i32, ta: TaParams) -> ChargerContext {
    let config = Config::default();
    let mut ctx = ChargerContext::new(&config, &UserTargets::from_config(&config));
    ctx.state = ChargingState::CcMode;
    ctx.charge_mode = mode;
    ctx.targets.input_current_cc_ua = iin_cc;
    ctx.targets.input_current_cfg_ua = iin_cc;
    ctx.ta = ta;
    ctx
}

fn apdo(voltage_uv: i32, current_ua: i32, max_voltage_uv: i32) -> TaParams {
    TaParams {
        voltage_uv,
        current_ua,
        target_voltage_uv: max_voltage_uv,
        max_voltage_uv,
        max_current_ua: 3_000_000,
        max_power_uw: 60_000_000,
        object_index: 4,
        adapter_type: AdapterType::UsbPdApdo,
        control_mode: TaControl::CurrentLimit,
    }
}

fn sample(iin_ua: i32) -> Sample {
    Sample {
        iin_ua,
        ichg_ua: 2 * iin_ua,
        vbat_uv: 4_000_000,
    }
}

fn comp() -> Compensator {
    Compensator::new(Config::default().max_vfloat_uv)
}

#[test]
fn overshoot_in_voltage_limit_trims_voltage() {
    // 4:1, target 3 A, adapter at target / ratio.
    let mut ctx = context(ChargeMode::FourToOne, 3_000_000, apdo(18_000_000, 1_500_000, 20_400_000));
    let adj = comp().step(&mut ctx, CompMode::Cc, sample(3_150_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.ta.voltage_uv, 18_000_000 - 40_000);
    assert_eq!(ctx.ta.current_ua, 1_500_000);
}

#[test]
fn overshoot_in_current_limit_trims_current() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(9_000_000, 2_500_000, 10_200_000));
    let adj = comp().step(&mut ctx, CompMode::Cc, sample(2_600_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.ta.voltage_uv, 9_000_000);
    assert_eq!(ctx.ta.current_ua, 2_450_000);
}

#[test]
fn in_band_holds() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(9_000_000, 2_500_000, 10_200_000));
    let adj = comp().step(&mut ctx, CompMode::Cc, sample(2_480_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Hold(2_000));
    assert_eq!(ctx.ta.voltage_uv, 9_000_000);
    assert_eq!(ctx.compensation.prev_input_current_ua, Some(2_480_000));
}

#[test]
fn stalled_voltage_step_switches_to_current() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(9_000_000, 2_000_000, 10_200_000));
    ctx.compensation.prev_input_current_ua = Some(2_000_000);
    ctx.compensation.prev_step_kind = StepKind::Voltage;

    let adj = comp().step(&mut ctx, CompMode::Cc, sample(2_000_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.ta.current_ua, 2_050_000);
    assert_eq!(ctx.ta.voltage_uv, 9_000_000);
    assert_eq!(ctx.compensation.prev_step_kind, StepKind::Current);

    // The current step did not move the input either: back to voltage.
    let adj = comp().step(&mut ctx, CompMode::Cc, sample(2_000_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.ta.voltage_uv, 9_020_000);
    assert_eq!(ctx.compensation.prev_step_kind, StepKind::Voltage);
}

#[test]
fn rising_input_keeps_stepping_voltage() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(9_000_000, 2_000_000, 10_200_000));
    ctx.compensation.prev_input_current_ua = Some(1_800_000);
    ctx.compensation.prev_step_kind = StepKind::Voltage;
    comp().step(&mut ctx, CompMode::Cc, sample(2_000_000), LoopStatus::Inactive);
    assert_eq!(ctx.ta.voltage_uv, 9_020_000);
    assert_eq!(ctx.ta.current_ua, 2_000_000);
}

#[test]
fn power_limited_source_lowers_target_and_raises_voltage() {
    let mut ta = apdo(9_000_000, 1_050_000, 9_000_000);
    ta.max_power_uw = 10_000_000;
    let mut ctx = context(ChargeMode::TwoToOne, 1_050_000, ta);

    let adj = comp().step(&mut ctx, CompMode::Cc, sample(500_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.targets.input_current_cc_ua, 1_000_000);
    // 10 W at 1 A.
    assert_eq!(ctx.ta.max_voltage_uv, 10_000_000);
    assert_eq!(ctx.ta.voltage_uv, 9_040_000);
}

#[test]
fn power_limited_target_never_drops_below_adapter_floor() {
    let mut ta = apdo(9_000_000, 1_050_000, 9_000_000);
    ta.max_power_uw = 9_000_000;
    let mut ctx = context(ChargeMode::TwoToOne, 1_000_000, ta);

    let adj = comp().step(&mut ctx, CompMode::Cc, sample(500_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Hold(2_000));
    assert_eq!(ctx.targets.input_current_cc_ua, 1_000_000);
    assert_eq!(ctx.ta.max_voltage_uv, 9_000_000);
}

#[test]
fn active_input_loop_backs_off_current_first() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(9_000_000, 2_500_000, 10_200_000));
    let adj = comp().step(&mut ctx, CompMode::Cc, sample(2_500_000), LoopStatus::InputCurrent);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.ta.current_ua, 2_450_000);

    ctx.ta.control_mode = TaControl::ConstantVoltage;
    comp().step(&mut ctx, CompMode::Cc, sample(2_500_000), LoopStatus::ChargeCurrent);
    assert_eq!(ctx.ta.current_ua, 2_450_000);
    assert_eq!(ctx.ta.voltage_uv, 8_980_000);
}

#[test]
fn float_loop_moves_cc_to_cv() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(9_000_000, 2_500_000, 10_200_000));
    let adj = comp().step(&mut ctx, CompMode::Cc, sample(2_500_000), LoopStatus::FloatVoltage);
    assert_eq!(adj, Adjustment::EnterCv);
}

#[test]
fn cv_completes_below_topoff() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(9_000_000, 2_500_000, 10_200_000));
    let adj = comp().step(&mut ctx, CompMode::Cv, sample(400_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Done);

    let adj = comp().step(&mut ctx, CompMode::Cv, sample(900_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Hold(2_000));

    ctx.dec_vfloat = true;
    let adj = comp().step(&mut ctx, CompMode::Cv, sample(900_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Hold(1_000));
}

#[test]
fn cv_float_loop_lowers_voltage_and_target() {
    let mut ctx = context(ChargeMode::FourToOne, 3_000_000, apdo(18_000_000, 1_500_000, 20_400_000));
    let adj = comp().step(&mut ctx, CompMode::Cv, sample(2_000_000), LoopStatus::FloatVoltage);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.ta.voltage_uv, 17_960_000);
    assert_eq!(ctx.ta.target_voltage_uv, 17_960_000);
}

#[test]
fn pre_cv_settles_when_no_loop_is_active() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(9_000_000, 2_500_000, 10_200_000));
    let c = comp();
    assert_eq!(c.pre_cv_step(&mut ctx, sample(2_000_000), LoopStatus::FloatVoltage), Adjustment::Negotiate);
    assert_eq!(ctx.ta.voltage_uv, 8_980_000);
    assert_eq!(c.pre_cv_step(&mut ctx, sample(2_000_000), LoopStatus::Inactive), Adjustment::Settled);
    assert_eq!(c.pre_cv_step(&mut ctx, sample(100_000), LoopStatus::Inactive), Adjustment::Done);
}

#[test]
fn wireless_steps_by_receiver_resolution() {
    let mut ta = apdo(8_500_000, 2_500_000, 10_000_000);
    ta.adapter_type = AdapterType::Wireless;
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, ta);
    assert_eq!(ctx.voltage_step(), 100_000);
    assert!(ctx.voltage_only());

    comp().step(&mut ctx, CompMode::Cc, sample(2_000_000), LoopStatus::Inactive);
    assert_eq!(ctx.ta.voltage_uv, 8_600_000);
    comp().step(&mut ctx, CompMode::Cc, sample(2_700_000), LoopStatus::Inactive);
    assert_eq!(ctx.ta.voltage_uv, 8_500_000);
}

#[test]
fn bypass_only_reacts_to_active_loops() {
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(8_200_000, 2_500_000, 10_200_000));
    let adj = comp().step(&mut ctx, CompMode::Bypass, sample(2_400_000), LoopStatus::Inactive);
    assert_eq!(adj, Adjustment::Hold(10_000));
    let adj = comp().step(&mut ctx, CompMode::Bypass, sample(2_700_000), LoopStatus::InputCurrent);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.ta.current_ua, 2_450_000);
}

#[test]
fn backing_off_never_leaves_the_minimum_voltage() {
    let mut ta = apdo(7_010_000, 2_500_000, 10_200_000);
    ta.control_mode = TaControl::ConstantVoltage;
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, ta);
    let adj = comp().step(&mut ctx, CompMode::Cc, sample(2_700_000), LoopStatus::InputCurrent);
    assert_eq!(adj, Adjustment::Negotiate);
    assert_eq!(ctx.ta.voltage_uv, 7_000_000);

    comp().step(&mut ctx, CompMode::Cv, sample(2_700_000), LoopStatus::FloatVoltage);
    assert_eq!(ctx.ta.voltage_uv, 7_000_000);
}

/// Adapter feeding a 4.0 V battery through the converter. Input current grows
/// by 4 A per volt of headroom and is capped by the adapter's current limit.
fn adapter_input(ta: &TaParams, mode: i32) -> i32 {
    let headroom = ta.voltage_uv - 2 * mode * 4_000_000;
    (headroom * 4 / mode).max(0).min(mode * ta.current_ua)
}

/// Step CC compensation against `adapter_input` until it holds. Returns the
/// number of steps and the settled input current.
///
/// A step that does not raise the input is unproductive; the same axis must
/// never be unproductive twice in a row.
fn settle(ctx: &mut ChargerContext, limit: usize) -> (usize, i32) {
    let c = comp();
    let mut stalled: Option<StepKind> = None;
    let mut last_step: Option<(StepKind, i32)> = None;
    for n in 0..limit {
        let iin = adapter_input(&ctx.ta, ctx.mode());
        if let Some((kind, before)) = last_step.take() {
            if iin <= before + IIN_ADC_OFFSET_UA {
                assert_ne!(stalled, Some(kind), "{kind:?} stalled twice in a row at step {n}");
                stalled = Some(kind);
            } else {
                stalled = None;
            }
        }
        match c.step(ctx, CompMode::Cc, sample(iin), LoopStatus::Inactive) {
            Adjustment::Hold(_) => return (n, iin),
            Adjustment::Negotiate => match ctx.compensation.prev_step_kind {
                StepKind::None => stalled = None,
                kind => last_step = Some((kind, iin)),
            },
            other => panic!("unexpected {other:?} at step {n}"),
        }
        assert!(ctx.ta.voltage_uv <= ctx.ta.max_voltage_uv);
        assert!(ctx.ta.current_ua <= ctx.ta.max_current_ua);
    }
    panic!("no hold within {limit} steps: {:?}", ctx.ta);
}

fn in_band(iin: i32, iin_cc: i32) -> bool {
    (iin_cc - TA_CUR_LOW_OFFSET_UA..=iin_cc + IIN_CC_COMP_OFFSET_UA).contains(&iin)
}

#[test]
fn two_to_one_converges_below_saturation() {
    // Adapter starts current limited below the target.
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, apdo(8_500_000, 2_000_000, 10_200_000));
    let (steps, iin) = settle(&mut ctx, 40);
    assert!(steps > 0);
    assert!(in_band(iin, 2_500_000), "{iin}");
    assert!(!ctx.ta.voltage_at_max());
    assert!(!ctx.ta.current_at_max());
}

#[test]
fn four_to_one_converges_below_saturation() {
    let mut ctx = context(ChargeMode::FourToOne, 3_000_000, apdo(16_500_000, 1_200_000, 20_400_000));
    let (_, iin) = settle(&mut ctx, 60);
    assert!(in_band(iin, 3_000_000), "{iin}");
    assert!(!ctx.ta.voltage_at_max());
    assert_eq!(ctx.ta.current_ua, 1_500_000);
}

#[test]
fn power_limited_source_converges_on_a_lowered_target() {
    // 21 W cannot carry 2.5 A at the voltage the battery needs.
    let mut ta = apdo(8_400_000, 2_500_000, 8_400_000);
    ta.max_power_uw = 21_000_000;
    let mut ctx = context(ChargeMode::TwoToOne, 2_500_000, ta);

    let (_, iin) = settle(&mut ctx, 40);
    let iin_cc = ctx.targets.input_current_cc_ua;
    assert!(iin_cc < 2_500_000 && iin_cc >= TA_MIN_CUR_UA, "{iin_cc}");
    assert!(in_band(iin, iin_cc), "{iin} vs {iin_cc}");
    assert_eq!(ctx.ta.max_voltage_uv, power_limited_voltage(21_000_000, iin_cc, 1));
}
