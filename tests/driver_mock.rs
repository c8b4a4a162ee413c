use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};
use pca9482::context::{AdapterType, DcTopology};
use pca9482::registers::{AdcMode, PowerState};
use pca9482::{Config, I2cRegisterIo, Pca9482};

const ADDR: u8 = 0x57;

fn driver(expectations: &[I2cTrans]) -> Pca9482<I2cRegisterIo<I2cMock>> {
    Pca9482::new(I2cRegisterIo::new(I2cMock::new(expectations)))
}

#[test]
fn input_current_adds_headroom() {
    // 2.5 A + 200 mA -> (2.7 A - 0.5 A) / 25 mA = 88
    let mut dev = driver(&[I2cTrans::write(ADDR, vec![0x1E, 88])]);
    dev.set_input_current(2_500_000, AdapterType::UsbPdApdo, &Config::default())
        .unwrap();
    dev.free().free().done();
}

#[test]
fn fixed_pdo_input_current_has_floor_and_no_headroom() {
    let config = Config::default();
    let mut dev = driver(&[
        I2cTrans::write(ADDR, vec![0x1E, 80]),
        // Raised to the 1 A floor.
        I2cTrans::write(ADDR, vec![0x1E, 20]),
    ]);
    dev.set_input_current(2_500_000, AdapterType::UsbPdFixedPdo, &config).unwrap();
    dev.set_input_current(600_000, AdapterType::UsbPdFixedPdo, &config).unwrap();
    dev.free().free().done();
}

#[test]
fn regulation_setters_write_codes() {
    let mut dev = driver(&[
        I2cTrans::write(ADDR, vec![0x1F, 125]),
        I2cTrans::write(ADDR, vec![0x20, 82]),
        I2cTrans::write(ADDR, vec![0x26, 16]),
    ]);
    dev.set_vfloat(4_350_000).unwrap();
    dev.set_charging_current(5_000_000).unwrap();
    dev.set_switching_frequency(1_000).unwrap();
    dev.free().free().done();
}

#[test]
fn status_is_one_auto_increment_burst() {
    let mut dev = driver(&[I2cTrans::write_read(
        ADDR,
        vec![0x8F],
        vec![0x01, 0x00, 0x08, 0x80, 0x04, 0x00, 0x00],
    )]);
    let status = dev.status().unwrap();
    assert_eq!(status.power_state(), PowerState::ForwardActive);
    assert!(status.device2().bits() & 0x08 != 0);
    assert!(status.charging().bits() & 0x04 != 0);
    dev.free().free().done();
}

#[test]
fn rcp_is_read_modify_write() {
    let mut dev = driver(&[
        I2cTrans::write_read(ADDR, vec![0x1C], vec![0xF0]),
        I2cTrans::write(ADDR, vec![0x1C, 0xF1]),
    ]);
    dev.set_rcp(true).unwrap();
    dev.free().free().done();
}

#[test]
fn adc_mode_keeps_other_bits() {
    let mut dev = driver(&[
        I2cTrans::write_read(ADDR, vec![0x2A], vec![0xA1]),
        I2cTrans::write(ADDR, vec![0x2A, 0xA2]),
    ]);
    dev.set_adc_mode(AdcMode::ForceShutdown).unwrap();
    dev.free().free().done();
}

#[test]
fn soft_reset_writes_self_clearing_bit() {
    let mut dev = driver(&[I2cTrans::write(ADDR, vec![0x16, 0x01])]);
    dev.soft_reset().unwrap();
    dev.free().free().done();
}

#[test]
fn disable_charging_sets_en_active_high() {
    let mut dev = driver(&[
        // Half-VIN OVP off for 2:1.
        I2cTrans::write_read(ADDR, vec![0x17], vec![0x10]),
        I2cTrans::write(ADDR, vec![0x17, 0x00]),
        // NTC standby off.
        I2cTrans::write_read(ADDR, vec![0x16], vec![0x02]),
        I2cTrans::write(ADDR, vec![0x16, 0x00]),
        // EN_CFG set.
        I2cTrans::write_read(ADDR, vec![0x18], vec![0x00]),
        I2cTrans::write(ADDR, vec![0x18, 0x02]),
    ]);
    dev.set_charging(false, DcTopology::Normal, true).unwrap();
    dev.free().free().done();
}

#[test]
fn custom_address_is_used() {
    let mock = I2cMock::new(&[I2cTrans::write_read(0x5A, vec![0x13], vec![0x01])]);
    let mut dev = Pca9482::new(I2cRegisterIo::with_address(mock, 0x5A));
    assert_eq!(dev.io().address(), 0x5A);
    assert_eq!(dev.charging_status().unwrap().bits(), 0x01);
    dev.free().free().done();
}
