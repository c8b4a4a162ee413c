#![allow(dead_code)]

use pca9482::context::{AdapterType, ChargeMode};
use pca9482::error::NegotiateError;
use pca9482::io::{
    AdcChannel, AdcReader, PhysicalValue, PowerNegotiator, PowerQuery, RegisterIo, SourceCapability,
    SwitchingCharger,
};
use pca9482::registers::{addr, STATUS_REG_COUNT};
use pca9482::{Config, DirectCharger};

/// DEVICE_3 power-state values.
pub const FORWARD_ACTIVE: u8 = 0x80;
pub const STANDBY: u8 = 0x40;
pub const REVERSE_ACTIVE: u8 = 0xC0;

/// VIN valid, forward switching.
pub const RUNNING: [u8; STATUS_REG_COUNT] = [0x01, 0x00, 0x00, FORWARD_ACTIVE, 0x00, 0x00, 0x00];

#[derive(Debug)]
pub struct BusError;

/// Register file backed by an array. Status registers come from `status`,
/// CHARGING_STS from `charging_sts`.
pub struct FakeRegs {
    pub regs: [u8; 0x40],
    pub status: [u8; STATUS_REG_COUNT],
    pub charging_sts: u8,
    pub soft_resets: usize,
    pub writes: Vec<(u8, u8)>,
    pub fail: bool,
}

impl FakeRegs {
    pub fn new() -> Self {
        Self {
            regs: [0; 0x40],
            status: RUNNING,
            charging_sts: 0,
            soft_resets: 0,
            writes: Vec::new(),
            fail: false,
        }
    }

    pub fn reg(&self, reg: u8) -> u8 {
        self.regs[reg as usize]
    }
}

impl RegisterIo for FakeRegs {
    type Error = BusError;

    fn read(&mut self, reg: u8) -> Result<u8, BusError> {
        if self.fail {
            return Err(BusError);
        }
        if reg == addr::CHARGING_STS {
            return Ok(self.charging_sts);
        }
        Ok(self.regs[reg as usize])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        if self.fail {
            return Err(BusError);
        }
        self.writes.push((reg, value));
        self.regs[reg as usize] = value;
        Ok(())
    }

    fn bulk_read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        if self.fail {
            return Err(BusError);
        }
        if reg == addr::DEVICE_0_STS {
            buf.copy_from_slice(&self.status[..buf.len()]);
        } else {
            buf.fill(0);
        }
        Ok(())
    }

    fn soft_reset(&mut self) -> Result<(), BusError> {
        if self.fail {
            return Err(BusError);
        }
        self.soft_resets += 1;
        Ok(())
    }
}

pub struct FakeAdc {
    pub vin_uv: i32,
    pub iin_ua: i32,
    pub vbat_uv: i32,
    pub ibat_ua: i32,
    pub fail: bool,
}

impl FakeAdc {
    pub fn new() -> Self {
        Self {
            vin_uv: 8_500_000,
            iin_ua: 2_500_000,
            vbat_uv: 4_000_000,
            ibat_ua: 5_000_000,
            fail: false,
        }
    }
}

impl AdcReader for FakeAdc {
    type Error = ();

    fn sample(&mut self, channel: AdcChannel) -> Result<PhysicalValue, ()> {
        if self.fail {
            return Err(());
        }
        Ok(match channel {
            AdcChannel::Vin => PhysicalValue::Microvolts(self.vin_uv),
            AdcChannel::Iin => PhysicalValue::Microamps(self.iin_ua),
            AdcChannel::Vbat => PhysicalValue::Microvolts(self.vbat_uv),
            AdcChannel::Ibat => PhysicalValue::Microamps(self.ibat_ua),
            AdcChannel::Vout => PhysicalValue::Microvolts(self.vbat_uv),
            AdcChannel::Ntc => PhysicalValue::Microvolts(1_000_000),
            AdcChannel::DieTemp => PhysicalValue::Millidegrees(35_000),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Request {
    Apdo { object: u8, voltage_uv: i32, current_ua: i32 },
    Fixed { object: u8, current_ua: i32 },
    Wireless { voltage_uv: i32 },
}

pub struct FakeNegotiator {
    pub adapter_type: AdapterType,
    /// Object offered for 2:1 queries.
    pub cap_2to1: Option<SourceCapability>,
    /// Object offered for 4:1 queries.
    pub cap_4to1: Option<SourceCapability>,
    pub queries: Vec<PowerQuery>,
    pub requests: Vec<Request>,
    /// Number of upcoming requests answered with `Busy`.
    pub busy: usize,
    /// Every request fails with this error.
    pub fail: Option<NegotiateError>,
}

/// 3 A / 11 V / 33 W APDO at object 3.
pub const PPS_OBJECT: SourceCapability = SourceCapability {
    object_index: 3,
    max_voltage_uv: 11_000_000,
    max_current_ua: 3_000_000,
    max_power_uw: 33_000_000,
};

impl FakeNegotiator {
    pub fn pps() -> Self {
        Self::with_type(AdapterType::UsbPdApdo)
    }

    pub fn with_type(adapter_type: AdapterType) -> Self {
        Self {
            adapter_type,
            cap_2to1: Some(PPS_OBJECT),
            cap_4to1: None,
            queries: Vec::new(),
            requests: Vec::new(),
            busy: 0,
            fail: None,
        }
    }

    fn answer(&mut self, req: Request) -> Result<(), NegotiateError> {
        if self.busy > 0 {
            self.busy -= 1;
            return Err(NegotiateError::Busy);
        }
        if let Some(e) = self.fail {
            return Err(e);
        }
        self.requests.push(req);
        Ok(())
    }

    pub fn last_apdo(&self) -> Option<(i32, i32)> {
        self.requests.iter().rev().find_map(|r| match r {
            Request::Apdo { voltage_uv, current_ua, .. } => Some((*voltage_uv, *current_ua)),
            _ => None,
        })
    }
}

impl PowerNegotiator for FakeNegotiator {
    fn adapter_type(&mut self) -> AdapterType {
        self.adapter_type
    }

    fn request_apdo(&mut self, object_index: u8, voltage_uv: i32, current_ua: i32) -> Result<(), NegotiateError> {
        self.answer(Request::Apdo {
            object: object_index,
            voltage_uv,
            current_ua,
        })
    }

    fn request_fixed_pdo(&mut self, object_index: u8, max_current_ua: i32) -> Result<(), NegotiateError> {
        self.answer(Request::Fixed {
            object: object_index,
            current_ua: max_current_ua,
        })
    }

    fn request_wireless_voltage(&mut self, voltage_uv: i32) -> Result<(), NegotiateError> {
        self.answer(Request::Wireless { voltage_uv })
    }

    fn get_max_power(&mut self, query: PowerQuery) -> Result<SourceCapability, NegotiateError> {
        self.queries.push(query);
        let cap = match query.mode {
            ChargeMode::FourToOne => self.cap_4to1,
            _ => self.cap_2to1,
        };
        cap.ok_or(NegotiateError::Rejected)
    }
}

pub struct FakeSwitchingCharger {
    pub enabled: bool,
    pub icl_ua: Option<i32>,
}

impl FakeSwitchingCharger {
    pub fn new() -> Self {
        Self {
            enabled: false,
            icl_ua: None,
        }
    }
}

impl SwitchingCharger for FakeSwitchingCharger {
    type Error = ();

    fn is_enabled(&mut self) -> Result<bool, ()> {
        Ok(self.enabled)
    }

    fn set_enabled(&mut self, enable: bool) -> Result<(), ()> {
        self.enabled = enable;
        Ok(())
    }

    fn set_input_current_limit(&mut self, ua: i32) -> Result<(), ()> {
        self.icl_ua = Some(ua);
        Ok(())
    }
}

pub type Charger = DirectCharger<FakeRegs, FakeAdc, FakeNegotiator, FakeSwitchingCharger>;

pub fn charger_with(negotiator: FakeNegotiator, config: Config) -> Charger {
    DirectCharger::new(
        FakeRegs::new(),
        FakeAdc::new(),
        negotiator,
        FakeSwitchingCharger::new(),
        config,
    )
    .unwrap()
}

pub fn charger() -> Charger {
    charger_with(FakeNegotiator::pps(), Config::default())
}

/// Tick until `done` holds, failing the test after `limit` ticks.
pub fn tick_until(charger: &mut Charger, limit: usize, done: impl Fn(&Charger) -> bool) {
    for _ in 0..limit {
        if done(charger) {
            return;
        }
        charger.tick().unwrap();
    }
    assert!(done(charger), "condition not reached, state {:?}", charger.get_status());
}
