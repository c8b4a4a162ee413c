//! PCA9482 direct-charging controller
//!
//! `no_std` driver and control loop for the NXP PCA9482 switched-capacitor
//! direct charger. The [`DirectCharger`] negotiates a programmable supply
//! (USB PD APDO, fixed PDO or a wireless receiver), steers the adapter
//! voltage and current to hold constant-current and constant-voltage
//! charging, classifies hardware faults and also drives the reverse (OTG)
//! path.
//!
//! Register access goes through [`io::RegisterIo`]; [`I2cRegisterIo`] adapts
//! any `embedded-hal` 1.0 I2C bus. Time is supplied by the caller through
//! [`DirectCharger::poll`].

#![no_std]

pub mod compensator;
pub mod config;
pub mod context;
mod control_loop;
pub mod controller;
pub mod driver;
pub mod error;
pub mod fault;
pub mod i2c;
pub mod io;
pub mod preset;
pub mod registers;
mod requests;
mod reverse;
pub mod scheduler;

pub use config::Config;
pub use context::{AdapterType, ChargeMode, ChargingState, DcTopology, ReverseMode};
pub use controller::DirectCharger;
pub use driver::Pca9482;
pub use error::{Error, FaultOutcome, FaultReason};
pub use i2c::I2cRegisterIo;
pub use registers::DEFAULT_I2C_ADDRESS;
