#![cfg_attr(not(test), no_std)]
//! Blocking master-mode driver for the I2C v1 peripheral found on STM32F1/L1
//! and the WCH CH32 parts, with bit-banged bus recovery.
//!
//! The driver is written against small traits ([`peripheral::Registers`],
//! [`gpio::BusPin`], [`delay::Clock`], [`lock::PortLock`]) rather than a PAC,
//! so a board crate wires it to its own register blocks and pins.

// This must go FIRST so that all the other modules see its macros.
mod fmt;

pub mod delay;
pub mod gpio;
pub mod i2c;
pub mod lock;
pub mod peripheral;
pub mod time;

#[cfg(test)]
mod sim;

pub use crate::i2c::{Error, I2c, Port, PortDescriptor, TransferFlags};
