//! Firmware core for a two-channel BLE neural stimulator.
//!
//! A connected central writes stimulation parameters and triggers a left or right
//! session; a fixed-period timer interrupt then drives the chosen stimulation output as a
//! pulse train (frequency, pulse width, duration, optionally randomized per period) with
//! the channel's indicator LED lit for the session.
//!
//! Everything here is hardware independent. A board supplies a
//! [`hal::HardwareAbstraction`], builds a [`device::Device`] and calls
//! [`device::Device::on_tick`] from its timer interrupt.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod connection;
pub mod device;
pub mod drivers;
pub mod error;
pub mod events;
pub mod gatt;
pub mod hal;
pub mod link;
pub mod params;
pub mod prng;
pub mod scheduler;
pub mod shared;
pub mod timers;
