//! Control core of an emergency ventilator.
//!
//! The statistics engine turns sensor samples into respiratory statistics and
//! publishes them through a shared store; the valve controller reads the store,
//! runs the breathing cycle and feeds the breath phase back.  Everything here
//! is hardware independent: peripherals come in through `embedded-hal` traits
//! and time through [`time_util::Clock`].  The RP2040 application lives in
//! `main.rs`.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod analog_frontend;
pub mod breath_timing;
pub mod config;
pub mod crc16;
pub mod data_structs;
pub mod flow_sensor;
pub mod messaging;
pub mod oxygen_mixer;
pub mod sensors;
pub mod signal_processing;
pub mod statistics;
pub mod store;
pub mod time_util;
pub mod valve_controller;
pub mod valve_driver;
