//! FANET Medium Access Control
//!
//! Contention based MAC for the FANET LoRa mesh, with acknowledged unicast,
//! retransmission, RSSI gated relaying and exponential CSMA backoff.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

#![no_std]

#[cfg(any(test, feature="std"))]
extern crate std;

pub mod timer;

pub mod frame;

pub mod queue;

pub mod neighbors;

pub mod phy;

pub mod app;

pub mod mac;

pub mod error;

pub mod prelude;

use crate::frame::Frame;

/// Timestamps are 32-bit wrapping milliseconds
pub type Ts = u32;

/// Generic MAC trait, implemented by all MACs
pub trait Mac {
    type Error;

    // Queue a frame for transmission
    fn transmit(&mut self, frame: Frame) -> Result<(), Self::Error>;

    // Update the MAC state, called once per slot
    fn tick(&mut self) -> Result<(), Self::Error>;

    // Check whether the MAC has frames or backoff pending
    fn busy(&mut self) -> Result<bool, Self::Error>;
}
