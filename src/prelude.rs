//! FANET MAC crate prelude
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub use crate::{Mac, Ts};

pub use crate::error::CoreError;
pub use crate::timer::{Timer as MacTimer};

pub use crate::frame::{Address as MacAddress, AckMode, Frame, FrameKind};

pub use crate::queue::{FrameId, QueueError};

pub use crate::phy::{Phy, RadioPhy, CodingRate, Coding, TxOutcome, receive_frame};

pub use crate::app::App;

pub use crate::mac::{FanetMac, Config as MacConfig, MacQueue, MacStats};
