//! CSMA backoff state
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use log::debug;
use rand_core::RngCore;

use crate::Ts;
use crate::timer::{after, reached};

use super::config::Config;

/// Draw a uniform value from the inclusive range `[low, high]`
pub fn random_between<G: RngCore>(rng: &mut G, low: u32, high: u32) -> u32 {
    if high <= low {
        return low;
    }

    let span = (high - low) as u64 + 1;
    low + (rng.next_u64() % span) as u32
}

/// Transmit spacing and backoff carried across MAC ticks
#[derive(Debug, Clone, PartialEq)]
pub struct CsmaState {
    /// Current backoff exponent, within `[min_be, max_be]`
    pub backoff_exp: u8,
    /// No transmission may start before this time
    pub next_tx: Ts,
}

impl CsmaState {
    pub fn new(config: &Config, now: Ts) -> Self {
        Self {
            backoff_exp: config.min_be,
            next_tx: now,
        }
    }

    /// Check whether spacing / backoff has elapsed
    pub fn clear_to_send(&self, now: Ts) -> bool {
        reached(now, self.next_tx)
    }

    /// Transmission succeeded, reset backoff and enforce minimum spacing
    pub fn sent(&mut self, config: &Config, now: Ts) {
        self.backoff_exp = config.min_be;
        self.next_tx = after(now, config.min_tx_spacing_ms);
    }

    /// Channel busy, grow the backoff window and schedule the next attempt
    ///
    /// Returns the backoff applied in ms.
    pub fn busy<G: RngCore>(&mut self, config: &Config, now: Ts, rng: &mut G) -> u32 {
        if self.backoff_exp < config.max_be {
            self.backoff_exp += 1;
        }

        let backoff = random_between(rng, 1 << (config.min_be - 1), 1 << self.backoff_exp);
        self.next_tx = after(now, backoff);

        debug!("CSMA backoff {} ms (exponent {})", backoff, self.backoff_exp);

        backoff
    }
}
