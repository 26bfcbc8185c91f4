//! FANET MAC Implementation
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use log::{trace, debug, info, warn, error};

use rand_core::RngCore;

use crate::{Mac as MacIf, Ts, error::CoreError, timer::{Timer, after}};
use crate::app::App;
use crate::frame::{Address, Frame, FrameKind};
use crate::phy::{Coding, Phy, TxOutcome};
use crate::queue::FrameId;

pub mod config;
pub use config::{Config, ConfigError, MacQueue, MacNeighbors};

pub mod csma;
pub use csma::{CsmaState, random_between};

/// MAC layer statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacStats {
    pub rx_frames: u32,
    pub delivered: u32,
    pub acks_sent: u32,
    pub forwards_queued: u32,
    pub forwards_suppressed: u32,
    pub forwards_rescheduled: u32,
    pub tx_frames: u32,
    pub tx_busy: u32,
    pub tx_fail: u32,
    pub delivery_fail: u32,
    pub encode_fail: u32,
    pub queue_drops: u32,
}

/// Frame selected for transmission in the current tick
enum Pending {
    /// Application broadcast, owned here and never queued
    App(Frame),
    /// Frame held by the transmit queue
    Queued(FrameId),
}

/// FANET MAC
///
/// Generic over a Phy (P), App (A), Timer (T), Rng (G) and transmit Buffer (B).
/// The receive queue is shared with the receive notification context, which
/// fills it via [`crate::queue::FrameQueue::frame_received`].
pub struct FanetMac<'a, P, A, T, G, B> {
    address: Address,
    config: Config,

    phy: P,
    app: A,
    timer: T,
    rng: G,

    /// Buffer for encode operations
    buffer: B,

    rx_queue: &'a MacQueue,
    tx_queue: MacQueue,
    neighbors: MacNeighbors,

    csma: CsmaState,
    stats: MacStats,
}

impl <'a, P, A, T, G, B> FanetMac<'a, P, A, T, G, B>
where
    P: Phy,
    A: App,
    T: Timer,
    G: RngCore,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Create a new MAC with the provided address and collaborators
    pub fn new(address: Address, config: Config, rx_queue: &'a MacQueue, phy: P, app: A, timer: T, rng: G, buffer: B) -> Result<Self, CoreError<P::Error>> {
        config.validate()?;

        let now = timer.ticks_ms();

        debug!("Setup MAC with address {} at {} ms", address, now);

        Ok(Self {
            address,
            tx_queue: MacQueue::new(config.queue_capacity),
            neighbors: MacNeighbors::new(config.neighbor_capacity),
            csma: CsmaState::new(&config, now),
            stats: MacStats::default(),
            config,

            phy,
            app,
            timer,
            rng,
            buffer,
            rx_queue,
        })
    }

    /// Fetch configured MAC address
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch MAC layer statistics
    pub fn stats(&self) -> MacStats {
        self.stats.clone()
    }

    pub fn neighbors(&self) -> &MacNeighbors {
        &self.neighbors
    }

    pub fn tx_queue(&self) -> &MacQueue {
        &self.tx_queue
    }

    pub fn csma(&self) -> &CsmaState {
        &self.csma
    }

    pub fn app(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn phy(&mut self) -> &mut P {
        &mut self.phy
    }

    /// Queue a frame sent by this node
    ///
    /// Frames requesting an acknowledgement are retransmitted up to
    /// `max_retries` times until the ACK arrives.
    pub fn enqueue(&mut self, mut frame: Frame) -> Result<FrameId, CoreError<P::Error>> {
        let now = self.timer.ticks_ms();

        frame.source = self.address;
        frame.next_send_due = now;
        frame.retries_remaining = match frame.ack.is_requested() {
            true => self.config.max_retries,
            false => 0,
        };

        debug!("Queue {} to {} (ack: {:?})", frame.kind, frame.destination, frame.ack);

        let id = self.tx_queue.enqueue(frame)?;

        Ok(id)
    }

    /// Frames we sent and track acknowledgements for
    fn awaits_ack(&self, frame: &Frame) -> bool {
        frame.ack.is_requested() && frame.source == self.address
    }

    fn forward_delay(&mut self, now: Ts) -> Ts {
        let delay = random_between(&mut self.rng, self.config.forward_delay_min_ms, self.config.forward_delay_max_ms);
        after(now, delay)
    }

    /// Generate and queue an ACK for a received frame
    fn ack(&mut self, frame: &Frame, now: Ts) {
        let mut ack = Frame::ack(frame, self.address);
        ack.next_send_due = now;

        debug!("Queue ACK to {} (forward: {})", ack.destination, ack.forward);

        match self.tx_queue.enqueue(ack) {
            Ok(_) => self.stats.acks_sent = self.stats.acks_sent.saturating_add(1),
            Err(e) => {
                warn!("Dropping ACK to {}", e.into_frame().destination);
                self.stats.queue_drops = self.stats.queue_drops.saturating_add(1);
            },
        }
    }

    /// Process one frame from the receive queue
    fn handle_rx(&mut self, now: Ts) {
        let mut frame = match self.rx_queue.pop_front() {
            Some(f) => f,
            None => {
                // Nothing received, clean up the neighbor list
                self.neighbors.prune(now, self.config.neighbor_timeout_ms);
                return;
            }
        };

        self.stats.rx_frames = self.stats.rx_frames.saturating_add(1);

        trace!("Handle {} from {} to {} ({} dBm)", frame.kind, frame.source, frame.destination, frame.rssi);

        self.neighbors.touch(frame.source, now);

        // Pending relay of the same frame
        if let Some(id) = self.tx_queue.find_equal(&frame) {
            let boost = self.config.forward_min_db_boost;
            let rssi = frame.rssi;

            let stronger = self.tx_queue
                .with_frame(id, |queued| rssi >= queued.rssi.saturating_add(boost))
                .unwrap_or(false);

            if stronger {
                // Already rebroadcast by someone closer to us
                debug!("Relay of {} from {} superseded at {} dBm, dropping", frame.kind, frame.source, rssi);

                self.tx_queue.remove(id);
                self.stats.forwards_suppressed = self.stats.forwards_suppressed.saturating_add(1);
            } else {
                let next = self.forward_delay(now);
                self.tx_queue.with_frame(id, |queued| queued.next_send_due = next);

                debug!("Relay of {} from {} rescheduled to {} ms", frame.kind, frame.source, next);

                self.stats.forwards_rescheduled = self.stats.forwards_rescheduled.saturating_add(1);
            }

            return;
        }

        // Frames for us
        if (frame.destination.is_broadcast() || frame.destination == self.address) && frame.source != self.address {
            match frame.kind {
                FrameKind::Ack => {
                    if self.tx_queue.remove_acknowledged(frame.source) {
                        debug!("ACK received from {}", frame.source);
                        self.app.on_delivery_result(true, frame.source);
                    }
                },
                _ => {
                    if frame.ack.is_requested() {
                        self.ack(&frame, now);
                    }

                    self.app.on_frame_delivered(&frame);
                    self.stats.delivered = self.stats.delivered.saturating_add(1);
                }
            }
        }

        // Relay
        let queue_space = self.tx_queue.len() + self.config.forward_queue_reserve < self.tx_queue.capacity();

        if frame.forward
            && queue_space
            && frame.rssi <= self.config.forward_max_rssi
            && (frame.destination.is_broadcast() || self.neighbors.is_member(frame.destination))
        {
            frame.forward = false;
            frame.next_send_due = self.forward_delay(now);

            debug!("Queue relay of {} from {} for {} ms", frame.kind, frame.source, frame.next_send_due);

            match self.tx_queue.enqueue(frame) {
                Ok(_) => self.stats.forwards_queued = self.stats.forwards_queued.saturating_add(1),
                Err(e) => {
                    debug!("Relay rejected: {:?}", e);
                    self.stats.queue_drops = self.stats.queue_drops.saturating_add(1);
                }
            }
        }
    }

    /// Select, encode and transmit the next frame
    fn handle_tx(&mut self, now: Ts) -> Result<(), CoreError<P::Error>> {
        // Still in backoff
        if !self.csma.clear_to_send(now) {
            return Ok(());
        }

        let neighbor_count = self.neighbors.len();

        // App broadcasts take priority over the queue
        let pending = if self.app.is_broadcast_ready(neighbor_count) {
            let mut frame = match self.app.take_broadcast_frame() {
                Some(f) => f,
                None => return Ok(()),
            };

            // Dense neighborhoods rely on direct reception
            frame.forward = neighbor_count <= self.config.max_neighbors_two_hop_tracking;

            Pending::App(frame)

        } else {
            let id = match self.tx_queue.next_ready(now) {
                Some(id) => id,
                None => return Ok(()),
            };

            let (awaits_ack, retries, destination) = match self.tx_queue.get(id) {
                Some(f) => (self.awaits_ack(&f), f.retries_remaining, f.destination),
                None => return Ok(()),
            };

            // No ACK after the last retransmission
            if awaits_ack && retries == 0 {
                info!("No ACK from {}, delivery failed", destination);

                self.app.on_delivery_result(false, destination);
                self.tx_queue.remove(id);
                self.stats.delivery_fail = self.stats.delivery_fail.saturating_add(1);

                return Ok(());
            }

            // Destination out of direct reach, ask the neighbors to relay
            if !destination.is_broadcast() && !self.neighbors.is_member(destination) {
                self.tx_queue.with_frame(id, |f| f.forward = true);
            }

            Pending::Queued(id)
        };

        // Encode frame
        let encoded = match &pending {
            Pending::App(f) => Some(f.encode(self.buffer.as_mut()).map(|n| (n, f.kind))),
            Pending::Queued(id) => {
                let buffer = self.buffer.as_mut();
                self.tx_queue.with_frame(*id, |f| f.encode(buffer).map(|n| (n, f.kind)))
            },
        };

        let (n, kind) = match encoded {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                warn!("Error encoding frame: {:?}, removing", e);
                self.stats.encode_fail = self.stats.encode_fail.saturating_add(1);

                if let Pending::Queued(id) = pending {
                    self.tx_queue.remove(id);
                }
                return Ok(());
            },
            None => return Ok(()),
        };

        // Sparse mesh, trade airtime for range
        let coding = match neighbor_count < self.config.robust_coding_threshold {
            true => Coding::Robust,
            false => Coding::Standard,
        };
        self.phy.set_coding(coding).map_err(CoreError::Radio)?;

        let outcome = match self.phy.transmit(&self.buffer.as_ref()[..n]) {
            Ok(o) => o,
            Err(e) => {
                error!("Radio transmit error: {:?}", e);
                self.stats.tx_fail = self.stats.tx_fail.saturating_add(1);
                return Err(CoreError::Radio(e));
            }
        };

        match (outcome, pending) {
            (TxOutcome::Sent, Pending::App(_frame)) => {
                debug!("Sent {} broadcast ({} bytes) at {} ms", kind, n, now);

                self.app.on_broadcast_success(kind);
                self.csma.sent(&self.config, now);
            },
            (TxOutcome::Sent, Pending::Queued(id)) => {
                debug!("Sent queued {} ({} bytes) at {} ms", kind, n, now);

                let me = self.address;
                let config = &self.config;

                let done = self.tx_queue.with_frame(id, |f| {
                    if !(f.ack.is_requested() && f.source == me) {
                        return true;
                    }

                    // Schedule the retransmission, spacing grows with each attempt
                    f.retries_remaining = f.retries_remaining.saturating_sub(1);
                    f.next_send_due = match f.retries_remaining {
                        0 => after(now, config.ack_timeout_ms),
                        r => after(now, config.retry_interval_ms.saturating_mul(config.max_retries.saturating_sub(r) as u32)),
                    };

                    false
                });

                if done == Some(true) {
                    self.tx_queue.remove(id);
                }

                self.csma.sent(&self.config, now);
            },
            (TxOutcome::BusyReceiving, pending) => {
                if let Pending::App(frame) = pending {
                    trace!("Dropping {} broadcast", frame.kind);
                }

                let backoff = self.csma.busy(&self.config, now, &mut self.rng);
                debug!("Channel busy at {} ms, backoff {} ms", now, backoff);

                self.stats.tx_busy = self.stats.tx_busy.saturating_add(1);
            },
            (TxOutcome::BusyTransmitting, _pending) => {
                debug!("Transmit pending at {} ms", now);
                self.stats.tx_fail = self.stats.tx_fail.saturating_add(1);
            },
        }

        if outcome == TxOutcome::Sent {
            self.stats.tx_frames = self.stats.tx_frames.saturating_add(1);
        }

        Ok(())
    }
}

impl <'a, P, A, T, G, B> MacIf for FanetMac<'a, P, A, T, G, B>
where
    P: Phy,
    A: App,
    T: Timer,
    G: RngCore,
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    type Error = CoreError<P::Error>;

    /// Enqueue a frame for TX
    fn transmit(&mut self, frame: Frame) -> Result<(), Self::Error> {
        self.enqueue(frame).map(|_| ())
    }

    /// Check whether the MAC has pending work
    fn busy(&mut self) -> Result<bool, Self::Error> {
        let now = self.timer.ticks_ms();

        Ok(!self.tx_queue.is_empty() || !self.rx_queue.is_empty() || !self.csma.clear_to_send(now))
    }

    fn tick(&mut self) -> Result<(), Self::Error> {
        // Only handle stuff while the radio is armed
        if !self.phy.is_active().map_err(CoreError::Radio)? {
            return Ok(());
        }

        let now = self.timer.ticks_ms();

        trace!("Tick at {} ms", now);

        // Polled radios deliver received frames here
        self.phy.poll(self.rx_queue).map_err(CoreError::Radio)?;

        self.handle_rx(now);
        self.handle_tx(now)
    }
}
