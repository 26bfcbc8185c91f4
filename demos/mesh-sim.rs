//! FANET mesh simulation
//!
//! Runs a line of MAC nodes over a simulated air interface, with signal
//! strength falling off with distance so far nodes are only reachable
//! through relays.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use log::{debug, info, error};

use structopt::StructOpt;
use humantime::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use fanet_mac::prelude::*;
use fanet_mac::frame::MAX_FRAME_LEN;
use fanet_mac::timer::{after, is_before, reached, mock::MockTimer};


#[derive(Debug, StructOpt)]
struct Options {

    #[structopt(long, default_value="4")]
    /// Number of nodes, placed on a line
    pub nodes: usize,

    #[structopt(long, default_value="800")]
    /// Distance between adjacent nodes in meters
    pub spacing: f32,

    #[structopt(long, default_value="30s")]
    /// Simulated run time
    pub duration: Duration,

    #[structopt(long, default_value="5s")]
    /// Tracking broadcast interval
    pub interval: Duration,

    #[structopt(long, default_value="-120")]
    /// Receiver sensitivity in dBm
    pub sensitivity: i16,

    #[structopt(long, default_value="1")]
    /// Random seed
    pub seed: u64,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

/// Node state on the simulated channel
struct Station {
    position: f32,
    rx: &'static MacQueue,
    busy_until: Ts,
}

/// Shared air interface
struct Air {
    stations: Vec<Station>,
    sensitivity: i16,
}

impl Air {
    /// Log distance path loss
    fn rssi(&self, from: usize, to: usize) -> i16 {
        let d = (self.stations[from].position - self.stations[to].position).abs().max(1.0);
        (-40.0 - 25.0 * d.log10()) as i16
    }
}

/// Rough LoRa SF7 time on air
fn airtime_ms(len: usize) -> u32 {
    20 + 2 * len as u32
}

struct SimPhy {
    index: usize,
    air: Arc<Mutex<Air>>,
    timer: MockTimer,
}

impl Phy for SimPhy {
    type Error = Infallible;

    fn transmit(&mut self, data: &[u8]) -> Result<TxOutcome, Infallible> {
        let now = self.timer.ticks_ms();
        let mut air = self.air.lock().unwrap();

        // Someone in range is still on air
        if is_before(now, air.stations[self.index].busy_until) {
            return Ok(TxOutcome::BusyReceiving);
        }

        let done = after(now, airtime_ms(data.len()));

        for i in 0..air.stations.len() {
            if i == self.index {
                continue;
            }

            let rssi = air.rssi(self.index, i);
            if rssi < air.sensitivity {
                continue;
            }

            let s = &mut air.stations[i];
            s.busy_until = done;
            s.rx.frame_received(data, rssi);
        }

        Ok(TxOutcome::Sent)
    }

    fn rssi(&mut self) -> Result<i16, Infallible> {
        Ok(0)
    }

    fn set_coding(&mut self, _coding: Coding) -> Result<(), Infallible> {
        Ok(())
    }

    fn is_active(&mut self) -> Result<bool, Infallible> {
        Ok(true)
    }
}

/// Application broadcasting its position at a fixed interval
struct SimApp {
    address: MacAddress,
    timer: MockTimer,
    interval: u32,
    next_broadcast: Ts,
    seq: u16,
    received: usize,
}

impl App for SimApp {
    fn is_broadcast_ready(&mut self, _neighbors: usize) -> bool {
        reached(self.timer.ticks_ms(), self.next_broadcast)
    }

    fn take_broadcast_frame(&mut self) -> Option<Frame> {
        self.seq = self.seq.wrapping_add(1);
        Frame::data(self.address, MacAddress::BROADCAST, FrameKind::Tracking, &self.seq.to_le_bytes(), AckMode::None).ok()
    }

    fn on_broadcast_success(&mut self, kind: FrameKind) {
        let now = self.timer.ticks_ms();
        self.next_broadcast = after(now, self.interval);

        debug!("{} sent {} at {} ms", self.address, kind, now);
    }

    fn on_frame_delivered(&mut self, frame: &Frame) {
        self.received += 1;

        info!("{} received {} from {} ({} dBm): {:02x?}", self.address, frame.kind, frame.source, frame.rssi, frame.payload());
    }

    fn on_delivery_result(&mut self, success: bool, address: MacAddress) {
        match success {
            true => info!("{} delivered message to {}", self.address, address),
            false => error!("{} failed to deliver message to {}", self.address, address),
        }
    }
}

type SimMac = FanetMac<'static, SimPhy, SimApp, MockTimer, StdRng, [u8; MAX_FRAME_LEN]>;

fn main() -> anyhow::Result<()> {
    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting mesh-sim with {} nodes", opts.nodes);

    if opts.nodes < 2 {
        return Err(anyhow::anyhow!("At least two nodes are required"));
    }

    let config = MacConfig::default();
    let mut timer = MockTimer::new();

    // Receive queues are shared with the air, as with a radio interrupt
    let stations = (0..opts.nodes).map(|i| Station {
        position: i as f32 * opts.spacing,
        rx: Box::leak(Box::new(MacQueue::new(config.queue_capacity))),
        busy_until: 0,
    }).collect();

    let air = Arc::new(Mutex::new(Air{ stations, sensitivity: opts.sensitivity }));

    let mut nodes = Vec::with_capacity(opts.nodes);
    for i in 0..opts.nodes {
        let address = MacAddress::new(0x11, i as u16 + 1);
        let rx = air.lock().unwrap().stations[i].rx;

        let phy = SimPhy{ index: i, air: air.clone(), timer: timer.clone() };

        // Stagger the first broadcasts
        let app = SimApp {
            address,
            timer: timer.clone(),
            interval: opts.interval.as_millis() as u32,
            next_broadcast: i as u32 * 700,
            seq: 0,
            received: 0,
        };

        let rng = StdRng::seed_from_u64(opts.seed.wrapping_add(i as u64));

        let mac: SimMac = match FanetMac::new(address, config.clone(), rx, phy, app, timer.clone(), rng, [0u8; MAX_FRAME_LEN]) {
            Ok(m) => m,
            Err(e) => {
                return Err(anyhow::anyhow!("Error initialising MAC: {:?}", e));
            }
        };

        nodes.push(mac);
    }

    // Acknowledged message from one end of the line to the other
    let destination = nodes[opts.nodes - 1].address();
    let message = Frame::data(nodes[0].address(), destination, FrameKind::Message, b"hello", AckMode::TwoHop)
        .map_err(|e| anyhow::anyhow!("Error building message: {:?}", e))?;

    if let Err(e) = nodes[0].transmit(message) {
        return Err(anyhow::anyhow!("Error queueing message: {:?}", e));
    }

    debug!("Starting loop");

    let end = opts.duration.as_millis() as u32;

    while is_before(timer.ticks_ms(), end) {
        for mac in nodes.iter_mut() {
            // Radio errors are logged and the loop carries on
            if let Err(e) = mac.tick() {
                error!("MAC {} tick error: {:?}", mac.address(), e);
            }
        }

        timer.inc(config.slot_ms);
    }

    for mac in nodes.iter_mut() {
        let received = mac.app().received;

        info!("{}: {} neighbors, {} frames delivered", mac.address(), mac.neighbors().len(), received);
        info!("{}: {:?}", mac.address(), mac.stats());
    }

    Ok(())
}
