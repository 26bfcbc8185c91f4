//! Physical layer interface consumed by the MAC
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use log::{debug, trace};

use radio::{Busy, Receive, ReceiveInfo, State, Transmit, RadioState};

use crate::frame::MAX_FRAME_LEN;
use crate::queue::FrameQueue;

/// Result of a transmit attempt
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxOutcome {
    /// Frame sent
    Sent,
    /// Channel occupied by an incoming frame
    BusyReceiving,
    /// A transmission is already in progress
    BusyTransmitting,
}

/// Forward error correction setting
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Coding {
    /// LoRa CR 4/5
    Standard,
    /// LoRa CR 4/8, slower but more robust for sparse meshes
    Robust,
}

/// Phy interface used by the MAC
pub trait Phy {
    type Error: Debug;

    /// Transmit a frame, reporting busy rather than waiting for the channel
    fn transmit(&mut self, data: &[u8]) -> Result<TxOutcome, Self::Error>;

    /// Signal strength of the last received frame
    fn rssi(&mut self) -> Result<i16, Self::Error>;

    fn set_coding(&mut self, coding: Coding) -> Result<(), Self::Error>;

    /// Whether the radio is armed (not sleeping)
    fn is_active(&mut self) -> Result<bool, Self::Error>;

    /// Service a polled radio, completing transmissions and moving received
    /// frames into `rx`
    ///
    /// Interrupt driven phys fill the receive queue themselves and keep the
    /// default, which does nothing.
    fn poll<const N: usize>(&mut self, _rx: &FrameQueue<N>) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

/// Receive notification helper, samples the frame RSSI from the phy and
/// enqueues the received frame
pub fn receive_frame<P: Phy, const N: usize>(phy: &mut P, rx: &FrameQueue<N>, data: &[u8]) -> Result<bool, P::Error> {
    let rssi = phy.rssi()?;
    Ok(rx.frame_received(data, rssi))
}

/// Coding rate control, not covered by the `radio` traits
pub trait CodingRate {
    type Error;

    fn set_coding_rate(&mut self, coding: Coding) -> Result<(), Self::Error>;
}

/// Adaptor from polled `radio` devices to the MAC [`Phy`]
pub struct RadioPhy<R> {
    radio: R,
    armed: bool,
    transmitting: bool,
    last_rssi: i16,
    buffer: [u8; MAX_FRAME_LEN],
}

impl <R, S, I, E> RadioPhy<R>
where
    R: State<State=S, Error=E> + Busy<Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + CodingRate<Error=E>,
    S: RadioState,
    I: ReceiveInfo,
    E: Debug,
{
    /// Wrap a radio device, the radio starts disarmed (asleep)
    pub fn new(radio: R) -> Self {
        Self { radio, armed: false, transmitting: false, last_rssi: 0, buffer: [0u8; MAX_FRAME_LEN] }
    }

    /// Arm (enter receive) or disarm (sleep) the radio
    pub fn set_armed(&mut self, armed: bool) -> Result<(), E> {
        if armed {
            self.radio.set_state(S::idle())?;
            self.radio.start_receive()?;
        } else {
            self.radio.set_state(S::sleep())?;
        }

        debug!("Radio {}", if armed { "armed" } else { "sleeping" });

        self.armed = armed;
        self.transmitting = false;
        Ok(())
    }

    /// Check whether a started transmission is still on air
    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    pub fn inner(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Poll for transmit completion, returning to receive when done
    fn transmit_done(&mut self) -> Result<bool, E> {
        if !self.radio.check_transmit()? {
            return Ok(false);
        }

        trace!("Transmit complete");

        self.transmitting = false;
        self.radio.start_receive()?;

        Ok(true)
    }
}

impl <R, S, I, E> Phy for RadioPhy<R>
where
    R: State<State=S, Error=E> + Busy<Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + CodingRate<Error=E>,
    S: RadioState,
    I: ReceiveInfo,
    E: Debug,
{
    type Error = E;

    fn transmit(&mut self, data: &[u8]) -> Result<TxOutcome, E> {
        if !self.armed {
            return Ok(TxOutcome::BusyTransmitting);
        }

        // Previous frame still on air
        if self.transmitting && !self.transmit_done()? {
            return Ok(TxOutcome::BusyTransmitting);
        }

        // Incoming frame in progress
        if self.radio.is_busy()? {
            return Ok(TxOutcome::BusyReceiving);
        }

        trace!("Transmit {} bytes", data.len());

        // Completion is picked up by a later poll
        self.radio.start_transmit(data)?;
        self.transmitting = true;

        Ok(TxOutcome::Sent)
    }

    fn rssi(&mut self) -> Result<i16, E> {
        Ok(self.last_rssi)
    }

    fn set_coding(&mut self, coding: Coding) -> Result<(), E> {
        self.radio.set_coding_rate(coding)
    }

    fn is_active(&mut self) -> Result<bool, E> {
        Ok(self.armed)
    }

    fn poll<const N: usize>(&mut self, rx: &FrameQueue<N>) -> Result<bool, E> {
        if !self.armed {
            return Ok(false);
        }

        if self.transmitting {
            self.transmit_done()?;
            return Ok(false);
        }

        if !self.radio.check_receive(true)? {
            return Ok(false);
        }

        let (n, info) = self.radio.get_received(&mut self.buffer)?;
        self.last_rssi = info.rssi();

        debug!("Received {} bytes at {} dBm", n, self.last_rssi);

        let queued = rx.frame_received(&self.buffer[..n], self.last_rssi);

        self.radio.start_receive()?;

        Ok(queued)
    }
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use super::*;

    #[derive(Debug, Default)]
    struct Inner {
        active: bool,
        rssi: i16,
        coding: Option<Coding>,
        outcomes: VecDeque<TxOutcome>,
        sent: Vec<Vec<u8>>,
        attempts: usize,
    }

    /// Mock phy recording transmissions, with scripted transmit outcomes
    ///
    /// Transmissions succeed unless an outcome has been queued with
    /// [`MockPhy::push_outcome`].
    #[derive(Clone, Debug)]
    pub struct MockPhy(Arc<Mutex<Inner>>);

    impl MockPhy {
        pub fn new() -> Self {
            let inner = Inner {
                active: true,
                ..Default::default()
            };
            Self(Arc::new(Mutex::new(inner)))
        }

        pub fn set_active(&mut self, active: bool) {
            self.0.lock().unwrap().active = active;
        }

        pub fn set_rssi(&mut self, rssi: i16) {
            self.0.lock().unwrap().rssi = rssi;
        }

        pub fn push_outcome(&mut self, outcome: TxOutcome) {
            self.0.lock().unwrap().outcomes.push_back(outcome);
        }

        /// Take frames sent since the last call
        pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
            core::mem::take(&mut self.0.lock().unwrap().sent)
        }

        /// Number of transmit attempts, including busy ones
        pub fn attempts(&self) -> usize {
            self.0.lock().unwrap().attempts
        }

        pub fn coding(&self) -> Option<Coding> {
            self.0.lock().unwrap().coding
        }
    }

    impl Phy for MockPhy {
        type Error = ();

        fn transmit(&mut self, data: &[u8]) -> Result<TxOutcome, ()> {
            let mut i = self.0.lock().unwrap();
            i.attempts += 1;

            let outcome = i.outcomes.pop_front().unwrap_or(TxOutcome::Sent);
            if outcome == TxOutcome::Sent {
                i.sent.push(data.to_vec());
            }

            Ok(outcome)
        }

        fn rssi(&mut self) -> Result<i16, ()> {
            Ok(self.0.lock().unwrap().rssi)
        }

        fn set_coding(&mut self, coding: Coding) -> Result<(), ()> {
            self.0.lock().unwrap().coding = Some(coding);
            Ok(())
        }

        fn is_active(&mut self) -> Result<bool, ()> {
            Ok(self.0.lock().unwrap().active)
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use radio::{BasicInfo, mock::*};

    use crate::frame::{Address, AckMode, Frame, FrameKind};
    use super::mock::MockPhy;
    use super::*;

    impl CodingRate for MockRadio {
        type Error = MockError;

        fn set_coding_rate(&mut self, _coding: Coding) -> Result<(), MockError> {
            Ok(())
        }
    }

    fn armed_phy(radio: &mut MockRadio) -> RadioPhy<MockRadio> {
        let mut phy = RadioPhy::new(radio.clone());

        radio.expect(&[
            Transaction::set_state(MockState::Idle, None),
            Transaction::start_receive(None),
        ]);
        phy.set_armed(true).unwrap();

        phy
    }

    #[test]
    fn radio_transmit_completes_on_poll() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let rx: FrameQueue<4> = FrameQueue::new(4);
        let mut radio = MockRadio::new(&[]);
        let mut phy = armed_phy(&mut radio);

        let data = [0x01, 0x11, 0x34, 0x12, 0xaa];

        // Start TX without waiting for completion
        radio.expect(&[
            Transaction::is_busy(Ok(false)),
            Transaction::start_transmit(data.to_vec(), None),
        ]);
        assert_eq!(phy.transmit(&data), Ok(TxOutcome::Sent));
        assert!(phy.is_transmitting());

        // Still on air
        radio.expect(&[
            Transaction::check_transmit(Ok(false)),
        ]);
        assert_eq!(phy.poll(&rx), Ok(false));

        radio.expect(&[
            Transaction::check_transmit(Ok(false)),
        ]);
        assert_eq!(phy.transmit(&data), Ok(TxOutcome::BusyTransmitting));

        // Complete and return to receive
        radio.expect(&[
            Transaction::check_transmit(Ok(true)),
            Transaction::start_receive(None),
        ]);
        assert_eq!(phy.poll(&rx), Ok(false));
        assert!(!phy.is_transmitting());
        assert!(rx.is_empty());
    }

    #[test]
    fn radio_busy_channel() {
        let mut radio = MockRadio::new(&[]);
        let mut phy = armed_phy(&mut radio);

        radio.expect(&[
            Transaction::is_busy(Ok(true)),
        ]);
        assert_eq!(phy.transmit(&[0x01, 0x11, 0x34, 0x12]), Ok(TxOutcome::BusyReceiving));
        assert!(!phy.is_transmitting());
    }

    #[test]
    fn radio_receive_enqueues_with_rssi() {
        let rx: FrameQueue<4> = FrameQueue::new(4);
        let mut radio = MockRadio::new(&[]);
        let mut phy = armed_phy(&mut radio);

        let frame = Frame::data(Address::new(0x11, 0x1234), Address::BROADCAST, FrameKind::Tracking, &[1, 2], AckMode::None).unwrap();
        let raw: Vec<u8> = (&frame).into();

        radio.expect(&[
            Transaction::check_receive(true, Ok(false)),
        ]);
        assert_eq!(phy.poll(&rx), Ok(false));

        radio.expect(&[
            Transaction::check_receive(true, Ok(true)),
            Transaction::get_received(Ok((raw, BasicInfo::new(-97, 0)))),
            Transaction::start_receive(None),
        ]);
        assert_eq!(phy.poll(&rx), Ok(true));

        let received = rx.pop_front().unwrap();
        assert_eq!(received, frame);
        assert_eq!(received.rssi, -97);
        assert_eq!(phy.rssi(), Ok(-97));
    }

    #[test]
    fn disarmed_radio_is_not_polled() {
        let rx: FrameQueue<4> = FrameQueue::new(4);
        let radio = MockRadio::new(&[]);
        let mut phy = RadioPhy::new(radio.clone());

        assert_eq!(phy.poll(&rx), Ok(false));
        assert_eq!(phy.transmit(&[0x01, 0x11, 0x34, 0x12]), Ok(TxOutcome::BusyTransmitting));
        assert_eq!(phy.is_active(), Ok(false));
    }

    #[test]
    fn receive_frame_samples_rssi() {
        let rx: FrameQueue<4> = FrameQueue::new(4);
        let mut phy = MockPhy::new();
        phy.set_rssi(-101);

        assert_eq!(receive_frame(&mut phy, &rx, &[0x01, 0x11, 0x34, 0x12]), Ok(true));
        assert_eq!(rx.pop_front().unwrap().rssi, -101);
    }
}
