//! FANET frame object and wire encoding
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt;

use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use crate::Ts;

/// Maximum encoded frame length (LoRa PHY payload)
pub const MAX_FRAME_LEN: usize = 255;

/// Maximum header length (header, source, extended header, destination, signature)
pub const MAX_HEADER_LEN: usize = 1 + 3 + 1 + 3 + 4;

/// Maximum payload carried by a single frame
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - MAX_HEADER_LEN;

bitflags::bitflags!{
    /// Frame header byte
    struct HeaderFlags: u8 {
        /// Extended header follows the source address
        const EXTENDED = 0b1000_0000;
        /// Frame may be relayed by a neighbor
        const FORWARD  = 0b0100_0000;
        /// Frame type mask
        const TYPE     = 0b0011_1111;
    }
}

bitflags::bitflags!{
    /// Extended header byte
    struct ExtFlags: u8 {
        const ACK_ONE_HOP = 0b0100_0000;
        const ACK_TWO_HOP = 0b1000_0000;
        /// Acknowledgement mode mask
        const ACK         = 0b1100_0000;
        /// Destination address follows
        const UNICAST     = 0b0010_0000;
        /// Signature follows
        const SIGNATURE   = 0b0001_0000;
    }
}

/// FANET device address, manufacturer and device id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    pub manufacturer: u8,
    pub device: u16,
}

impl Address {
    /// Broadcast address
    pub const BROADCAST: Address = Address{ manufacturer: 0, device: 0 };

    pub const fn new(manufacturer: u8, device: u16) -> Self {
        Self { manufacturer, device }
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.manufacturer;
        LittleEndian::write_u16(&mut buf[1..3], self.device);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            manufacturer: buf[0],
            device: LittleEndian::read_u16(&buf[1..3]),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:04X}", self.manufacturer, self.device)
    }
}

/// Frame types
///
/// Everything other than [`FrameKind::Ack`] is application data, the MAC
/// only interprets acknowledgements. Kinds compare by their 6-bit wire
/// value, so `Other(3)` equals `Message`.
#[derive(Debug, Clone, Copy, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    Ack,
    Tracking,
    Name,
    Message,
    Service,
    Landmarks,
    RemoteConfig,
    GroundTracking,
    HwInfo,
    /// Unassigned 6-bit type (9..=63), decoding always yields the named kind
    Other(u8),
}

impl PartialEq for FrameKind {
    fn eq(&self, o: &Self) -> bool {
        u8::from(*self) == u8::from(*o)
    }
}

impl Eq for FrameKind {}

impl From<u8> for FrameKind {
    fn from(v: u8) -> Self {
        match v & HeaderFlags::TYPE.bits() {
            0 => FrameKind::Ack,
            1 => FrameKind::Tracking,
            2 => FrameKind::Name,
            3 => FrameKind::Message,
            4 => FrameKind::Service,
            5 => FrameKind::Landmarks,
            6 => FrameKind::RemoteConfig,
            7 => FrameKind::GroundTracking,
            8 => FrameKind::HwInfo,
            o => FrameKind::Other(o),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(k: FrameKind) -> u8 {
        match k {
            FrameKind::Ack => 0,
            FrameKind::Tracking => 1,
            FrameKind::Name => 2,
            FrameKind::Message => 3,
            FrameKind::Service => 4,
            FrameKind::Landmarks => 5,
            FrameKind::RemoteConfig => 6,
            FrameKind::GroundTracking => 7,
            FrameKind::HwInfo => 8,
            FrameKind::Other(o) => o & HeaderFlags::TYPE.bits(),
        }
    }
}

/// Acknowledgement request mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckMode {
    /// No acknowledgement requested
    None,
    /// Acknowledgement from the destination
    OneHop,
    /// Acknowledgement which may itself be relayed once
    TwoHop,
}

impl AckMode {
    pub fn is_requested(&self) -> bool {
        !matches!(self, AckMode::None)
    }
}

impl Default for AckMode {
    fn default() -> Self {
        AckMode::None
    }
}

/// Frame encoding errors
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// Output buffer cannot hold the encoded frame
    BufferTooSmall,
    /// Payload exceeds [`MAX_PAYLOAD_LEN`]
    PayloadTooLong,
}

/// Frame decoding errors
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    NotEnoughBytes,
    PayloadTooLong,
    /// Reserved acknowledgement mode
    InvalidAck,
}

/// Frame object represents a FANET MAC frame with owned storage
/// and the runtime metadata used for scheduling.
///
/// Equality only considers the logical frame (source, destination, kind
/// and payload), two copies of the same message received via different
/// paths compare equal.
#[derive(Clone, Debug)]
pub struct Frame {
    pub source: Address,
    pub destination: Address,
    pub kind: FrameKind,
    pub ack: AckMode,
    pub forward: bool,
    pub signature: Option<u32>,

    payload: Vec<u8, MAX_PAYLOAD_LEN>,

    /// Signal strength of the received copy
    pub rssi: i16,
    /// Remaining acknowledged transmissions
    pub retries_remaining: u8,
    /// Earliest time this frame may be (re)transmitted
    pub next_send_due: Ts,
}

impl PartialEq for Frame {
    fn eq(&self, o: &Self) -> bool {
        self.source == o.source &&
        self.destination == o.destination &&
        self.kind == o.kind &&
        self.payload() == o.payload()
    }
}

impl Frame {
    /// Create an empty frame
    pub fn new(source: Address, destination: Address, kind: FrameKind) -> Self {
        Self {
            source,
            destination,
            kind,
            ack: AckMode::None,
            forward: false,
            signature: None,
            payload: Vec::new(),
            rssi: 0,
            retries_remaining: 0,
            next_send_due: 0,
        }
    }

    /// Create a data frame with the provided payload
    pub fn data(source: Address, destination: Address, kind: FrameKind, data: &[u8], ack: AckMode) -> Result<Self, EncodeError> {
        let mut f = Self::new(source, destination, kind);
        f.set_payload(data)?;
        f.ack = ack;
        Ok(f)
    }

    /// Generate an ACK for the provided frame
    ///
    /// Two-hop requests that reached us through a relay (forward bit already
    /// cleared) are answered with a forwardable ACK so it can take the same
    /// path back.
    pub fn ack(request: &Frame, source: Address) -> Frame {
        let mut ack = Frame::new(source, request.source, FrameKind::Ack);

        ack.forward = match (request.ack, request.forward) {
            (AckMode::TwoHop, false) => true,
            (AckMode::TwoHop, true) => false,
            (AckMode::OneHop, _) | (AckMode::None, _) => false,
        };

        ack
    }

    pub fn is_unicast(&self) -> bool {
        !self.destination.is_broadcast()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, body: &[u8]) -> Result<(), EncodeError> {
        self.payload = Vec::from_slice(body).map_err(|_| EncodeError::PayloadTooLong)?;

        Ok(())
    }

    fn ext_flags(&self) -> ExtFlags {
        let mut ext = match self.ack {
            AckMode::None => ExtFlags::empty(),
            AckMode::OneHop => ExtFlags::ACK_ONE_HOP,
            AckMode::TwoHop => ExtFlags::ACK_TWO_HOP,
        };

        if self.is_unicast() {
            ext |= ExtFlags::UNICAST;
        }
        if self.signature.is_some() {
            ext |= ExtFlags::SIGNATURE;
        }

        ext
    }

    /// Length of the encoded frame in bytes
    pub fn encoded_len(&self) -> usize {
        let ext = self.ext_flags();

        let mut len = 4;
        if !ext.is_empty() {
            len += 1;
        }
        if ext.contains(ExtFlags::UNICAST) {
            len += 3;
        }
        if ext.contains(ExtFlags::SIGNATURE) {
            len += 4;
        }

        len + self.payload.len()
    }

    /// Encode the frame into the provided buffer, returning the encoded length
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        if buf.len() < self.encoded_len() {
            return Err(EncodeError::BufferTooSmall);
        }

        let ext = self.ext_flags();

        let mut header = HeaderFlags::from_bits_truncate(u8::from(self.kind));
        if self.forward {
            header |= HeaderFlags::FORWARD;
        }
        if !ext.is_empty() {
            header |= HeaderFlags::EXTENDED;
        }

        // Write header and source
        buf[0] = header.bits();
        self.source.encode(&mut buf[1..4]);
        let mut len = 4;

        // Write extended header
        if !ext.is_empty() {
            buf[len] = ext.bits();
            len += 1;

            if ext.contains(ExtFlags::UNICAST) {
                self.destination.encode(&mut buf[len..len+3]);
                len += 3;
            }

            if let Some(s) = self.signature {
                LittleEndian::write_u32(&mut buf[len..len+4], s);
                len += 4;
            }
        }

        // Write payload
        buf[len..len+self.payload.len()].copy_from_slice(&self.payload);
        len += self.payload.len();

        Ok(len)
    }

    /// Decode a frame from the provided buffer
    ///
    /// Runtime metadata (rssi, retries, schedule) is zeroed.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < 4 {
            return Err(DecodeError::NotEnoughBytes);
        }

        let header = HeaderFlags::from_bits_truncate(buf[0]);
        let mut f = Frame::new(Address::decode(&buf[1..4]), Address::BROADCAST, FrameKind::from(buf[0]));
        f.forward = header.contains(HeaderFlags::FORWARD);

        let mut len = 4;

        if header.contains(HeaderFlags::EXTENDED) {
            let ext = ExtFlags::from_bits_truncate(*buf.get(len).ok_or(DecodeError::NotEnoughBytes)?);
            len += 1;

            f.ack = match ext.bits() & ExtFlags::ACK.bits() {
                0 => AckMode::None,
                b if b == ExtFlags::ACK_ONE_HOP.bits() => AckMode::OneHop,
                b if b == ExtFlags::ACK_TWO_HOP.bits() => AckMode::TwoHop,
                _ => return Err(DecodeError::InvalidAck),
            };

            if ext.contains(ExtFlags::UNICAST) {
                if buf.len() < len + 3 {
                    return Err(DecodeError::NotEnoughBytes);
                }
                f.destination = Address::decode(&buf[len..len+3]);
                len += 3;
            }

            if ext.contains(ExtFlags::SIGNATURE) {
                if buf.len() < len + 4 {
                    return Err(DecodeError::NotEnoughBytes);
                }
                f.signature = Some(LittleEndian::read_u32(&buf[len..len+4]));
                len += 4;
            }
        }

        // Copy out the payload
        f.payload = Vec::from_slice(&buf[len..]).map_err(|_e| DecodeError::PayloadTooLong)?;

        Ok(f)
    }
}

#[cfg(any(test, feature = "std"))]
impl From<&Frame> for std::vec::Vec<u8> {
    fn from(f: &Frame) -> std::vec::Vec<u8> {
        let mut buff = [0u8; MAX_FRAME_LEN];
        match f.encode(&mut buff) {
            Ok(n) => buff[..n].to_vec(),
            Err(_) => std::vec::Vec::new(),
        }
    }
}
