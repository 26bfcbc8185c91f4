//! Frame queues shared between the receive notification and the MAC tick
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;
use log::{debug, trace, warn};

use crate::Ts;
use crate::frame::{Address, Frame, FrameKind};
use crate::timer::reached;

/// Handle to a frame held in a [`FrameQueue`]
///
/// Handles are never reused while the queue is live, once the frame is
/// removed every lookup through a stale handle returns `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameId(u32);

/// Queue insertion errors, returning the rejected frame to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Queue at capacity
    Full(Frame),
    /// A frame to the same destination is already awaiting acknowledgement
    DuplicateAckPending(Frame),
}

impl QueueError {
    /// Fetch the rejected frame
    pub fn into_frame(self) -> Frame {
        match self {
            QueueError::Full(f) | QueueError::DuplicateAckPending(f) => f,
        }
    }
}

#[derive(Debug)]
struct Entry {
    id: FrameId,
    frame: Frame,
}

#[derive(Debug)]
struct Inner<const N: usize> {
    capacity: usize,
    next_id: u32,
    entries: Vec<Entry, N>,
}

impl <const N: usize> Inner<N> {
    fn position(&self, id: FrameId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Remove the entry at `index`, preserving the order of the rest
    fn remove_at(&mut self, index: usize) -> Option<Frame> {
        if index >= self.entries.len() {
            return None;
        }

        self.entries[index..].rotate_left(1);
        self.entries.pop().map(|e| e.frame)
    }
}

/// Ordered, capacity bounded frame queue
///
/// `N` is the fixed storage, `capacity` (at most `N`) bounds normal frames
/// and the remainder is headroom reserved for acknowledgements, which are
/// always pushed to the head of the queue.
///
/// Every operation runs inside a critical section so the queue may be
/// shared between an interrupt context and the MAC tick.
pub struct FrameQueue<const N: usize> {
    inner: Mutex<RefCell<Inner<N>>>,
}

impl <const N: usize> FrameQueue<N> {
    /// Create a new queue accepting `capacity` non-ACK frames
    ///
    /// `capacity` is clamped to the storage size `N`.
    pub const fn new(capacity: usize) -> Self {
        let capacity = if capacity > N { N } else { capacity };

        Self {
            inner: Mutex::new(RefCell::new(Inner{
                capacity,
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Number of frames accepted before non-ACK frames are rejected
    pub fn capacity(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).capacity)
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a frame to the queue
    ///
    /// ACKs go to the head and ignore `capacity`, everything else is
    /// appended. Frames requesting acknowledgement are rejected while a
    /// frame from the same source to the same destination is still
    /// awaiting one.
    pub fn enqueue(&self, frame: Frame) -> Result<FrameId, QueueError> {
        critical_section::with(|cs| {
            let mut q = self.inner.borrow_ref_mut(cs);

            let is_ack = frame.kind == FrameKind::Ack;

            if !is_ack && q.entries.len() >= q.capacity {
                return Err(QueueError::Full(frame));
            }

            if frame.ack.is_requested() {
                let pending = q.entries.iter().any(|e| {
                    e.frame.ack.is_requested()
                        && e.frame.source == frame.source
                        && e.frame.destination == frame.destination
                });
                if pending {
                    return Err(QueueError::DuplicateAckPending(frame));
                }
            }

            let id = FrameId(q.next_id);

            // Storage exhausted, only reachable by ACKs filling the headroom
            if let Err(e) = q.entries.push(Entry{ id, frame }) {
                warn!("Queue storage exhausted, dropping {}", e.frame.kind);
                return Err(QueueError::Full(e.frame));
            }
            q.next_id = q.next_id.wrapping_add(1);

            if is_ack {
                q.entries.rotate_right(1);
            }

            Ok(id)
        })
    }

    /// Find the first frame (in insertion order) due for transmission at `now`
    pub fn next_ready(&self, now: Ts) -> Option<FrameId> {
        critical_section::with(|cs| {
            self.inner.borrow_ref(cs).entries.iter()
                .find(|e| reached(now, e.frame.next_send_due))
                .map(|e| e.id)
        })
    }

    /// Remove and return the head of the queue
    pub fn pop_front(&self) -> Option<Frame> {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).remove_at(0)
        })
    }

    /// Fetch a copy of the head of the queue
    pub fn peek_front(&self) -> Option<Frame> {
        critical_section::with(|cs| {
            self.inner.borrow_ref(cs).entries.first().map(|e| e.frame.clone())
        })
    }

    /// Find a queued frame logically equal to `frame`
    pub fn find_equal(&self, frame: &Frame) -> Option<FrameId> {
        critical_section::with(|cs| {
            self.inner.borrow_ref(cs).entries.iter()
                .find(|e| e.frame == *frame)
                .map(|e| e.id)
        })
    }

    /// Fetch a copy of a queued frame
    pub fn get(&self, id: FrameId) -> Option<Frame> {
        self.with_frame(id, |f| f.clone())
    }

    /// Access a queued frame in place
    ///
    /// `f` runs inside the queue critical section and must not call back
    /// into this queue.
    pub fn with_frame<R>(&self, id: FrameId, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        critical_section::with(|cs| {
            let mut q = self.inner.borrow_ref_mut(cs);
            let index = q.position(id)?;
            Some(f(&mut q.entries[index].frame))
        })
    }

    /// Remove and drop a specific frame, returning whether it was present
    pub fn remove(&self, id: FrameId) -> bool {
        critical_section::with(|cs| {
            let mut q = self.inner.borrow_ref_mut(cs);
            match q.position(id) {
                Some(index) => q.remove_at(index).is_some(),
                None => false,
            }
        })
    }

    /// Remove every frame awaiting an acknowledgement from `destination`
    pub fn remove_acknowledged(&self, destination: Address) -> bool {
        critical_section::with(|cs| {
            let mut q = self.inner.borrow_ref_mut(cs);
            let mut found = false;

            let mut i = 0;
            while i < q.entries.len() {
                let f = &q.entries[i].frame;
                if f.ack.is_requested() && f.destination == destination {
                    let _ = q.remove_at(i);
                    found = true;
                } else {
                    i += 1;
                }
            }

            found
        })
    }

    /// Receive notification entry point
    ///
    /// Decodes a frame received by the PHY, stamps its signal strength and
    /// enqueues it. Frames which fail to decode or do not fit are dropped.
    pub fn frame_received(&self, data: &[u8], rssi: i16) -> bool {
        let mut frame = match Frame::decode(data) {
            Ok(f) => f,
            Err(e) => {
                debug!("Dropping undecodable frame ({} bytes): {:?}", data.len(), e);
                return false;
            }
        };
        frame.rssi = rssi;

        trace!("Received {} from {} at {} dBm", frame.kind, frame.source, rssi);

        match self.enqueue(frame) {
            Ok(_) => true,
            Err(e) => {
                warn!("RX queue rejected frame from {}", e.into_frame().source);
                false
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec as StdVec;

    use crate::frame::AckMode;
    use super::*;

    const ME: Address = Address::new(0x01, 0x0001);
    const PEER: Address = Address::new(0x02, 0x0002);
    const OTHER: Address = Address::new(0x03, 0x0003);

    fn data(n: u8) -> Frame {
        Frame::data(ME, Address::BROADCAST, FrameKind::Tracking, &[n], AckMode::None).unwrap()
    }

    fn drain<const N: usize>(q: &FrameQueue<N>) -> StdVec<Frame> {
        let mut v = StdVec::new();
        while let Some(f) = q.pop_front() {
            v.push(f);
        }
        v
    }

    #[test]
    fn capacity_bounds_non_ack() {
        let q: FrameQueue<6> = FrameQueue::new(4);

        for i in 0..4 {
            q.enqueue(data(i)).unwrap();
        }
        assert_eq!(q.len(), 4);

        match q.enqueue(data(9)) {
            Err(QueueError::Full(f)) => assert_eq!(f.payload(), &[9]),
            r => panic!("unexpected enqueue result: {:?}", r),
        }
        assert_eq!(q.len(), 4);

        // ACKs always admitted up to storage
        q.enqueue(Frame::new(ME, PEER, FrameKind::Ack)).unwrap();
        q.enqueue(Frame::new(ME, OTHER, FrameKind::Ack)).unwrap();
        assert_eq!(q.len(), 6);

        assert!(matches!(q.enqueue(Frame::new(ME, PEER, FrameKind::Ack)), Err(QueueError::Full(_))));
    }

    #[test]
    fn acks_go_to_head() {
        let q: FrameQueue<8> = FrameQueue::new(4);

        q.enqueue(data(1)).unwrap();
        q.enqueue(data(2)).unwrap();
        q.enqueue(Frame::new(ME, PEER, FrameKind::Ack)).unwrap();
        q.enqueue(data(3)).unwrap();

        let frames = drain(&q);
        let kinds: StdVec<_> = frames.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, &[FrameKind::Ack, FrameKind::Tracking, FrameKind::Tracking, FrameKind::Tracking]);
        assert_eq!(frames[1].payload(), &[1]);
        assert_eq!(frames[3].payload(), &[3]);
    }

    #[test]
    fn one_pending_ack_per_destination() {
        let q: FrameQueue<8> = FrameQueue::new(8);

        let first = Frame::data(ME, PEER, FrameKind::Message, b"a", AckMode::OneHop).unwrap();
        let second = Frame::data(ME, PEER, FrameKind::Message, b"b", AckMode::TwoHop).unwrap();
        let other = Frame::data(ME, OTHER, FrameKind::Message, b"c", AckMode::OneHop).unwrap();
        let unacked = Frame::data(ME, PEER, FrameKind::Message, b"d", AckMode::None).unwrap();

        q.enqueue(first).unwrap();
        assert!(matches!(q.enqueue(second), Err(QueueError::DuplicateAckPending(_))));
        q.enqueue(other).unwrap();
        q.enqueue(unacked).unwrap();

        assert_eq!(q.len(), 3);
    }

    #[test]
    fn next_ready_in_insertion_order() {
        let q: FrameQueue<8> = FrameQueue::new(8);

        let mut a = data(1);
        a.next_send_due = 300;
        let mut b = data(2);
        b.next_send_due = 200;
        let mut c = data(3);
        c.next_send_due = 100;

        let _ = q.enqueue(a).unwrap();
        let id_b = q.enqueue(b).unwrap();
        let id_c = q.enqueue(c).unwrap();

        assert_eq!(q.next_ready(50), None);
        assert_eq!(q.next_ready(150), Some(id_c));
        // Earliest deadline does not win, insertion order does
        assert_eq!(q.next_ready(250), Some(id_b));

        for now in [0, 99, 100, 199, 200, 299, 300, 1000] {
            if let Some(id) = q.next_ready(now) {
                let due = q.get(id).unwrap().next_send_due;
                assert!(due <= now);
            }
        }
    }

    #[test]
    fn next_ready_across_wrap() {
        let q: FrameQueue<4> = FrameQueue::new(4);

        let mut a = data(1);
        a.next_send_due = 5;
        let id = q.enqueue(a).unwrap();

        assert_eq!(q.next_ready(u32::MAX - 5), None);
        assert_eq!(q.next_ready(6), Some(id));
    }

    #[test]
    fn find_equal_returns_entry() {
        let q: FrameQueue<8> = FrameQueue::new(8);

        q.enqueue(data(1)).unwrap();
        let id = q.enqueue(data(2)).unwrap();

        let mut copy = data(2);
        copy.rssi = -40;
        assert_eq!(q.find_equal(&copy), Some(id));
        assert_eq!(q.find_equal(&data(7)), None);
    }

    #[test]
    fn stale_handles_are_invalid() {
        let q: FrameQueue<8> = FrameQueue::new(8);

        let a = q.enqueue(data(1)).unwrap();
        let b = q.enqueue(data(2)).unwrap();

        assert!(q.remove(a));
        assert!(!q.remove(a));
        assert_eq!(q.get(a), None);
        assert_eq!(q.with_frame(a, |f| f.rssi = 1), None);

        assert_eq!(q.get(b).unwrap().payload(), &[2]);

        // Removed slots are not handed out again
        let c = q.enqueue(data(3)).unwrap();
        assert_ne!(c, a);
    }

    #[test]
    fn remove_acknowledged_removes_all() {
        let q: FrameQueue<8> = FrameQueue::new(8);

        // Relayed frames from others to PEER may coexist with ours
        q.enqueue(Frame::data(ME, PEER, FrameKind::Message, b"a", AckMode::OneHop).unwrap()).unwrap();
        q.enqueue(Frame::data(OTHER, PEER, FrameKind::Message, b"b", AckMode::OneHop).unwrap()).unwrap();
        q.enqueue(Frame::data(ME, PEER, FrameKind::Message, b"c", AckMode::None).unwrap()).unwrap();
        q.enqueue(Frame::data(ME, OTHER, FrameKind::Message, b"d", AckMode::OneHop).unwrap()).unwrap();

        assert!(q.remove_acknowledged(PEER));
        assert_eq!(q.len(), 2);
        assert!(!q.remove_acknowledged(PEER));

        let left: StdVec<_> = drain(&q).iter().map(|f| f.payload()[0]).collect();
        assert_eq!(left, b"cd");
    }

    #[test]
    fn receive_decodes_and_stamps_rssi() {
        let q: FrameQueue<4> = FrameQueue::new(4);

        assert!(q.frame_received(&[0x41, 0x11, 0x34, 0x12, 0xaa], -72));
        assert!(!q.frame_received(&[0x41], -72));

        let f = q.pop_front().unwrap();
        assert_eq!(f.source, Address::new(0x11, 0x1234));
        assert_eq!(f.rssi, -72);
        assert!(q.is_empty());
    }

    #[test]
    fn receive_context_races_foreground() {
        use std::thread;
        use std::time::{Duration, Instant};

        static RX: FrameQueue<8> = FrameQueue::new(4);
        const COUNT: u16 = 500;

        // Receive context, retrying while the queue is full
        let producer = thread::spawn(|| {
            for i in 0..COUNT {
                let f = Frame::data(PEER, Address::BROADCAST, FrameKind::Tracking, &i.to_le_bytes(), AckMode::None).unwrap();
                let raw: StdVec<u8> = (&f).into();

                while !RX.frame_received(&raw, -80) {
                    thread::yield_now();
                }
            }
        });

        let deadline = Instant::now() + Duration::from_secs(30);
        let mut seen = StdVec::new();

        while seen.len() < COUNT as usize {
            assert!(RX.len() <= RX.capacity());

            match RX.pop_front() {
                Some(f) => seen.push(u16::from_le_bytes([f.payload()[0], f.payload()[1]])),
                None => thread::yield_now(),
            }

            assert!(Instant::now() < deadline, "receive stalled after {} frames", seen.len());
        }

        producer.join().unwrap();

        // Nothing lost, duplicated or reordered
        let expected: StdVec<u16> = (0..COUNT).collect();
        assert_eq!(seen, expected);
        assert!(RX.is_empty());
    }

    #[test]
    fn nested_critical_sections() {
        let q: FrameQueue<4> = FrameQueue::new(4);

        critical_section::with(|_cs| {
            q.enqueue(data(1)).unwrap();
            assert_eq!(q.len(), 1);
        });

        assert_eq!(q.pop_front().unwrap().payload(), &[1]);
    }
}
