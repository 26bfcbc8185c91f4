//! Application layer interface
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::frame::{Address, Frame, FrameKind};

/// Application collaborator, producing state broadcasts and consuming
/// received frames and delivery reports
pub trait App {
    /// Check whether the application wants to broadcast its state now
    fn is_broadcast_ready(&mut self, neighbors: usize) -> bool;

    /// Fetch the broadcast frame, called after `is_broadcast_ready`
    fn take_broadcast_frame(&mut self) -> Option<Frame>;

    /// Broadcast frame of `kind` was sent
    fn on_broadcast_success(&mut self, kind: FrameKind);

    /// Frame addressed to us (or broadcast) was received
    fn on_frame_delivered(&mut self, frame: &Frame);

    /// Acknowledged transmission to `address` completed or failed
    fn on_delivery_result(&mut self, success: bool, address: Address);
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use super::*;

    /// Events recorded by [`MockApp`]
    #[derive(Debug, Clone, PartialEq)]
    pub enum AppEvent {
        BroadcastSuccess(FrameKind),
        Delivered(Frame),
        DeliveryResult(bool, Address),
    }

    #[derive(Debug, Default)]
    struct Inner {
        broadcasts: VecDeque<Frame>,
        neighbors: Option<usize>,
        events: Vec<AppEvent>,
    }

    /// Mock application, broadcasting queued frames and recording callbacks
    #[derive(Clone, Debug)]
    pub struct MockApp(Arc<Mutex<Inner>>);

    impl MockApp {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(Inner::default())))
        }

        /// Queue a frame to be offered as the next broadcast
        pub fn push_broadcast(&mut self, frame: Frame) {
            self.0.lock().unwrap().broadcasts.push_back(frame);
        }

        /// Take events recorded since the last call
        pub fn take_events(&mut self) -> Vec<AppEvent> {
            core::mem::take(&mut self.0.lock().unwrap().events)
        }

        /// Neighbor count passed with the last broadcast check
        pub fn last_neighbors(&self) -> Option<usize> {
            self.0.lock().unwrap().neighbors
        }
    }

    impl App for MockApp {
        fn is_broadcast_ready(&mut self, neighbors: usize) -> bool {
            let mut i = self.0.lock().unwrap();
            i.neighbors = Some(neighbors);
            !i.broadcasts.is_empty()
        }

        fn take_broadcast_frame(&mut self) -> Option<Frame> {
            self.0.lock().unwrap().broadcasts.pop_front()
        }

        fn on_broadcast_success(&mut self, kind: FrameKind) {
            self.0.lock().unwrap().events.push(AppEvent::BroadcastSuccess(kind));
        }

        fn on_frame_delivered(&mut self, frame: &Frame) {
            self.0.lock().unwrap().events.push(AppEvent::Delivered(frame.clone()));
        }

        fn on_delivery_result(&mut self, success: bool, address: Address) {
            self.0.lock().unwrap().events.push(AppEvent::DeliveryResult(success, address));
        }
    }
}
