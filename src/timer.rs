//! FANET MAC Timer API
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::Ts;

/// Timer trait provides access to the monotonic millisecond counter
/// driving the MAC.
///
/// The counter is free-running and wraps at `Ts::MAX`, all comparisons
/// against it must go through [`is_before`] / [`reached`].
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn ticks_ms(&self) -> Ts;
}

/// Check whether `a` lies before `b` on the wrapping timeline
pub fn is_before(a: Ts, b: Ts) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Check whether `deadline` has been reached at `now`
pub fn reached(now: Ts, deadline: Ts) -> bool {
    !is_before(now, deadline)
}

/// Compute a deadline `delay_ms` after `now`
pub fn after(now: Ts, delay_ms: u32) -> Ts {
    now.wrapping_add(delay_ms)
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use crate::Ts;

    /// Mock timer implementation to assist with testing
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<Ts>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_ms(&mut self, val: Ts) {
            *self.0.lock().unwrap() = val;
        }

        pub fn inc(&mut self, ms: u32) {
            let mut v = self.0.lock().unwrap();
            *v = v.wrapping_add(ms);
        }

        pub fn val(&self) -> Ts {
            *self.0.lock().unwrap()
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_ms(&self) -> Ts {
            *self.0.lock().unwrap()
        }
    }
}
