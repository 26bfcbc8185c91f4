//! Neighbor table built from overheard traffic
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::Vec;
use log::debug;

use crate::Ts;
use crate::frame::Address;

/// Neighbor entry, address and last-seen time
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Neighbor {
    pub address: Address,
    pub last_seen: Ts,
}

/// Bounded table of recently heard addresses
///
/// Entries are kept in insertion order, which is also the eviction order
/// once the table reaches `capacity`.
#[derive(Debug, Clone)]
pub struct NeighborTable<const N: usize> {
    capacity: usize,
    entries: Vec<Neighbor, N>,
}

impl <const N: usize> NeighborTable<N> {
    /// Create a new table holding at most `capacity` (clamped to `N`) entries
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.min(N),
            entries: Vec::new(),
        }
    }

    /// Record traffic from `address` at `now`
    pub fn touch(&mut self, address: Address, now: Ts) {
        if let Some(n) = self.entries.iter_mut().find(|n| n.address == address) {
            n.last_seen = now;
            return;
        }

        if self.capacity == 0 {
            return;
        }

        // Too many neighbors, drop the oldest member
        if self.entries.len() >= self.capacity {
            self.entries.rotate_left(1);
            if let Some(old) = self.entries.pop() {
                debug!("Neighbor table full, evicting {}", old.address);
            }
        }

        debug!("New neighbor {} at {} ms", address, now);

        let _ = self.entries.push(Neighbor{ address, last_seen: now });
    }

    pub fn is_member(&self, address: Address) -> bool {
        self.entries.iter().any(|n| n.address == address)
    }

    /// Drop entries not heard from within `timeout_ms` of `now`
    pub fn prune(&mut self, now: Ts, timeout_ms: u32) {
        let mut i = 0;
        while i < self.entries.len() {
            if now.wrapping_sub(self.entries[i].last_seen) >= timeout_ms {
                debug!("Neighbor {} timed out", self.entries[i].address);

                self.entries[i..].rotate_left(1);
                let _ = self.entries.pop();
            } else {
                i += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=&Neighbor> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec as StdVec;

    use super::*;

    fn addr(n: u16) -> Address {
        Address::new(0x07, n)
    }

    #[test]
    fn touch_updates_existing() {
        let mut t: NeighborTable<4> = NeighborTable::new(4);

        t.touch(addr(1), 10);
        t.touch(addr(1), 20);

        assert_eq!(t.len(), 1);
        assert_eq!(t.iter().next().unwrap().last_seen, 20);
    }

    #[test]
    fn evicts_oldest_inserted() {
        let mut t: NeighborTable<8> = NeighborTable::new(3);

        t.touch(addr(1), 0);
        t.touch(addr(2), 1);
        t.touch(addr(3), 2);

        // Refreshing does not change the eviction order
        t.touch(addr(1), 3);
        t.touch(addr(4), 4);

        assert_eq!(t.len(), 3);
        assert!(!t.is_member(addr(1)));
        assert!(t.is_member(addr(2)));
        assert!(t.is_member(addr(4)));

        for i in 10..20 {
            t.touch(addr(i), i as Ts);
            assert!(t.len() <= 3);
        }
    }

    #[test]
    fn prune_ages_out() {
        let mut t: NeighborTable<8> = NeighborTable::new(8);

        t.touch(addr(1), 0);
        t.touch(addr(2), 500);
        t.touch(addr(3), 900);

        t.prune(1000, 400);

        let left: StdVec<_> = t.iter().map(|n| n.address).collect();
        assert_eq!(left, &[addr(3)]);
    }

    #[test]
    fn prune_is_idempotent() {
        let mut t: NeighborTable<8> = NeighborTable::new(8);

        for i in 0..6 {
            t.touch(addr(i), i as Ts * 100);
        }

        t.prune(700, 450);
        let first: StdVec<_> = t.iter().cloned().collect();
        t.prune(700, 450);
        let second: StdVec<_> = t.iter().cloned().collect();

        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn prune_across_wrap() {
        let mut t: NeighborTable<4> = NeighborTable::new(4);

        t.touch(addr(1), u32::MAX - 100);
        t.prune(50, 250);
        assert!(t.is_member(addr(1)));

        t.prune(200, 250);
        assert!(!t.is_member(addr(1)));
    }
}
