// SPDX-FileCopyrightText: 2024 Nomadic Labs <contact@nomadic-labs.com>
// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Reservation for Load-Linked/Store-Conditional instructions
//!
//! A load-linked registers a reservation on the physical address it read.
//! A store-conditional succeeds only while a reservation covering its
//! address is still held. Every store-conditional, successful or not, drops
//! the reservation, so a processor holds at most one at a time.
//!
//! Setting a capability tag over the reserved location, or returning from an
//! exception, also drops it.

use crate::machine_state::bus::Address;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReservationSet {
    reservation: Option<Reservation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct Reservation {
    start: Address,
    size: u64,
}

impl Reservation {
    #[inline]
    fn overlaps(&self, start: Address, size: u64) -> bool {
        start < self.start.saturating_add(self.size) && self.start < start.saturating_add(size)
    }
}

/// Align `address` down to `size`, a power of two
const fn align_down(address: u64, size: u64) -> u64 {
    address & !(size - 1)
}

impl ReservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unset any reservation
    #[inline]
    pub fn reset(&mut self) {
        self.reservation = None;
    }

    /// Reserve the naturally aligned `size`-byte location containing `physical`.
    #[inline]
    pub fn set(&mut self, physical: Address, size: u64) {
        self.reservation = Some(Reservation {
            start: align_down(physical, size),
            size,
        });
    }

    /// Check whether the `size`-byte location at `physical` is reserved,
    /// dropping the reservation in any case.
    pub fn test_and_unset(&mut self, physical: Address, size: u64) -> bool {
        let reservation = self.reservation.take();
        reservation.is_some_and(|reservation| {
            reservation.start == align_down(physical, size) && reservation.size == size
        })
    }

    /// Drop the reservation if it overlaps `[start, start + size)`.
    pub fn invalidate_overlapping(&mut self, start: Address, size: u64) {
        if self
            .reservation
            .is_some_and(|reservation| reservation.overlaps(start, size))
        {
            self.reset();
        }
    }

    /// Start of the reserved location, if any
    pub fn reserved(&self) -> Option<Address> {
        self.reservation.map(|reservation| reservation.start)
    }
}

#[cfg(test)]
mod tests {
    use super::ReservationSet;

    #[test]
    fn store_conditional_consumes_reservation() {
        let mut set = ReservationSet::new();
        set.set(0x1004, 4);
        assert_eq!(set.reserved(), Some(0x1004));
        assert!(set.test_and_unset(0x1004, 4));
        assert!(!set.test_and_unset(0x1004, 4));
    }

    #[test]
    fn mismatched_store_conditional_fails_and_unsets() {
        let mut set = ReservationSet::new();
        set.set(0x1000, 8);
        assert!(!set.test_and_unset(0x1008, 8));
        assert_eq!(set.reserved(), None);

        set.set(0x1000, 8);
        assert!(!set.test_and_unset(0x1000, 4));
    }

    #[test]
    fn overlapping_invalidation() {
        let mut set = ReservationSet::new();
        set.set(0x1010, 8);

        set.invalidate_overlapping(0x1000, 0x10);
        assert_eq!(set.reserved(), Some(0x1010));

        set.invalidate_overlapping(0x1000, 0x20);
        assert_eq!(set.reserved(), None);
    }

    #[test]
    fn reservation_is_aligned() {
        let mut set = ReservationSet::new();
        set.set(0x1007, 8);
        assert_eq!(set.reserved(), Some(0x1000));
        assert!(set.test_and_unset(0x1000, 8));
    }
}
