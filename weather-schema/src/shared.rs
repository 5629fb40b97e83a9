use core::cell::Cell;
use critical_section::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A record together with the sequence number of the publish that stored it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub seq: u32,
    pub value: T,
}

impl<T: Serialize> Stamped<T> {
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], postcard::Error> {
        postcard::to_slice(self, buf)
    }
}

impl<T: DeserializeOwned> Stamped<T> {
    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[derive(Clone, Copy)]
struct Slot<T> {
    seq: u32,
    value: Option<T>,
}

/// Single record handed from an interrupt/receive context to the main loop.
///
/// Every access copies the whole record inside one critical section, so a
/// reader sees either the previous publish or the next one, never a mix.
pub struct Shared<T> {
    slot: Mutex<Cell<Slot<T>>>,
}

impl<T: Copy> Shared<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(Slot { seq: 0, value: None })),
        }
    }

    /// Replaces the record and returns its sequence number. Never returns 0.
    pub fn publish(&self, value: T) -> u32 {
        critical_section::with(|cs| {
            let cell = self.slot.borrow(cs);
            let seq = next_seq(cell.get().seq);
            cell.set(Slot {
                seq,
                value: Some(value),
            });
            seq
        })
    }

    /// Read-modify-write for producers that only touch a few fields.
    /// Starts from `T::default()` when nothing has been published yet.
    pub fn modify<F>(&self, f: F) -> u32
    where
        T: Default,
        F: FnOnce(&mut T),
    {
        critical_section::with(|cs| {
            let cell = self.slot.borrow(cs);
            let slot = cell.get();
            let mut value = slot.value.unwrap_or_default();
            f(&mut value);
            let seq = next_seq(slot.seq);
            cell.set(Slot {
                seq,
                value: Some(value),
            });
            seq
        })
    }

    pub fn latest(&self) -> Option<Stamped<T>> {
        let slot = critical_section::with(|cs| self.slot.borrow(cs).get());
        slot.value.map(|value| Stamped {
            seq: slot.seq,
            value,
        })
    }

    /// Latest record, unless the caller already consumed the publish `seq`.
    pub fn newer_than(&self, seq: u32) -> Option<Stamped<T>> {
        self.latest().filter(|stamped| stamped.seq != seq)
    }

    /// Drops the record. The sequence counter keeps running.
    pub fn clear(&self) {
        critical_section::with(|cs| {
            let cell = self.slot.borrow(cs);
            let seq = cell.get().seq;
            cell.set(Slot { seq, value: None });
        })
    }
}

impl<T: Copy> Default for Shared<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn next_seq(seq: u32) -> u32 {
    match seq.wrapping_add(1) {
        0 => 1,
        n => n,
    }
}
