//! Fixed slab of report buffers shared by all virtual devices.
//!
//! Replies to the console (acknowledgements, status reports, memory-read
//! chunks) are formatted ahead of time and drained one per poll, so they
//! live in pooled slots rather than on the stack. The pool is a plain
//! free-list slab: checkout hands out a slot index, never a reference.

use thiserror::Error;

/// Number of report slots. A large memory read can claim up to 16 slots
/// at once, and four devices share the pool.
pub const POOL_SIZE: usize = 64;

/// Payload capacity per slot. The largest pooled report is the 23-byte
/// memory-read reply.
pub const REPORT_CAP: usize = 24;

/// One formatted input report awaiting transmission.
#[derive(Clone, Copy)]
pub struct Report {
    pub len: u8,
    pub data: [u8; REPORT_CAP],
}

impl Report {
    const EMPTY: Report = Report {
        len: 0,
        data: [0; REPORT_CAP],
    };

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

#[derive(Debug, Error)]
#[error("report pool exhausted")]
pub struct PoolExhausted;

pub struct ReportPool {
    slots: [Report; POOL_SIZE],
    free: [u8; POOL_SIZE],
    free_len: usize,
}

impl ReportPool {
    pub fn new() -> Self {
        let mut free = [0u8; POOL_SIZE];
        for (i, slot) in free.iter_mut().enumerate() {
            *slot = i as u8;
        }
        ReportPool {
            slots: [Report::EMPTY; POOL_SIZE],
            free,
            free_len: POOL_SIZE,
        }
    }

    /// Claims a zeroed slot, returning its index.
    pub fn checkout(&mut self) -> Result<usize, PoolExhausted> {
        if self.free_len == 0 {
            return Err(PoolExhausted);
        }
        self.free_len -= 1;
        let slot = self.free[self.free_len] as usize;
        self.slots[slot] = Report::EMPTY;
        Ok(slot)
    }

    /// Returns a slot to the free list.
    pub fn release(&mut self, slot: usize) {
        debug_assert!(self.free_len < POOL_SIZE);
        self.free[self.free_len] = slot as u8;
        self.free_len += 1;
    }

    pub fn get(&self, slot: usize) -> &Report {
        &self.slots[slot]
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut Report {
        &mut self.slots[slot]
    }

    pub fn free_count(&self) -> usize {
        self.free_len
    }
}

impl Default for ReportPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_and_release_restore_free_count() {
        let mut pool = ReportPool::new();
        assert_eq!(pool.free_count(), POOL_SIZE);

        let mut held = Vec::new();
        for _ in 0..10 {
            held.push(pool.checkout().unwrap());
        }
        assert_eq!(pool.free_count(), POOL_SIZE - 10);

        for slot in held {
            pool.release(slot);
        }
        assert_eq!(pool.free_count(), POOL_SIZE);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut pool = ReportPool::new();
        for _ in 0..POOL_SIZE {
            pool.checkout().unwrap();
        }
        assert!(pool.checkout().is_err());
    }

    #[test]
    fn checkout_hands_out_zeroed_slots() {
        let mut pool = ReportPool::new();
        let slot = pool.checkout().unwrap();
        pool.get_mut(slot).data[0] = 0xAB;
        pool.get_mut(slot).len = 5;
        pool.release(slot);

        let again = pool.checkout().unwrap();
        assert_eq!(pool.get(again).len, 0);
        assert_eq!(pool.get(again).data[0], 0);
    }
}
