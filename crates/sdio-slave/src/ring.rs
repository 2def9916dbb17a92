//! Const-generic staging ring for DMA transfers.
//!
//! `StagingRing<SLOTS, BYTES>` holds `SLOTS` fixed buffers of `BYTES` bytes.
//! The producer fills the slot at `wr_index`, then publishes it; the consumer
//! drains the slot at `rd_index`, then retires it. Indices run freely and are
//! reduced mod `SLOTS` on access, so `wr_index - rd_index` is the number of
//! published slots and never exceeds `SLOTS`.
//!
//! With `SLOTS == 2` this is the classic ping-pong pair: DMA fills one slot
//! while the CPU parses the other.
//!
//! # Constraints
//!
//! - Not interrupt-safe on its own; the engine keeps it behind its
//!   critical-section mutex.

/// Fixed ring of staging buffers.
pub struct StagingRing<const SLOTS: usize, const BYTES: usize> {
    slots: [[u8; BYTES]; SLOTS],
    /// Valid bytes in each slot.
    ends: [usize; SLOTS],
    wr_index: usize,
    rd_index: usize,
}

impl<const SLOTS: usize, const BYTES: usize> Default for StagingRing<SLOTS, BYTES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOTS: usize, const BYTES: usize> StagingRing<SLOTS, BYTES> {
    /// Create an empty ring.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [[0; BYTES]; SLOTS],
            ends: [0; SLOTS],
            wr_index: 0,
            rd_index: 0,
        }
    }

    /// Bytes per slot.
    #[must_use]
    pub const fn slot_bytes() -> usize {
        BYTES
    }

    /// Published slots not yet retired.
    #[must_use]
    pub const fn published(&self) -> usize {
        self.wr_index.wrapping_sub(self.rd_index)
    }

    /// `true` when every slot is published.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.published() >= SLOTS
    }

    /// `true` when nothing is published.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.published() == 0
    }

    /// Producer index (free-running).
    #[must_use]
    pub const fn wr_index(&self) -> usize {
        self.wr_index
    }

    /// Consumer index (free-running).
    #[must_use]
    pub const fn rd_index(&self) -> usize {
        self.rd_index
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: SLOTS > 0 for any usable ring
    const fn wrap(index: usize) -> usize {
        index % SLOTS
    }

    /// Position of the producer slot within the ring.
    #[must_use]
    pub const fn producer_slot(&self) -> usize {
        Self::wrap(self.wr_index)
    }

    /// Position of the consumer slot within the ring.
    #[must_use]
    pub const fn consumer_slot(&self) -> usize {
        Self::wrap(self.rd_index)
    }

    /// Slot being filled and its current end offset, or `None` when full.
    pub fn producer(&mut self) -> Option<(&mut [u8; BYTES], &mut usize)> {
        if self.is_full() {
            return None;
        }
        let i = Self::wrap(self.wr_index);
        let buf = self.slots.get_mut(i)?;
        let end = self.ends.get_mut(i)?;
        Some((buf, end))
    }

    /// Bytes already written into the producer slot.
    #[must_use]
    pub fn producer_end(&self) -> usize {
        if self.is_full() {
            return 0;
        }
        self.ends.get(Self::wrap(self.wr_index)).copied().unwrap_or(0)
    }

    /// Publish the producer slot. Returns `false` if the ring is full.
    pub fn publish(&mut self) -> bool {
        if self.is_full() {
            return false;
        }
        self.wr_index = self.wr_index.wrapping_add(1);
        true
    }

    /// Oldest published slot's valid bytes.
    #[must_use]
    pub fn consumer(&self) -> Option<&[u8]> {
        if self.is_empty() {
            return None;
        }
        let i = Self::wrap(self.rd_index);
        let end = *self.ends.get(i)?;
        self.slots.get(i)?.get(..end)
    }

    /// Retire the oldest published slot, clearing its end offset.
    pub fn retire(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        if let Some(end) = self.ends.get_mut(Self::wrap(self.rd_index)) {
            *end = 0;
        }
        self.rd_index = self.rd_index.wrapping_add(1);
        true
    }

    /// Drop all content and rewind both indices.
    pub fn reset(&mut self) {
        self.ends = [0; SLOTS];
        self.wr_index = 0;
        self.rd_index = 0;
    }
}
