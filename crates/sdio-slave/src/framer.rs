//! Packet framer
//!
//! [`TxFramer`] packs queued TX payloads from every channel into one staging
//! slot; [`RxReassembler`] walks received chunks and scatters payloads into
//! the RX channels' buffers. The wire layout lives in [`crate::wire`].
//!
//! # RX chunking
//!
//! Received data arrives in chunks (one DMA transfer or one CPU-copy burst).
//! A payload may straddle any number of chunk boundaries; the reassembler
//! remembers how far into the current record it is and resumes on the next
//! chunk. Headers are 4-byte aligned and chunks are multiples of 4 bytes, so
//! a header never straddles a boundary.

use crate::channel::{ChannelId, ChannelKey, ChannelRegistry, Direction};
use crate::config::{BLOCK_SIZE, MAX_CHANNELS};
use crate::fatal;
use crate::pool::{NodeId, Owner};
use crate::wire::{self, HeaderWord, PayloadHeader, PAYLOAD_HEADER_LEN};

// ── TX ──────────────────────────────────────────────────────────────────────

/// Result of one [`TxFramer::fill`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FillOutcome {
    /// Every TX ongoing list is empty.
    Drained,
    /// The next payload does not fit; close the slot and continue in a new one.
    SlotFull,
}

/// Round-robin TX packer.
#[derive(Debug, Default)]
pub struct TxFramer {
    next_channel: usize,
}

impl TxFramer {
    /// New packer starting at channel 0.
    #[must_use]
    pub const fn new() -> Self {
        Self { next_channel: 0 }
    }

    /// Copy queued payloads into `slot` starting at `*end`.
    ///
    /// Channels are served one payload at a time in rotation. Each packed
    /// node moves straight to its channel's finish list and is counted in
    /// `packed[channel]`; notification waits until the host has read the
    /// packet. Room for the end word is always kept free.
    #[allow(clippy::arithmetic_side_effects)] // Safety: offsets bounded by slot.len() via the room check
    pub fn fill<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
        slot: &mut [u8],
        end: &mut usize,
        packed: &mut [usize; MAX_CHANNELS],
    ) -> FillOutcome {
        loop {
            let mut progressed = false;
            for step in 0..MAX_CHANNELS {
                let ch = (self.next_channel + step) % MAX_CHANNELS;
                let Some(key) = tx_key(ch) else { continue };
                let Some(id) = reg.peek_ongoing(key) else {
                    continue;
                };
                let (len, subtype) = reg.arena().meta(id);
                let need = wire::record_len(len);
                let room = slot
                    .len()
                    .saturating_sub(*end)
                    .saturating_sub(PAYLOAD_HEADER_LEN);
                if need > room {
                    self.next_channel = ch;
                    return FillOutcome::SlotFull;
                }
                let Ok(id) = reg.pop_ongoing_node(key, Owner::Engine(key)) else {
                    continue;
                };
                #[allow(clippy::cast_possible_truncation)] // Safety: len <= node capacity <= u16::MAX
                let header = PayloadHeader {
                    len: len as u16,
                    channel: key.id.get(),
                    subtype,
                };
                write_record(slot, *end, &header, reg.arena().payload(id));
                *end += need;
                reg.finish_node(key, id);
                if let Some(n) = packed.get_mut(ch) {
                    *n += 1;
                }
                self.next_channel = (ch + 1) % MAX_CHANNELS;
                progressed = true;
                break;
            }
            if !progressed {
                return FillOutcome::Drained;
            }
        }
    }

    /// Rewind the rotation.
    pub fn reset(&mut self) {
        self.next_channel = 0;
    }
}

#[allow(clippy::cast_possible_truncation)] // Safety: ch < MAX_CHANNELS <= u8::MAX
fn tx_key(ch: usize) -> Option<ChannelKey> {
    ChannelId::new(ch as u8)
        .ok()
        .map(|id| ChannelKey::new(id, Direction::Tx))
}

#[allow(clippy::arithmetic_side_effects)] // Safety: caller checked at + record_len <= slot.len()
fn write_record(slot: &mut [u8], at: usize, header: &PayloadHeader, data: &[u8]) {
    let data_at = at + PAYLOAD_HEADER_LEN;
    let padded = wire::align4(data.len());
    if let Some(dst) = slot.get_mut(at..data_at) {
        dst.copy_from_slice(&header.pack());
    }
    if let Some(dst) = slot.get_mut(data_at..data_at + data.len()) {
        dst.copy_from_slice(data);
    }
    if let Some(pad) = slot.get_mut(data_at + data.len()..data_at + padded) {
        pad.fill(0);
    }
}

/// Terminate a packed slot: append the end word and zero-pad to a whole
/// number of blocks. Returns the frame length to transfer.
///
/// When the padding has room, the word after the end word carries the
/// record bytes in the frame (little-endian `u32`). The tail never adds a
/// block of its own.
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // Safety: end + 4 <= slot.len(), slot.len() is a block multiple
pub fn close_slot(slot: &mut [u8], end: usize) -> usize {
    let after_end = end + PAYLOAD_HEADER_LEN;
    if let Some(dst) = slot.get_mut(end..after_end) {
        dst.copy_from_slice(&wire::end_word());
    }
    let total = platform::round_up_to_block(after_end, BLOCK_SIZE)
        .unwrap_or(slot.len())
        .min(slot.len());
    if let Some(pad) = slot.get_mut(after_end..total) {
        pad.fill(0);
    }
    let length_at = after_end..after_end + PAYLOAD_HEADER_LEN;
    if length_at.end <= total {
        if let (Some(dst), Ok(len)) = (slot.get_mut(length_at), u32::try_from(end)) {
            dst.copy_from_slice(&len.to_le_bytes());
        }
    }
    total
}

// ── RX ──────────────────────────────────────────────────────────────────────

/// Result of feeding one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeedOutcome {
    /// Chunk consumed; the packet continues in the next chunk.
    NeedMore,
    /// End word, zero word, or a tail too short for a header was reached.
    PacketEnd,
}

#[derive(Debug, Clone, Copy)]
struct Partial {
    key: Option<ChannelKey>,
    node: Option<NodeId>,
    header: PayloadHeader,
    /// Record bytes (data plus alignment padding) consumed so far.
    consumed: usize,
}

impl Partial {
    fn padded(&self) -> usize {
        wire::align4(usize::from(self.header.len))
    }
}

/// RX stream reassembler.
#[derive(Debug, Default)]
pub struct RxReassembler {
    partial: Option<Partial>,
    skipped: usize,
    delivered: usize,
}

impl RxReassembler {
    /// Idle reassembler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            partial: None,
            skipped: 0,
            delivered: 0,
        }
    }

    /// A payload is half-copied.
    #[must_use]
    pub fn in_payload(&self) -> bool {
        self.partial.is_some()
    }

    /// Payloads dropped for lack of a destination since the last call.
    pub fn take_skipped(&mut self) -> usize {
        core::mem::take(&mut self.skipped)
    }

    /// Payloads delivered to finish lists since the last call.
    pub fn take_delivered(&mut self) -> usize {
        core::mem::take(&mut self.delivered)
    }

    /// Process one chunk of the packet stream.
    #[allow(clippy::arithmetic_side_effects)] // Safety: pos advances by at most the bytes left in chunk
    pub fn feed<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
        chunk: &[u8],
    ) -> FeedOutcome {
        let mut pos = 0usize;
        if let Some(partial) = self.partial.take() {
            pos = self.resume(reg, partial, chunk);
        }
        loop {
            if self.partial.is_some() {
                return FeedOutcome::NeedMore;
            }
            let rest = chunk.get(pos..).unwrap_or(&[]);
            if rest.is_empty() {
                return FeedOutcome::NeedMore;
            }
            let Some(word) = wire::unpack(rest) else {
                return FeedOutcome::PacketEnd;
            };
            let header = match word {
                HeaderWord::End => return FeedOutcome::PacketEnd,
                HeaderWord::Payload(h) => h,
            };
            pos += PAYLOAD_HEADER_LEN;
            let partial = self.open(reg, header);
            pos += self.resume(reg, partial, chunk.get(pos..).unwrap_or(&[]));
        }
    }

    /// Resolve the destination of a new record.
    fn open<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
        header: PayloadHeader,
    ) -> Partial {
        let key = ChannelId::new(header.channel)
            .ok()
            .map(|id| ChannelKey::new(id, Direction::Rx));
        let node = match key {
            Some(key) => match reg.pop_ongoing_node(key, Owner::Engine(key)) {
                Ok(node) => Some(node),
                Err(_) => {
                    warn!(
                        "rx ch{}: no buffer, skipping {} bytes",
                        header.channel, header.len
                    );
                    None
                }
            },
            None => {
                warn!(
                    "rx: unknown channel {}, skipping {} bytes",
                    header.channel, header.len
                );
                None
            }
        };
        if let (Some(key), Some(node)) = (key, node) {
            let capacity = reg
                .capacity(key)
                .unwrap_or(0)
                .min(reg.arena().capacity(node));
            if usize::from(header.len) > capacity {
                fatal::payload_overflow(header.channel, usize::from(header.len), capacity);
            }
        }
        Partial {
            key,
            node,
            header,
            consumed: 0,
        }
    }

    /// Copy as much of `partial` as `bytes` holds. Returns bytes consumed.
    #[allow(clippy::arithmetic_side_effects)] // Safety: consumed <= padded, copy range clamped to data len
    fn resume<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
        mut partial: Partial,
        bytes: &[u8],
    ) -> usize {
        let padded = partial.padded();
        let take = (padded - partial.consumed).min(bytes.len());
        let data_len = usize::from(partial.header.len);
        if let Some(node) = partial.node {
            let copy_end = (partial.consumed + take).min(data_len);
            if copy_end > partial.consumed {
                let n = copy_end - partial.consumed;
                let storage = reg.arena_mut().storage_mut(node);
                if let (Some(dst), Some(src)) = (
                    storage.get_mut(partial.consumed..copy_end),
                    bytes.get(..n),
                ) {
                    dst.copy_from_slice(src);
                }
            }
        }
        partial.consumed += take;
        if partial.consumed < padded {
            self.partial = Some(partial);
        } else {
            self.complete(reg, partial);
        }
        take
    }

    fn complete<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
        partial: Partial,
    ) {
        match (partial.key, partial.node) {
            (Some(key), Some(node)) => {
                reg.arena_mut().set_meta(
                    node,
                    usize::from(partial.header.len),
                    partial.header.subtype,
                );
                reg.finish_node(key, node);
                self.delivered = self.delivered.saturating_add(1);
            }
            _ => self.skipped = self.skipped.saturating_add(1),
        }
    }

    /// Drop a half-copied payload, returning its buffer to the front of its
    /// ongoing list so FIFO order is kept. Returns `true` if one was pending.
    pub fn abandon<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
    ) -> bool {
        let Some(partial) = self.partial.take() else {
            return false;
        };
        if let (Some(key), Some(node)) = (partial.key, partial.node) {
            reg.requeue_ongoing_front(key, node);
        }
        true
    }
}
