//! Per-direction transfer pipelines
//!
//! [`TxPipeline`] packs TX payloads into the staging ring, advertises the
//! next frame to the host and clocks it out when the host reads.
//! [`RxPipeline`] pulls a host write through the staging ring in chunks and
//! feeds the reassembler.
//!
//! Both run in the worker with the core lock held. The bus handle passed in
//! takes the interrupt-shared lock only around each register access.

use platform::{DmaChannel, SlaveBus};

use crate::channel::ChannelRegistry;
use crate::config::{DataPath, BLOCK_SIZE, MAX_CHANNELS, RX_CHUNK_BYTES, STAGING_SLOTS, TX_SLOT_BYTES};
use crate::error::{Result, SdioError};
use crate::fifo;
use crate::framer::{close_slot, FeedOutcome, FillOutcome, RxReassembler, TxFramer};
use crate::ring::StagingRing;

// ── TX ──────────────────────────────────────────────────────────────────────

/// Device → host pipeline.
///
/// A staged frame may be read across several host reads. The pipeline keeps
/// how many bytes the host has already taken and, after a short read,
/// advertises only what is left.
pub struct TxPipeline {
    ring: StagingRing<STAGING_SLOTS, TX_SLOT_BYTES>,
    framer: TxFramer,
    /// Nodes packed per channel into each ring slot, for credit release.
    packed: [[usize; MAX_CHANNELS]; STAGING_SLOTS],
    /// Length of the frame being delivered; 0 when none is.
    announced: usize,
    /// Bytes of that frame the host has read.
    completed: usize,
    /// The TX length register holds the unread remainder.
    advertised: bool,
    /// A host read is being clocked out.
    reading: bool,
    /// `completed` when the current host read started.
    read_from: usize,
    /// Blocks the current host read asked for.
    read_blocks: usize,
    /// Blocks of the current host read still to go.
    blocks_left: usize,
}

impl Default for TxPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPipeline {
    /// Empty pipeline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: StagingRing::new(),
            framer: TxFramer::new(),
            packed: [[0; MAX_CHANNELS]; STAGING_SLOTS],
            announced: 0,
            completed: 0,
            advertised: false,
            reading: false,
            read_from: 0,
            read_blocks: 0,
            blocks_left: 0,
        }
    }

    /// A frame is advertised or partly read.
    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.announced > 0
    }

    /// Blocks of the current host read not yet clocked out.
    #[must_use]
    pub const fn blocks_left(&self) -> usize {
        self.blocks_left
    }

    /// Bytes of the frame in flight the host has read so far.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.completed
    }

    /// Frames staged and not yet read.
    #[must_use]
    pub const fn staged(&self) -> usize {
        self.ring.published()
    }

    /// Pack queued payloads into free slots.
    ///
    /// Full slots are closed and published as they fill. A partially filled
    /// slot is only closed when the link is idle, so payloads arriving while
    /// the host is busy batch into the next frame.
    pub fn stage<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
    ) {
        loop {
            let idle = !self.in_flight() && self.ring.is_empty();
            let index = self.ring.producer_slot();
            let Some((buf, end)) = self.ring.producer() else {
                return;
            };
            let Some(packed) = self.packed.get_mut(index) else {
                return;
            };
            let outcome = self.framer.fill(reg, buf, end, packed);
            if *end == 0 {
                return;
            }
            let close = match outcome {
                FillOutcome::SlotFull => true,
                FillOutcome::Drained => idle,
            };
            if !close {
                return;
            }
            *end = close_slot(buf, *end);
            trace!("tx: staged frame of {} bytes", *end);
            self.ring.publish();
            if outcome == FillOutcome::Drained {
                return;
            }
        }
    }

    /// Advertise the unread part of the oldest staged frame. Nothing happens
    /// while a host read is running or the remainder is already advertised.
    /// Returns the block count written to the TX length register.
    pub fn announce<B: SlaveBus>(&mut self, bus: &mut B) -> Option<usize> {
        if self.reading || self.advertised {
            return None;
        }
        if self.announced == 0 {
            self.announced = self.ring.consumer()?.len();
            self.completed = 0;
        }
        let blocks = self
            .announced
            .saturating_sub(self.completed)
            .checked_div(BLOCK_SIZE)
            .filter(|&b| b > 0)?;
        #[allow(clippy::cast_possible_truncation)] // Safety: blocks <= TX_SLOT_BYTES / BLOCK_SIZE
        bus.set_tx_length(blocks as u32);
        self.advertised = true;
        debug!("tx: announced {} blocks at offset {}", blocks, self.completed);
        Some(blocks)
    }

    /// Host started reading `blocks`. Program the unread part of the frame
    /// into the FIFO.
    ///
    /// Returns `Ok(false)` when the host asked for more than is left (only
    /// what is left is sent). A shorter read is normal; the rest is
    /// advertised again once it completes.
    ///
    /// # Errors
    ///
    /// - [`SdioError::NoBuffer`] if no frame is staged
    /// - [`SdioError::HardwareTimeout`] if the controller stayed busy
    /// - [`SdioError::Dma`] if the DMA channel refused the transfer
    pub fn start<B: SlaveBus, D: DmaChannel>(
        &mut self,
        blocks: usize,
        bus: &mut B,
        dma: &mut D,
        path: DataPath,
    ) -> Result<bool> {
        bus.set_tx_length(0);
        self.advertised = false;
        let Some(frame) = self.ring.consumer() else {
            warn!("tx: host read {} blocks with nothing staged", blocks);
            return Err(SdioError::NoBuffer);
        };
        if self.announced == 0 {
            self.announced = frame.len();
            self.completed = 0;
        }
        let left = self.announced.saturating_sub(self.completed);
        let expected = left.checked_div(BLOCK_SIZE).unwrap_or(0);
        let matched = blocks <= expected;
        if !matched {
            warn!("tx: host read {} blocks, {} left", blocks, expected);
        }
        let bytes = blocks.saturating_mul(BLOCK_SIZE).min(left);
        let data = frame
            .get(self.completed..self.completed.saturating_add(bytes))
            .unwrap_or(&[]);
        bus.enable_tx_transaction();
        fifo::wait_idle(bus)?;
        match path {
            DataPath::Dma => dma.start_to_fifo(data).map_err(|_| SdioError::Dma)?,
            DataPath::CpuCopy => fifo::write_words(bus, data),
        }
        self.reading = true;
        self.read_from = self.completed;
        self.read_blocks = blocks;
        self.blocks_left = blocks;
        Ok(matched)
    }

    /// Block transfer finished with `remaining` still to go. Returns the
    /// per-channel node counts of the frame once its last byte is read.
    pub fn block_done(&mut self, remaining: usize) -> Option<[usize; MAX_CHANNELS]> {
        self.blocks_left = remaining;
        if !self.reading {
            return None;
        }
        let done = self.read_blocks.saturating_sub(remaining);
        self.completed = self
            .read_from
            .saturating_add(done.saturating_mul(BLOCK_SIZE))
            .min(self.announced);
        if remaining > 0 {
            return None;
        }
        self.reading = false;
        if self.completed < self.announced {
            debug!("tx: {} of {} bytes read", self.completed, self.announced);
            return None;
        }
        Some(self.retire())
    }

    /// Forget the host read after an abort. The frame stays staged, and the
    /// next [`announce`](Self::announce) advertises whatever is still unread.
    pub fn withdraw(&mut self) {
        self.advertised = false;
        self.reading = false;
        self.blocks_left = 0;
    }

    fn retire(&mut self) -> [usize; MAX_CHANNELS] {
        let index = self.ring.consumer_slot();
        let sent = self
            .packed
            .get_mut(index)
            .map(core::mem::take)
            .unwrap_or_default();
        self.ring.retire();
        self.announced = 0;
        self.completed = 0;
        self.advertised = false;
        sent
    }

    /// Drop everything staged. Payloads already packed sit on their finish
    /// lists and are reported by the caller's notify pass.
    pub fn reset(&mut self) {
        self.ring.reset();
        self.framer.reset();
        self.packed = [[0; MAX_CHANNELS]; STAGING_SLOTS];
        self.announced = 0;
        self.completed = 0;
        self.advertised = false;
        self.reading = false;
        self.read_from = 0;
        self.read_blocks = 0;
        self.blocks_left = 0;
    }
}

// ── RX ──────────────────────────────────────────────────────────────────────

/// Host → device pipeline.
pub struct RxPipeline {
    ring: StagingRing<STAGING_SLOTS, RX_CHUNK_BYTES>,
    reassembler: RxReassembler,
    /// Bytes the host declared for the write in progress.
    declared: usize,
    /// Bytes handed to DMA or read by the CPU.
    armed: usize,
    /// A DMA transfer into the producer slot is outstanding.
    dma_busy: bool,
    ended: bool,
    active: bool,
}

/// How a finished host write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxSummary {
    /// Payloads delivered to finish lists
    pub delivered: usize,
    /// Payloads dropped for lack of a destination
    pub skipped: usize,
    /// A half-copied payload was put back (stream cut short)
    pub truncated: bool,
}

impl Default for RxPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl RxPipeline {
    /// Idle pipeline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: StagingRing::new(),
            reassembler: RxReassembler::new(),
            declared: 0,
            armed: 0,
            dma_busy: false,
            ended: false,
            active: false,
        }
    }

    /// A host write is being received.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    fn begin(&mut self, bytes: usize) {
        self.ring.reset();
        self.declared = bytes;
        self.armed = 0;
        self.dma_busy = false;
        self.ended = false;
        self.active = true;
    }

    /// Start receiving a host write of `bytes` through DMA: arm the first
    /// chunk.
    ///
    /// # Errors
    ///
    /// [`SdioError::HardwareTimeout`] or [`SdioError::Dma`]; the write is
    /// abandoned and the caller re-arms for the next command.
    pub fn start_dma<B: SlaveBus, D: DmaChannel>(
        &mut self,
        bytes: usize,
        bus: &B,
        dma: &mut D,
    ) -> Result<()> {
        self.begin(bytes);
        let armed = self.arm_next(bus, dma);
        if armed.is_err() {
            self.active = false;
        }
        armed
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: armed <= declared
    fn arm_next<B: SlaveBus, D: DmaChannel>(&mut self, bus: &B, dma: &mut D) -> Result<()> {
        if self.dma_busy || self.ended || self.armed >= self.declared {
            return Ok(());
        }
        let chunk = (self.declared - self.armed).min(RX_CHUNK_BYTES);
        fifo::wait_idle(bus)?;
        let Some((buf, end)) = self.ring.producer() else {
            return Ok(());
        };
        let Some(dst) = buf.get_mut(..chunk) else {
            return Ok(());
        };
        dma.start_from_fifo(dst).map_err(|_| SdioError::Dma)?;
        *end = chunk;
        self.armed += chunk;
        self.dma_busy = true;
        Ok(())
    }

    /// A DMA chunk landed. Publishes it, arms the next one, and parses
    /// everything available. Returns a summary once the host write is done.
    ///
    /// # Errors
    ///
    /// Arming the next chunk failed; the write is cut short and the summary
    /// is lost, the caller re-arms for the next command.
    pub fn chunk_done<B: SlaveBus, D: DmaChannel, const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
        bus: &B,
        dma: &mut D,
    ) -> Result<Option<RxSummary>> {
        if !self.active || !self.dma_busy {
            warn!("rx: stray dma completion");
            return Ok(None);
        }
        self.dma_busy = false;
        self.ring.publish();
        let armed = self.arm_next(bus, dma);
        self.parse(reg);
        if let Err(e) = armed {
            self.finish(reg);
            return Err(e);
        }
        if self.ended || (self.armed >= self.declared && !self.dma_busy) {
            if self.dma_busy {
                stop(dma);
                self.dma_busy = false;
            }
            return Ok(Some(self.finish(reg)));
        }
        Ok(None)
    }

    /// Receive a whole host write of `bytes` with CPU FIFO reads.
    pub fn receive_cpu<B: SlaveBus, const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
        bus: &mut B,
        bytes: usize,
    ) -> RxSummary {
        self.begin(bytes);
        while !self.ended && self.armed < self.declared {
            let chunk = self.declared.saturating_sub(self.armed).min(RX_CHUNK_BYTES);
            let Some((buf, end)) = self.ring.producer() else {
                break;
            };
            let Some(dst) = buf.get_mut(..chunk) else {
                break;
            };
            fifo::read_words(bus, dst);
            *end = chunk;
            self.armed = self.armed.saturating_add(chunk);
            self.ring.publish();
            self.parse(reg);
        }
        self.finish(reg)
    }

    fn parse<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
    ) {
        while let Some(chunk) = self.ring.consumer() {
            if !self.ended && self.reassembler.feed(reg, chunk) == FeedOutcome::PacketEnd {
                self.ended = true;
            }
            self.ring.retire();
        }
    }

    fn finish<const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
    ) -> RxSummary {
        let truncated = self.reassembler.abandon(reg);
        if truncated {
            warn!("rx: stream ended inside a payload");
        }
        let summary = RxSummary {
            delivered: self.reassembler.take_delivered(),
            skipped: self.reassembler.take_skipped(),
            truncated,
        };
        self.ring.reset();
        self.active = false;
        self.dma_busy = false;
        summary
    }

    /// Abort the host write in progress, if any. Returns `true` if a
    /// half-copied payload was put back.
    pub fn abort<D: DmaChannel, const NODES: usize, const BYTES: usize>(
        &mut self,
        reg: &mut ChannelRegistry<NODES, BYTES>,
        dma: &mut D,
    ) -> bool {
        if self.dma_busy {
            stop(dma);
        }
        let summary = self.finish(reg);
        summary.truncated
    }
}

fn stop<D: DmaChannel>(dma: &mut D) {
    if dma.stop().is_err() {
        warn!("rx: dma stop failed");
    }
}
