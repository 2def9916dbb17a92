//! DMA abstraction layer
//!
//! One [`DmaChannel`] per transfer direction, already allocated and routed to
//! the SDIO data FIFO by the board layer. The engine programs a transfer and
//! later receives the completion through its own interrupt entry point.

/// DMA channel bound to the SDIO data FIFO.
///
/// # Buffer lifetime
///
/// `start_*` borrows the buffer only for the duration of the call. A hardware
/// implementation keeps the raw address, so the caller must keep the memory
/// in place and untouched until the completion interrupt (or [`stop`]). The
/// transport engine satisfies this by only ever passing slices of its own
/// staging slots, which live as long as the engine.
///
/// [`stop`]: DmaChannel::stop
pub trait DmaChannel {
    /// Error type
    type Error: core::fmt::Debug;

    /// Start a memory-to-FIFO transfer of `src`.
    fn start_to_fifo(&mut self, src: &[u8]) -> Result<(), Self::Error>;

    /// Start a FIFO-to-memory transfer filling `dst`.
    fn start_from_fifo(&mut self, dst: &mut [u8]) -> Result<(), Self::Error>;

    /// Abort any transfer in flight.
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// Bytes not yet transferred by the current transfer.
    fn remaining(&self) -> usize;

    /// Transfer finished (or nothing was started).
    fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

/// Round `len` up to a whole number of `block` sized units.
///
/// Returns `None` on overflow or when `block` is zero.
#[must_use]
pub fn round_up_to_block(len: usize, block: usize) -> Option<usize> {
    let blocks = len.checked_add(block.checked_sub(1)?)?.checked_div(block)?;
    blocks.checked_mul(block)
}
