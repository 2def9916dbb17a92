//! CPU access to the data FIFO
//!
//! Used by the CPU-copy data path and for the pre-transfer busy check. Every
//! wait is a bounded poll; the FIFO waits are fatal when the bound runs out,
//! the busy wait reports [`SdioError::HardwareTimeout`] so the caller can
//! abort just the current transfer.

use platform::SlaveBus;

use crate::config::{BUSY_SPIN_LIMIT, FIFO_SPIN_LIMIT};
use crate::error::{Result, SdioError};
use crate::fatal;

/// Poll `ready` up to `limit` times.
fn spin_until(limit: u32, mut ready: impl FnMut() -> bool) -> bool {
    for _ in 0..limit {
        if ready() {
            return true;
        }
        core::hint::spin_loop();
    }
    ready()
}

/// Wait for the controller's busy flag to clear before programming a
/// transfer.
///
/// # Errors
///
/// [`SdioError::HardwareTimeout`] if it is still set after
/// [`BUSY_SPIN_LIMIT`] polls.
pub fn wait_idle<B: SlaveBus>(bus: &B) -> Result<()> {
    if spin_until(BUSY_SPIN_LIMIT, || !bus.is_busy()) {
        Ok(())
    } else {
        warn!("sdio busy after {} polls, transfer aborted", BUSY_SPIN_LIMIT);
        Err(SdioError::HardwareTimeout)
    }
}

/// Fill `dst` from the receive FIFO, one word at a time.
///
/// A trailing partial word is read whole and truncated.
pub fn read_words<B: SlaveBus>(bus: &mut B, dst: &mut [u8]) {
    for chunk in dst.chunks_mut(4) {
        if !spin_until(FIFO_SPIN_LIMIT, || bus.read_ready()) {
            fatal::fifo_timeout(FIFO_SPIN_LIMIT);
        }
        let word = bus.read_word().to_le_bytes();
        if let Some(src) = word.get(..chunk.len()) {
            chunk.copy_from_slice(src);
        }
    }
}

/// Push `src` into the transmit FIFO, one word at a time.
///
/// A trailing partial word is zero-padded.
pub fn write_words<B: SlaveBus>(bus: &mut B, src: &[u8]) {
    for chunk in src.chunks(4) {
        if !spin_until(FIFO_SPIN_LIMIT, || bus.write_ready()) {
            fatal::fifo_timeout(FIFO_SPIN_LIMIT);
        }
        let mut word = [0u8; 4];
        if let Some(dst) = word.get_mut(..chunk.len()) {
            dst.copy_from_slice(chunk);
        }
        bus.write_word(u32::from_le_bytes(word));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::mocks::MockBus;

    #[test]
    fn test_read_words_handles_partial_tail() {
        let mut bus = MockBus::new();
        bus.host_write(&[1, 2, 3, 4, 5, 6, 0, 0]);
        let mut dst = [0u8; 6];
        read_words(&mut bus, &mut dst);
        assert_eq!(dst, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_write_words_pads_tail() {
        let mut bus = MockBus::new();
        write_words(&mut bus, &[9, 8, 7, 6, 5]);
        assert_eq!(bus.take_host_bytes(), vec![9, 8, 7, 6, 5, 0, 0, 0]);
    }

    #[test]
    fn test_wait_idle_times_out_when_stuck_busy() {
        let bus = MockBus::new();
        assert_eq!(wait_idle(&bus), Ok(()));
        bus.set_busy(true);
        assert_eq!(wait_idle(&bus), Err(SdioError::HardwareTimeout));
    }

    #[test]
    #[should_panic(expected = "sdio fifo timeout")]
    fn test_stalled_fifo_is_fatal() {
        let mut bus = MockBus::new();
        bus.stall_reads(true);
        let mut dst = [0u8; 4];
        read_words(&mut bus, &mut dst);
    }
}
