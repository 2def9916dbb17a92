//! Transport configuration and constants
//!
//! Wire-level and sizing constants are compile-time; the choice of data path
//! per direction is made at runtime through [`DriverConfig`].

use embassy_time::Duration;

use crate::wire::PAYLOAD_HEADER_LEN;

// ── Bus geometry ────────────────────────────────────────────────────────────

/// Hardware block size in block-mode CMD53 transfers.
pub const BLOCK_SIZE: usize = 512;

/// Byte-mode CMD53 with a count field of 0 moves this many bytes.
pub const BYTE_MODE_MAX: usize = 512;

// ── Channels ────────────────────────────────────────────────────────────────

/// Logical channels per direction. Channel ids are `0..MAX_CHANNELS`.
pub const MAX_CHANNELS: usize = 4;

/// TX credits given to a channel initialised with externally supplied
/// buffers (`count == 0`).
pub const DEFAULT_TX_CREDITS: usize = 8;

/// Tasks that may wait on one TX channel's credits at the same time.
pub const CREDIT_WAITERS: usize = 4;

// ── Staging ring ────────────────────────────────────────────────────────────

/// Slots per direction in the DMA staging ring (2 = ping-pong).
pub const STAGING_SLOTS: usize = 2;

/// Size of one TX staging slot; the largest frame sent in one host read.
pub const TX_SLOT_BYTES: usize = 4 * BLOCK_SIZE;

/// Size of one RX DMA chunk.
pub const RX_CHUNK_BYTES: usize = BLOCK_SIZE;

/// Largest payload a TX channel may carry: a slot minus one descriptor and
/// the end-of-packet word.
pub const MAX_TX_PAYLOAD: usize = TX_SLOT_BYTES - 2 * PAYLOAD_HEADER_LEN;

// ── Worker queue ────────────────────────────────────────────────────────────

/// Depth of the ISR → worker event queue.
pub const EVENT_QUEUE_DEPTH: usize = 16;

// ── Busy-wait bounds ────────────────────────────────────────────────────────

/// Poll iterations the CPU-copy path waits for one FIFO word.
pub const FIFO_SPIN_LIMIT: u32 = 1000;

/// Poll iterations waited for the controller busy flag to drop before a
/// transfer is programmed.
pub const BUSY_SPIN_LIMIT: u32 = 1000;

// ── Handshake ───────────────────────────────────────────────────────────────

/// How long the host may forbid sleep without sending any data.
pub const DEFAULT_FORBID_SLEEP_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimum spacing of repeated liveness-failure log lines.
pub const LIVENESS_LOG_INTERVAL: Duration = Duration::from_secs(2);

// ── Runtime configuration ───────────────────────────────────────────────────

/// How payload bytes move between memory and the bus FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataPath {
    /// DMA engine, chunked through the staging ring.
    #[default]
    Dma,
    /// CPU word-by-word FIFO access under a bounded busy-wait.
    CpuCopy,
}

/// Driver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverConfig {
    /// Device → host data path
    pub tx_path: DataPath,
    /// Host → device data path
    pub rx_path: DataPath,
}

impl DriverConfig {
    /// Both directions on the CPU-copy path.
    #[must_use]
    pub const fn cpu_copy() -> Self {
        Self {
            tx_path: DataPath::CpuCopy,
            rx_path: DataPath::CpuCopy,
        }
    }
}

// Compile-time layout checks
const _: () = assert!(TX_SLOT_BYTES % BLOCK_SIZE == 0);
const _: () = assert!(RX_CHUNK_BYTES % PAYLOAD_HEADER_LEN == 0);
const _: () = assert!(STAGING_SLOTS >= 2);
const _: () = assert!(MAX_CHANNELS <= u8::MAX as usize);
