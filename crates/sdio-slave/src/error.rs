//! Recoverable error type
//!
//! Only conditions a caller can act on are represented here. Corruption of
//! the node lists, oversized payloads and a stalled FIFO in the CPU-copy path
//! are not recoverable and abort through the crate's fatal paths instead.

/// Errors returned by the transport engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdioError {
    /// Channel id outside `0..MAX_CHANNELS`.
    #[error("invalid channel id {0}")]
    InvalidChannel(u8),

    /// Bad size, empty chain, or a node the caller does not own.
    #[error("invalid parameter")]
    InvalidParameter,

    /// Driver or channel not initialised (includes a second deinit).
    #[error("not initialised")]
    NotInitialized,

    /// Channel already initialised.
    #[error("already initialised")]
    AlreadyInitialized,

    /// Node arena exhausted.
    #[error("out of node memory")]
    NoMemory,

    /// List empty; retry after buffers come back.
    #[error("no buffer available")]
    NoBuffer,

    /// Node count disagrees with list traversal during teardown.
    #[error("node list corrupted")]
    ListCorruption,

    /// Controller stayed busy past the wait bound; operation aborted.
    #[error("hardware busy timeout")]
    HardwareTimeout,

    /// Engine state is held by another context; retry.
    #[error("engine busy")]
    Busy,

    /// No TX credit became available before the caller's deadline.
    #[error("timed out waiting for buffer credits")]
    Timeout,

    /// DMA channel refused the transfer.
    #[error("dma error")]
    Dma,

    /// A handshake GPIO reported an error.
    #[error("gpio error")]
    Gpio,
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, SdioError>;
