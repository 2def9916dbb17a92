//! Bus protocol state and worker events
//!
//! [`BusState`] tracks each direction through one CMD53 transaction:
//!
//! ```text
//! Idle ──init──▶ CmdWait ──cmd──▶ Response ──START_*──▶ RxActive / TxActive
//!                   ▲                                         │
//!                   └────────── BlockComplete ◀───────────────┘
//! ```
//!
//! The interrupt handler moves a direction from `CmdWait` to `Response` and
//! posts an [`Event`]; the worker drives the rest. [`ProtocolState`] rejects
//! transitions that skip steps and reports them so the caller can log a
//! desync instead of silently continuing.

use crate::channel::Direction;

/// Per-direction protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// Controller not configured.
    #[default]
    Idle,
    /// Armed for the next command.
    CmdWait,
    /// Data command latched, response sent, worker not yet started.
    Response,
    /// Receiving host data.
    RxActive,
    /// Transmitting to the host.
    TxActive,
    /// Last block of the transaction done.
    BlockComplete,
}

impl BusState {
    /// Whether `self → next` is a legal step.
    #[must_use]
    pub const fn can_step(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Idle)
                | (Self::Idle, Self::CmdWait)
                | (Self::CmdWait, Self::Response)
                | (Self::Response, Self::RxActive | Self::TxActive | Self::CmdWait)
                | (Self::RxActive | Self::TxActive, Self::BlockComplete)
                | (Self::BlockComplete, Self::CmdWait)
                | (Self::CmdWait, Self::CmdWait)
        )
    }
}

/// Both directions' states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolState {
    tx: BusState,
    rx: BusState,
}

impl ProtocolState {
    /// Both directions idle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tx: BusState::Idle,
            rx: BusState::Idle,
        }
    }

    /// Current state of `dir`.
    #[must_use]
    pub const fn get(&self, dir: Direction) -> BusState {
        match dir {
            Direction::Tx => self.tx,
            Direction::Rx => self.rx,
        }
    }

    /// Move `dir` to `next`. The move always happens; the return value says
    /// whether it was a legal step.
    pub fn step(&mut self, dir: Direction, next: BusState) -> bool {
        let slot = match dir {
            Direction::Tx => &mut self.tx,
            Direction::Rx => &mut self.rx,
        };
        let legal = slot.can_step(next);
        *slot = next;
        legal
    }

    /// Set both directions.
    pub fn set_all(&mut self, state: BusState) {
        self.tx = state;
        self.rx = state;
    }
}

/// Work posted from interrupt context to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Host announced a write of `bytes`; receive it.
    StartRead {
        /// Declared transfer size
        bytes: usize,
    },
    /// Host announced a read of `blocks`; transmit the staged frame.
    StartWrite {
        /// Declared block count
        blocks: usize,
    },
    /// One RX chunk landed in the staging ring.
    RxChunkDone,
    /// One TX block left the FIFO.
    WriteBlockDone {
        /// Blocks of the transaction still outstanding after this one
        remaining: usize,
    },
    /// The application queued TX data. Raised through the engine's TX wake
    /// signal rather than the interrupt queue, so repeated requests coalesce.
    WriteRequested,
}

impl Event {
    /// Short name for log lines.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartRead { .. } => "start-read",
            Self::StartWrite { .. } => "start-write",
            Self::RxChunkDone => "rx-chunk-done",
            Self::WriteBlockDone { .. } => "write-block-done",
            Self::WriteRequested => "write-requested",
        }
    }
}
