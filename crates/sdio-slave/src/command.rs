//! SD command decoding
//!
//! Only the two SDIO I/O commands matter to the transport: CMD52 (single
//! register access, control only) and CMD53 (block or byte data transfer).
//!
//! CMD53 argument layout:
//!
//! | bits  | field                                    |
//! |-------|------------------------------------------|
//! | 31    | R/W flag (1 = host writes to the device) |
//! | 30:28 | function number                          |
//! | 27    | block mode                               |
//! | 26    | op code (incrementing address)           |
//! | 25:9  | register address                         |
//! | 8:0   | block or byte count                      |

use crate::config::{BLOCK_SIZE, BYTE_MODE_MAX};

/// CMD52 index
pub const CMD52: u8 = 52;
/// CMD53 index
pub const CMD53: u8 = 53;

/// Data direction of a CMD53, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostOp {
    /// Host reads: device transmits.
    Read,
    /// Host writes: device receives.
    Write,
}

/// Decoded CMD53 argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cmd53(pub u32);

impl Cmd53 {
    /// Build an argument (used by tests and host-side tooling).
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // Safety: shifts of masked fields stay within 32 bits
    pub const fn new(op: HostOp, function: u8, block_mode: bool, address: u32, count: u16) -> Self {
        let rw = match op {
            HostOp::Write => 1u32 << 31,
            HostOp::Read => 0,
        };
        let func = ((function as u32) & 0x7) << 28;
        let block = if block_mode { 1u32 << 27 } else { 0 };
        let addr = (address & 0x1_FFFF) << 9;
        let cnt = (count as u32) & 0x1FF;
        Self(rw | func | block | (1 << 26) | addr | cnt)
    }

    /// Transfer direction.
    #[must_use]
    pub const fn op(self) -> HostOp {
        if self.0 & (1 << 31) != 0 {
            HostOp::Write
        } else {
            HostOp::Read
        }
    }

    /// Function number.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Safety: masked to 3 bits
    pub const fn function(self) -> u8 {
        ((self.0 >> 28) & 0x7) as u8
    }

    /// Block mode (otherwise byte mode).
    #[must_use]
    pub const fn block_mode(self) -> bool {
        self.0 & (1 << 27) != 0
    }

    /// Incrementing-address op code.
    #[must_use]
    pub const fn incrementing(self) -> bool {
        self.0 & (1 << 26) != 0
    }

    /// Register address.
    #[must_use]
    pub const fn address(self) -> u32 {
        (self.0 >> 9) & 0x1_FFFF
    }

    /// Raw 9-bit count field.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Safety: masked to 9 bits
    pub const fn count(self) -> u16 {
        (self.0 & 0x1FF) as u16
    }

    /// Bytes the transfer will move, or `None` for an open-ended block
    /// transfer (block count 0).
    #[must_use]
    pub fn bytes(self) -> Option<usize> {
        let count = usize::from(self.count());
        match (self.block_mode(), count) {
            (true, 0) => None,
            (true, n) => n.checked_mul(BLOCK_SIZE),
            (false, 0) => Some(BYTE_MODE_MAX),
            (false, n) => Some(n),
        }
    }

    /// Whole blocks the transfer spans.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // Safety: BLOCK_SIZE is a non-zero constant
    pub fn blocks(self) -> Option<usize> {
        self.bytes()
            .and_then(|b| platform::round_up_to_block(b, BLOCK_SIZE))
            .map(|b| b / BLOCK_SIZE)
    }
}

/// A latched command as seen by the interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// CMD52: control only, nothing for the data path.
    Control,
    /// CMD53 data transfer.
    Data(Cmd53),
    /// Anything else.
    Unknown(u8),
}

impl Command {
    /// Decode an index/argument pair.
    #[must_use]
    pub const fn decode(index: u8, argument: u32) -> Self {
        match index {
            CMD52 => Self::Control,
            CMD53 => Self::Data(Cmd53(argument)),
            other => Self::Unknown(other),
        }
    }
}
