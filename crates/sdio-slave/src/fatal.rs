//! Unrecoverable conditions
//!
//! Each function logs and then panics. On firmware the panic handler turns
//! this into the abort signal; on a desktop host it surfaces as a test
//! failure or `#[should_panic]` success.
//! Continuing past any of these would let the engine write outside a buffer
//! or hand the same node to two owners.

#![allow(clippy::panic)] // Safety: this module is the crate's only sanctioned abort path

/// A received payload does not fit its destination node.
#[cold]
#[track_caller]
pub(crate) fn payload_overflow(channel: u8, len: usize, capacity: usize) -> ! {
    error!(
        "payload overflow: ch{} len {} > capacity {}",
        channel, len, capacity
    );
    panic!("payload exceeds destination capacity: ch{channel} len {len} > {capacity}");
}

/// An externally supplied list failed its integrity walk.
#[cold]
#[track_caller]
pub(crate) fn list_corruption(expected: usize, walked: usize) -> ! {
    error!("list corruption: expected {} nodes, walked {}", expected, walked);
    panic!("node list corrupted: expected {expected} nodes, walked {walked}");
}

/// A node was handed over by someone who does not own it.
#[cold]
#[track_caller]
pub(crate) fn foreign_node(index: u16) -> ! {
    error!("node {} pushed while owned by another list", index);
    panic!("node {index} pushed while owned by another list");
}

/// The FIFO did not produce or accept a word within the busy-wait bound.
#[cold]
#[track_caller]
pub(crate) fn fifo_timeout(spins: u32) -> ! {
    error!("fifo timeout after {} polls", spins);
    panic!("sdio fifo timeout after {spins} polls");
}
