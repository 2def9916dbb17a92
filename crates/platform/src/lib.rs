//! Hardware collaborators for the SDIO slave transport engine
//!
//! This crate describes, as traits, everything the engine consumes from the
//! board: the SDIO controller, its two DMA channels and the GPIO lines of the
//! optional wake/sleep handshake. Mock implementations let the engine run and
//! be tested on a desktop host.
//!
//! # Architecture Layers
//!
//! ```text
//! Application (channel users)
//!         ↓
//! Transport engine (sdio-slave crate)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Hardware Layer (vendor HAL + PAC)
//! ```
//!
//! # Modules
//!
//! - [`sdio`] - slave controller: commands, interrupts, FIFO
//! - [`dma`] - per-direction DMA channel bound to the FIFO
//! - [`gpio`] - edge interrupts on top of `embedded-hal` digital pins
//! - `mocks` - host-side doubles (`std` feature or tests)
//!
//! # Features
//!
//! - `std`: Enable standard library support and the mocks
//! - `defmt`: Derive `defmt::Format` on public types

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod dma;
pub mod gpio;
pub mod sdio;

#[cfg(any(test, feature = "std"))]
pub mod mocks;

pub use dma::{round_up_to_block, DmaChannel};
pub use gpio::{edge_towards, EdgeInterrupt, InputPin, InterruptMode, OutputPin, PinState, Pull};
pub use sdio::{InterruptSource, InterruptStatus, SlaveBus};
