//! SDIO slave transport engine
//!
//! Multiplexes up to [`config::MAX_CHANNELS`] logical channels per direction
//! over one SDIO slave controller. Each host read or write (CMD53) carries a
//! packet frame of payload records; this crate frames outgoing payloads,
//! reassembles incoming ones, and hands buffers back to channel owners.
//!
//! # Architecture
//!
//! ```text
//! Application ── channel API (init, submit, free/ongoing/finish lists)
//!         ↓
//! SdioSlave driver ── event queue ◀── interrupt handlers
//!         ↓
//! Pipelines (staging rings) ── Framer / Reassembler
//!         ↓
//! Channel registry ── Node arena
//!         ↓
//! platform traits (SlaveBus, DmaChannel, GPIO)
//! ```
//!
//! # Modules
//!
//! - [`pool`] - index-addressed node arena and lists
//! - [`channel`] - per-(channel, direction) free/ongoing/finish lists
//! - [`wire`] - payload descriptor pack/unpack
//! - [`framer`] - TX packing and RX reassembly
//! - [`ring`] - staging ring for DMA transfers
//! - [`pipeline`] - per-direction transfer pipelines
//! - [`command`] - CMD52/CMD53 decode
//! - [`protocol`] - bus state machine and worker events
//! - [`driver`] - the engine
//! - [`handshake`] - optional wake/sleep GPIO handshake
//!
//! # Features
//!
//! - `defmt`: log through defmt and derive `defmt::Format`
//! - `tracing`: log through tracing (desktop)

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() outside the fatal module
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Must come first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub mod channel;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
mod fatal;
pub mod fifo;
pub mod framer;
pub mod handshake;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod ring;
pub mod semaphore;
pub mod wire;

pub use channel::{ChannelCallback, ChannelId, ChannelKey, Direction};
pub use config::{DataPath, DriverConfig};
pub use driver::{DriverStats, SdioSlave};
pub use error::{Result, SdioError};
pub use handshake::{HandshakeConfig, HostNotifier, WakeHandshake};
pub use pool::{NodeChain, NodeId};
pub use protocol::BusState;
