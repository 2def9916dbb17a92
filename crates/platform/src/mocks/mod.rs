//! Mock implementations for testing
//!
//! Every mock is a thin handle onto shared state, so a test can keep a clone,
//! hand the other to the code under test, and then play the host side of the
//! bus: latch commands, feed the receive FIFO, raise interrupts and inspect
//! what the device transmitted.

#![cfg(any(test, feature = "std"))]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::vec::Vec;

use crate::dma::DmaChannel;
use crate::gpio::{EdgeInterrupt, InterruptMode, Pull};
use crate::sdio::{InterruptSource, InterruptStatus, SlaveBus};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── SDIO controller ─────────────────────────────────────────────────────────

/// Register-level state of the mock controller.
#[derive(Debug, Default)]
pub struct BusState {
    /// Pending interrupt sources
    pub status: InterruptStatus,
    /// Latched command index
    pub cmd_index: u8,
    /// Latched command argument
    pub cmd_arg: u32,
    /// Bytes written by the host, not yet consumed by the device
    pub to_device: VecDeque<u8>,
    /// Bytes the device pushed towards the host
    pub to_host: Vec<u8>,
    /// Last value passed to `set_tx_length`
    pub tx_length_blocks: u32,
    /// `enable_tx_transaction` calls
    pub tx_enables: usize,
    /// Busy flag returned to the device
    pub busy: bool,
    /// When set, `read_ready` never reports data
    pub read_stalled: bool,
    /// `arm_command` calls
    pub arm_count: usize,
    /// `reset_fifo` calls
    pub fifo_resets: usize,
    /// Controller configured and not shut down
    pub configured: bool,
}

/// Mock [`SlaveBus`].
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    /// Create a controller with empty FIFOs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the shared register state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut BusState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    /// Latch a command and raise "command response end".
    pub fn latch_command(&self, index: u8, argument: u32) {
        self.with_state(|s| {
            s.cmd_index = index;
            s.cmd_arg = argument;
            s.status.cmd_response_end = true;
        });
    }

    /// Raise "block transfer end" for one device-to-host block.
    pub fn raise_write_end(&self) {
        self.with_state(|s| s.status.write_end = true);
    }

    /// Queue host-to-device bytes in the receive FIFO.
    pub fn host_write(&self, bytes: &[u8]) {
        self.with_state(|s| s.to_device.extend(bytes.iter().copied()));
    }

    /// Take everything the device has transmitted so far.
    pub fn take_host_bytes(&self) -> Vec<u8> {
        self.with_state(|s| core::mem::take(&mut s.to_host))
    }

    /// Blocks the device currently advertises for reading.
    pub fn tx_length_blocks(&self) -> u32 {
        self.with_state(|s| s.tx_length_blocks)
    }

    /// Number of times the command path was re-armed.
    pub fn arm_count(&self) -> usize {
        self.with_state(|s| s.arm_count)
    }

    /// Number of FIFO resets.
    pub fn fifo_resets(&self) -> usize {
        self.with_state(|s| s.fifo_resets)
    }

    /// Force the busy flag.
    pub fn set_busy(&self, busy: bool) {
        self.with_state(|s| s.busy = busy);
    }

    /// Make the receive FIFO never report data.
    pub fn stall_reads(&self, stalled: bool) {
        self.with_state(|s| s.read_stalled = stalled);
    }
}

impl SlaveBus for MockBus {
    fn configure(&mut self) {
        self.with_state(|s| s.configured = true);
    }

    fn shutdown(&mut self) {
        self.with_state(|s| {
            s.configured = false;
            s.status = InterruptStatus::NONE;
        });
    }

    fn interrupt_status(&self) -> InterruptStatus {
        self.with_state(|s| s.status)
    }

    fn clear_interrupt(&mut self, source: InterruptSource) {
        self.with_state(|s| match source {
            InterruptSource::CmdResponseEnd => s.status.cmd_response_end = false,
            InterruptSource::WriteEnd => s.status.write_end = false,
            InterruptSource::DataReceived => s.status.data_received = false,
        });
    }

    fn command_index(&self) -> u8 {
        self.with_state(|s| s.cmd_index)
    }

    fn command_argument(&self) -> u32 {
        self.with_state(|s| s.cmd_arg)
    }

    fn arm_command(&mut self) {
        self.with_state(|s| s.arm_count = s.arm_count.saturating_add(1));
    }

    fn reset_fifo(&mut self) {
        self.with_state(|s| {
            s.to_device.clear();
            s.fifo_resets = s.fifo_resets.saturating_add(1);
        });
    }

    fn set_tx_length(&mut self, blocks: u32) {
        self.with_state(|s| s.tx_length_blocks = blocks);
    }

    fn enable_tx_transaction(&mut self) {
        self.with_state(|s| s.tx_enables = s.tx_enables.saturating_add(1));
    }

    fn is_busy(&self) -> bool {
        self.with_state(|s| s.busy)
    }

    fn read_ready(&self) -> bool {
        self.with_state(|s| !s.read_stalled && s.to_device.len() >= 4)
    }

    fn read_word(&mut self) -> u32 {
        self.with_state(|s| {
            let mut word = [0u8; 4];
            for byte in &mut word {
                *byte = s.to_device.pop_front().unwrap_or(0);
            }
            u32::from_le_bytes(word)
        })
    }

    fn write_ready(&self) -> bool {
        true
    }

    fn write_word(&mut self, word: u32) {
        self.with_state(|s| s.to_host.extend_from_slice(&word.to_le_bytes()));
    }
}

// ── DMA ─────────────────────────────────────────────────────────────────────

/// Error injected by [`MockDma::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockDmaError;

#[derive(Debug, Default)]
struct DmaState {
    remaining: usize,
    completion_pending: bool,
    starts: usize,
    stops: usize,
    fail_next: bool,
    lengths: Vec<usize>,
}

/// Mock [`DmaChannel`] moving bytes through a [`MockBus`] FIFO.
///
/// Transfers complete synchronously inside `start_*`; the test then delivers
/// the completion interrupt after checking [`take_completion`].
///
/// [`take_completion`]: MockDma::take_completion
#[derive(Debug, Clone)]
pub struct MockDma {
    bus: MockBus,
    state: Arc<Mutex<DmaState>>,
}

impl MockDma {
    /// Create a channel attached to `bus`.
    pub fn new(bus: &MockBus) -> Self {
        Self {
            bus: bus.clone(),
            state: Arc::new(Mutex::new(DmaState::default())),
        }
    }

    /// Returns `true` once per finished transfer.
    pub fn take_completion(&self) -> bool {
        core::mem::take(&mut lock(&self.state).completion_pending)
    }

    /// Transfers started so far.
    pub fn starts(&self) -> usize {
        lock(&self.state).starts
    }

    /// `stop` calls so far.
    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }

    /// Lengths of every transfer started, oldest first.
    pub fn lengths(&self) -> Vec<usize> {
        lock(&self.state).lengths.clone()
    }

    /// Make the next `start_*` call fail.
    pub fn fail_next(&self) {
        lock(&self.state).fail_next = true;
    }

    fn begin(&self, len: usize) -> Result<(), MockDmaError> {
        let mut st = lock(&self.state);
        if core::mem::take(&mut st.fail_next) {
            return Err(MockDmaError);
        }
        st.starts = st.starts.saturating_add(1);
        st.lengths.push(len);
        Ok(())
    }

    fn finish(&self, remaining: usize) {
        let mut st = lock(&self.state);
        st.remaining = remaining;
        st.completion_pending = remaining == 0;
    }
}

impl DmaChannel for MockDma {
    type Error = MockDmaError;

    fn start_to_fifo(&mut self, src: &[u8]) -> Result<(), Self::Error> {
        self.begin(src.len())?;
        self.bus.with_state(|s| s.to_host.extend_from_slice(src));
        self.finish(0);
        Ok(())
    }

    fn start_from_fifo(&mut self, dst: &mut [u8]) -> Result<(), Self::Error> {
        self.begin(dst.len())?;
        let copied = self.bus.with_state(|s| {
            let mut n = 0usize;
            for slot in dst.iter_mut() {
                match s.to_device.pop_front() {
                    Some(byte) => {
                        *slot = byte;
                        n = n.saturating_add(1);
                    }
                    None => break,
                }
            }
            n
        });
        self.finish(dst.len().saturating_sub(copied));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        let mut st = lock(&self.state);
        st.stops = st.stops.saturating_add(1);
        st.remaining = 0;
        st.completion_pending = false;
        Ok(())
    }

    fn remaining(&self) -> usize {
        lock(&self.state).remaining
    }
}

// ── GPIO ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PinShared {
    level: bool,
    interrupt: Option<InterruptMode>,
    pull: Pull,
    writes: Vec<bool>,
}

/// Mock pin usable as input, output and edge-interrupt source.
#[derive(Debug, Clone)]
pub struct MockPin {
    shared: Arc<Mutex<PinShared>>,
}

impl Default for MockPin {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MockPin {
    /// Create a pin at the given level.
    pub fn new(high: bool) -> Self {
        Self {
            shared: Arc::new(Mutex::new(PinShared {
                level: high,
                interrupt: None,
                pull: Pull::None,
                writes: Vec::new(),
            })),
        }
    }

    /// Drive the level as an external device would.
    pub fn drive(&self, high: bool) {
        lock(&self.shared).level = high;
    }

    /// Current level.
    pub fn level(&self) -> bool {
        lock(&self.shared).level
    }

    /// Edge interrupt currently enabled, if any.
    pub fn interrupt(&self) -> Option<InterruptMode> {
        lock(&self.shared).interrupt
    }

    /// Current pull configuration.
    pub fn pull(&self) -> Pull {
        lock(&self.shared).pull
    }

    /// Every level written through `OutputPin`, oldest first.
    pub fn writes(&self) -> Vec<bool> {
        lock(&self.shared).writes.clone()
    }

    fn write(&self, high: bool) {
        let mut sh = lock(&self.shared);
        sh.level = high;
        sh.writes.push(high);
    }
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::InputPin for MockPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level())
    }
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true);
        Ok(())
    }
}

impl EdgeInterrupt for MockPin {
    fn enable_interrupt(&mut self, mode: InterruptMode) -> Result<(), Self::Error> {
        lock(&self.shared).interrupt = Some(mode);
        Ok(())
    }

    fn disable_interrupt(&mut self) -> Result<(), Self::Error> {
        lock(&self.shared).interrupt = None;
        Ok(())
    }

    fn set_pull(&mut self, pull: Pull) -> Result<(), Self::Error> {
        lock(&self.shared).pull = pull;
        Ok(())
    }
}
