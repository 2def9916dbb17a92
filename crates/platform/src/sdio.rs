//! SDIO slave controller abstraction
//!
//! The transport engine never touches controller registers directly. It sees
//! the controller through [`SlaveBus`]: latched command fields, a handful of
//! interrupt sources, the data FIFO and a few control strobes. Clock setup,
//! pin muxing and electrical configuration stay with the board layer.

/// Snapshot of the controller's pending interrupt sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptStatus {
    /// A command was received and its response has been sent.
    pub cmd_response_end: bool,
    /// One block of device-to-host data left the FIFO.
    pub write_end: bool,
    /// Host-to-device data is waiting in the FIFO.
    pub data_received: bool,
}

impl InterruptStatus {
    /// No source pending.
    pub const NONE: Self = Self {
        cmd_response_end: false,
        write_end: false,
        data_received: false,
    };

    /// `true` when any source is pending.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.cmd_response_end || self.write_end || self.data_received
    }
}

/// Individual interrupt source, used to acknowledge one flag at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptSource {
    /// Command response end
    CmdResponseEnd,
    /// Device-to-host block end
    WriteEnd,
    /// Host-to-device data available
    DataReceived,
}

/// SDIO slave controller as seen by the transport engine.
///
/// Word accessors move 32-bit little-endian words through the data FIFO.
/// Implementations must be usable from interrupt context: none of these
/// methods may block.
pub trait SlaveBus {
    /// Put the controller into slave mode and unmask the interrupt sources
    /// listed in [`InterruptSource`].
    fn configure(&mut self);

    /// Mask all interrupts and release the controller.
    fn shutdown(&mut self);

    /// Pending interrupt sources.
    fn interrupt_status(&self) -> InterruptStatus;

    /// Acknowledge one interrupt source.
    fn clear_interrupt(&mut self, source: InterruptSource);

    /// Index of the most recently latched command (52, 53, ...).
    fn command_index(&self) -> u8;

    /// Argument of the most recently latched command.
    fn command_argument(&self) -> u32;

    /// Re-arm the command path so the next command can be latched.
    fn arm_command(&mut self);

    /// Flush both directions of the data FIFO.
    fn reset_fifo(&mut self);

    /// Advertise `blocks` of pending device-to-host data (0 withdraws it).
    fn set_tx_length(&mut self, blocks: u32);

    /// Allow the controller to start clocking device-to-host data.
    fn enable_tx_transaction(&mut self);

    /// Data engine still busy with the previous transaction.
    fn is_busy(&self) -> bool;

    /// At least one received word can be read.
    fn read_ready(&self) -> bool;

    /// Pop one received word.
    fn read_word(&mut self) -> u32;

    /// At least one word of transmit space is free.
    fn write_ready(&self) -> bool;

    /// Push one word for transmission.
    fn write_word(&mut self, word: u32);
}
