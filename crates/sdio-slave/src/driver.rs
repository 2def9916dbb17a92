//! SDIO slave transport engine
//!
//! [`SdioSlave`] ties the channel registry, the framer and the staging rings
//! to a [`SlaveBus`], two [`DmaChannel`]s (one per direction) and a
//! [`HostNotifier`].
//!
//! # Execution model
//!
//! ```text
//!  bus IRQ ──▶ on_bus_interrupt ──try_send──▶ ┌─────────────┐
//!  DMA IRQ ──▶ on_dma_interrupt ──try_send──▶ │ event queue │──┐
//!                                             └─────────────┘  ├──▶ run() / poll()
//!  application ── submit_write / push_ongoing ──▶ TX wake signal ─┘        │
//!                                                                           ▼
//!                                                         callbacks (no lock held)
//! ```
//!
//! The interrupt handlers only decode and enqueue. Application TX requests
//! never take a queue slot; any number of them collapse into one wake-up,
//! so the queue is left to the host's commands.
//!
//! State is split in two:
//!
//! - the bus context (controller, notifier, protocol state, block counter,
//!   statistics) sits behind a critical-section mutex. It is the only state
//!   interrupt handlers touch, and the worker locks it once per register
//!   access or counter update;
//! - the core (registry, pipelines, DMA channels) sits behind an async
//!   mutex, so framing, reassembly and FIFO copies run with interrupts
//!   enabled.
//!
//! Synchronous calls that find the core held by another context return
//! [`SdioError::Busy`]. Code needing both always takes the core first.
//!
//! Construction is `const`, so the engine can live in a `static` shared by
//! the interrupt handlers and the worker task.

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use platform::{DmaChannel, InterruptSource, InterruptStatus, SlaveBus};

use crate::channel::{ChannelCallback, ChannelId, ChannelKey, ChannelRegistry, Direction};
use crate::command::{Command, HostOp};
use crate::config::{DataPath, DriverConfig, DEFAULT_TX_CREDITS, EVENT_QUEUE_DEPTH, MAX_CHANNELS};
use crate::error::{Result, SdioError};
use crate::handshake::HostNotifier;
use crate::pipeline::{RxPipeline, RxSummary, TxPipeline};
use crate::pool::{NodeChain, NodeId, Owner};
use crate::protocol::{BusState, Event, ProtocolState};
use crate::semaphore::Credits;

type CsMutex<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

#[allow(clippy::declare_interior_mutable_const)] // only used as an array initialiser
const NO_CREDITS: Credits = Credits::new();

/// Running counters, readable with [`SdioSlave::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverStats {
    /// Interrupt events lost to a full queue
    pub dropped_events: u32,
    /// Host/device disagreements (block counts, truncated streams, refused
    /// commands)
    pub desyncs: u32,
    /// Commands other than CMD52/CMD53
    pub unknown_commands: u32,
    /// CMD53 transfers refused (open-ended block mode)
    pub rejected_commands: u32,
    /// Transfers aborted because the controller stayed busy
    pub hw_timeouts: u32,
    /// RX payloads dropped for lack of a destination buffer
    pub skipped_payloads: u32,
    /// Frames read by the host
    pub tx_packets: u32,
    /// Host writes received
    pub rx_packets: u32,
}

impl DriverStats {
    const ZERO: Self = Self {
        dropped_events: 0,
        desyncs: 0,
        unknown_commands: 0,
        rejected_commands: 0,
        hw_timeouts: 0,
        skipped_payloads: 0,
        tx_packets: 0,
        rx_packets: 0,
    };
}

fn bump(counter: &mut u32) {
    *counter = counter.saturating_add(1);
}

fn add(counter: &mut u32, n: usize) {
    *counter = counter.saturating_add(u32::try_from(n).unwrap_or(u32::MAX));
}

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Down,
    Up,
    LowPower,
}

struct BusContext<B, N> {
    bus: B,
    notifier: N,
    state: ProtocolState,
    /// Blocks of the current host read not yet clocked out.
    tx_blocks_left: usize,
    stats: DriverStats,
}

impl<B: SlaveBus, N: HostNotifier> BusContext<B, N> {
    /// Close a data transaction in `dir` and wait for the next command.
    fn rearm(&mut self, dir: Direction) {
        self.bus.reset_fifo();
        self.bus.arm_command();
        self.state.step(dir, BusState::BlockComplete);
        self.state.step(dir, BusState::CmdWait);
    }

    /// Give up on a command the worker will never see.
    fn refuse(&mut self, dir: Direction) {
        bump(&mut self.stats.desyncs);
        self.bus.reset_fifo();
        self.bus.arm_command();
        self.state.step(dir, BusState::CmdWait);
    }
}

/// Worker-side handle on the bus context. Every call takes the
/// critical section for just that access.
struct Shared<'a, B, N> {
    cell: &'a CsMutex<BusContext<B, N>>,
}

impl<B, N> Clone for Shared<'_, B, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B, N> Copy for Shared<'_, B, N> {}

impl<B, N> Shared<'_, B, N> {
    fn with<R>(&self, f: impl FnOnce(&mut BusContext<B, N>) -> R) -> R {
        self.cell.lock(|c| f(&mut c.borrow_mut()))
    }

    fn count(&self, pick: impl FnOnce(&mut DriverStats) -> &mut u32) {
        self.with(|c| bump(pick(&mut c.stats)));
    }
}

impl<B: SlaveBus, N> SlaveBus for Shared<'_, B, N> {
    fn configure(&mut self) {
        self.with(|c| c.bus.configure());
    }

    fn shutdown(&mut self) {
        self.with(|c| c.bus.shutdown());
    }

    fn interrupt_status(&self) -> InterruptStatus {
        self.with(|c| c.bus.interrupt_status())
    }

    fn clear_interrupt(&mut self, source: InterruptSource) {
        self.with(|c| c.bus.clear_interrupt(source));
    }

    fn command_index(&self) -> u8 {
        self.with(|c| c.bus.command_index())
    }

    fn command_argument(&self) -> u32 {
        self.with(|c| c.bus.command_argument())
    }

    fn arm_command(&mut self) {
        self.with(|c| c.bus.arm_command());
    }

    fn reset_fifo(&mut self) {
        self.with(|c| c.bus.reset_fifo());
    }

    fn set_tx_length(&mut self, blocks: u32) {
        self.with(|c| c.bus.set_tx_length(blocks));
    }

    fn enable_tx_transaction(&mut self) {
        self.with(|c| c.bus.enable_tx_transaction());
    }

    fn is_busy(&self) -> bool {
        self.with(|c| c.bus.is_busy())
    }

    fn read_ready(&self) -> bool {
        self.with(|c| c.bus.read_ready())
    }

    fn read_word(&mut self) -> u32 {
        self.with(|c| c.bus.read_word())
    }

    fn write_ready(&self) -> bool {
        self.with(|c| c.bus.write_ready())
    }

    fn write_word(&mut self, word: u32) {
        self.with(|c| c.bus.write_word(word));
    }
}

struct Core<D, const NODES: usize, const BYTES: usize> {
    registry: ChannelRegistry<NODES, BYTES>,
    tx: TxPipeline,
    rx: RxPipeline,
    tx_dma: D,
    rx_dma: D,
    lifecycle: Lifecycle,
}

/// Follow-up work the worker does after releasing the core.
#[derive(Debug, Default)]
struct Completion {
    tx_sent: Option<[usize; MAX_CHANNELS]>,
    notify_tx: bool,
    notify_rx: bool,
}

impl<D: DmaChannel, const NODES: usize, const BYTES: usize> Core<D, NODES, BYTES> {
    fn handle<B: SlaveBus, N: HostNotifier>(
        &mut self,
        event: Event,
        ctx: Shared<'_, B, N>,
        config: DriverConfig,
    ) -> Completion {
        let mut done = Completion::default();
        match event {
            Event::WriteRequested => self.pump_tx(ctx),
            Event::StartWrite { blocks } => self.start_write(blocks, ctx, config.tx_path),
            Event::WriteBlockDone { remaining } => {
                if let Some(sent) = self.tx.block_done(remaining) {
                    ctx.count(|s| &mut s.tx_packets);
                    done.tx_sent = Some(sent);
                    done.notify_tx = true;
                }
                if remaining == 0 {
                    self.pump_tx(ctx);
                }
            }
            Event::StartRead { bytes } => self.start_read(bytes, ctx, config.rx_path, &mut done),
            Event::RxChunkDone => {
                match self.rx.chunk_done(&mut self.registry, &ctx, &mut self.rx_dma) {
                    Ok(Some(summary)) => Self::finish_read(summary, ctx, &mut done),
                    Ok(None) => {}
                    Err(e) => {
                        self.read_failed(e, ctx);
                        done.notify_rx = true;
                    }
                }
            }
        }
        done
    }

    /// Stage queued TX payloads and, with the link up, advertise the next
    /// frame (or the unread rest of the current one).
    fn pump_tx<B: SlaveBus, N: HostNotifier>(&mut self, ctx: Shared<'_, B, N>) {
        self.tx.stage(&mut self.registry);
        if self.lifecycle != Lifecycle::Up {
            return;
        }
        let mut bus = ctx;
        if self.tx.announce(&mut bus).is_some() {
            ctx.with(|c| c.notifier.notify_host());
        }
    }

    fn start_write<B: SlaveBus, N: HostNotifier>(
        &mut self,
        blocks: usize,
        ctx: Shared<'_, B, N>,
        path: DataPath,
    ) {
        if !ctx.with(|c| c.state.step(Direction::Tx, BusState::TxActive)) {
            debug!("tx: read started out of sequence");
        }
        let mut bus = ctx;
        match self.tx.start(blocks, &mut bus, &mut self.tx_dma, path) {
            Ok(true) => trace!("tx: {} blocks programmed", blocks),
            Ok(false) => ctx.count(|s| &mut s.desyncs),
            Err(e) => {
                match e {
                    SdioError::HardwareTimeout => ctx.count(|s| &mut s.hw_timeouts),
                    SdioError::NoBuffer => ctx.count(|s| &mut s.desyncs),
                    _ => error!("tx: transfer aborted: {}", e),
                }
                self.tx.withdraw();
            }
        }
    }

    fn start_read<B: SlaveBus, N: HostNotifier>(
        &mut self,
        bytes: usize,
        ctx: Shared<'_, B, N>,
        path: DataPath,
        done: &mut Completion,
    ) {
        if !ctx.with(|c| c.state.step(Direction::Rx, BusState::RxActive)) {
            debug!("rx: write started out of sequence");
        }
        if self.rx.is_active() {
            warn!("rx: host write overlaps the previous one");
            ctx.count(|s| &mut s.desyncs);
            self.rx.abort(&mut self.registry, &mut self.rx_dma);
            done.notify_rx = true;
        }
        match path {
            DataPath::Dma => {
                if let Err(e) = self.rx.start_dma(bytes, &ctx, &mut self.rx_dma) {
                    self.read_failed(e, ctx);
                }
            }
            DataPath::CpuCopy => {
                let mut bus = ctx;
                let summary = self.rx.receive_cpu(&mut self.registry, &mut bus, bytes);
                Self::finish_read(summary, ctx, done);
            }
        }
    }

    fn finish_read<B: SlaveBus, N: HostNotifier>(
        summary: RxSummary,
        ctx: Shared<'_, B, N>,
        done: &mut Completion,
    ) {
        ctx.with(|c| {
            add(&mut c.stats.skipped_payloads, summary.skipped);
            if summary.truncated {
                bump(&mut c.stats.desyncs);
            }
            bump(&mut c.stats.rx_packets);
            c.rearm(Direction::Rx);
        });
        trace!("rx: packet done, {} payloads", summary.delivered);
        done.notify_rx = true;
    }

    fn read_failed<B: SlaveBus, N: HostNotifier>(&mut self, e: SdioError, ctx: Shared<'_, B, N>) {
        if e == SdioError::HardwareTimeout {
            ctx.count(|s| &mut s.hw_timeouts);
        }
        error!("rx: transfer aborted: {}", e);
        self.rx.abort(&mut self.registry, &mut self.rx_dma);
        ctx.with(|c| c.rearm(Direction::Rx));
    }

    fn reset<B: SlaveBus, N: HostNotifier>(&mut self, ctx: Shared<'_, B, N>) {
        if self.tx_dma.stop().is_err() {
            warn!("reset: tx dma stop failed");
        }
        if self.rx.abort(&mut self.registry, &mut self.rx_dma) {
            debug!("reset: partial rx payload requeued");
        }
        self.tx.reset();
        let up = self.lifecycle == Lifecycle::Up;
        ctx.with(|c| {
            c.tx_blocks_left = 0;
            c.bus.set_tx_length(0);
            c.bus.reset_fifo();
            c.notifier.clear_notify_host();
            if up {
                c.bus.arm_command();
                c.state.set_all(BusState::CmdWait);
            } else {
                c.state.set_all(BusState::Idle);
            }
        });
    }
}

/// SDIO slave transport engine.
///
/// `NODES` buffer nodes of `NODE_BYTES` bytes each back every channel.
/// [`new`](Self::new) is `const`, so the engine (arena and staging rings
/// included) can be built straight into a `static` instead of on the stack:
///
/// ```ignore
/// static SDIO: SdioSlave<Bus, Dma, Wake, 32, 1024> =
///     SdioSlave::new(Bus::new(), Dma::tx(), Dma::rx(), Wake::new(), DriverConfig::default());
/// ```
pub struct SdioSlave<B, D, N, const NODES: usize, const NODE_BYTES: usize> {
    core: AsyncMutex<CriticalSectionRawMutex, Core<D, NODES, NODE_BYTES>>,
    bus: CsMutex<BusContext<B, N>>,
    events: Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_DEPTH>,
    /// Pending application TX work; carries no count.
    tx_wake: Signal<CriticalSectionRawMutex, ()>,
    credits: [Credits; MAX_CHANNELS],
    config: DriverConfig,
}

impl<B, D, N, const NODES: usize, const NODE_BYTES: usize> SdioSlave<B, D, N, NODES, NODE_BYTES>
where
    B: SlaveBus,
    D: DmaChannel,
    N: HostNotifier,
{
    /// Create a stopped engine. Call [`init`](Self::init) to start it.
    #[must_use]
    pub const fn new(bus: B, tx_dma: D, rx_dma: D, notifier: N, config: DriverConfig) -> Self {
        Self {
            core: AsyncMutex::new(Core {
                registry: ChannelRegistry::new(),
                tx: TxPipeline::new(),
                rx: RxPipeline::new(),
                tx_dma,
                rx_dma,
                lifecycle: Lifecycle::Down,
            }),
            bus: Mutex::new(RefCell::new(BusContext {
                bus,
                notifier,
                state: ProtocolState::new(),
                tx_blocks_left: 0,
                stats: DriverStats::ZERO,
            })),
            events: Channel::new(),
            tx_wake: Signal::new(),
            credits: [NO_CREDITS; MAX_CHANNELS],
            config,
        }
    }

    /// Run `f` on the core if no other context holds it.
    fn with_core<R>(&self, f: impl FnOnce(&mut Core<D, NODES, NODE_BYTES>) -> R) -> Result<R> {
        match self.core.try_lock() {
            Ok(mut core) => Ok(f(&mut core)),
            Err(_) => {
                trace!("sdio: core busy");
                Err(SdioError::Busy)
            }
        }
    }

    fn try_core<R>(&self, f: impl FnOnce(&mut Core<D, NODES, NODE_BYTES>) -> Result<R>) -> Result<R> {
        self.with_core(f)?
    }

    fn with_bus<R>(&self, f: impl FnOnce(&mut BusContext<B, N>) -> R) -> R {
        self.bus.lock(|b| f(&mut b.borrow_mut()))
    }

    fn shared(&self) -> Shared<'_, B, N> {
        Shared { cell: &self.bus }
    }

    fn credits(&self, id: ChannelId) -> Option<&Credits> {
        self.credits.get(usize::from(id.get()))
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Configure the controller and wait for the first command.
    ///
    /// # Errors
    ///
    /// [`SdioError::AlreadyInitialized`] if the engine is already running,
    /// [`SdioError::Busy`] if the worker holds the core.
    pub fn init(&self) -> Result<()> {
        self.try_core(|core| {
            if core.lifecycle != Lifecycle::Down {
                return Err(SdioError::AlreadyInitialized);
            }
            self.bring_up(core);
            Ok(())
        })?;
        info!("sdio: slave ready");
        Ok(())
    }

    /// Stop the engine and shut the controller down.
    ///
    /// Staged TX payloads are handed back through notify and a half-received
    /// RX payload returns to its ongoing list. Channels stay initialised.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the engine is not running,
    /// [`SdioError::Busy`] if the worker holds the core.
    pub fn deinit(&self) -> Result<()> {
        self.try_core(|core| {
            if core.lifecycle == Lifecycle::Down {
                return Err(SdioError::NotInitialized);
            }
            core.lifecycle = Lifecycle::Down;
            self.quiesce(core);
            Ok(())
        })?;
        self.with_bus(|ctx| ctx.bus.shutdown());
        self.after_quiesce();
        info!("sdio: slave stopped");
        Ok(())
    }

    /// Quiesce for low power: software reset, bus marked idle.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the engine is not running,
    /// [`SdioError::Busy`] if the worker holds the core.
    pub fn enter_low_power(&self) -> Result<()> {
        self.try_core(|core| {
            if core.lifecycle != Lifecycle::Up {
                return Err(SdioError::NotInitialized);
            }
            core.lifecycle = Lifecycle::LowPower;
            self.quiesce(core);
            Ok(())
        })?;
        self.after_quiesce();
        debug!("sdio: low power");
        Ok(())
    }

    /// Leave low power: reconfigure the controller and re-arm.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the engine is not in low power,
    /// [`SdioError::Busy`] if the worker holds the core.
    pub fn exit_low_power(&self) -> Result<()> {
        self.try_core(|core| {
            if core.lifecycle != Lifecycle::LowPower {
                return Err(SdioError::NotInitialized);
            }
            self.bring_up(core);
            Ok(())
        })?;
        debug!("sdio: awake");
        Ok(())
    }

    /// Force both directions back to command-wait, discarding whatever was
    /// in flight.
    ///
    /// Pending events are dropped, both DMA engines stopped, staged TX
    /// payloads reported through notify, TX credits restored, and a
    /// half-received RX payload put back at the front of its ongoing list.
    ///
    /// # Errors
    ///
    /// [`SdioError::Busy`] if the worker holds the core; nothing is reset.
    pub fn reset(&self) -> Result<()> {
        self.with_core(|core| self.quiesce(core))?;
        self.after_quiesce();
        info!("sdio: reset");
        Ok(())
    }

    fn bring_up(&self, core: &mut Core<D, NODES, NODE_BYTES>) {
        let ctx = self.shared();
        ctx.with(|c| {
            c.bus.configure();
            c.bus.arm_command();
            c.state.set_all(BusState::CmdWait);
        });
        core.lifecycle = Lifecycle::Up;
        core.pump_tx(ctx);
    }

    fn quiesce(&self, core: &mut Core<D, NODES, NODE_BYTES>) {
        while self.events.try_receive().is_ok() {}
        self.tx_wake.reset();
        let ctx = self.shared();
        core.reset(ctx);
        core.pump_tx(ctx);
    }

    fn after_quiesce(&self) {
        for credits in &self.credits {
            credits.restore();
        }
        self.notify_all(Direction::Tx);
        self.notify_all(Direction::Rx);
    }

    // ── Interrupt entry points ──────────────────────────────────────────

    /// SDIO controller interrupt.
    pub fn on_bus_interrupt(&self) {
        self.with_bus(|ctx| {
            let status = ctx.bus.interrupt_status();
            if status.cmd_response_end {
                ctx.bus.clear_interrupt(InterruptSource::CmdResponseEnd);
                self.on_command(ctx);
            }
            if status.write_end {
                ctx.bus.clear_interrupt(InterruptSource::WriteEnd);
                self.on_write_end(ctx);
            }
            if status.data_received {
                ctx.bus.clear_interrupt(InterruptSource::DataReceived);
            }
        });
    }

    /// DMA transfer-complete interrupt for `dir`.
    pub fn on_dma_interrupt(&self, dir: Direction) {
        match dir {
            Direction::Rx => {
                self.with_bus(|ctx| {
                    self.post(ctx, Event::RxChunkDone);
                });
            }
            // Block progress is tracked through the controller's write-end.
            Direction::Tx => {}
        }
    }

    /// Queue `event` for the worker. `false` if the queue was full.
    fn post(&self, ctx: &mut BusContext<B, N>, event: Event) -> bool {
        if self.events.try_send(event).is_ok() {
            return true;
        }
        warn!("sdio: event queue full, {} dropped", event.name());
        bump(&mut ctx.stats.dropped_events);
        false
    }

    fn on_command(&self, ctx: &mut BusContext<B, N>) {
        let index = ctx.bus.command_index();
        let argument = ctx.bus.command_argument();
        let cmd = match Command::decode(index, argument) {
            Command::Control => {
                ctx.bus.arm_command();
                return;
            }
            Command::Unknown(index) => {
                warn!("sdio: unknown command {}", index);
                bump(&mut ctx.stats.unknown_commands);
                ctx.bus.arm_command();
                return;
            }
            Command::Data(cmd) => cmd,
        };
        ctx.notifier.record_host_activity();
        let Some(bytes) = cmd.bytes() else {
            warn!("sdio: open-ended cmd53 refused");
            bump(&mut ctx.stats.rejected_commands);
            ctx.bus.arm_command();
            return;
        };
        match cmd.op() {
            HostOp::Write => {
                ctx.state.step(Direction::Rx, BusState::Response);
                if !self.post(ctx, Event::StartRead { bytes }) {
                    ctx.refuse(Direction::Rx);
                }
            }
            HostOp::Read => {
                let blocks = cmd.blocks().unwrap_or(0);
                ctx.tx_blocks_left = blocks;
                ctx.state.step(Direction::Tx, BusState::Response);
                if !self.post(ctx, Event::StartWrite { blocks }) {
                    ctx.tx_blocks_left = 0;
                    ctx.refuse(Direction::Tx);
                }
            }
        }
    }

    fn on_write_end(&self, ctx: &mut BusContext<B, N>) {
        let Some(remaining) = ctx.tx_blocks_left.checked_sub(1) else {
            warn!("sdio: write end without a host read");
            bump(&mut ctx.stats.desyncs);
            return;
        };
        ctx.tx_blocks_left = remaining;
        if remaining == 0 {
            ctx.notifier.clear_notify_host();
            ctx.rearm(Direction::Tx);
        }
        self.post(ctx, Event::WriteBlockDone { remaining });
    }

    // ── Worker ──────────────────────────────────────────────────────────

    /// Worker loop: wait for interrupt events or TX wake-ups forever and
    /// process them. Interrupt events go first.
    pub async fn run(&self) -> ! {
        loop {
            let event = match select(self.events.receive(), self.tx_wake.wait()).await {
                Either::First(event) => event,
                Either::Second(()) => Event::WriteRequested,
            };
            let done = {
                let mut core = self.core.lock().await;
                self.dispatch(&mut core, event)
            };
            self.release_credits(&done);
            for (flag, dir) in [(done.notify_tx, Direction::Tx), (done.notify_rx, Direction::Rx)] {
                if flag {
                    self.notify_all_async(dir).await;
                }
            }
        }
    }

    /// Process every pending event without waiting. Returns how many ran.
    ///
    /// Stops early, leaving events queued, if another context holds the
    /// core.
    pub fn poll(&self) -> usize {
        let mut handled = 0usize;
        loop {
            let Ok(mut core) = self.core.try_lock() else {
                break;
            };
            let event = match self.events.try_receive() {
                Ok(event) => event,
                Err(_) => match self.tx_wake.try_take() {
                    Some(()) => Event::WriteRequested,
                    None => break,
                },
            };
            let done = self.dispatch(&mut core, event);
            drop(core);
            self.release_credits(&done);
            if done.notify_tx {
                self.notify_all(Direction::Tx);
            }
            if done.notify_rx {
                self.notify_all(Direction::Rx);
            }
            handled = handled.saturating_add(1);
        }
        handled
    }

    fn dispatch(&self, core: &mut Core<D, NODES, NODE_BYTES>, event: Event) -> Completion {
        trace!("sdio: {}", event.name());
        core.handle(event, self.shared(), self.config)
    }

    fn release_credits(&self, done: &Completion) {
        if let Some(sent) = done.tx_sent {
            for (credits, n) in self.credits.iter().zip(sent) {
                if n > 0 {
                    credits.release(n);
                }
            }
        }
    }

    async fn notify_all_async(&self, dir: Direction) {
        for id in ChannelId::all() {
            let key = ChannelKey::new(id, dir);
            let detached = self.core.lock().await.registry.detach_finish(key);
            if let Some((cb, chain)) = detached {
                cb(id, chain);
            }
        }
    }

    // ── Channels ────────────────────────────────────────────────────────

    /// Initialise a channel.
    ///
    /// `count == 0` means the application supplies buffers at runtime (see
    /// [`claim_node`](Self::claim_node)); TX channels then get
    /// [`DEFAULT_TX_CREDITS`] credits instead of one per pooled buffer.
    ///
    /// # Errors
    ///
    /// See [`ChannelRegistry::init_channel`].
    pub fn init_channel(&self, id: ChannelId, dir: Direction, count: usize, size: usize) -> Result<()> {
        let key = ChannelKey::new(id, dir);
        self.try_core(|core| core.registry.init_channel(key, count, size))?;
        if dir == Direction::Tx {
            if let Some(credits) = self.credits(id) {
                credits.reset(if count > 0 { count } else { DEFAULT_TX_CREDITS });
            }
        }
        debug!("ch{}: init, {} x {} bytes", id.get(), count, size);
        Ok(())
    }

    /// Tear a channel down. A second call returns
    /// [`SdioError::NotInitialized`].
    ///
    /// Deinitialising a channel with traffic in flight is the caller's
    /// responsibility.
    ///
    /// # Errors
    ///
    /// See [`ChannelRegistry::deinit_channel`].
    pub fn deinit_channel(&self, id: ChannelId, dir: Direction) -> Result<()> {
        let key = ChannelKey::new(id, dir);
        let outcome = self.try_core(|core| core.registry.deinit_channel(key));
        let torn_down = !matches!(outcome, Err(SdioError::NotInitialized | SdioError::Busy));
        if dir == Direction::Tx && torn_down {
            if let Some(credits) = self.credits(id) {
                credits.reset(0);
            }
        }
        outcome
    }

    /// Install the completion callback of a channel.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live.
    pub fn register_callback(&self, id: ChannelId, dir: Direction, cb: ChannelCallback) -> Result<()> {
        let key = ChannelKey::new(id, dir);
        self.try_core(|core| core.registry.register_callback(key, cb))
    }

    /// Queue filled TX buffers, waiting for credits if the channel has too
    /// many in flight.
    ///
    /// With `timeout == None` the wait is unbounded.
    ///
    /// # Errors
    ///
    /// - [`SdioError::InvalidParameter`] for a node the caller does not own,
    ///   an empty or oversized payload, or more nodes than the channel can
    ///   ever have in flight
    /// - [`SdioError::NotInitialized`] if the channel is not live
    /// - [`SdioError::Timeout`] if credits did not free up in time
    /// - [`SdioError::Busy`] if more tasks than
    ///   [`CREDIT_WAITERS`](crate::config::CREDIT_WAITERS) wait on the
    ///   channel at once
    pub async fn submit_write(
        &self,
        id: ChannelId,
        chain: NodeChain,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let key = ChannelKey::new(id, Direction::Tx);
        self.core.lock().await.registry.check_tx_chain(key, chain)?;
        let credits = self.credits(id).ok_or(SdioError::InvalidChannel(id.get()))?;
        if !credits.can_ever_grant(chain.count) {
            return Err(SdioError::InvalidParameter);
        }
        match timeout {
            Some(limit) => with_timeout(limit, credits.acquire(chain.count))
                .await
                .map_err(|_| SdioError::Timeout)??,
            None => credits.acquire(chain.count).await?,
        }
        let queued = self.core.lock().await.registry.push_ongoing_list(key, chain);
        if let Err(e) = queued {
            credits.release(chain.count);
            return Err(e);
        }
        self.tx_wake.signal(());
        Ok(())
    }

    /// Supply empty RX buffers. Never blocks.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live.
    pub fn submit_read(&self, id: ChannelId, chain: NodeChain) -> Result<()> {
        let key = ChannelKey::new(id, Direction::Rx);
        self.try_core(|core| core.registry.push_ongoing_list(key, chain))
    }

    /// Take an empty buffer and its usable capacity.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] or [`SdioError::NoBuffer`].
    pub fn pop_free_node(&self, id: ChannelId, dir: Direction) -> Result<(NodeId, usize)> {
        let key = ChannelKey::new(id, dir);
        self.try_core(|core| core.registry.pop_free_node(key))
    }

    /// Return buffers to a channel's free list.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live.
    pub fn push_free_list(&self, id: ChannelId, dir: Direction, chain: NodeChain) -> Result<()> {
        let key = ChannelKey::new(id, dir);
        self.try_core(|core| core.registry.push_free_list(key, chain))
    }

    /// Queue one node without credit accounting. On a TX channel the
    /// worker is asked to frame it.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`], or [`SdioError::InvalidParameter`] for
    /// a node the caller does not own or (TX) an empty or oversized payload.
    pub fn push_ongoing_node(&self, id: ChannelId, dir: Direction, node: NodeId) -> Result<()> {
        let key = ChannelKey::new(id, dir);
        self.try_core(|core| core.registry.push_ongoing_node(key, node))?;
        if dir == Direction::Tx {
            self.tx_wake.signal(());
        }
        Ok(())
    }

    /// Take back the oldest queued node.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] or [`SdioError::NoBuffer`].
    pub fn pop_ongoing_node(&self, id: ChannelId, dir: Direction) -> Result<NodeId> {
        let key = ChannelKey::new(id, dir);
        self.try_core(|core| core.registry.pop_ongoing_node(key, Owner::Caller))
    }

    /// Append buffers to a channel's finish list.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live.
    pub fn push_finish_list(&self, id: ChannelId, dir: Direction, chain: NodeChain) -> Result<()> {
        let key = ChannelKey::new(id, dir);
        self.try_core(|core| core.registry.push_finish_list(key, chain))
    }

    /// Take the oldest finished buffer (channels without a callback).
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] or [`SdioError::NoBuffer`].
    pub fn pop_finish_node(&self, id: ChannelId, dir: Direction) -> Result<NodeId> {
        let key = ChannelKey::new(id, dir);
        self.try_core(|core| core.registry.pop_finish_node(key))
    }

    /// Hand a channel's finish list to its callback.
    ///
    /// The list is detached under the core lock and the callback runs after
    /// it is released. Returns `true` if the callback ran; `false` also when
    /// another context held the core.
    pub fn notify(&self, id: ChannelId, dir: Direction) -> bool {
        let key = ChannelKey::new(id, dir);
        match self.with_core(|core| core.registry.detach_finish(key)) {
            Ok(Some((cb, chain))) => {
                cb(id, chain);
                true
            }
            Ok(None) => false,
            Err(_) => {
                debug!("ch{}: notify deferred, core busy", id.get());
                false
            }
        }
    }

    fn notify_all(&self, dir: Direction) {
        for id in ChannelId::all() {
            self.notify(id, dir);
        }
    }

    // ── Nodes ───────────────────────────────────────────────────────────

    /// Take a node from the arena for a `count == 0` channel.
    ///
    /// # Errors
    ///
    /// [`SdioError::NoMemory`] or [`SdioError::InvalidParameter`].
    pub fn claim_node(&self, capacity: usize) -> Result<NodeId> {
        self.try_core(|core| core.registry.arena_mut().claim_one(capacity))
    }

    /// Give a caller-owned node back to the arena.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if the caller does not own it.
    pub fn release_node(&self, id: NodeId) -> Result<()> {
        self.try_core(|core| core.registry.arena_mut().release_one(id))
    }

    /// Link caller-owned nodes, in order, into a chain.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] for an empty slice, a repeated node or
    /// a node the caller does not own.
    pub fn chain(&self, ids: &[NodeId]) -> Result<NodeChain> {
        self.try_core(|core| core.registry.arena_mut().link(ids))
    }

    /// Copy a payload into a caller-owned node.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if the caller does not own the node or
    /// the payload exceeds its capacity.
    pub fn fill_node(&self, id: NodeId, subtype: u8, bytes: &[u8]) -> Result<()> {
        self.try_core(|core| core.registry.arena_mut().fill(id, subtype, bytes))
    }

    /// Copy a caller-owned node's payload out; returns its length.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if the caller does not own the node or
    /// `out` is too small.
    pub fn read_node(&self, id: NodeId, out: &mut [u8]) -> Result<usize> {
        self.try_core(|core| core.registry.arena().read(id, out))
    }

    /// Payload length and subtype of a caller-owned node.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if the caller does not own the node.
    pub fn node_len(&self, id: NodeId) -> Result<(usize, u8)> {
        self.try_core(|core| {
            let arena = core.registry.arena();
            if arena.is_caller_owned(id) {
                Ok(arena.meta(id))
            } else {
                Err(SdioError::InvalidParameter)
            }
        })
    }

    /// Capacity of a caller-owned node.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if the caller does not own the node.
    pub fn node_capacity(&self, id: NodeId) -> Result<usize> {
        self.try_core(|core| {
            let arena = core.registry.arena();
            if arena.is_caller_owned(id) {
                Ok(arena.capacity(id))
            } else {
                Err(SdioError::InvalidParameter)
            }
        })
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// Snapshot of the running counters.
    #[must_use]
    pub fn stats(&self) -> DriverStats {
        self.with_bus(|ctx| ctx.stats)
    }

    /// Protocol state of one direction.
    #[must_use]
    pub fn state(&self, dir: Direction) -> BusState {
        self.with_bus(|ctx| ctx.state.get(dir))
    }

    /// TX credits currently available on a channel.
    #[must_use]
    pub fn tx_credits(&self, id: ChannelId) -> usize {
        self.credits(id).map_or(0, Credits::available)
    }

    /// List lengths of a channel: (free, ongoing, finish).
    ///
    /// # Errors
    ///
    /// [`SdioError::Busy`] if another context holds the core.
    pub fn list_counts(&self, id: ChannelId, dir: Direction) -> Result<(usize, usize, usize)> {
        let key = ChannelKey::new(id, dir);
        self.with_core(|core| {
            let reg = &core.registry;
            (reg.free_count(key), reg.ongoing_count(key), reg.finish_count(key))
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> DriverConfig {
        self.config
    }

    /// Run `f` with the host notifier, e.g. to service handshake interrupts
    /// or the liveness check.
    pub fn notifier<R>(&self, f: impl FnOnce(&mut N) -> R) -> R {
        self.with_bus(|ctx| f(&mut ctx.notifier))
    }
}
