//! Out-of-band wake/sleep handshake
//!
//! Two GPIOs run beside the SDIO bus:
//!
//! - **wake** (output): driven to the wakeup level while the device has TX
//!   data staged, so a sleeping host comes back and issues the read.
//! - **forbid-sleep** (input): the host holds it at its active level while it
//!   expects to talk to the device. Each assertion is an edge interrupt.
//!
//! A host that forbids sleep but sends nothing for longer than
//! [`HandshakeConfig::forbid_sleep_timeout`] is considered wedged; the
//! periodic [`WakeHandshake::check_liveness`] reports it through the
//! registered failure callback.
//!
//! The engine only needs the [`HostNotifier`] half of this. Boards without
//! the GPIO pair use `()`.

use embassy_time::{Duration, Instant};
use platform::{edge_towards, EdgeInterrupt, OutputPin, PinState, Pull};

use crate::config::{DEFAULT_FORBID_SLEEP_TIMEOUT, LIVENESS_LOG_INTERVAL};
use crate::error::{Result, SdioError};

/// What the transport engine needs from the handshake.
pub trait HostNotifier {
    /// Tell the host TX data is waiting.
    fn notify_host(&mut self);

    /// Withdraw the notification once the host has read the data.
    fn clear_notify_host(&mut self);

    /// A host write just completed.
    fn record_host_activity(&mut self) {}
}

/// No handshake lines.
impl HostNotifier for () {
    fn notify_host(&mut self) {}

    fn clear_notify_host(&mut self) {}
}

/// Called when the host forbids sleep but stays silent.
pub type LivenessCallback = fn();

/// Handshake configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Level the wake line is driven to while data is pending.
    pub wakeup_level: PinState,
    /// Level at which the host's line forbids sleep.
    pub forbid_level: PinState,
    /// Longest silence tolerated while sleep is forbidden.
    pub forbid_sleep_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            wakeup_level: PinState::High,
            forbid_level: PinState::High,
            forbid_sleep_timeout: DEFAULT_FORBID_SLEEP_TIMEOUT,
        }
    }
}

/// Wake output plus forbid-sleep input.
pub struct WakeHandshake<O, I> {
    wake: O,
    forbid: I,
    config: HandshakeConfig,
    allow_sleep: bool,
    last_rx: Instant,
    last_log: Option<Instant>,
    on_failure: Option<LivenessCallback>,
}

const fn inverse(level: PinState) -> PinState {
    match level {
        PinState::High => PinState::Low,
        PinState::Low => PinState::High,
    }
}

impl<O: OutputPin, I: EdgeInterrupt> WakeHandshake<O, I> {
    /// Take the pins, park the wake line at its inactive level and arm the
    /// forbid-sleep edge.
    ///
    /// # Errors
    ///
    /// [`SdioError::Gpio`] if any pin operation fails.
    pub fn new(mut wake: O, mut forbid: I, config: HandshakeConfig) -> Result<Self> {
        wake.set_state(inverse(config.wakeup_level))
            .map_err(|_| SdioError::Gpio)?;
        forbid
            .set_pull(Pull::idle_for(config.forbid_level))
            .map_err(|_| SdioError::Gpio)?;
        forbid
            .enable_interrupt(edge_towards(config.forbid_level))
            .map_err(|_| SdioError::Gpio)?;
        info!("handshake: pins configured");
        Ok(Self {
            wake,
            forbid,
            config,
            allow_sleep: true,
            last_rx: Instant::from_ticks(0),
            last_log: None,
            on_failure: None,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    fn forbid_asserted(&mut self) -> Result<bool> {
        let high = self.forbid.is_high().map_err(|_| SdioError::Gpio)?;
        Ok(match self.config.forbid_level {
            PinState::High => high,
            PinState::Low => !high,
        })
    }

    /// Forbid-sleep edge interrupt.
    ///
    /// On assertion the edge is masked until the line is seen released
    /// again, and the silence timer restarts.
    ///
    /// # Errors
    ///
    /// [`SdioError::Gpio`] if the pin cannot be read or reconfigured.
    pub fn on_forbid_edge(&mut self, now: Instant) -> Result<()> {
        if self.forbid_asserted()? {
            self.allow_sleep = false;
            self.last_rx = now;
            self.forbid
                .disable_interrupt()
                .map_err(|_| SdioError::Gpio)?;
            debug!("handshake: host forbids sleep");
        } else {
            self.release()?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if !self.allow_sleep {
            debug!("handshake: host allows sleep");
        }
        self.allow_sleep = true;
        self.forbid
            .enable_interrupt(edge_towards(self.config.forbid_level))
            .map_err(|_| SdioError::Gpio)
    }

    /// Whether the device may sleep now. Re-samples the line so a release
    /// that happened while the edge was masked is picked up.
    ///
    /// # Errors
    ///
    /// [`SdioError::Gpio`] if the pin cannot be read or reconfigured.
    pub fn allow_sleep(&mut self) -> Result<bool> {
        if !self.allow_sleep && !self.forbid_asserted()? {
            self.release()?;
        }
        Ok(self.allow_sleep)
    }

    /// Register the wedged-host callback.
    pub fn register_failure_callback(&mut self, cb: LivenessCallback) {
        self.on_failure = Some(cb);
    }

    /// Host data arrived at `now`.
    pub fn record_activity_at(&mut self, now: Instant) {
        self.last_rx = now;
    }

    /// Periodic liveness check. Returns `true` if the host was found wedged
    /// (and the failure callback, if any, was invoked).
    pub fn check_liveness(&mut self, now: Instant) -> bool {
        if self.allow_sleep {
            return false;
        }
        let silent = now.checked_duration_since(self.last_rx).unwrap_or(Duration::MIN);
        if silent <= self.config.forbid_sleep_timeout {
            return false;
        }
        let log_due = self.last_log.map_or(true, |at| {
            now.checked_duration_since(at)
                .map_or(false, |d| d >= LIVENESS_LOG_INTERVAL)
        });
        if log_due {
            error!(
                "handshake: host forbids sleep but silent for {} ms",
                silent.as_millis()
            );
            self.last_log = Some(now);
        }
        if let Some(cb) = self.on_failure {
            cb();
        }
        true
    }

    fn drive_wake(&mut self, level: PinState) {
        if self.wake.set_state(level).is_err() {
            warn!("handshake: wake pin write failed");
        }
    }
}

impl<O: OutputPin, I: EdgeInterrupt> HostNotifier for WakeHandshake<O, I> {
    fn notify_host(&mut self) {
        self.drive_wake(self.config.wakeup_level);
    }

    fn clear_notify_host(&mut self) {
        self.drive_wake(inverse(self.config.wakeup_level));
    }

    fn record_host_activity(&mut self) {
        self.record_activity_at(Instant::now());
    }
}
