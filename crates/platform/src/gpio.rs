//! GPIO and pin abstraction layer
//!
//! Level reads and writes come from `embedded-hal` 1.0 ([`InputPin`],
//! [`OutputPin`]). What `embedded-hal` does not cover, edge interrupt
//! enablement and pull configuration, is described by [`EdgeInterrupt`].

pub use embedded_hal::digital::{InputPin, OutputPin, PinState};

/// External interrupt configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptMode {
    /// Trigger on rising edge
    RisingEdge,
    /// Trigger on falling edge
    FallingEdge,
    /// Trigger on both edges
    BothEdges,
}

/// Pull resistor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    /// No pull resistor
    None,
    /// Pull-up
    Up,
    /// Pull-down
    Down,
}

impl Pull {
    /// Pull that holds a line at the inactive level opposite `active`.
    #[must_use]
    pub const fn idle_for(active: PinState) -> Self {
        match active {
            PinState::High => Self::Down,
            PinState::Low => Self::Up,
        }
    }
}

/// Input pin with edge interrupt capability
pub trait EdgeInterrupt: InputPin {
    /// Enable the edge interrupt.
    fn enable_interrupt(&mut self, mode: InterruptMode) -> Result<(), Self::Error>;

    /// Disable the edge interrupt.
    fn disable_interrupt(&mut self) -> Result<(), Self::Error>;

    /// Configure the pull resistor.
    fn set_pull(&mut self, pull: Pull) -> Result<(), Self::Error>;
}

/// Edge that signals a transition *to* `level`.
#[must_use]
pub const fn edge_towards(level: PinState) -> InterruptMode {
    match level {
        PinState::High => InterruptMode::RisingEdge,
        PinState::Low => InterruptMode::FallingEdge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_pull_opposes_active_level() {
        assert_eq!(Pull::idle_for(PinState::High), Pull::Down);
        assert_eq!(Pull::idle_for(PinState::Low), Pull::Up);
    }

    #[test]
    fn test_edge_towards_level() {
        assert_eq!(edge_towards(PinState::High), InterruptMode::RisingEdge);
        assert_eq!(edge_towards(PinState::Low), InterruptMode::FallingEdge);
    }
}
