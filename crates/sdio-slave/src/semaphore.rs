//! TX backpressure credits
//!
//! Each TX channel holds a pool of credits, one per buffer that may be in
//! flight. `submit_write` takes credits for every node it queues and the
//! completion path gives them back when the nodes reach the finish list.
//!
//! Waiting and wake order come from embassy's [`FairSemaphore`]; this wrapper
//! only adds the channel's limit so a release can never mint credits that
//! were not handed out.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::semaphore::{FairSemaphore, Semaphore};

use crate::config::CREDIT_WAITERS;
use crate::error::{Result, SdioError};

#[derive(Debug, Clone, Copy, Default)]
struct Ledger {
    limit: usize,
    held: usize,
}

/// Bounded credit pool usable from interrupt and thread context.
pub struct Credits {
    permits: FairSemaphore<CriticalSectionRawMutex, CREDIT_WAITERS>,
    ledger: Mutex<CriticalSectionRawMutex, Cell<Ledger>>,
}

impl Default for Credits {
    fn default() -> Self {
        Self::new()
    }
}

impl Credits {
    /// Pool with no credits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            permits: FairSemaphore::new(0),
            ledger: Mutex::new(Cell::new(Ledger { limit: 0, held: 0 })),
        }
    }

    /// Set the limit to `permits` and make all of them available.
    pub fn reset(&self, permits: usize) {
        self.ledger.lock(|l| {
            l.set(Ledger {
                limit: permits,
                held: 0,
            });
        });
        self.permits.set(permits);
    }

    /// Refill to the configured limit.
    pub fn restore(&self) {
        let limit = self.ledger.lock(|l| {
            let mut v = l.get();
            v.held = 0;
            l.set(v);
            v.limit
        });
        self.permits.set(limit);
    }

    /// Credits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.ledger.lock(|l| {
            let v = l.get();
            v.limit.saturating_sub(v.held)
        })
    }

    /// Take `n` credits if all are available.
    #[must_use]
    pub fn try_acquire(&self, n: usize) -> bool {
        match self.permits.try_acquire(n) {
            Some(granted) => {
                self.record_held(granted.disarm());
                true
            }
            None => false,
        }
    }

    /// `true` if `n` credits could ever be granted at once.
    #[must_use]
    pub fn can_ever_grant(&self, n: usize) -> bool {
        self.ledger.lock(|l| n <= l.get().limit)
    }

    /// Wait until `n` credits are available and take them.
    ///
    /// Waiters are served in arrival order. More than
    /// [`CREDIT_WAITERS`] concurrent waiters on one channel get
    /// [`SdioError::Busy`].
    pub async fn acquire(&self, n: usize) -> Result<()> {
        let granted = self
            .permits
            .acquire(n)
            .await
            .map_err(|_| SdioError::Busy)?;
        self.record_held(granted.disarm());
        Ok(())
    }

    /// Give back `n` credits, never more than are held.
    pub fn release(&self, n: usize) {
        let returned = self.ledger.lock(|l| {
            let mut v = l.get();
            let returned = n.min(v.held);
            v.held = v.held.saturating_sub(returned);
            l.set(v);
            returned
        });
        self.permits.release(returned);
    }

    fn record_held(&self, n: usize) {
        self.ledger.lock(|l| {
            let mut v = l.get();
            v.held = v.held.saturating_add(n).min(v.limit);
            l.set(v);
        });
    }
}
