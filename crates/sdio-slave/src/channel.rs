//! Channel registry
//!
//! One slot per (channel id, direction) holding three node lists
//! over the shared [`NodeArena`]:
//!
//! | list      | TX meaning                          | RX meaning                         |
//! |-----------|-------------------------------------|------------------------------------|
//! | free      | empty buffers for the application   | empty buffers for the application  |
//! | ongoing   | filled buffers waiting to be framed | empty buffers waiting for payloads |
//! | finish    | sent buffers awaiting notification  | received payloads awaiting notify  |
//!
//! A channel initialised with `count == 0` owns no pool; the application
//! brings its own nodes and gets them back through the finish list.

use crate::config::{MAX_CHANNELS, MAX_TX_PAYLOAD};
use crate::error::{Result, SdioError};
use crate::pool::{List, NodeArena, NodeChain, NodeId, Owner};

// ── Keys ────────────────────────────────────────────────────────────────────

/// Logical channel id, validated against [`MAX_CHANNELS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelId(u8);

impl ChannelId {
    /// Validate a raw channel id.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidChannel`] if `raw >= MAX_CHANNELS`.
    pub const fn new(raw: u8) -> Result<Self> {
        if (raw as usize) < MAX_CHANNELS {
            Ok(Self(raw))
        } else {
            Err(SdioError::InvalidChannel(raw))
        }
    }

    /// Raw id as carried on the wire.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Every valid channel id, ascending.
    #[allow(clippy::cast_possible_truncation)] // Safety: MAX_CHANNELS <= u8::MAX (const-asserted)
    pub fn all() -> impl Iterator<Item = Self> {
        (0..MAX_CHANNELS).map(|i| Self(i as u8))
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Transfer direction, named from the device's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Device → host
    Tx,
    /// Host → device
    Rx,
}

impl Direction {
    const fn index(self) -> usize {
        match self {
            Self::Tx => 0,
            Self::Rx => 1,
        }
    }
}

/// A (channel id, direction) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelKey {
    /// Channel id
    pub id: ChannelId,
    /// Direction
    pub dir: Direction,
}

impl ChannelKey {
    /// Build a key.
    #[must_use]
    pub const fn new(id: ChannelId, dir: Direction) -> Self {
        Self { id, dir }
    }
}

/// Completion callback, invoked with a detached finish list.
///
/// Runs outside the engine's critical section, so it may call back into the
/// driver (read nodes, return them to the free list, submit more work).
pub type ChannelCallback = &'static (dyn Fn(ChannelId, NodeChain) + Send + Sync);

// ── Per-channel state ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Uninit,
    Ready { pooled: usize, capacity: usize },
}

#[derive(Clone, Copy)]
struct ChannelSlot {
    state: ChannelState,
    free: List,
    ongoing: List,
    finish: List,
    callback: Option<ChannelCallback>,
}

impl ChannelSlot {
    const EMPTY: Self = Self {
        state: ChannelState::Uninit,
        free: List::new(),
        ongoing: List::new(),
        finish: List::new(),
        callback: None,
    };
}

/// Which of a channel's three lists an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Which {
    Free,
    Ongoing,
    Finish,
}

// ── Registry ────────────────────────────────────────────────────────────────

/// All channels plus the arena their nodes come from.
pub struct ChannelRegistry<const NODES: usize, const BYTES: usize> {
    arena: NodeArena<NODES, BYTES>,
    slots: [[ChannelSlot; 2]; MAX_CHANNELS],
}

impl<const NODES: usize, const BYTES: usize> Default for ChannelRegistry<NODES, BYTES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const NODES: usize, const BYTES: usize> ChannelRegistry<NODES, BYTES> {
    /// Registry with every channel uninitialised.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena: NodeArena::new(),
            slots: [[ChannelSlot::EMPTY; 2]; MAX_CHANNELS],
        }
    }

    /// Shared node arena.
    #[must_use]
    pub fn arena(&self) -> &NodeArena<NODES, BYTES> {
        &self.arena
    }

    /// Shared node arena, mutably.
    pub fn arena_mut(&mut self) -> &mut NodeArena<NODES, BYTES> {
        &mut self.arena
    }

    #[allow(clippy::indexing_slicing)] // Safety: ChannelId < MAX_CHANNELS by construction, dir index < 2
    fn slot(&self, key: ChannelKey) -> &ChannelSlot {
        &self.slots[key.id.index()][key.dir.index()]
    }

    #[allow(clippy::indexing_slicing)] // Safety: ChannelId < MAX_CHANNELS by construction, dir index < 2
    fn slot_mut(&mut self, key: ChannelKey) -> &mut ChannelSlot {
        &mut self.slots[key.id.index()][key.dir.index()]
    }

    fn ready(&self, key: ChannelKey) -> Result<usize> {
        match self.slot(key).state {
            ChannelState::Ready { capacity, .. } => Ok(capacity),
            ChannelState::Uninit => Err(SdioError::NotInitialized),
        }
    }

    /// Borrow the arena together with one of `key`'s lists.
    fn split(&mut self, key: ChannelKey, which: Which) -> (&mut NodeArena<NODES, BYTES>, &mut List) {
        #[allow(clippy::indexing_slicing)] // Safety: ChannelId < MAX_CHANNELS by construction, dir index < 2
        let slot = &mut self.slots[key.id.index()][key.dir.index()];
        let list = match which {
            Which::Free => &mut slot.free,
            Which::Ongoing => &mut slot.ongoing,
            Which::Finish => &mut slot.finish,
        };
        (&mut self.arena, list)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Initialise a channel.
    ///
    /// With `count > 0`, `count` nodes of `size` bytes are claimed from the
    /// arena onto the free list. With `count == 0` the channel starts empty
    /// and runs on nodes the application supplies.
    ///
    /// # Errors
    ///
    /// - [`SdioError::AlreadyInitialized`] if the channel is live
    /// - [`SdioError::InvalidParameter`] for a zero size, a size above the
    ///   node size, or (TX) a size that cannot fit one staging slot
    /// - [`SdioError::NoMemory`] if the arena cannot supply `count` nodes
    pub fn init_channel(&mut self, key: ChannelKey, count: usize, size: usize) -> Result<()> {
        if self.slot(key).state != ChannelState::Uninit {
            return Err(SdioError::AlreadyInitialized);
        }
        if size == 0 || size > BYTES || (key.dir == Direction::Tx && size > MAX_TX_PAYLOAD) {
            return Err(SdioError::InvalidParameter);
        }
        if count > 0 {
            let (arena, free) = self.split(key, Which::Free);
            arena.claim(free, count, size, Owner::Free(key))?;
        }
        self.slot_mut(key).state = ChannelState::Ready {
            pooled: count,
            capacity: size,
        };
        Ok(())
    }

    /// Tear a channel down.
    ///
    /// Pooled nodes on any of the three lists return to the arena; nodes of
    /// an externally supplied channel are handed back to the caller. Nodes
    /// the application still holds are its responsibility, as are nodes on
    /// the ongoing list of a channel with traffic in flight.
    ///
    /// # Errors
    ///
    /// - [`SdioError::NotInitialized`] if the channel is not live (a second
    ///   deinit is harmless)
    /// - [`SdioError::ListCorruption`] if a list's count disagreed with its
    ///   links; the channel is torn down regardless
    pub fn deinit_channel(&mut self, key: ChannelKey) -> Result<()> {
        let ChannelState::Ready { pooled, .. } = self.slot(key).state else {
            return Err(SdioError::NotInitialized);
        };
        let mut outcome = Ok(());
        for which in [Which::Free, Which::Ongoing, Which::Finish] {
            let (arena, list) = self.split(key, which);
            if pooled > 0 {
                if let Err(e) = arena.release(list) {
                    outcome = Err(e);
                }
            } else {
                arena.disown(list);
            }
        }
        let slot = self.slot_mut(key);
        slot.state = ChannelState::Uninit;
        slot.callback = None;
        outcome
    }

    /// `true` if the channel is live.
    #[must_use]
    pub fn is_ready(&self, key: ChannelKey) -> bool {
        self.ready(key).is_ok()
    }

    /// Buffer capacity configured at init.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live.
    pub fn capacity(&self, key: ChannelKey) -> Result<usize> {
        self.ready(key)
    }

    /// Nodes claimed from the arena at init (0 for external buffers).
    #[must_use]
    pub fn pooled(&self, key: ChannelKey) -> usize {
        match self.slot(key).state {
            ChannelState::Ready { pooled, .. } => pooled,
            ChannelState::Uninit => 0,
        }
    }

    /// Install (or replace) the completion callback.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live.
    pub fn register_callback(&mut self, key: ChannelKey, cb: ChannelCallback) -> Result<()> {
        self.ready(key)?;
        self.slot_mut(key).callback = Some(cb);
        Ok(())
    }

    // ── Free list ───────────────────────────────────────────────────────

    /// Take an empty buffer; returns it with the channel's capacity.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`], or [`SdioError::NoBuffer`] when the free
    /// list is empty.
    pub fn pop_free_node(&mut self, key: ChannelKey) -> Result<(NodeId, usize)> {
        let capacity = self.ready(key)?;
        let (arena, list) = self.split(key, Which::Free);
        let id = arena.pop(list, Owner::Caller)?;
        Ok((id, capacity.min(arena.capacity(id))))
    }

    /// Return a chain of buffers to the free list.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live.
    pub fn push_free_list(&mut self, key: ChannelKey, chain: NodeChain) -> Result<()> {
        self.ready(key)?;
        let (arena, list) = self.split(key, Which::Free);
        arena.splice(list, chain, Owner::Free(key));
        Ok(())
    }

    // ── Ongoing list ────────────────────────────────────────────────────

    /// Queue one caller-owned node.
    ///
    /// On a TX channel the node must carry a payload of 1 to capacity bytes.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live,
    /// [`SdioError::InvalidParameter`] if the caller does not own `id` or a
    /// TX payload is empty or too large.
    pub fn push_ongoing_node(&mut self, key: ChannelKey, id: NodeId) -> Result<()> {
        self.ready(key)?;
        if !self.arena.is_caller_owned(id) {
            return Err(SdioError::InvalidParameter);
        }
        if key.dir == Direction::Tx {
            self.check_tx_chain(key, NodeChain::single(id))?;
        }
        let (arena, list) = self.split(key, Which::Ongoing);
        arena.push_back(list, id, Owner::Ongoing(key));
        Ok(())
    }

    /// Queue a caller-produced chain.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live,
    /// [`SdioError::InvalidParameter`] if a TX node is empty or too large.
    pub fn push_ongoing_list(&mut self, key: ChannelKey, chain: NodeChain) -> Result<()> {
        self.ready(key)?;
        if key.dir == Direction::Tx {
            self.check_tx_chain(key, chain)?;
        }
        let (arena, list) = self.split(key, Which::Ongoing);
        arena.splice(list, chain, Owner::Ongoing(key));
        Ok(())
    }

    /// Dequeue the oldest ongoing node, tagging it `owner`.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`], or [`SdioError::NoBuffer`] if nothing
    /// is queued.
    pub fn pop_ongoing_node(&mut self, key: ChannelKey, owner: Owner) -> Result<NodeId> {
        self.ready(key)?;
        let (arena, list) = self.split(key, Which::Ongoing);
        arena.pop(list, owner)
    }

    /// Put an engine-held node back at the front of the ongoing list.
    pub(crate) fn requeue_ongoing_front(&mut self, key: ChannelKey, id: NodeId) {
        let (arena, list) = self.split(key, Which::Ongoing);
        arena.push_front(list, id, Owner::Ongoing(key));
    }

    /// Head of the ongoing list without removing it.
    #[must_use]
    pub fn peek_ongoing(&self, key: ChannelKey) -> Option<NodeId> {
        self.slot(key).ongoing.head()
    }

    /// Ongoing list length.
    #[must_use]
    pub fn ongoing_count(&self, key: ChannelKey) -> usize {
        self.slot(key).ongoing.count()
    }

    // ── Finish list ─────────────────────────────────────────────────────

    /// Append a caller-produced chain to the finish list.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] if the channel is not live.
    pub fn push_finish_list(&mut self, key: ChannelKey, chain: NodeChain) -> Result<()> {
        self.ready(key)?;
        let (arena, list) = self.split(key, Which::Finish);
        arena.splice(list, chain, Owner::Finish(key));
        Ok(())
    }

    /// Move an engine-held (or just-popped) node to the finish list.
    pub(crate) fn finish_node(&mut self, key: ChannelKey, id: NodeId) {
        let (arena, list) = self.split(key, Which::Finish);
        arena.push_back(list, id, Owner::Finish(key));
    }

    /// Take the oldest finished node.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`], or [`SdioError::NoBuffer`] if the
    /// finish list is empty.
    pub fn pop_finish_node(&mut self, key: ChannelKey) -> Result<NodeId> {
        self.ready(key)?;
        let (arena, list) = self.split(key, Which::Finish);
        arena.pop(list, Owner::Caller)
    }

    /// Finish list length.
    #[must_use]
    pub fn finish_count(&self, key: ChannelKey) -> usize {
        self.slot(key).finish.count()
    }

    /// Detach the whole finish list for notification.
    ///
    /// Returns `None` when the channel has no callback or nothing finished;
    /// without a callback, nodes stay put for [`pop_finish_node`].
    ///
    /// [`pop_finish_node`]: Self::pop_finish_node
    pub fn detach_finish(&mut self, key: ChannelKey) -> Option<(ChannelCallback, NodeChain)> {
        let cb = self.slot(key).callback?;
        let (arena, list) = self.split(key, Which::Finish);
        arena.detach(list).map(|chain| (cb, chain))
    }

    /// Free list length.
    #[must_use]
    pub fn free_count(&self, key: ChannelKey) -> usize {
        self.slot(key).free.count()
    }

    /// Integrity walk over all three lists of `key`.
    #[must_use]
    pub fn verify(&self, key: ChannelKey) -> bool {
        let slot = self.slot(key);
        self.arena.verify(&slot.free)
            && self.arena.verify(&slot.ongoing)
            && self.arena.verify(&slot.finish)
    }

    /// Check a TX chain before it is queued: every node caller-owned and
    /// carrying a payload within the channel's capacity.
    ///
    /// # Errors
    ///
    /// [`SdioError::NotInitialized`] or [`SdioError::InvalidParameter`].
    #[allow(clippy::arithmetic_side_effects)] // Safety: walked <= chain.count
    pub fn check_tx_chain(&self, key: ChannelKey, chain: NodeChain) -> Result<()> {
        let capacity = self.ready(key)?;
        let mut cursor = Some(chain.head);
        let mut walked = 0usize;
        while let Some(id) = cursor {
            if walked == chain.count {
                break;
            }
            if !self.arena.is_caller_owned(id) {
                return Err(SdioError::InvalidParameter);
            }
            let (len, _) = self.arena.meta(id);
            if len == 0 || len > capacity {
                return Err(SdioError::InvalidParameter);
            }
            walked += 1;
            cursor = self.arena.next(id);
        }
        Ok(())
    }
}
