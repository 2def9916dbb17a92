//! Buffer pool: an arena of fixed-size nodes threaded into index lists
//!
//! Every node lives in one [`NodeArena`] slot for the life of the driver and
//! is addressed by [`NodeId`]. Lists are `{head, tail, count}` triples over
//! the slots' `next` links, so push and pop are O(1) and no node memory is
//! ever allocated or freed at runtime.
//!
//! # Ownership
//!
//! Each slot carries an [`Owner`] tag naming the single place the node
//! currently belongs to. Lists only accept nodes whose tag says the caller
//! (or the engine) holds them, so a node cannot be linked into two lists at
//! once. A chain handed in from outside is walked before it is spliced;
//! a walk that disagrees with the chain's count is a programming error and
//! aborts.

use crate::channel::ChannelKey;
use crate::error::{Result, SdioError};
use crate::fatal;

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u16);

impl NodeId {
    /// Raw slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a node currently belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Owner {
    /// In the arena reservoir, not attached to any channel.
    Unclaimed,
    /// On a channel's free list.
    Free(ChannelKey),
    /// Queued on a channel's ongoing list (TX data to send, RX buffer to fill).
    Ongoing(ChannelKey),
    /// On a channel's finish list, waiting for notification.
    Finish(ChannelKey),
    /// Held by the engine between lists (RX payload mid-reassembly).
    Engine(ChannelKey),
    /// Handed to the application.
    Caller,
}

/// A linked run of nodes: the `(head, tail, count)` triple exchanged with
/// callers and callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeChain {
    /// First node
    pub head: NodeId,
    /// Last node
    pub tail: NodeId,
    /// Nodes from `head` to `tail` inclusive
    pub count: usize,
}

impl NodeChain {
    /// Chain of exactly one node.
    #[must_use]
    pub const fn single(id: NodeId) -> Self {
        Self {
            head: id,
            tail: id,
            count: 1,
        }
    }
}

// ── Lists ───────────────────────────────────────────────────────────────────

/// Singly linked list of arena nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct List {
    head: Option<NodeId>,
    tail: Option<NodeId>,
    count: usize,
}

impl List {
    /// Empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            count: 0,
        }
    }

    /// Recorded node count.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// `true` when the list holds no nodes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// First node, if any.
    #[must_use]
    pub const fn head(&self) -> Option<NodeId> {
        self.head
    }
}

// ── Arena ───────────────────────────────────────────────────────────────────

struct Slot<const BYTES: usize> {
    next: Option<NodeId>,
    len: u16,
    subtype: u8,
    capacity: u16,
    owner: Owner,
    data: [u8; BYTES],
}

/// Fixed arena of `NODES` nodes, each with `BYTES` bytes of payload storage.
///
/// Construction is `const` and touches no node storage, so an arena (or an
/// engine holding one) can be placed directly in a `static`. Slots are
/// materialised the first time they are claimed; released nodes go to the
/// reservoir and are reused before any fresh slot is taken.
pub struct NodeArena<const NODES: usize, const BYTES: usize> {
    slots: heapless::Vec<Slot<BYTES>, NODES>,
    reservoir: List,
}

impl<const NODES: usize, const BYTES: usize> NodeArena<NODES, BYTES> {
    const LAYOUT_OK: () = assert!(
        NODES <= u16::MAX as usize && BYTES <= u16::MAX as usize,
        "node ids and lengths are 16-bit"
    );

    /// Create an arena with every node unclaimed.
    #[must_use]
    pub const fn new() -> Self {
        let () = Self::LAYOUT_OK;
        Self {
            slots: heapless::Vec::new(),
            reservoir: List::new(),
        }
    }

    /// Nodes not claimed by any channel or caller.
    #[must_use]
    pub fn unclaimed(&self) -> usize {
        self.reservoir
            .count
            .saturating_add(NODES.saturating_sub(self.slots.len()))
    }

    /// Largest per-node capacity this arena can offer.
    #[must_use]
    pub const fn node_bytes() -> usize {
        BYTES
    }

    fn slot(&self, id: NodeId) -> Option<&Slot<BYTES>> {
        self.slots.get(id.index())
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot<BYTES>> {
        self.slots.get_mut(id.index())
    }

    /// Slot of a node reached through a list link. A dangling link means
    /// the lists are broken.
    fn linked_mut(&mut self, id: NodeId) -> &mut Slot<BYTES> {
        match self.slots.get_mut(id.index()) {
            Some(slot) => slot,
            None => fatal::list_corruption(id.index(), 0),
        }
    }

    fn linked(&self, id: NodeId) -> &Slot<BYTES> {
        match self.slots.get(id.index()) {
            Some(slot) => slot,
            None => fatal::list_corruption(id.index(), 0),
        }
    }

    // ── Core list operations ────────────────────────────────────────────

    /// Remove the head of `list`, tagging it `owner`.
    ///
    /// # Errors
    ///
    /// [`SdioError::NoBuffer`] if the list is empty.
    #[allow(clippy::arithmetic_side_effects)] // Safety: count >= 1 when head is Some
    pub fn pop(&mut self, list: &mut List, owner: Owner) -> Result<NodeId> {
        let id = list.head.ok_or(SdioError::NoBuffer)?;
        let slot = self.linked_mut(id);
        list.head = slot.next.take();
        slot.owner = owner;
        list.count -= 1;
        if list.head.is_none() {
            list.tail = None;
        }
        Ok(id)
    }

    /// Append one node the engine or caller holds.
    pub fn push_back(&mut self, list: &mut List, id: NodeId, owner: Owner) {
        self.take_held(id, owner);
        self.link_back(list, id, id, 1);
    }

    /// Prepend one node the engine or caller holds.
    #[allow(clippy::arithmetic_side_effects)] // Safety: count bounded by NODES
    pub fn push_front(&mut self, list: &mut List, id: NodeId, owner: Owner) {
        self.take_held(id, owner);
        self.linked_mut(id).next = list.head;
        list.head = Some(id);
        if list.tail.is_none() {
            list.tail = Some(id);
        }
        list.count += 1;
    }

    /// Append an externally produced chain after validating it by traversal.
    ///
    /// Every node must be caller-owned, and walking `chain.count` links from
    /// `chain.head` must land on `chain.tail` with nothing after it. Anything
    /// else aborts.
    pub fn splice(&mut self, list: &mut List, chain: NodeChain, owner: Owner) {
        self.verify_chain(chain);
        let mut cursor = Some(chain.head);
        while let Some(id) = cursor {
            let slot = self.linked_mut(id);
            slot.owner = owner;
            cursor = slot.next;
        }
        self.link_back(list, chain.head, chain.tail, chain.count);
    }

    /// Take the whole list, handing every node to the caller.
    pub fn detach(&mut self, list: &mut List) -> Option<NodeChain> {
        let head = list.head?;
        let tail = list.tail?;
        let count = list.count;
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let slot = self.linked_mut(id);
            slot.owner = Owner::Caller;
            cursor = slot.next;
        }
        *list = List::new();
        Some(NodeChain { head, tail, count })
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: count bounded by NODES
    fn link_back(&mut self, list: &mut List, head: NodeId, tail: NodeId, count: usize) {
        match list.tail {
            Some(old_tail) => self.linked_mut(old_tail).next = Some(head),
            None => list.head = Some(head),
        }
        self.linked_mut(tail).next = None;
        list.tail = Some(tail);
        list.count += count;
    }

    fn take_held(&mut self, id: NodeId, owner: Owner) {
        let Some(slot) = self.slot_mut(id) else {
            fatal::foreign_node(id.0)
        };
        if !matches!(slot.owner, Owner::Caller | Owner::Engine(_)) {
            fatal::foreign_node(id.0);
        }
        slot.owner = owner;
        slot.next = None;
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: walked <= chain.count <= NODES
    fn verify_chain(&self, chain: NodeChain) {
        if chain.count == 0 || chain.count > NODES {
            fatal::list_corruption(chain.count, 0);
        }
        let mut cursor = chain.head;
        let mut walked = 1usize;
        loop {
            let Some(slot) = self.slot(cursor) else {
                fatal::list_corruption(chain.count, walked)
            };
            if slot.owner != Owner::Caller {
                fatal::foreign_node(cursor.0);
            }
            if walked == chain.count {
                if cursor != chain.tail || slot.next.is_some() {
                    fatal::list_corruption(chain.count, walked);
                }
                return;
            }
            match slot.next {
                Some(next) => cursor = next,
                None => fatal::list_corruption(chain.count, walked),
            }
            walked += 1;
        }
    }

    /// Walk `list` and confirm that `count` links lead from head to tail
    /// and that the tail is terminated.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // Safety: walked <= NODES
    pub fn verify(&self, list: &List) -> bool {
        let mut walked = 0usize;
        let mut last = None;
        let mut cursor = list.head;
        while let Some(id) = cursor {
            if walked == NODES {
                return false;
            }
            let Some(slot) = self.slot(id) else {
                return false;
            };
            walked += 1;
            last = Some(id);
            cursor = slot.next;
        }
        walked == list.count && last == list.tail
    }

    /// Nodes reachable from the head, bounded by the arena size.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // Safety: walked <= NODES
    pub fn reachable(&self, list: &List) -> usize {
        let mut walked = 0usize;
        let mut cursor = list.head;
        while let Some(id) = cursor {
            if walked == NODES {
                break;
            }
            walked += 1;
            cursor = self.slot(id).and_then(|s| s.next);
        }
        walked
    }

    // ── Claiming and releasing ──────────────────────────────────────────

    /// Move `count` reservoir nodes of `capacity` bytes onto `list`.
    ///
    /// # Errors
    ///
    /// [`SdioError::NoMemory`] if the reservoir holds fewer than `count`
    /// nodes (nothing is claimed), [`SdioError::InvalidParameter`] if
    /// `capacity` exceeds the node size.
    pub fn claim(
        &mut self,
        list: &mut List,
        count: usize,
        capacity: usize,
        owner: Owner,
    ) -> Result<()> {
        let capacity = Self::checked_capacity(capacity)?;
        if self.unclaimed() < count {
            return Err(SdioError::NoMemory);
        }
        for _ in 0..count {
            let id = self.claim_node(capacity)?;
            self.push_back(list, id, owner);
        }
        Ok(())
    }

    /// Take one reservoir node for the caller.
    ///
    /// # Errors
    ///
    /// [`SdioError::NoMemory`] when the reservoir is empty,
    /// [`SdioError::InvalidParameter`] if `capacity` exceeds the node size.
    pub fn claim_one(&mut self, capacity: usize) -> Result<NodeId> {
        let capacity = Self::checked_capacity(capacity)?;
        self.claim_node(capacity)
    }

    #[allow(clippy::cast_possible_truncation)] // Safety: slots.len() < NODES <= u16::MAX
    fn claim_node(&mut self, capacity: u16) -> Result<NodeId> {
        let mut reservoir = self.reservoir;
        if let Ok(id) = self.pop(&mut reservoir, Owner::Caller) {
            self.reservoir = reservoir;
            let slot = self.linked_mut(id);
            slot.capacity = capacity;
            slot.len = 0;
            slot.subtype = 0;
            return Ok(id);
        }
        let id = NodeId(self.slots.len() as u16);
        self.slots
            .push(Slot {
                next: None,
                len: 0,
                subtype: 0,
                capacity,
                owner: Owner::Caller,
                data: [0; BYTES],
            })
            .map_err(|_| SdioError::NoMemory)?;
        Ok(id)
    }

    #[allow(clippy::cast_possible_truncation)] // Safety: capacity <= BYTES <= u16::MAX
    fn checked_capacity(capacity: usize) -> Result<u16> {
        if capacity == 0 || capacity > BYTES {
            return Err(SdioError::InvalidParameter);
        }
        Ok(capacity as u16)
    }

    /// Return a caller-owned node to the reservoir.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if the caller does not own `id`.
    pub fn release_one(&mut self, id: NodeId) -> Result<()> {
        self.check_caller(id)?;
        self.return_to_reservoir(id);
        Ok(())
    }

    /// Return every node on `list` to the reservoir.
    ///
    /// # Errors
    ///
    /// [`SdioError::ListCorruption`] if the number of nodes released differs
    /// from the list's recorded count. Nodes reached before the mismatch was
    /// noticed are still released.
    #[allow(clippy::arithmetic_side_effects)] // Safety: freed <= NODES
    pub fn release(&mut self, list: &mut List) -> Result<usize> {
        let expected = list.count;
        let mut freed = 0usize;
        let mut cursor = list.head;
        while let Some(id) = cursor {
            if freed == NODES {
                break;
            }
            cursor = self.slot(id).and_then(|s| s.next);
            self.return_to_reservoir(id);
            freed += 1;
        }
        *list = List::new();
        if freed == expected {
            Ok(freed)
        } else {
            Err(SdioError::ListCorruption)
        }
    }

    /// Hand every node on `list` back to the caller, unlinked.
    pub fn disown(&mut self, list: &mut List) {
        while self.pop(list, Owner::Caller).is_ok() {}
    }

    fn return_to_reservoir(&mut self, id: NodeId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.owner = Owner::Unclaimed;
            slot.next = None;
            slot.len = 0;
            slot.capacity = 0;
            let mut reservoir = self.reservoir;
            self.link_back(&mut reservoir, id, id, 1);
            self.reservoir = reservoir;
        }
    }

    /// Link caller-owned nodes, in order, into one chain.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if `ids` is empty, repeats a node, or
    /// names a node the caller does not own.
    pub fn link(&mut self, ids: &[NodeId]) -> Result<NodeChain> {
        let (&head, _) = ids.split_first().ok_or(SdioError::InvalidParameter)?;
        for (i, &id) in ids.iter().enumerate() {
            self.check_caller(id)?;
            if ids.get(..i).is_some_and(|seen| seen.contains(&id)) {
                return Err(SdioError::InvalidParameter);
            }
        }
        for pair in ids.windows(2) {
            if let &[a, b] = pair {
                self.linked_mut(a).next = Some(b);
            }
        }
        let tail = *ids.last().ok_or(SdioError::InvalidParameter)?;
        self.linked_mut(tail).next = None;
        Ok(NodeChain {
            head,
            tail,
            count: ids.len(),
        })
    }

    // ── Node access ─────────────────────────────────────────────────────

    /// Current owner of `id`, `None` for an id outside the arena.
    #[must_use]
    pub fn owner(&self, id: NodeId) -> Option<Owner> {
        self.slot(id).map(|s| s.owner)
    }

    /// Node following `id` in whatever chain it is part of.
    #[must_use]
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|s| s.next)
    }

    fn check_caller(&self, id: NodeId) -> Result<()> {
        match self.slot(id) {
            Some(slot) if slot.owner == Owner::Caller => Ok(()),
            _ => Err(SdioError::InvalidParameter),
        }
    }

    /// Payload length and subtype.
    #[must_use]
    pub fn meta(&self, id: NodeId) -> (usize, u8) {
        let slot = self.linked(id);
        (usize::from(slot.len), slot.subtype)
    }

    /// Usable capacity of `id`.
    #[must_use]
    pub fn capacity(&self, id: NodeId) -> usize {
        usize::from(self.linked(id).capacity)
    }

    /// Payload bytes of `id`.
    #[must_use]
    pub fn payload(&self, id: NodeId) -> &[u8] {
        let slot = self.linked(id);
        slot.data.get(..usize::from(slot.len)).unwrap_or(&[])
    }

    /// Writable storage of `id`, limited to its capacity.
    pub fn storage_mut(&mut self, id: NodeId) -> &mut [u8] {
        let slot = self.linked_mut(id);
        let cap = usize::from(slot.capacity);
        slot.data.get_mut(..cap).unwrap_or(&mut [])
    }

    /// Record payload length and subtype.
    #[allow(clippy::cast_possible_truncation)] // Safety: len clamped to capacity <= u16::MAX
    pub fn set_meta(&mut self, id: NodeId, len: usize, subtype: u8) {
        let slot = self.linked_mut(id);
        slot.len = len.min(usize::from(slot.capacity)) as u16;
        slot.subtype = subtype;
    }

    /// Copy `bytes` into a caller-owned node.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if the caller does not own `id` or
    /// `bytes` is larger than its capacity.
    pub fn fill(&mut self, id: NodeId, subtype: u8, bytes: &[u8]) -> Result<()> {
        self.check_caller(id)?;
        let dst = self
            .storage_mut(id)
            .get_mut(..bytes.len())
            .ok_or(SdioError::InvalidParameter)?;
        dst.copy_from_slice(bytes);
        self.set_meta(id, bytes.len(), subtype);
        Ok(())
    }

    /// Copy a caller-owned node's payload into `out`.
    ///
    /// # Errors
    ///
    /// [`SdioError::InvalidParameter`] if the caller does not own `id` or
    /// `out` is too small.
    pub fn read(&self, id: NodeId, out: &mut [u8]) -> Result<usize> {
        self.check_caller(id)?;
        let src = self.payload(id);
        out.get_mut(..src.len())
            .ok_or(SdioError::InvalidParameter)?
            .copy_from_slice(src);
        Ok(src.len())
    }

    /// `true` if the caller owns `id`.
    #[must_use]
    pub fn is_caller_owned(&self, id: NodeId) -> bool {
        self.check_caller(id).is_ok()
    }
}

impl<const NODES: usize, const BYTES: usize> Default for NodeArena<NODES, BYTES> {
    fn default() -> Self {
        Self::new()
    }
}
