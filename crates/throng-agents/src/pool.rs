//! Fixed-capacity agent pool.
//!
//! Every agent record lives in a pre-allocated [`AgentSlot`]. Slots are
//! handed out by [`AgentPool::acquire`] and returned by
//! [`AgentPool::release`]; the backing storage is allocated once and never
//! grows, which keeps the memory ceiling predictable. An exhausted pool
//! fails with [`PoolError::Exhausted`] instead of reallocating.
//!
//! # Slot lifecycle
//!
//! ```text
//! Unallocated -> Allocated -> Active <-> Sleeping -> PendingDestroy -> Destroyed -> Unallocated
//! ```
//!
//! Each release bumps the slot's generation, so a [`SlotHandle`] kept past
//! a release is rejected with [`PoolError::StaleHandle`].
//!
//! Mutating the free list (`acquire`, `release`, `reclaim_pending`,
//! `compact`) happens only in the single-threaded phases of a tick.

use std::collections::HashMap;

use throng_types::{AgentId, AgentRecord, LifecycleState, Tier, TierAssignment};
use tracing::debug;

use crate::error::PoolError;

/// Opaque reference to a pool slot, valid until the slot is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

impl SlotHandle {
    /// Slot index this handle points at.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the handle was issued with.
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// One reusable storage unit in the pool.
#[derive(Debug, Clone)]
pub struct AgentSlot {
    index: u32,
    generation: u32,
    owner: Option<AgentId>,
    allocation_tick: u64,
    reference_count: u32,
    state: LifecycleState,
    record: Option<AgentRecord>,
    assignment: TierAssignment,
}

impl AgentSlot {
    const fn empty(index: u32) -> Self {
        Self {
            index,
            generation: 0,
            owner: None,
            allocation_tick: 0,
            reference_count: 0,
            state: LifecycleState::Unallocated,
            record: None,
            assignment: TierAssignment {
                tier: Tier::Dormant,
                distance: f32::MAX,
                frames_since_reassignment: 0,
            },
        }
    }

    /// Slot index.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Current generation (bumped on every release).
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// A handle to this slot at its current generation.
    pub const fn handle(&self) -> SlotHandle {
        SlotHandle {
            index: self.index,
            generation: self.generation,
        }
    }

    /// Logical owner, or `None` when unallocated.
    pub const fn owner(&self) -> Option<AgentId> {
        self.owner
    }

    /// Tick at which the slot was acquired.
    pub const fn allocation_tick(&self) -> u64 {
        self.allocation_tick
    }

    /// Number of outstanding references (in-flight analyses).
    pub const fn reference_count(&self) -> u32 {
        self.reference_count
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether this slot holds a live agent.
    pub const fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// The agent record, if one is installed.
    pub const fn record(&self) -> Option<&AgentRecord> {
        self.record.as_ref()
    }

    /// Mutable access to the agent record, if one is installed.
    pub const fn record_mut(&mut self) -> Option<&mut AgentRecord> {
        self.record.as_mut()
    }

    /// Current tier assignment.
    pub const fn assignment(&self) -> &TierAssignment {
        &self.assignment
    }

    fn transition(&mut self, next: LifecycleState) -> Result<(), PoolError> {
        if !self.state.can_transition_to(next) {
            return Err(PoolError::InvalidTransition {
                index: self.index,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Fixed capacity.
    pub capacity: u32,
    /// Slots holding a live (active or sleeping) agent.
    pub live: usize,
    /// Slots on the free list.
    pub free: usize,
    /// Slots awaiting reclamation.
    pub pending_destroy: usize,
}

/// Fixed-capacity slot array with a free list.
#[derive(Debug)]
pub struct AgentPool {
    slots: Vec<AgentSlot>,
    /// Free slot indices; `acquire` pops from the end.
    free: Vec<u32>,
    owners: HashMap<AgentId, SlotHandle>,
    live: usize,
}

impl AgentPool {
    /// Pre-allocate a pool with `capacity` slots.
    ///
    /// The lowest indices are handed out first.
    pub fn with_capacity(capacity: u32) -> Self {
        let slots = (0..capacity).map(AgentSlot::empty).collect();
        let free = (0..capacity).rev().collect();
        Self {
            slots,
            free,
            owners: HashMap::with_capacity(slot_index(capacity)),
            live: 0,
        }
    }

    /// Fixed capacity of the pool.
    pub fn capacity(&self) -> u32 {
        u32::try_from(self.slots.len()).unwrap_or(u32::MAX)
    }

    /// Number of live agents.
    pub const fn live_count(&self) -> usize {
        self.live
    }

    /// Number of slots on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Take a free slot for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when no slot is free.
    pub fn acquire(&mut self, owner: AgentId, tick: u64) -> Result<SlotHandle, PoolError> {
        let capacity = self.capacity();
        let index = self.free.pop().ok_or(PoolError::Exhausted { capacity })?;
        let slot = self
            .slots
            .get_mut(slot_index(index))
            .ok_or(PoolError::Exhausted { capacity })?;
        if let Err(err) = slot.transition(LifecycleState::Allocated) {
            // A slot on the free list must be unallocated; put it back untouched.
            self.free.push(index);
            return Err(err);
        }
        slot.owner = Some(owner);
        slot.allocation_tick = tick;
        slot.reference_count = 0;
        slot.record = None;
        slot.assignment = TierAssignment::default();
        Ok(slot.handle())
    }

    /// Install the agent record into an allocated slot and mark it active.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] for an outdated handle,
    /// [`PoolError::OwnerMismatch`] if the record belongs to another agent,
    /// or [`PoolError::InvalidTransition`] if the slot is not `Allocated`.
    pub fn activate(&mut self, handle: SlotHandle, record: AgentRecord) -> Result<(), PoolError> {
        let slot = self.slot_mut(handle)?;
        if let Some(owner) = slot.owner
            && owner != record.id
        {
            return Err(PoolError::OwnerMismatch {
                owner,
                record: record.id,
            });
        }
        slot.transition(LifecycleState::Active)?;
        let id = record.id;
        slot.record = Some(record);
        self.owners.insert(id, handle);
        self.live = self.live.saturating_add(1);
        Ok(())
    }

    /// Apply a tier assignment, parking dormant agents as `Sleeping` and
    /// waking promoted ones.
    ///
    /// Slots that are not live are left untouched.
    pub fn assign_tier(&mut self, index: u32, assignment: TierAssignment) {
        let Some(slot) = self.slots.get_mut(slot_index(index)) else {
            return;
        };
        if !slot.is_live() {
            return;
        }
        let next = if assignment.tier == Tier::Dormant {
            LifecycleState::Sleeping
        } else {
            LifecycleState::Active
        };
        if slot.state != next {
            // Active <-> Sleeping is always legal for a live slot.
            let _ = slot.transition(next);
        }
        slot.assignment = assignment;
    }

    /// Mark a slot for destruction; it leaves the live population at once
    /// and is reclaimed by the next sweep when unreferenced.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] or [`PoolError::InvalidTransition`].
    pub fn mark_pending_destroy(&mut self, handle: SlotHandle) -> Result<(), PoolError> {
        let slot = self.slot_mut(handle)?;
        let was_live = slot.is_live();
        slot.transition(LifecycleState::PendingDestroy)?;
        let owner = slot.owner;
        if was_live {
            self.live = self.live.saturating_sub(1);
        }
        if let Some(owner) = owner {
            self.owners.remove(&owner);
        }
        Ok(())
    }

    /// Add a reference to a slot (an in-flight analysis covers its agent).
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] for an outdated handle.
    pub fn retain(&mut self, handle: SlotHandle) -> Result<u32, PoolError> {
        let slot = self.slot_mut(handle)?;
        slot.reference_count = slot.reference_count.saturating_add(1);
        Ok(slot.reference_count)
    }

    /// Drop a reference added by [`retain`](Self::retain).
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] for an outdated handle.
    pub fn unretain(&mut self, handle: SlotHandle) -> Result<u32, PoolError> {
        let slot = self.slot_mut(handle)?;
        slot.reference_count = slot.reference_count.saturating_sub(1);
        Ok(slot.reference_count)
    }

    /// Reset a slot to `Unallocated` and return it to the free list.
    ///
    /// The slot is immediately available to [`acquire`](Self::acquire).
    /// Memory is not returned to the allocator.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] for an outdated handle,
    /// [`PoolError::Referenced`] while references are outstanding, or
    /// [`PoolError::InvalidTransition`] for an already unallocated slot.
    pub fn release(&mut self, handle: SlotHandle) -> Result<(), PoolError> {
        let slot = self.slot_mut(handle)?;
        if slot.reference_count > 0 {
            return Err(PoolError::Referenced {
                index: slot.index,
                count: slot.reference_count,
            });
        }
        let was_live = slot.is_live();
        if slot.state != LifecycleState::PendingDestroy {
            slot.transition(LifecycleState::PendingDestroy)?;
        }
        slot.transition(LifecycleState::Destroyed)?;
        slot.transition(LifecycleState::Unallocated)?;

        let owner = slot.owner.take();
        slot.record = None;
        slot.allocation_tick = 0;
        slot.assignment = TierAssignment::default();
        slot.generation = slot.generation.wrapping_add(1);
        let index = slot.index;

        if was_live {
            self.live = self.live.saturating_sub(1);
        }
        if let Some(owner) = owner
            && self.owners.get(&owner) == Some(&handle)
        {
            self.owners.remove(&owner);
        }
        self.free.push(index);
        Ok(())
    }

    /// Release every `PendingDestroy` slot with no outstanding references.
    ///
    /// Returns the number of slots reclaimed.
    pub fn reclaim_pending(&mut self) -> usize {
        let pending: Vec<SlotHandle> = self
            .slots
            .iter()
            .filter(|s| s.state == LifecycleState::PendingDestroy && s.reference_count == 0)
            .map(AgentSlot::handle)
            .collect();
        let mut reclaimed: usize = 0;
        for handle in pending {
            if self.release(handle).is_ok() {
                reclaimed = reclaimed.saturating_add(1);
            }
        }
        if reclaimed > 0 {
            debug!(reclaimed, free = self.free.len(), "Reclaimed pending slots");
        }
        reclaimed
    }

    /// Reorder the free list so the lowest indices are reused first.
    ///
    /// Never changes capacity.
    pub fn compact(&mut self) {
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        self.free.dedup();
    }

    /// Borrow a slot through its handle.
    pub fn get(&self, handle: SlotHandle) -> Option<&AgentSlot> {
        self.slots
            .get(slot_index(handle.index))
            .filter(|s| s.generation == handle.generation)
    }

    /// The handle of the slot currently holding `agent`.
    pub fn handle_of(&self, agent: AgentId) -> Option<SlotHandle> {
        self.owners.get(&agent).copied()
    }

    /// The record of a live agent.
    pub fn record(&self, agent: AgentId) -> Option<&AgentRecord> {
        let handle = self.handle_of(agent)?;
        self.get(handle).and_then(AgentSlot::record)
    }

    /// Mutable record of a live agent.
    pub fn record_mut(&mut self, agent: AgentId) -> Option<&mut AgentRecord> {
        let handle = self.handle_of(agent)?;
        self.slots
            .get_mut(slot_index(handle.index))
            .filter(|s| s.generation == handle.generation)
            .and_then(AgentSlot::record_mut)
    }

    /// All slots, in index order.
    pub fn slots(&self) -> &[AgentSlot] {
        &self.slots
    }

    /// All slots, mutably. Lifecycle fields stay private; only records can
    /// be changed through the returned slice.
    pub fn slots_mut(&mut self) -> &mut [AgentSlot] {
        &mut self.slots
    }

    /// Iterator over live slots.
    pub fn live_slots(&self) -> impl Iterator<Item = &AgentSlot> {
        self.slots.iter().filter(|s| s.is_live())
    }

    /// Live population per tier, indexed by [`Tier::index`].
    pub fn tier_populations(&self) -> [usize; Tier::COUNT] {
        let mut counts = [0_usize; Tier::COUNT];
        for slot in self.live_slots() {
            if let Some(count) = counts.get_mut(slot.assignment.tier.index()) {
                *count = count.saturating_add(1);
            }
        }
        counts
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let pending_destroy = self
            .slots
            .iter()
            .filter(|s| s.state == LifecycleState::PendingDestroy)
            .count();
        PoolStats {
            capacity: self.capacity(),
            live: self.live,
            free: self.free.len(),
            pending_destroy,
        }
    }

    /// Approximate bytes held by live agents.
    ///
    /// Counts occupied slots and their owner index entries only, so the
    /// figure falls as agents are released.
    pub fn estimated_bytes(&self) -> usize {
        let per_agent = size_of::<AgentSlot>().saturating_add(size_of::<(AgentId, SlotHandle)>());
        self.live.saturating_mul(per_agent)
    }

    fn slot_mut(&mut self, handle: SlotHandle) -> Result<&mut AgentSlot, PoolError> {
        self.slots
            .get_mut(slot_index(handle.index))
            .filter(|s| s.generation == handle.generation)
            .ok_or(PoolError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
            })
    }
}

/// Widen a slot index for slice access.
const fn slot_index(index: u32) -> usize {
    index as usize
}
