//! Slot registry: per-resource state and the ordered idle list
//!
//! Every resource the pool has created owns exactly one slot. The registry
//! tracks each slot's state and keeps the idle list ordered by the instant
//! a resource became idle: releases append at the tail, the dispatcher pops
//! from the tail (most recently idle), and the reaper scans from the head
//! (idle the longest).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub(crate) type SlotId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Idle,
    Borrowed,
    Destroying,
}

/// An idle resource together with its slot id and idle-since stamp.
pub(crate) struct IdleEntry<R> {
    pub(crate) id: SlotId,
    pub(crate) resource: R,
    pub(crate) since: Instant,
}

pub(crate) struct Registry<R> {
    slots: HashMap<SlotId, SlotState>,
    idle: VecDeque<IdleEntry<R>>,
    borrowed: usize,
    destroying: usize,
    next_id: SlotId,
}

impl<R> Registry<R> {
    pub(crate) fn new() -> Self {
        Self {
            slots: HashMap::new(),
            idle: VecDeque::new(),
            borrowed: 0,
            destroying: 0,
            next_id: 0,
        }
    }

    /// Total live slots, including those whose teardown is still in flight.
    pub(crate) fn count(&self) -> usize {
        self.idle.len() + self.borrowed + self.destroying
    }

    /// Slots that occupy pool capacity: idle plus borrowed. Slots being
    /// destroyed have already given their capacity back.
    pub(crate) fn occupied(&self) -> usize {
        self.idle.len() + self.borrowed
    }

    pub(crate) fn available(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn borrowed(&self) -> usize {
        self.borrowed
    }

    /// Register a fresh slot for a resource that is being handed straight to
    /// a borrower (or parked via [`Registry::release`] if none is waiting).
    pub(crate) fn admit_borrowed(&mut self) -> SlotId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, SlotState::Borrowed);
        self.borrowed += 1;
        id
    }

    /// Pop the most recently idled resource and mark it checked out.
    ///
    /// The caller decides its fate: deliver it ([`SlotState::Borrowed`]
    /// stands), return it via [`Registry::release`], or condemn it via
    /// [`Registry::condemn_borrowed`].
    pub(crate) fn pop_newest_idle(&mut self) -> Option<IdleEntry<R>> {
        let entry = self.idle.pop_back()?;
        self.slots.insert(entry.id, SlotState::Borrowed);
        self.borrowed += 1;
        Some(entry)
    }

    /// Return a checked-out resource to the tail of the idle list.
    pub(crate) fn release(&mut self, id: SlotId, resource: R, now: Instant) {
        debug_assert_eq!(self.slots.get(&id), Some(&SlotState::Borrowed));
        self.borrowed -= 1;
        self.slots.insert(id, SlotState::Idle);
        self.idle.push_back(IdleEntry {
            id,
            resource,
            since: now,
        });
    }

    /// Transition a checked-out slot to destroying.
    pub(crate) fn condemn_borrowed(&mut self, id: SlotId) {
        debug_assert_eq!(self.slots.get(&id), Some(&SlotState::Borrowed));
        self.borrowed -= 1;
        self.destroying += 1;
        self.slots.insert(id, SlotState::Destroying);
    }

    /// Condemn every idle slot, returning the entries for teardown.
    pub(crate) fn condemn_all_idle(&mut self) -> Vec<IdleEntry<R>> {
        let entries: Vec<_> = self.idle.drain(..).collect();
        for entry in &entries {
            self.slots.insert(entry.id, SlotState::Destroying);
        }
        self.destroying += entries.len();
        entries
    }

    /// Condemn idle slots that have outlived `timeout`, oldest first.
    ///
    /// Stops at the first entry younger than the threshold (the list is
    /// sorted by idle age) and never shrinks the occupied set below `min`.
    pub(crate) fn take_expired(
        &mut self,
        now: Instant,
        timeout: Duration,
        min: usize,
    ) -> Vec<IdleEntry<R>> {
        let mut expired = Vec::new();
        while let Some(front) = self.idle.front() {
            if now.duration_since(front.since) < timeout || self.occupied() <= min {
                break;
            }
            let entry = self.idle.pop_front().expect("front was just observed");
            self.slots.insert(entry.id, SlotState::Destroying);
            self.destroying += 1;
            expired.push(entry);
        }
        expired
    }

    /// Remove a slot whose teardown has completed.
    pub(crate) fn finish_destroy(&mut self, id: SlotId) {
        debug_assert_eq!(self.slots.get(&id), Some(&SlotState::Destroying));
        self.slots.remove(&id);
        self.destroying -= 1;
    }
}
