//! Operator selection state
//!
//! Kept apart from the room snapshots so that point updates from the
//! server never clobber it and it can never be sent as-is.

use std::collections::BTreeMap;

use crate::mirror::ResourceMirror;
use crate::occupancy;
use crate::types::{Room, RoomId, RoomStatus};

/// Per-room selection details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionEntry {
    /// Operator asked to allot only part of the room.
    pub allot_partial: bool,
    /// Raw partial size as typed. Parsed during validation.
    pub partial_input: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    entries: BTreeMap<RoomId, SelectionEntry>,
    marking: bool,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// In marking mode any room may be selected.
    pub fn set_marking(&mut self, marking: bool) {
        self.marking = marking;
    }

    pub fn is_marking(&self) -> bool {
        self.marking
    }

    /// Whether a click on `room` may change its selection.
    pub fn can_toggle(&self, room: &Room) -> bool {
        (room.status == RoomStatus::Empty && room.allocations.is_empty())
            || (occupancy::is_partially_occupied(room) && occupancy::free_capacity(room) > 0)
            || self.is_selected(room.room_id)
            || self.marking
    }

    /// Flip the selection of `room` if allowed. Returns whether it changed.
    pub fn toggle(&mut self, room: &Room) -> bool {
        if !self.can_toggle(room) {
            return false;
        }
        if self.entries.remove(&room.room_id).is_none() {
            self.entries.insert(room.room_id, SelectionEntry::default());
        }
        true
    }

    /// Select `id` unconditionally. Validation catches bad choices.
    pub fn select(&mut self, id: RoomId) {
        self.entries.entry(id).or_default();
    }

    pub fn deselect(&mut self, id: RoomId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Set the partial size request for a selected room.
    pub fn set_partial(&mut self, id: RoomId, allot_partial: bool, input: Option<&str>) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.allot_partial = allot_partial;
                entry.partial_input = input.map(str::to_string);
                true
            }
            None => false,
        }
    }

    pub fn is_selected(&self, id: RoomId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn entry(&self, id: RoomId) -> Option<&SelectionEntry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (RoomId, &SelectionEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn ids(&self) -> Vec<RoomId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop rooms the mirror no longer has. Returns the dropped ids.
    pub fn prune(&mut self, mirror: &ResourceMirror) -> Vec<RoomId> {
        let gone: Vec<RoomId> = self
            .entries
            .keys()
            .copied()
            .filter(|id| !mirror.contains(*id))
            .collect();
        for id in &gone {
            self.entries.remove(id);
        }
        gone
    }
}
