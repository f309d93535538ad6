//! Occupancy arithmetic over room snapshots
//!
//! Every function here is total and side-effect free. An allocation with no
//! positive `partial` consumes the whole room; a positive `partial` consumes
//! exactly that many places. Overbooking is representable and is reported,
//! never rejected: free capacity is clamped at zero.

use std::ops::{Add, AddAssign};

use serde::Serialize;

use crate::types::{Room, RoomStatus};

/// Places consumed by all allocations on `room`.
pub fn units_used(room: &Room) -> u64 {
    room.allocations
        .iter()
        .map(|a| a.units(room.capacity))
        .sum()
}

/// Places consumed by partial allocations only.
pub fn partial_units_used(room: &Room) -> u64 {
    room.allocations
        .iter()
        .filter_map(|a| match a.partial {
            Some(p) if p > 0 => Some(p as u64),
            _ => None,
        })
        .sum()
}

/// True when the allocations on `room` consume all of its capacity.
///
/// A room with no allocations is never full, including a zero-capacity one.
/// Operator selection is not considered here; it only takes precedence
/// in [`classify`].
pub fn is_fully_occupied(room: &Room) -> bool {
    !room.allocations.is_empty() && units_used(room) >= room.capacity as u64
}

/// True when some, but not all, places are taken.
pub fn is_partially_occupied(room: &Room) -> bool {
    let units = units_used(room);
    units > 0 && units < room.capacity as u64
}

/// Places still free, never negative.
pub fn free_capacity(room: &Room) -> u32 {
    if is_fully_occupied(room) {
        0
    } else if is_partially_occupied(room) {
        (room.capacity as u64).saturating_sub(units_used(room)) as u32
    } else {
        room.capacity
    }
}

/// Whether new allocations may be placed in `room`.
pub fn can_allocate(room: &Room) -> bool {
    matches!(room.status, RoomStatus::Empty | RoomStatus::PartiallyOccupied)
        && !is_fully_occupied(room)
}

/// Display class of a room from one claimant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoomClass {
    Selected,
    AlreadyHeldByViewerPartial,
    AlreadyHeldByViewerFull,
    HeldByOtherPartial,
    HeldByOther,
    HeldByBoth,
    StatusFallback(RoomStatus),
}

impl std::fmt::Display for RoomClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomClass::Selected => f.write_str("selected"),
            RoomClass::AlreadyHeldByViewerPartial => f.write_str("already-partial"),
            RoomClass::AlreadyHeldByViewerFull => f.write_str("already"),
            RoomClass::HeldByOtherPartial => f.write_str("partial"),
            RoomClass::HeldByOther => f.write_str("occupied"),
            RoomClass::HeldByBoth => f.write_str("already-fullshared"),
            RoomClass::StatusFallback(status) => write!(f, "{}", status),
        }
    }
}

/// Classify `room` for `viewer`.
///
/// Local selection wins over anything derived from allocations, which in
/// turn wins over the server status. A room the viewer already fills keeps
/// its own class instead of collapsing into "occupied".
pub fn classify(room: &Room, viewer: Option<&str>, selected: bool) -> RoomClass {
    if selected {
        return RoomClass::Selected;
    }

    let mut viewer_holds = false;
    let mut other_holds = false;
    for allocation in &room.allocations {
        if Some(allocation.claimant_id.as_str()) == viewer {
            viewer_holds = true;
        } else {
            other_holds = true;
        }
    }

    if units_used(room) < room.capacity as u64 {
        if viewer_holds {
            return RoomClass::AlreadyHeldByViewerPartial;
        }
        if other_holds {
            return RoomClass::HeldByOtherPartial;
        }
    } else {
        match (viewer_holds, other_holds) {
            (true, true) => return RoomClass::HeldByBoth,
            (true, false) => return RoomClass::AlreadyHeldByViewerFull,
            (false, true) => return RoomClass::HeldByOther,
            (false, false) => {}
        }
    }

    RoomClass::StatusFallback(room.status)
}

/// Room and place counts for one or more buildings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OccupancySummary {
    pub rooms_total: usize,
    pub rooms_empty: usize,
    pub rooms_partial: usize,
    pub rooms_filled: usize,
    pub rooms_not_ready: usize,
    /// Free places in allocable rooms.
    pub capacity_empty: u64,
    /// Places taken.
    pub capacity_filled: u64,
    /// Places in rooms that are not ready or unavailable.
    pub capacity_not_ready: u64,
}

impl Add for OccupancySummary {
    type Output = OccupancySummary;

    fn add(mut self, other: OccupancySummary) -> OccupancySummary {
        self += other;
        self
    }
}

impl AddAssign for OccupancySummary {
    fn add_assign(&mut self, other: OccupancySummary) {
        self.rooms_total += other.rooms_total;
        self.rooms_empty += other.rooms_empty;
        self.rooms_partial += other.rooms_partial;
        self.rooms_filled += other.rooms_filled;
        self.rooms_not_ready += other.rooms_not_ready;
        self.capacity_empty += other.capacity_empty;
        self.capacity_filled += other.capacity_filled;
        self.capacity_not_ready += other.capacity_not_ready;
    }
}

/// Summarize a room list.
pub fn summarize<'a>(rooms: impl IntoIterator<Item = &'a Room>) -> OccupancySummary {
    let mut summary = OccupancySummary::default();
    for room in rooms {
        summary.rooms_total += 1;
        if matches!(room.status, RoomStatus::NotReady | RoomStatus::Unavailable) {
            summary.rooms_not_ready += 1;
            summary.capacity_not_ready += room.capacity as u64;
            continue;
        }

        let taken = units_used(room).min(room.capacity as u64);
        summary.capacity_filled += taken;
        summary.capacity_empty += free_capacity(room) as u64;
        if is_fully_occupied(room) {
            summary.rooms_filled += 1;
        } else if is_partially_occupied(room) {
            summary.rooms_partial += 1;
        } else {
            summary.rooms_empty += 1;
        }
    }
    summary
}
