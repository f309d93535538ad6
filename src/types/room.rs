//! Rooms, allocations and buildings as the server sends them

use serde::{Deserialize, Deserializer, Serialize};

use crate::network::directory::{self, Link};

/// Server-assigned room identifier.
pub type RoomId = i64;

/// Server-authoritative room classification. Sent as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RoomStatus {
    Unavailable = 0,
    Empty = 1,
    Occupied = 2,
    PartiallyOccupied = 3,
    NotReady = 4,
}

impl TryFrom<u8> for RoomStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RoomStatus::Unavailable),
            1 => Ok(RoomStatus::Empty),
            2 => Ok(RoomStatus::Occupied),
            3 => Ok(RoomStatus::PartiallyOccupied),
            4 => Ok(RoomStatus::NotReady),
            other => Err(format!("unknown room status {}", other)),
        }
    }
}

impl From<RoomStatus> for u8 {
    fn from(status: RoomStatus) -> Self {
        status as u8
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoomStatus::Unavailable => "unavailable",
            RoomStatus::Empty => "empty",
            RoomStatus::Occupied => "occupied",
            RoomStatus::PartiallyOccupied => "partial",
            RoomStatus::NotReady => "not ready",
        };
        f.write_str(name)
    }
}

/// One claimant's hold on a room.
///
/// `partial` of `None` or `<= 0` occupies the whole room; a positive value
/// occupies exactly that many places.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub sno: i64,
    pub room_id: RoomId,
    #[serde(rename = "contingentLeaderNo")]
    pub claimant_id: String,
    #[serde(default)]
    pub partial: Option<i32>,
    #[serde(default)]
    pub contingent_arrival_no: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub links: Vec<Link>,
}

impl Allocation {
    /// Whether this allocation occupies the whole room.
    pub fn is_full(&self) -> bool {
        !matches!(self.partial, Some(p) if p > 0)
    }

    /// Places consumed in a room of `capacity`.
    pub fn units(&self, capacity: u32) -> u64 {
        match self.partial {
            Some(p) if p > 0 => p as u64,
            _ => capacity as u64,
        }
    }
}

/// A room snapshot.
///
/// Holds server data only; operator selection state lives in
/// [`crate::allocation::Selection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: RoomId,
    pub location: String,
    #[serde(default)]
    pub location_extra: Option<String>,
    pub room_name: String,
    #[serde(default)]
    pub lock_no: Option<String>,
    pub capacity: u32,
    pub status: RoomStatus,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(rename = "roomAllocation", default, deserialize_with = "null_as_empty")]
    pub allocations: Vec<Allocation>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub links: Vec<Link>,
}

impl Room {
    pub fn link(&self, rel: &str) -> Link {
        directory::resolve(&self.links, rel)
    }

    pub fn has_link(&self, rel: &str) -> bool {
        directory::exists(&self.links, rel)
    }

    pub fn held_by(&self, claimant_id: &str) -> bool {
        self.allocations.iter().any(|a| a.claimant_id == claimant_id)
    }
}

/// A location with all of its rooms. The unit of full reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub location: String,
    #[serde(default)]
    pub location_full_name: String,
    #[serde(default)]
    pub default_capacity: u32,
    #[serde(rename = "room", default, deserialize_with = "null_as_empty")]
    pub rooms: Vec<Room>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub links: Vec<Link>,
}

impl Building {
    pub fn link(&self, rel: &str) -> Link {
        directory::resolve(&self.links, rel)
    }
}

/// Find a building by location code, ignoring case.
pub fn find_building<'a>(buildings: &'a [Building], location: &str) -> Option<&'a Building> {
    buildings
        .iter()
        .find(|b| b.location.eq_ignore_ascii_case(location))
}

/// Lists the server sends as `null` become empty.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
