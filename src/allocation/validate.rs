//! Business rules checked before a batch is sent

use serde::Serialize;
use thiserror::Error;

use super::selection::{Selection, SelectionEntry};
use crate::mirror::ResourceMirror;
use crate::occupancy;
use crate::types::{ClaimantDemand, Room, RoomId, Sex};

/// Capability a room must advertise to be allotted.
pub const ALLOT_REL: &str = "allot";
/// Capability a room must advertise to be marked.
pub const MARK_REL: &str = "mark";

/// Largest partial size accepted.
pub const MAX_PARTIAL: u32 = 999_999;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Room {room_id} is not loaded")]
    UnknownRoom { room_id: RoomId },

    #[error("Room {room_name} does not allow '{capability}'")]
    MissingCapability {
        room_id: RoomId,
        room_name: String,
        capability: String,
    },

    #[error("Non-allocable room {room_name}")]
    NotAllocable { room_id: RoomId, room_name: String },

    #[error("Invalid partial capacity for {room_name}")]
    InvalidPartialSize {
        room_id: RoomId,
        room_name: String,
        input: Option<String>,
    },

    #[error("Selection needs {requested} places but only {remaining} remain")]
    ExceedsDemand { requested: u64, remaining: u32 },
}

impl ValidationError {
    /// The room this error is about, if it is about one.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            ValidationError::UnknownRoom { room_id }
            | ValidationError::MissingCapability { room_id, .. }
            | ValidationError::NotAllocable { room_id, .. }
            | ValidationError::InvalidPartialSize { room_id, .. } => Some(*room_id),
            ValidationError::ExceedsDemand { .. } => None,
        }
    }
}

/// Extra facts validation may check the selection against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationContext<'a> {
    pub claimant: Option<&'a ClaimantDemand>,
    pub sex: Option<Sex>,
}

/// Parse a partial size typed by the operator.
pub fn parse_partial(input: Option<&str>) -> Option<u32> {
    let value: i64 = input?.trim().parse().ok()?;
    if (1..=MAX_PARTIAL as i64).contains(&value) {
        Some(value as u32)
    } else {
        None
    }
}

/// Whether allotting `room` needs an explicit partial size.
pub fn requires_partial(room: &Room, entry: &SelectionEntry) -> bool {
    entry.allot_partial || occupancy::is_partially_occupied(room)
}

/// Check one selected room. Returns the first rule it breaks and, when it
/// passes, the partial size to send.
fn check_room(
    room: &Room,
    entry: &SelectionEntry,
) -> Result<Option<u32>, ValidationError> {
    if !room.has_link(ALLOT_REL) {
        return Err(ValidationError::MissingCapability {
            room_id: room.room_id,
            room_name: room.room_name.clone(),
            capability: ALLOT_REL.to_string(),
        });
    }
    if !occupancy::can_allocate(room) {
        return Err(ValidationError::NotAllocable {
            room_id: room.room_id,
            room_name: room.room_name.clone(),
        });
    }
    if requires_partial(room, entry) {
        return match parse_partial(entry.partial_input.as_deref()) {
            Some(size) => Ok(Some(size)),
            None => Err(ValidationError::InvalidPartialSize {
                room_id: room.room_id,
                room_name: room.room_name.clone(),
                input: entry.partial_input.clone(),
            }),
        };
    }
    Ok(None)
}

/// One entry of an allotment batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllotEntry {
    pub room_id: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<u32>,
}

/// Validate an allotment selection and build its batch.
///
/// All rooms are read from the mirror at once and the batch is built from
/// those same snapshots, so it always holds exactly the selected rooms.
/// Every room is checked and at most one error is reported per room, so
/// the operator sees all problems at once. A demand check over the rooms
/// that passed is added when the context names a claimant and a sex.
pub fn validate_batch(
    selection: &Selection,
    mirror: &ResourceMirror,
    context: &ValidationContext<'_>,
) -> Result<Vec<AllotEntry>, Vec<ValidationError>> {
    let rooms = mirror.get_many(selection.ids());
    let mut errors = Vec::new();
    let mut batch = Vec::with_capacity(rooms.len());
    let mut requested: u64 = 0;

    for ((room_id, entry), room) in selection.entries().zip(rooms) {
        let Some(room) = room else {
            errors.push(ValidationError::UnknownRoom { room_id });
            continue;
        };
        match check_room(&room, entry) {
            Ok(partial) => {
                requested += match partial {
                    Some(size) => size as u64,
                    None => occupancy::free_capacity(&room) as u64,
                };
                batch.push(AllotEntry { room_id, partial });
            }
            Err(e) => errors.push(e),
        }
    }

    if let (Some(claimant), Some(sex)) = (context.claimant, context.sex) {
        let remaining = claimant.remaining(sex);
        if requested > remaining as u64 {
            errors.push(ValidationError::ExceedsDemand {
                requested,
                remaining,
            });
        }
    }

    if errors.is_empty() {
        Ok(batch)
    } else {
        Err(errors)
    }
}

/// Validate an allotment selection without building a batch.
pub fn validate(
    selection: &Selection,
    mirror: &ResourceMirror,
    context: &ValidationContext<'_>,
) -> Vec<ValidationError> {
    validate_batch(selection, mirror, context).err().unwrap_or_default()
}

/// Validate a marking selection: every room must advertise `mark`.
pub fn validate_marking(selection: &Selection, mirror: &ResourceMirror) -> Vec<ValidationError> {
    selection
        .ids()
        .into_iter()
        .filter_map(|room_id| match mirror.get(room_id) {
            None => Some(ValidationError::UnknownRoom { room_id }),
            Some(room) if !room.has_link(MARK_REL) => Some(ValidationError::MissingCapability {
                room_id,
                room_name: room.room_name,
                capability: MARK_REL.to_string(),
            }),
            Some(_) => None,
        })
        .collect()
}

/// True if a selected room cannot be marked.
pub fn has_unmarkable(selection: &Selection, mirror: &ResourceMirror) -> bool {
    !validate_marking(selection, mirror).is_empty()
}

/// True if a selected room cannot be allotted.
pub fn has_unallotable(selection: &Selection, mirror: &ResourceMirror) -> bool {
    selection.entries().any(|(id, entry)| match mirror.get(id) {
        Some(room) => check_room(&room, entry).is_err(),
        None => true,
    })
}
