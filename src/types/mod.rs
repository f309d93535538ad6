//! Typed entities exchanged with the server of record

pub mod claimant;
pub mod room;

pub use claimant::{ClaimantDemand, ClaimantId, Sex};
pub use room::{find_building, Allocation, Building, Room, RoomId, RoomStatus};
