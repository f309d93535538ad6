// roomsync - Room allocation synchronization engine

pub mod allocation;
pub mod config;
pub mod flow;
pub mod mirror;
pub mod network;
pub mod occupancy;
pub mod types;

pub use allocation::{AllocationTransaction, Selection, TransactionError, ValidationError};
pub use config::EngineConfig;
pub use flow::{ChannelState, ClaimantMirror, ReconcileEvent, ReconciliationChannel};
pub use mirror::ResourceMirror;
pub use network::{HypermediaClient, Session};
