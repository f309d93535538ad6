//! Reconciliation: keeping mirrors in step with the server of record
//!
//! A [`ReconciliationChannel`] listens on a push subscription for one
//! location and refetches exactly the rooms a notification names. All
//! refetch bookkeeping happens on a single loop task fed by a command
//! queue, so the request-token supersession rule needs no locking.

mod claimant;
mod error;
mod reconciler;
mod state;

pub use claimant::ClaimantMirror;
pub use error::FlowError;
pub use reconciler::{
    load_location, FetchFailure, ReconcileEvent, ReconciliationChannel, RefreshOutcome,
    RefreshScope,
};
pub use state::ChannelState;
