//! Batch allotment, marking and deallocation
//!
//! Nothing here mutates the resource mirror. A successful call asks the
//! reconciliation channel to refetch the touched rooms and refreshes the
//! claimant aggregate; a rejected call leaves every local copy as it was
//! and hands the server's message back unchanged. Rejections are never
//! retried.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::selection::Selection;
use super::validate::{self, AllotEntry, ValidationContext, ValidationError};
use crate::flow::{ClaimantMirror, ReconciliationChannel};
use crate::mirror::ResourceMirror;
use crate::network::{HypermediaClient, HypermediaError, Link};
use crate::types::{Allocation, ClaimantDemand, RoomId, RoomStatus, Sex};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("Nothing selected")]
    EmptySelection,

    #[error("{} problem(s) with the selection", .0.len())]
    Invalid(Vec<ValidationError>),

    #[error("{message}")]
    Rejected { message: String },

    #[error(transparent)]
    Hypermedia(HypermediaError),
}

impl From<HypermediaError> for TransactionError {
    fn from(e: HypermediaError) -> Self {
        match e.server_message() {
            Some(message) => TransactionError::Rejected {
                message: message.to_string(),
            },
            None => TransactionError::Hypermedia(e),
        }
    }
}

/// One entry of a marking batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEntry {
    pub room_id: RoomId,
    pub status: RoomStatus,
}

/// What a confirmed transaction touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub rooms: Vec<RoomId>,
    /// Claimant aggregate after the refresh, if one was attached and the
    /// refresh succeeded.
    pub claimant: Option<ClaimantDemand>,
}

/// Submits operator commands for one location.
pub struct AllocationTransaction {
    client: HypermediaClient,
    mirror: Arc<ResourceMirror>,
    claimant: Option<Arc<ClaimantMirror>>,
    reconciler: Option<Arc<ReconciliationChannel>>,
    sex: Option<Sex>,
}

impl AllocationTransaction {
    pub fn new(client: HypermediaClient, mirror: Arc<ResourceMirror>) -> Self {
        Self {
            client,
            mirror,
            claimant: None,
            reconciler: None,
            sex: None,
        }
    }

    /// Allot on behalf of this claimant. Its `allot` link receives batches.
    pub fn with_claimant(mut self, claimant: Arc<ClaimantMirror>) -> Self {
        self.claimant = Some(claimant);
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<ReconciliationChannel>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Check requested places against this part of the claimant's demand.
    pub fn with_sex(mut self, sex: Sex) -> Self {
        self.sex = Some(sex);
        self
    }

    /// Validate `selection` without sending anything.
    pub fn validate(&self, selection: &Selection) -> Vec<ValidationError> {
        self.validate_batch(selection).err().unwrap_or_default()
    }

    /// Validate `selection` and build the batch that would be sent.
    pub fn validate_batch(
        &self,
        selection: &Selection,
    ) -> Result<Vec<AllotEntry>, Vec<ValidationError>> {
        let demand = self.claimant.as_ref().map(|c| c.current());
        let context = ValidationContext {
            claimant: demand.as_ref(),
            sex: self.sex,
        };
        validate::validate_batch(selection, &self.mirror, &context)
    }

    pub fn has_unallotable(&self, selection: &Selection) -> bool {
        validate::has_unallotable(selection, &self.mirror)
    }

    pub fn has_unmarkable(&self, selection: &Selection) -> bool {
        validate::has_unmarkable(selection, &self.mirror)
    }

    /// Validate and send the whole selection as one allotment batch.
    pub async fn submit(&self, selection: &Selection) -> Result<Committed, TransactionError> {
        if selection.is_empty() {
            return Err(TransactionError::EmptySelection);
        }
        let batch = self
            .validate_batch(selection)
            .map_err(TransactionError::Invalid)?;
        let link = self.claimant_link("allot")?;
        let rooms: Vec<RoomId> = batch.iter().map(|e| e.room_id).collect();

        log::info!("Allotting {} room(s) via {}", batch.len(), link.href);
        self.send(&link, &batch).await?;
        Ok(self.committed(rooms).await)
    }

    /// Set the status of every selected room in one batch.
    ///
    /// Each room must advertise `mark`; the batch goes to the building's
    /// own `mark` link.
    pub async fn mark(
        &self,
        selection: &Selection,
        status: RoomStatus,
    ) -> Result<Vec<RoomId>, TransactionError> {
        if selection.is_empty() {
            return Err(TransactionError::EmptySelection);
        }
        let errors = validate::validate_marking(selection, &self.mirror);
        if !errors.is_empty() {
            return Err(TransactionError::Invalid(errors));
        }

        let link = self.mirror.link(validate::MARK_REL);
        if link.is_empty() {
            return Err(HypermediaError::LinkNotFound(validate::MARK_REL.to_string()).into());
        }
        let batch: Vec<MarkEntry> = selection
            .ids()
            .into_iter()
            .map(|room_id| MarkEntry { room_id, status })
            .collect();
        let rooms: Vec<RoomId> = batch.iter().map(|e| e.room_id).collect();

        log::info!("Marking {} room(s) {}", batch.len(), status);
        self.send(&link, &batch).await?;
        if let Some(reconciler) = &self.reconciler {
            reconciler.request_refresh(rooms.clone());
        }
        Ok(rooms)
    }

    /// Remove one allocation through its `delete` link.
    pub async fn unallocate(&self, allocation: &Allocation) -> Result<Committed, TransactionError> {
        let link = crate::network::resolve(&allocation.links, "delete");
        if link.is_empty() {
            return Err(HypermediaError::LinkNotFound("delete".to_string()).into());
        }
        log::info!(
            "Removing allocation {} of {} from room {}",
            allocation.sno,
            allocation.claimant_id,
            allocation.room_id
        );
        if let Err(e) = self.client.invoke_raw(&link, None).await {
            log::warn!("Deallocation rejected: {}", e);
            return Err(e.into());
        }
        Ok(self.committed(vec![allocation.room_id]).await)
    }

    fn claimant_link(&self, rel: &str) -> Result<Link, TransactionError> {
        let link = self
            .claimant
            .as_ref()
            .map(|c| c.current().link(rel))
            .unwrap_or_else(Link::not_found);
        if link.is_empty() {
            return Err(HypermediaError::LinkNotFound(rel.to_string()).into());
        }
        Ok(link)
    }

    async fn send<B: Serialize + ?Sized>(&self, link: &Link, batch: &B) -> Result<(), TransactionError> {
        let body =
            serde_json::to_value(batch).map_err(|e| HypermediaError::Decode(e.to_string()))?;
        if let Err(e) = self.client.invoke_raw(link, Some(body)).await {
            log::warn!("Batch to {} rejected: {}", link.href, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Follow-up after server confirmation.
    async fn committed(&self, rooms: Vec<RoomId>) -> Committed {
        if let Some(reconciler) = &self.reconciler {
            reconciler.request_refresh(rooms.clone());
        }
        let claimant = match &self.claimant {
            Some(claimant) => match claimant.refresh().await {
                Ok(demand) => Some(demand),
                Err(e) => {
                    log::warn!("Claimant refresh after commit failed: {}", e);
                    None
                }
            },
            None => None,
        };
        Committed { rooms, claimant }
    }
}
