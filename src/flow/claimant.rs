//! Claimant aggregate kept current after transactions

use tokio::sync::watch;

use super::error::FlowError;
use crate::network::HypermediaClient;
use crate::types::ClaimantDemand;

/// Latest known demand of one claimant arrival.
///
/// Refreshed through the aggregate's own `self` link whenever a
/// transaction changes what has been allotted.
pub struct ClaimantMirror {
    client: HypermediaClient,
    demand_tx: watch::Sender<ClaimantDemand>,
}

impl ClaimantMirror {
    pub fn new(client: HypermediaClient, demand: ClaimantDemand) -> Self {
        let (demand_tx, _) = watch::channel(demand);
        Self { client, demand_tx }
    }

    pub fn current(&self) -> ClaimantDemand {
        self.demand_tx.borrow().clone()
    }

    pub fn changes(&self) -> watch::Receiver<ClaimantDemand> {
        self.demand_tx.subscribe()
    }

    /// Refetch the aggregate and publish it.
    pub async fn refresh(&self) -> Result<ClaimantDemand, FlowError> {
        let link = self.demand_tx.borrow().link("self");
        if link.is_empty() {
            return Err(FlowError::MissingLink("self".to_string()));
        }
        let demand: ClaimantDemand = self.client.invoke(&link).await?;
        log::debug!(
            "Claimant {} arrival {}: {}/{} male, {}/{} female allotted",
            demand.claimant_id,
            demand.arrival_no,
            demand.allotted_male,
            demand.male,
            demand.allotted_female,
            demand.female
        );
        self.demand_tx.send_replace(demand.clone());
        Ok(demand)
    }
}
