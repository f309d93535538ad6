//! Claimant demand (a contingent arrival)

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::room::null_as_empty;
use crate::network::directory::{self, Link};

/// Identifier of a claimant (contingent leader number).
pub type ClaimantId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sex {
    Male,
    Female,
}

/// Outstanding demand of one claimant arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimantDemand {
    #[serde(rename = "contingentArrivalNo")]
    pub arrival_no: i64,
    #[serde(rename = "contingentLeaderNo")]
    pub claimant_id: ClaimantId,
    #[serde(default)]
    pub male: u32,
    #[serde(default)]
    pub female: u32,
    #[serde(default)]
    pub allotted_male: u32,
    #[serde(default)]
    pub allotted_female: u32,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub created_on: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub links: Vec<Link>,
}

impl ClaimantDemand {
    /// Places still to be allotted for `sex`.
    pub fn remaining(&self, sex: Sex) -> u32 {
        match sex {
            Sex::Male => self.male.saturating_sub(self.allotted_male),
            Sex::Female => self.female.saturating_sub(self.allotted_female),
        }
    }

    pub fn link(&self, rel: &str) -> Link {
        directory::resolve(&self.links, rel)
    }

    pub fn has_link(&self, rel: &str) -> bool {
        directory::exists(&self.links, rel)
    }
}
