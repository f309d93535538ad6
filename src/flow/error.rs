use thiserror::Error;

use crate::network::HypermediaError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Reconciliation channel has shut down")]
    ShutDown,

    #[error("Failed to load location: {0}")]
    LoadError(#[from] HypermediaError),

    #[error("Location has no '{0}' link")]
    MissingLink(String),
}
