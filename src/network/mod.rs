//! Network layer: capability directory, HTTP transport and push channel
//!
//! All request/response traffic goes through [`HttpTransport`]; push
//! notifications arrive through [`push::PushTransport`]. Both are traits so
//! the engine can run against the in-process doubles in [`simulated`].

pub mod client;
pub mod directory;
pub mod http;
pub mod push;
pub mod simulated;
pub mod template;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{HypermediaClient, Session};
pub use directory::{exists, fill, resolve, Link, Manifest, Method};
pub use push::{GroupKey, PushConnection, PushMessage, PushTransport};
pub use template::{ParamValue, TemplateParams};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HttpError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response body: {0}")]
    Body(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HypermediaError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("No link with relation '{0}'")]
    LinkNotFound(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Template error: {0}")]
    Template(String),
}

impl HypermediaError {
    /// The server's own message when the request was rejected.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            HypermediaError::Http(HttpError::Status { message, .. }) => Some(message),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PushError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Join error: {0}")]
    JoinError(String),

    #[error("Push channel disconnected")]
    Disconnected,
}

/// A request produced by following a capability link.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub href: String,
    pub body: Option<serde_json::Value>,
}

/// Executes HTTP requests and returns the decoded JSON body.
///
/// An empty response body decodes as `Value::Null`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<serde_json::Value, HttpError>;
}
