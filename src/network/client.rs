//! Hypermedia client and session context
//!
//! The session owns the current capability manifest and is passed
//! explicitly to whoever needs to resolve a relation; there is no ambient
//! global state. The client turns a resolved link into a request and
//! decodes the typed response. No retries happen here.

use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::directory::{self, Link, Manifest, Method};
use super::template::TemplateParams;
use super::{HttpRequest, HttpTransport, HypermediaError};

/// Per-session context: the capability manifest currently in force.
#[derive(Debug, Default)]
pub struct Session {
    manifest: RwLock<Arc<Manifest>>,
}

impl Session {
    pub fn new(manifest: Manifest) -> Arc<Self> {
        Arc::new(Self {
            manifest: RwLock::new(Arc::new(manifest)),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::new(Manifest::empty())
    }

    /// Snapshot of the current manifest.
    pub fn manifest(&self) -> Arc<Manifest> {
        match self.manifest.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Swap in a freshly fetched manifest (login/logout).
    pub fn replace_manifest(&self, manifest: Manifest) {
        log::info!("Capability manifest replaced ({} relations)", manifest.len());
        let fresh = Arc::new(manifest);
        match self.manifest.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }

    pub fn resolve(&self, rel: &str) -> Link {
        self.manifest().resolve(rel)
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.manifest().exists(rel)
    }

    /// Resolve `rel` only if the manifest advertises it.
    pub fn lookup(&self, rel: &str) -> Option<Link> {
        let manifest = self.manifest();
        manifest.exists(rel).then(|| manifest.resolve(rel))
    }
}

/// Invokes capability links over an [`HttpTransport`].
#[derive(Clone)]
pub struct HypermediaClient {
    transport: Arc<dyn HttpTransport>,
    manifest_url: String,
}

impl HypermediaClient {
    pub fn new(transport: Arc<dyn HttpTransport>, manifest_url: impl Into<String>) -> Self {
        Self {
            transport,
            manifest_url: manifest_url.into(),
        }
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    /// Fetch the capability manifest. The caller decides where to install it.
    pub async fn refresh_manifest(&self) -> Result<Manifest, HypermediaError> {
        let link = Link::new("spec", self.manifest_url.clone(), Method::Get);
        let manifest: Manifest = self.invoke(&link).await?;
        log::info!("Fetched capability manifest with {} relations", manifest.len());
        Ok(manifest)
    }

    /// Fetch the manifest and install it in `session`.
    pub async fn refresh_session(&self, session: &Session) -> Result<(), HypermediaError> {
        let manifest = self.refresh_manifest().await?;
        session.replace_manifest(manifest);
        Ok(())
    }

    /// Dispatch `link` by its verb and return the raw JSON response.
    ///
    /// GET and DELETE never send a body. Panics on an unsupported verb:
    /// callers must check [`directory::exists`] before following a link
    /// that may be absent.
    pub async fn invoke_raw(
        &self,
        link: &Link,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, HypermediaError> {
        let body = match link.method {
            Method::Get | Method::Delete => None,
            Method::Post | Method::Put => body,
            Method::Unsupported => panic!("no method defined for {}", link.href),
        };
        log::debug!("{} {}", link.method, link.href);
        let request = HttpRequest {
            method: link.method,
            href: link.href.clone(),
            body,
        };
        Ok(self.transport.execute(request).await?)
    }

    /// Follow `link` without a body and decode the response as `T`.
    pub async fn invoke<T: DeserializeOwned>(&self, link: &Link) -> Result<T, HypermediaError> {
        let value = self.invoke_raw(link, None).await?;
        decode(value)
    }

    /// Follow `link` with a JSON body and decode the response as `T`.
    pub async fn invoke_with<T, B>(&self, link: &Link, body: &B) -> Result<T, HypermediaError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body =
            serde_json::to_value(body).map_err(|e| HypermediaError::Decode(e.to_string()))?;
        let value = self.invoke_raw(link, Some(body)).await?;
        decode(value)
    }

    /// Resolve `rel` in `links`, fill it and follow it.
    pub async fn follow<T: DeserializeOwned>(
        &self,
        links: &[Link],
        rel: &str,
        params: &TemplateParams,
    ) -> Result<T, HypermediaError> {
        if !directory::exists(links, rel) {
            return Err(HypermediaError::LinkNotFound(rel.to_string()));
        }
        let link = directory::resolve(links, rel).fill(params)?;
        self.invoke(&link).await
    }

    /// Resolve `rel` in the session manifest, fill it and follow it.
    pub async fn follow_relation<T: DeserializeOwned>(
        &self,
        session: &Session,
        rel: &str,
        params: &TemplateParams,
    ) -> Result<T, HypermediaError> {
        let manifest = session.manifest();
        self.follow(manifest.links(), rel, params).await
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, HypermediaError> {
    serde_json::from_value(value).map_err(|e| HypermediaError::Decode(e.to_string()))
}
