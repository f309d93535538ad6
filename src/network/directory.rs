//! Capability directory
//!
//! Every operation the engine performs is discovered at runtime from a
//! server-advertised set of links. A link names a relation (`self`,
//! `allot`, `mark`, ...) and carries the HTTP verb plus a URI template.
//! Nothing outside this module knows an endpoint path.

use serde::{Deserialize, Serialize};

use super::template::{self, TemplateParams};
use super::HypermediaError;

/// HTTP verb of a capability link.
///
/// Verbs the engine does not know deserialize as `Unsupported`; invoking
/// such a link is a programming error and panics in the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    #[default]
    #[serde(other)]
    Unsupported,
}

impl Method {
    /// Whether a request with this verb carries a JSON body.
    pub fn sends_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Unsupported => "UNSUPPORTED",
        };
        f.pad(name)
    }
}

/// A named operation descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(default)]
    pub method: Method,
}

impl Link {
    pub fn new(rel: impl Into<String>, href: impl Into<String>, method: Method) -> Self {
        Self {
            rel: rel.into(),
            href: href.into(),
            method,
        }
    }

    /// The no-op link returned when a relation is absent.
    pub fn not_found() -> Self {
        Self::default()
    }

    /// True for the no-op link.
    pub fn is_empty(&self) -> bool {
        self.rel.is_empty() && self.href.is_empty()
    }

    /// Return a copy of this link with its URI template expanded.
    ///
    /// The receiver is left untouched so that the same template can be
    /// filled again with different parameters.
    pub fn fill(&self, params: &TemplateParams) -> Result<Link, HypermediaError> {
        let href = template::expand(&self.href, params)
            .map_err(|e| HypermediaError::Template(e.to_string()))?;
        Ok(Link {
            rel: self.rel.clone(),
            href,
            method: self.method,
        })
    }
}

/// Find the link for `rel`, or the no-op link when there is none.
pub fn resolve(links: &[Link], rel: &str) -> Link {
    links
        .iter()
        .find(|l| l.rel == rel)
        .cloned()
        .unwrap_or_else(Link::not_found)
}

/// Whether `links` advertises `rel`.
pub fn exists(links: &[Link], rel: &str) -> bool {
    links.iter().any(|l| l.rel == rel)
}

/// Expand a link's template. Free-function form of [`Link::fill`].
pub fn fill(link: &Link, params: &TemplateParams) -> Result<Link, HypermediaError> {
    link.fill(params)
}

/// The session-wide capability manifest.
///
/// Replaced wholesale on refresh; never patched. Relations are unique:
/// when the server repeats one, the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Link>", into = "Vec<Link>")]
pub struct Manifest {
    links: Vec<Link>,
}

impl Manifest {
    pub fn new(links: Vec<Link>) -> Self {
        let mut unique: Vec<Link> = Vec::with_capacity(links.len());
        for link in links {
            if exists(&unique, &link.rel) {
                log::warn!("Manifest repeats relation '{}', keeping the first", link.rel);
                continue;
            }
            unique.push(link);
        }
        Self { links: unique }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn resolve(&self, rel: &str) -> Link {
        resolve(&self.links, rel)
    }

    pub fn exists(&self, rel: &str) -> bool {
        exists(&self.links, rel)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|l| l.rel.as_str())
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl From<Vec<Link>> for Manifest {
    fn from(links: Vec<Link>) -> Self {
        Manifest::new(links)
    }
}

impl From<Manifest> for Vec<Link> {
    fn from(manifest: Manifest) -> Self {
        manifest.links
    }
}
