//! reqwest-backed HTTP transport

use async_trait::async_trait;
use url::Url;

use super::directory::Method;
use super::{HttpError, HttpRequest, HttpTransport};
use crate::config::EngineConfig;

/// Sends requests with a shared `reqwest::Client`.
///
/// Relative hrefs resolve against the manifest URL. The cookie store keeps
/// the server session alive across calls.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base: Url,
}

impl ReqwestTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, HttpError> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", config.api_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve `href` against the base URL. Absolute hrefs pass through.
    pub fn absolute(&self, href: &str) -> Result<Url, HttpError> {
        self.base
            .join(href)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", href, e)))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<serde_json::Value, HttpError> {
        let url = self.absolute(&request.href)?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
            Method::Unsupported => {
                return Err(HttpError::Transport(format!(
                    "no method defined for {}",
                    request.href
                )))
            }
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                message: server_message(&text, status),
            });
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| HttpError::Body(e.to_string()))
    }
}

/// The operator-facing message of an error response, kept verbatim.
///
/// A JSON body with a string `message` field yields that field; any other
/// non-empty body is returned as-is.
fn server_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(serde_json::Value::String(message)) = map.get("message") {
            return message.clone();
        }
    }
    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> ReqwestTransport {
        let config = EngineConfig {
            api_url: "https://rooms.example.org/api/spec".to_string(),
            ..EngineConfig::default()
        };
        ReqwestTransport::new(&config).unwrap()
    }

    #[test]
    fn test_relative_hrefs_resolve_against_base() {
        let t = transport();
        assert_eq!(
            t.absolute("/api/rooms/5").unwrap().as_str(),
            "https://rooms.example.org/api/rooms/5"
        );
        assert_eq!(
            t.absolute("https://other.example.org/x").unwrap().as_str(),
            "https://other.example.org/x"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = EngineConfig {
            api_url: "not a url".to_string(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            ReqwestTransport::new(&config),
            Err(HttpError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_server_message_extraction() {
        let status = reqwest::StatusCode::CONFLICT;
        assert_eq!(server_message(r#"{"message":"Room taken"}"#, status), "Room taken");
        assert_eq!(server_message("plain text reason", status), "plain text reason");
        assert_eq!(server_message("", status), "Conflict");
        assert_eq!(server_message(r#"{"error":1}"#, status), r#"{"error":1}"#);
    }
}
