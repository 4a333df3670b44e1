//! HTTP exchange capability: the trait the transport drives, plus wire-level
//! request/response records.
//!
//! The transport never talks to an HTTP library directly. It hands an
//! [`ExchangeRequest`] to an injected [`HttpExchange`] and gets back a
//! [`RawResponse`]. The default implementation is [`ReqwestExchange`].

pub mod reqwest_client;

pub use reqwest_client::ReqwestExchange;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Basic-auth credentials attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
        }
    }

    pub fn username_only(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
        }
    }
}

/// Wire-level request handed to an exchange.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: Option<Credentials>,
}

/// Wire-level response as the exchange observed it, before normalization.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([^:\r\n]+):[ \t]*([^\r\n]*?)\r?$").expect("header line pattern"));

impl RawResponse {
    /// Build a response from a raw header text block, the `Name: value` per
    /// line form some HTTP stacks expose instead of a structured header map.
    /// Unparseable lines are skipped.
    pub fn from_header_text(
        status: u16,
        status_text: impl Into<String>,
        header_text: &str,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        for capture in HEADER_LINE.captures_iter(header_text) {
            let name = capture[1].trim();
            let value = capture[2].trim();
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => {
                    log::debug!("skipping unparseable header line: {name}");
                }
            }
        }
        Self {
            status,
            status_text: status_text.into(),
            headers,
            body: body.into(),
        }
    }
}

/// Errors an exchange can raise. Everything here becomes an exception
/// completion, never a panic or a lost request.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    #[error("http transport error: {0}")]
    Transport(String),
}

/// One HTTP round trip. Implementations must be cancel-safe: dropping the
/// returned future tears the attempt down.
#[async_trait]
pub trait HttpExchange: Send + Sync {
    async fn send(&self, request: ExchangeRequest) -> Result<RawResponse, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_text_block() {
        let text = "Content-Type: application/json\r\nX-Custom: one\r\nX-Custom: two\r\n";
        let response = RawResponse::from_header_text(200, "OK", text, Bytes::new());
        assert_eq!(
            response.headers.get("content-type").unwrap(),
            "application/json"
        );
        let customs: Vec<_> = response.headers.get_all("x-custom").iter().collect();
        assert_eq!(customs.len(), 2);
    }

    #[test]
    fn skips_unparseable_header_lines() {
        let text = "Good: yes\nnot a header line\nBad name: nope\n";
        let response = RawResponse::from_header_text(200, "OK", text, Bytes::new());
        assert_eq!(response.headers.get("good").unwrap(), "yes");
        assert_eq!(response.headers.len(), 1);
    }

    #[test]
    fn header_values_are_trimmed() {
        let text = "Server:   nginx  \r\n";
        let response = RawResponse::from_header_text(200, "OK", text, Bytes::new());
        assert_eq!(response.headers.get("server").unwrap(), "nginx");
    }

    #[test]
    fn credentials_constructors() {
        let full = Credentials::basic("user", "secret");
        assert_eq!(full.password.as_deref(), Some("secret"));
        let bare = Credentials::username_only("user");
        assert_eq!(bare.password, None);
    }
}
