//! Normalized response record shared by the wire and upload paths.

use std::borrow::Cow;

use bytes::Bytes;
use http::HeaderMap;
use scraper::Html;
use serde::de::DeserializeOwned;

/// Response as delivered to callers: status, status text, headers, body.
///
/// Synthesized responses (aborts, timeouts, transport failures, upload
/// reads) use status 0 and carry a descriptive status text.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Build a response, normalizing the status first. Some legacy HTTP
    /// stacks report 1223 for a 204 No Content.
    pub fn new(
        status: u16,
        status_text: impl Into<String>,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        let (status, status_text) = normalize_status(status, status_text.into());
        Self {
            status,
            status_text,
            headers,
            body: body.into(),
        }
    }

    pub(crate) fn aborted() -> Self {
        Self::synthesized("transaction aborted", Bytes::new())
    }

    pub(crate) fn timed_out() -> Self {
        Self::synthesized("request timed out", Bytes::new())
    }

    /// Transport-level failure: status text names the condition, the body
    /// carries the underlying error detail.
    pub(crate) fn communication_failure(detail: &str) -> Self {
        Self::synthesized("communication failure", Bytes::from(detail.to_string()))
    }

    /// Upload responses have no observable status line; report success.
    pub(crate) fn upload_ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    fn synthesized(status_text: &str, body: Bytes) -> Self {
        Self {
            status: 0,
            status_text: status_text.to_string(),
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Single header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Parse the body as an HTML document.
    pub fn document(&self) -> Html {
        Html::parse_document(&self.text())
    }
}

fn normalize_status(status: u16, status_text: String) -> (u16, String) {
    if status == 1223 {
        (204, "No Content".to_string())
    } else {
        (status, status_text)
    }
}
