//! Default [`HttpExchange`] implementation backed by reqwest.

use async_trait::async_trait;
use url::Url;

use super::{ExchangeError, ExchangeRequest, HttpExchange, RawResponse};

/// Exchange backed by a shared [`reqwest::Client`] with cookies enabled.
///
/// Timeouts are not configured here. The transport owns the request timer
/// and tears the exchange future down when it fires.
pub struct ReqwestExchange {
    client: reqwest::Client,
}

impl ReqwestExchange {
    pub fn new() -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an already-configured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestExchange {
    fn default() -> Self {
        Self::new().expect("default http client construction")
    }
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn send(&self, request: ExchangeRequest) -> Result<RawResponse, ExchangeError> {
        let url = Url::parse(&request.url)
            .map_err(|err| ExchangeError::InvalidUrl(format!("{}: {err}", request.url)))?;

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(credentials) = &request.credentials {
            builder = builder.basic_auth(&credentials.username, credentials.password.as_ref());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;

        Ok(RawResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}
