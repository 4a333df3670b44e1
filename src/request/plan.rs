//! Option resolution: folds per-call options over transport defaults into an
//! executable plan.
//!
//! The output is either a [`RequestPlan`] for the standard wire path or an
//! [`UploadPlan`] for the hidden-surface form upload path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde_json::Value;
use thiserror::Error;

use crate::client::Credentials;
use crate::request::options::{Params, RequestOptions, ResolvedParams};
use crate::transport::TransportConfig;
use crate::upload::UploadForm;

/// Raised when option resolution cannot produce a target URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no resolvable url: options, transport default, and form action are all empty")]
    MissingUrl,
}

/// Fully resolved standard request, ready for the exchange.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub credentials: Option<Credentials>,
    pub auto_abort: bool,
}

/// Fully resolved form upload: target URL, the form to submit, and the
/// structured params to inject as hidden fields.
#[derive(Clone)]
pub struct UploadPlan {
    pub url: String,
    pub params: Params,
    pub form: Arc<dyn UploadForm>,
}

impl fmt::Debug for UploadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPlan")
            .field("url", &self.url)
            .field("params", &self.params)
            .finish()
    }
}

/// Which path a resolved call takes.
#[derive(Debug, Clone)]
pub enum ResolvedCall {
    Standard(RequestPlan),
    Upload(UploadPlan),
}

/// Payload selected for the request body, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Raw,
    Xml,
    Json,
    Params,
}

/// Append a query fragment to a URL, choosing `?` or `&` by whether the URL
/// already carries a query.
pub fn url_append(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

fn join_query(left: String, right: String) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right,
        (_, true) => left,
        _ => format!("{left}&{right}"),
    }
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    let mut params = Params::new();
    for (key, value) in pairs {
        params.push(key, value);
    }
    params.encode()
}

/// A JSON string is passed through literally; other values keep their JSON
/// text.
fn json_body_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Resolve options over transport defaults into an executable call.
///
/// Resolvers for URL and params are invoked exactly once. The upload branch
/// is taken before method, header, and cache-buster handling, so none of
/// those apply to uploads.
pub fn resolve_call(
    options: &RequestOptions,
    config: &TransportConfig,
) -> Result<ResolvedCall, ResolveError> {
    let resolved_params = options.params.as_ref().map(|source| source.resolve());
    let explicit_url = non_empty(options.url.as_ref().map(|source| source.resolve()));

    let form = options.form.clone();
    let url = explicit_url
        .or_else(|| non_empty(config.url.clone()))
        .or_else(|| form.as_ref().and_then(|form| non_empty(form.attributes().action)));
    let mut url = url.ok_or(ResolveError::MissingUrl)?;

    if let Some(form) = form.clone() {
        if options.is_upload || form.is_multipart() {
            let params = resolved_params
                .map(ResolvedParams::into_pairs)
                .unwrap_or_default();
            return Ok(ResolvedCall::Upload(UploadPlan { url, params, form }));
        }
    }

    let body = options
        .raw_body
        .as_ref()
        .map(|text| (text.clone(), PayloadKind::Raw))
        .or_else(|| {
            options
                .xml_body
                .as_ref()
                .map(|text| (text.clone(), PayloadKind::Xml))
        })
        .or_else(|| {
            options
                .json_body
                .as_ref()
                .map(|value| (json_body_text(value), PayloadKind::Json))
        });

    let mut params = resolved_params
        .map(|resolved| resolved.encode())
        .unwrap_or_default();
    if !config.extra_params.is_empty() {
        params = join_query(params, config.extra_params.encode());
    }
    if let Some(form) = &form {
        params = join_query(params, encode_pairs(&form.fields()));
    }

    let method = options
        .method
        .clone()
        .or_else(|| config.method.clone())
        .unwrap_or_else(|| {
            if body.is_some() || !params.is_empty() {
                Method::POST
            } else {
                Method::GET
            }
        });

    let caching_disabled = options.disable_caching.unwrap_or(config.disable_caching);
    if method == Method::GET && caching_disabled {
        let name = options
            .cache_param
            .as_deref()
            .unwrap_or(&config.cache_param);
        let stamp = chrono::Utc::now().timestamp_millis();
        url = url_append(&url, &format!("{name}={stamp}"));
    }

    if (method == Method::GET || body.is_some()) && !params.is_empty() {
        url = url_append(&url, &params);
        params.clear();
    }

    if let Some(url_params) = &options.url_params {
        if !url_params.is_empty() {
            url = url_append(&url, &url_params.encode());
        }
    }

    let (body, kind) = match body {
        Some((text, kind)) => (Some(text), Some(kind)),
        None if !params.is_empty() => (Some(params), Some(PayloadKind::Params)),
        None => (None, None),
    };

    let headers = resolve_headers(options, config, kind);

    Ok(ResolvedCall::Standard(RequestPlan {
        url,
        method,
        headers,
        body,
        timeout: options.timeout.unwrap_or(config.timeout),
        credentials: options
            .credentials
            .clone()
            .or_else(|| config.credentials.clone()),
        auto_abort: options.auto_abort.unwrap_or(config.auto_abort),
    }))
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers
        .iter()
        .any(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
}

/// Merge caller headers over transport defaults (case-insensitive, caller
/// wins), then apply Content-Type inference and the default XHR marker.
fn resolve_headers(
    options: &RequestOptions,
    config: &TransportConfig,
    payload: Option<PayloadKind>,
) -> Vec<(String, String)> {
    let mut headers = config.default_headers.clone();
    for (name, value) in &options.headers {
        match headers
            .iter_mut()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        {
            Some(slot) => *slot = (name.clone(), value.clone()),
            None => headers.push((name.clone(), value.clone())),
        }
    }

    if let Some(kind) = payload {
        if !has_header(&headers, "content-type") {
            let value = match kind {
                PayloadKind::Raw => "text/plain".to_string(),
                PayloadKind::Xml => "text/xml".to_string(),
                PayloadKind::Json => "application/json".to_string(),
                PayloadKind::Params => config.default_post_content_type.clone(),
            };
            headers.push(("Content-Type".to_string(), value));
        }
    }

    if config.use_xhr_header && !has_header(&headers, "x-requested-with") {
        headers.push((
            "X-Requested-With".to_string(),
            config.xhr_header_value.clone(),
        ));
    }

    headers
}
