//! Per-call request configuration.
//!
//! `RequestOptions` carries everything a single request needs: target URL
//! (literal or deferred), method, parameters, body payloads, headers, and
//! overrides for the transport-level defaults. Options are immutable for the
//! duration of one request.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde_json::Value;
use url::form_urlencoded;

use crate::client::Credentials;
use crate::upload::UploadForm;

/// Ordered key/value parameter set.
///
/// Insertion order is preserved so encoded output is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair, stringifying the value.
    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.pairs.push((key.into(), value.to_string()));
        self
    }

    /// Non-chaining variant of [`Params::set`].
    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.pairs.push((key.into(), value.to_string()));
    }

    /// Decode an `application/x-www-form-urlencoded` string into pairs.
    pub fn from_encoded(encoded: &str) -> Self {
        let pairs = form_urlencoded::parse(encoded.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    /// Build params from a JSON object; string values are taken literally,
    /// everything else keeps its JSON text. Non-object values yield an empty
    /// set.
    pub fn from_json(value: &Value) -> Self {
        let mut params = Self::new();
        if let Value::Object(map) = value {
            for (key, entry) in map {
                match entry {
                    Value::String(text) => params.push(key, text),
                    other => params.push(key, other),
                }
            }
        }
        params
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Encode to a query string in insertion order.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let pairs = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        Self { pairs }
    }
}

/// Target URL: a literal, or a zero-arg resolver invoked once when the
/// request is issued.
#[derive(Clone)]
pub enum UrlSource {
    Literal(String),
    Resolver(Arc<dyn Fn() -> String + Send + Sync>),
}

impl UrlSource {
    pub(crate) fn resolve(&self) -> String {
        match self {
            UrlSource::Literal(url) => url.clone(),
            UrlSource::Resolver(resolver) => resolver(),
        }
    }
}

impl fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlSource::Literal(url) => f.debug_tuple("Literal").field(url).finish(),
            UrlSource::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// Request parameters: a structured map, a literal pre-encoded string, or a
/// resolver invoked once when the request is issued.
#[derive(Clone)]
pub enum ParamsSource {
    Map(Params),
    Encoded(String),
    Resolver(Arc<dyn Fn() -> Params + Send + Sync>),
}

/// Params after resolver invocation, still distinguishing structured pairs
/// from literal encoded text.
pub(crate) enum ResolvedParams {
    Pairs(Params),
    Encoded(String),
}

impl ParamsSource {
    /// Invoke a resolver at most once and pin the result.
    pub(crate) fn resolve(&self) -> ResolvedParams {
        match self {
            ParamsSource::Map(params) => ResolvedParams::Pairs(params.clone()),
            ParamsSource::Encoded(encoded) => ResolvedParams::Encoded(encoded.clone()),
            ParamsSource::Resolver(resolver) => ResolvedParams::Pairs(resolver()),
        }
    }
}

impl ResolvedParams {
    pub(crate) fn encode(&self) -> String {
        match self {
            ResolvedParams::Pairs(params) => params.encode(),
            ResolvedParams::Encoded(encoded) => encoded.clone(),
        }
    }

    pub(crate) fn into_pairs(self) -> Params {
        match self {
            ResolvedParams::Pairs(params) => params,
            ResolvedParams::Encoded(encoded) => Params::from_encoded(&encoded),
        }
    }
}

impl fmt::Debug for ParamsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsSource::Map(params) => f.debug_tuple("Map").field(params).finish(),
            ParamsSource::Encoded(encoded) => f.debug_tuple("Encoded").field(encoded).finish(),
            ParamsSource::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// Caller-supplied configuration for one request.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub url: Option<UrlSource>,
    pub method: Option<Method>,
    pub params: Option<ParamsSource>,
    pub raw_body: Option<String>,
    pub xml_body: Option<String>,
    pub json_body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub disable_caching: Option<bool>,
    pub cache_param: Option<String>,
    pub url_params: Option<Params>,
    pub auto_abort: Option<bool>,
    pub credentials: Option<Credentials>,
    pub form: Option<Arc<dyn UploadForm>>,
    pub is_upload: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(UrlSource::Literal(url.into()));
        self
    }

    /// Defer URL resolution to a callback invoked when the request is issued.
    pub fn with_url_resolver(
        mut self,
        resolver: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.url = Some(UrlSource::Resolver(Arc::new(resolver)));
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(ParamsSource::Map(params));
        self
    }

    /// Supply params as a literal pre-encoded query string.
    pub fn with_encoded_params(mut self, encoded: impl Into<String>) -> Self {
        self.params = Some(ParamsSource::Encoded(encoded.into()));
        self
    }

    /// Defer param resolution to a callback invoked when the request is issued.
    pub fn with_params_resolver(
        mut self,
        resolver: impl Fn() -> Params + Send + Sync + 'static,
    ) -> Self {
        self.params = Some(ParamsSource::Resolver(Arc::new(resolver)));
        self
    }

    /// Literal body text, sent as-is (`text/plain` unless a Content-Type is
    /// set explicitly).
    pub fn with_raw_body(mut self, body: impl Into<String>) -> Self {
        self.raw_body = Some(body.into());
        self
    }

    /// XML body text (`text/xml` unless a Content-Type is set explicitly).
    pub fn with_xml_body(mut self, body: impl Into<String>) -> Self {
        self.xml_body = Some(body.into());
        self
    }

    /// JSON payload. A `Value::String` is sent literally; any other value is
    /// encoded to JSON text.
    pub fn with_json(mut self, value: Value) -> Self {
        self.json_body = Some(value);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Per-request timeout, overriding the transport default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Per-request cache-busting override.
    pub fn with_disable_caching(mut self, disable: bool) -> Self {
        self.disable_caching = Some(disable);
        self
    }

    /// Per-request cache-buster parameter name.
    pub fn with_cache_param(mut self, name: impl Into<String>) -> Self {
        self.cache_param = Some(name.into());
        self
    }

    /// Extra params appended to the URL unconditionally, after every other
    /// URL mutation.
    pub fn with_url_params(mut self, params: Params) -> Self {
        self.url_params = Some(params);
        self
    }

    /// Abort every in-flight request on the transport before issuing this one.
    pub fn with_auto_abort(mut self, auto_abort: bool) -> Self {
        self.auto_abort = Some(auto_abort);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Attach a form. Multipart forms take the upload path; other forms have
    /// their fields serialized into the request params.
    pub fn with_form(mut self, form: Arc<dyn UploadForm>) -> Self {
        self.form = Some(form);
        self
    }

    /// Force the upload path for an attached form regardless of its encoding.
    pub fn with_upload(mut self, is_upload: bool) -> Self {
        self.is_upload = is_upload;
        self
    }

    /// Literal URL when one was supplied directly, for logging.
    pub fn url_hint(&self) -> Option<&str> {
        match &self.url {
            Some(UrlSource::Literal(url)) => Some(url),
            _ => None,
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("params", &self.params)
            .field("raw_body", &self.raw_body)
            .field("xml_body", &self.xml_body)
            .field("json_body", &self.json_body)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("disable_caching", &self.disable_caching)
            .field("cache_param", &self.cache_param)
            .field("url_params", &self.url_params)
            .field("auto_abort", &self.auto_abort)
            .field("credentials", &self.credentials)
            .field("form", &self.form.as_ref().map(|_| "<form>"))
            .field("is_upload", &self.is_upload)
            .finish()
    }
}
