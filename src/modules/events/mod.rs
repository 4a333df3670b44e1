//! Event system for the transport.
//!
//! Provides hooks for metrics, logging, and custom reactions around request
//! activity. The pre-request hook can veto a request before it is issued.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;
use crate::request::options::RequestOptions;
use crate::request::outcome::Disposition;
use crate::request::registry::RequestId;

/// Structured completion event for a successful request.
#[derive(Debug, Clone)]
pub struct RequestCompleteEvent {
    pub id: RequestId,
    pub url: String,
    pub method: Method,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Structured completion event for a failed or exceptional request.
#[derive(Debug, Clone)]
pub struct RequestExceptionEvent {
    pub id: RequestId,
    pub url: String,
    pub method: Method,
    pub disposition: Disposition,
    pub status: Option<u16>,
    pub status_text: String,
    pub aborted: bool,
    pub timed_out: bool,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Fired when a resolved header cannot be represented on the wire and is
/// dropped from the request.
#[derive(Debug, Clone)]
pub struct HeaderRejectedEvent {
    pub id: RequestId,
    pub name: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    RequestComplete(RequestCompleteEvent),
    RequestException(RequestExceptionEvent),
    HeaderRejected(HeaderRejectedEvent),
}

/// Trait implemented by event handlers.
///
/// `before_request` runs synchronously before a request launches; returning
/// false suppresses it. Later handlers are not consulted once one vetoes.
pub trait TransportEventHandler: Send + Sync {
    fn before_request(&self, _id: RequestId, _options: &RequestOptions) -> bool {
        true
    }

    fn handle(&self, event: &TransportEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn TransportEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn TransportEventHandler>) {
        self.handlers.push(handler);
    }

    /// Consult handlers in registration order; false means the request must
    /// not be issued.
    pub fn permit(&self, id: RequestId, options: &RequestOptions) -> bool {
        self.handlers
            .iter()
            .all(|handler| handler.before_request(id, options))
    }

    pub fn dispatch(&self, event: TransportEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl TransportEventHandler for LoggingHandler {
    fn before_request(&self, id: RequestId, options: &RequestOptions) -> bool {
        log::debug!(
            "-> request {} {}",
            id,
            options.url_hint().unwrap_or("<deferred url>")
        );
        true
    }

    fn handle(&self, event: &TransportEvent) {
        match event {
            TransportEvent::RequestComplete(complete) => {
                log::debug!(
                    "<- request {} {} {} -> {} ({:.2}s)",
                    complete.id,
                    complete.method,
                    complete.url,
                    complete.status,
                    complete.latency.as_secs_f64()
                );
            }
            TransportEvent::RequestException(exception) => {
                log::warn!(
                    "request {} {} {} -> {} (aborted={} timed_out={})",
                    exception.id,
                    exception.method,
                    exception.url,
                    exception.status_text,
                    exception.aborted,
                    exception.timed_out
                );
            }
            TransportEvent::HeaderRejected(rejected) => {
                log::warn!(
                    "request {} dropped header {}: {}",
                    rejected.id,
                    rejected.name,
                    rejected.reason
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

/// Stats are keyed by host; relative URLs fall back to their path.
fn host_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.host_str().unwrap_or("").to_string(),
        Err(_) => url.split('?').next().unwrap_or("").to_string(),
    }
}

impl TransportEventHandler for MetricsHandler {
    fn handle(&self, event: &TransportEvent) {
        match event {
            TransportEvent::RequestComplete(complete) => {
                self.metrics
                    .record_success(&host_of(&complete.url), complete.status, complete.latency);
            }
            TransportEvent::RequestException(exception) => {
                let host = host_of(&exception.url);
                match exception.disposition {
                    Disposition::Failure => {
                        self.metrics.record_failure(
                            &host,
                            exception.status.unwrap_or(0),
                            exception.latency,
                        );
                    }
                    _ => self.metrics.record_exception(&host),
                }
            }
            TransportEvent::HeaderRejected(_) => {}
        }
    }
}
