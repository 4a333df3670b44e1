//! High level transport orchestration.
//!
//! Wires option resolution, the in-flight registry, the exchange, the upload
//! executor, and the event system into one request manager with per-request
//! timeouts, cancellation, and exactly-once completion delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::client::{Credentials, ExchangeError, ExchangeRequest, HttpExchange, ReqwestExchange};
use crate::modules::events::{
	EventDispatcher, HeaderRejectedEvent, LoggingHandler, MetricsHandler, RequestCompleteEvent,
	RequestExceptionEvent, TransportEvent, TransportEventHandler,
};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::request::options::{Params, RequestOptions};
use crate::request::outcome::{Completion, Disposition, RequestHandle, classify_status};
use crate::request::plan::{RequestPlan, ResolveError, ResolvedCall, UploadPlan, resolve_call};
use crate::request::registry::{InflightSnapshot, RequestId, RequestRegistry};
use crate::request::response::Response;
use crate::upload::{SurfaceHost, execute_form_upload};

/// Result alias used across the orchestration layer.
pub type TransportResult<T> = Result<T, TransportError>;

/// High-level error surfaced by the transport.
///
/// Runtime faults (timeouts, aborts, wire failures) never appear here; they
/// are delivered as exception completions on the request handle.
#[derive(Debug, Error)]
pub enum TransportError {
	#[error("configuration error: {0}")]
	Configuration(#[from] ResolveError),
	#[error("exchange initialisation failed: {0}")]
	Exchange(#[from] ExchangeError),
	#[error("form upload requested but no surface host is configured")]
	UploadUnavailable,
}

/// Transport configuration used by the builder.
#[derive(Debug, Clone)]
pub struct TransportConfig {
	/// Default target when a request supplies no URL of its own.
	pub url: Option<String>,
	/// Default method; otherwise inferred from the resolved payload.
	pub method: Option<Method>,
	/// Headers applied to every request, overridable per call.
	pub default_headers: Vec<(String, String)>,
	/// Default per-request timeout.
	pub timeout: Duration,
	/// Abort all in-flight requests whenever a new one is issued.
	pub auto_abort: bool,
	/// Append a cache-buster parameter to GET URLs.
	pub disable_caching: bool,
	/// Name of the cache-buster parameter.
	pub cache_param: String,
	/// Params merged after each request's own params.
	pub extra_params: Params,
	/// Content-Type applied when params travel as the request body.
	pub default_post_content_type: String,
	/// Mark requests with the XHR header unless one is already set.
	pub use_xhr_header: bool,
	pub xhr_header_value: String,
	/// Default credentials, overridable per call.
	pub credentials: Option<Credentials>,
	/// Delay before an upload surface is torn down.
	pub upload_grace: Duration,
	pub enable_metrics: bool,
}

impl Default for TransportConfig {
	fn default() -> Self {
		Self {
			url: None,
			method: None,
			default_headers: Vec::new(),
			timeout: Duration::from_secs(30),
			auto_abort: false,
			disable_caching: true,
			cache_param: "_dc".to_string(),
			extra_params: Params::new(),
			default_post_content_type: "application/x-www-form-urlencoded; charset=UTF-8"
				.to_string(),
			use_xhr_header: true,
			xhr_header_value: "XMLHttpRequest".to_string(),
			credentials: None,
			upload_grace: Duration::from_millis(100),
			enable_metrics: true,
		}
	}
}

/// Fluent builder for [`Transport`].
pub struct TransportBuilder {
	config: TransportConfig,
	exchange: Option<Arc<dyn HttpExchange>>,
	surface_host: Option<Arc<dyn SurfaceHost>>,
	handlers: Vec<Arc<dyn TransportEventHandler>>,
}

impl TransportBuilder {
	pub fn new() -> Self {
		Self {
			config: TransportConfig::default(),
			exchange: None,
			surface_host: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_url(mut self, url: impl Into<String>) -> Self {
		self.config.url = Some(url.into());
		self
	}

	pub fn with_method(mut self, method: Method) -> Self {
		self.config.method = Some(method);
		self
	}

	pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.default_headers.push((name.into(), value.into()));
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.config.timeout = timeout;
		self
	}

	pub fn with_auto_abort(mut self, auto_abort: bool) -> Self {
		self.config.auto_abort = auto_abort;
		self
	}

	pub fn with_disable_caching(mut self, disable: bool) -> Self {
		self.config.disable_caching = disable;
		self
	}

	pub fn with_cache_param(mut self, name: impl Into<String>) -> Self {
		self.config.cache_param = name.into();
		self
	}

	pub fn with_extra_params(mut self, params: Params) -> Self {
		self.config.extra_params = params;
		self
	}

	pub fn with_post_content_type(mut self, content_type: impl Into<String>) -> Self {
		self.config.default_post_content_type = content_type.into();
		self
	}

	pub fn disable_xhr_header(mut self) -> Self {
		self.config.use_xhr_header = false;
		self
	}

	pub fn with_credentials(mut self, credentials: Credentials) -> Self {
		self.config.credentials = Some(credentials);
		self
	}

	pub fn with_upload_grace(mut self, grace: Duration) -> Self {
		self.config.upload_grace = grace;
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.config.enable_metrics = false;
		self
	}

	/// Replace the wire implementation.
	pub fn with_exchange(mut self, exchange: Arc<dyn HttpExchange>) -> Self {
		self.exchange = Some(exchange);
		self
	}

	/// Provide the surface host required for form uploads.
	pub fn with_surface_host(mut self, host: Arc<dyn SurfaceHost>) -> Self {
		self.surface_host = Some(host);
		self
	}

	pub fn with_handler(mut self, handler: Arc<dyn TransportEventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn build(self) -> TransportResult<Transport> {
		Transport::with_parts(self.config, self.exchange, self.surface_host, self.handlers)
	}
}

impl Default for TransportBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Shared pieces a spawned request worker needs after the issuing call has
/// returned.
struct WorkerContext {
	registry: Arc<RequestRegistry>,
	events: Arc<EventDispatcher>,
	exchange: Arc<dyn HttpExchange>,
}

/// Main request manager.
///
/// Issues requests, tracks them by id until their terminal completion, and
/// delivers exactly one [`Completion`] per request through its handle.
pub struct Transport {
	config: TransportConfig,
	exchange: Arc<dyn HttpExchange>,
	surface_host: Option<Arc<dyn SurfaceHost>>,
	registry: Arc<RequestRegistry>,
	events: Arc<EventDispatcher>,
	metrics: Option<MetricsCollector>,
	instance_tag: String,
}

impl Transport {
	/// Construct a transport with default configuration.
	pub fn new() -> TransportResult<Self> {
		TransportBuilder::new().build()
	}

	/// Obtain a builder to customise the transport instance.
	pub fn builder() -> TransportBuilder {
		TransportBuilder::new()
	}

	fn with_parts(
		config: TransportConfig,
		exchange: Option<Arc<dyn HttpExchange>>,
		surface_host: Option<Arc<dyn SurfaceHost>>,
		handlers: Vec<Arc<dyn TransportEventHandler>>,
	) -> TransportResult<Self> {
		let exchange = match exchange {
			Some(exchange) => exchange,
			None => Arc::new(ReqwestExchange::new()?),
		};

		let metrics = config.enable_metrics.then(MetricsCollector::new);
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		if let Some(ref collector) = metrics {
			events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
		}
		for handler in handlers {
			events.register_handler(handler);
		}

		Ok(Self {
			config,
			exchange,
			surface_host,
			registry: Arc::new(RequestRegistry::new()),
			events: Arc::new(events),
			metrics,
			// Distinguishes this transport's upload surfaces from those of
			// other instances in the same process.
			instance_tag: format!("{:08x}", rand::random::<u32>()),
		})
	}

	/// Issue a request and return a handle to its completion.
	///
	/// The worker is spawned onto the current Tokio runtime, so this must be
	/// called within a runtime context and panics outside one.
	///
	/// The id is consumed even when a pre-request handler suppresses the
	/// request; a suppressed handle resolves immediately.
	pub fn request(&self, options: RequestOptions) -> TransportResult<RequestHandle> {
		let id = self.registry.allocate_id();
		if !self.events.permit(id, &options) {
			log::debug!("request {id} suppressed by pre-request handler");
			return Ok(RequestHandle::resolved(id, Completion::suppressed(id)));
		}
		match resolve_call(&options, &self.config)? {
			ResolvedCall::Standard(plan) => Ok(self.launch_standard(id, plan)),
			ResolvedCall::Upload(plan) => self.launch_upload(id, plan),
		}
	}

	/// Issue a request and wait for its completion.
	pub async fn execute(&self, options: RequestOptions) -> TransportResult<Completion> {
		let handle = self.request(options)?;
		Ok(handle.outcome().await)
	}

	/// Perform a GET request.
	pub async fn get(&self, url: &str) -> TransportResult<Completion> {
		self.execute(RequestOptions::new().with_url(url).with_method(Method::GET))
			.await
	}

	/// POST params as a form-encoded body.
	pub async fn post(&self, url: &str, params: Params) -> TransportResult<Completion> {
		self.execute(
			RequestOptions::new()
				.with_url(url)
				.with_method(Method::POST)
				.with_params(params),
		)
		.await
	}

	/// Cancel one in-flight request. Returns false when it is not in flight,
	/// so repeated aborts are harmless.
	pub fn abort(&self, id: RequestId) -> bool {
		self.registry.abort(id)
	}

	/// Cancel every in-flight request, returning how many were signalled.
	pub fn abort_all(&self) -> usize {
		self.registry.abort_all()
	}

	pub fn is_active(&self, id: RequestId) -> bool {
		self.registry.is_active(id)
	}

	pub fn active_count(&self) -> usize {
		self.registry.active_count()
	}

	/// Snapshot of the in-flight requests, ordered by id.
	pub fn active(&self) -> Vec<InflightSnapshot> {
		self.registry.active()
	}

	/// Current metrics, when collection is enabled.
	pub fn metrics(&self) -> Option<MetricsSnapshot> {
		self.metrics.as_ref().map(MetricsCollector::snapshot)
	}

	pub fn config(&self) -> &TransportConfig {
		&self.config
	}

	fn launch_standard(&self, id: RequestId, plan: RequestPlan) -> RequestHandle {
		if plan.auto_abort {
			let aborted = self.abort_all();
			if aborted > 0 {
				log::debug!("request {id} auto-aborted {aborted} in-flight requests");
			}
		}

		let headers = self.wire_headers(id, &plan.headers);
		let (handle, completion_tx) = RequestHandle::channel(id);
		let (abort_tx, abort_rx) = oneshot::channel();
		self.registry
			.track(id, plan.method.clone(), plan.url.clone(), abort_tx);

		let context = WorkerContext {
			registry: self.registry.clone(),
			events: self.events.clone(),
			exchange: self.exchange.clone(),
		};
		tokio::spawn(run_standard(context, id, plan, headers, abort_rx, completion_tx));
		handle
	}

	fn launch_upload(&self, id: RequestId, plan: UploadPlan) -> TransportResult<RequestHandle> {
		let host = self
			.surface_host
			.clone()
			.ok_or(TransportError::UploadUnavailable)?;

		// Uploads are not registered: the native submission cannot be torn
		// down once it leaves, so there is nothing an abort could cancel.
		let (handle, completion_tx) = RequestHandle::channel(id);
		let surface_name = format!("{}-upload-{}", self.instance_tag, id);
		let events = self.events.clone();
		let grace = self.config.upload_grace;
		tokio::spawn(run_upload(
			events,
			host,
			id,
			plan,
			surface_name,
			grace,
			completion_tx,
		));
		Ok(handle)
	}

	/// Convert resolved header pairs to a wire header map. A pair that is not
	/// representable is dropped with a header-rejected event; the request
	/// still proceeds.
	fn wire_headers(&self, id: RequestId, pairs: &[(String, String)]) -> HeaderMap {
		let mut headers = HeaderMap::new();
		for (name, value) in pairs {
			let parsed_name = match HeaderName::from_bytes(name.as_bytes()) {
				Ok(parsed) => parsed,
				Err(_) => {
					self.reject_header(id, name, "invalid header name");
					continue;
				}
			};
			match HeaderValue::from_str(value) {
				Ok(parsed_value) => {
					headers.insert(parsed_name, parsed_value);
				}
				Err(_) => self.reject_header(id, name, "invalid header value"),
			}
		}
		headers
	}

	fn reject_header(&self, id: RequestId, name: &str, reason: &str) {
		self.events
			.dispatch(TransportEvent::HeaderRejected(HeaderRejectedEvent {
				id,
				name: name.to_string(),
				reason: reason.to_string(),
				timestamp: chrono::Utc::now(),
			}));
	}
}

impl Drop for Transport {
	fn drop(&mut self) {
		let aborted = self.registry.abort_all();
		if aborted > 0 {
			log::debug!("transport dropped with {aborted} requests in flight; aborted");
		}
	}
}

enum WireOutcome {
	Aborted,
	TimedOut,
	Finished(Result<crate::client::RawResponse, ExchangeError>),
}

/// Standard wire worker: one select over the abort signal, the request
/// timer, and the exchange. Whichever loses is dropped, which is what tears
/// the attempt down, so only one terminal path can ever run.
async fn run_standard(
	context: WorkerContext,
	id: RequestId,
	mut plan: RequestPlan,
	headers: HeaderMap,
	abort_rx: oneshot::Receiver<()>,
	completion_tx: oneshot::Sender<Completion>,
) {
	let started = Instant::now();
	let request = ExchangeRequest {
		method: plan.method.clone(),
		url: plan.url.clone(),
		headers,
		body: plan.body.take().map(Bytes::from),
		credentials: plan.credentials.take(),
	};

	let send = context.exchange.send(request);
	let outcome = tokio::select! {
		biased;
		_ = abort_rx => WireOutcome::Aborted,
		_ = sleep(plan.timeout) => WireOutcome::TimedOut,
		result = send => WireOutcome::Finished(result),
	};

	context.registry.discharge(id);
	let latency = started.elapsed();

	let completion = match outcome {
		WireOutcome::Aborted => Completion::exception(id, Response::aborted(), true, false),
		WireOutcome::TimedOut => Completion::exception(id, Response::timed_out(), false, true),
		WireOutcome::Finished(Ok(raw)) => {
			let response = Response::new(raw.status, raw.status_text, raw.headers, raw.body);
			match classify_status(response.status()) {
				Disposition::Success => Completion::success(id, response),
				Disposition::Failure => Completion::failure(id, response),
				_ => Completion::exception(id, response, false, false),
			}
		}
		WireOutcome::Finished(Err(err)) => Completion::exception(
			id,
			Response::communication_failure(&err.to_string()),
			false,
			false,
		),
	};

	publish_completion(&context.events, &plan.method, &plan.url, latency, &completion);
	let _ = completion_tx.send(completion);
}

/// Upload worker: runs the hidden-surface protocol and reports its result.
async fn run_upload(
	events: Arc<EventDispatcher>,
	host: Arc<dyn SurfaceHost>,
	id: RequestId,
	plan: UploadPlan,
	surface_name: String,
	grace: Duration,
	completion_tx: oneshot::Sender<Completion>,
) {
	let started = Instant::now();
	let result = execute_form_upload(
		host.as_ref(),
		plan.form.as_ref(),
		&plan.url,
		&plan.params,
		&surface_name,
		grace,
	)
	.await;
	let latency = started.elapsed();

	let completion = match result {
		Ok(body) => Completion::success(id, Response::upload_ok(body)),
		Err(err) => Completion::exception(
			id,
			Response::communication_failure(&err.to_string()),
			false,
			false,
		),
	};

	publish_completion(&events, &Method::POST, &plan.url, latency, &completion);
	let _ = completion_tx.send(completion);
}

/// Dispatch the terminal event for a completion. Runs before the handle
/// resolves so observers always see the event first.
fn publish_completion(
	events: &EventDispatcher,
	method: &Method,
	url: &str,
	latency: Duration,
	completion: &Completion,
) {
	match completion.disposition {
		Disposition::Success => {
			events.dispatch(TransportEvent::RequestComplete(RequestCompleteEvent {
				id: completion.id,
				url: url.to_string(),
				method: method.clone(),
				status: completion.status().unwrap_or(0),
				latency,
				timestamp: chrono::Utc::now(),
			}));
		}
		Disposition::Failure | Disposition::Exception => {
			let status_text = completion
				.response()
				.map(|response| response.status_text().to_string())
				.unwrap_or_default();
			events.dispatch(TransportEvent::RequestException(RequestExceptionEvent {
				id: completion.id,
				url: url.to_string(),
				method: method.clone(),
				disposition: completion.disposition,
				status: completion.status(),
				status_text,
				aborted: completion.aborted,
				timed_out: completion.timed_out,
				latency,
				timestamp: chrono::Utc::now(),
			}));
		}
		Disposition::Suppressed => {}
	}
}
