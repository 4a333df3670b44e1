//! # courier-rs
//!
//! An async HTTP request manager in the tradition of the classic browser
//! connection objects: issue requests, track them while they fly, cancel
//! them singly or wholesale, and always receive exactly one normalized
//! completion per request.
//!
//! ## Features
//!
//! - Per-request options resolved over transport-wide defaults
//! - Monotonic request ids with in-flight tracking and cancellation
//! - Per-request timeouts enforced by the transport, not the wire
//! - Exactly-once completion delivery through awaitable handles
//! - Cache-busting for GET requests and automatic Content-Type inference
//! - Hidden-surface multipart form uploads behind injectable capabilities
//! - Event hooks with request veto, structured logging, and metrics
//!
//! ## Example
//!
//! ```no_run
//! use courier_rs::{Params, RequestOptions, Transport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Transport::new()?;
//!     let completion = transport
//!         .execute(
//!             RequestOptions::new()
//!                 .with_url("https://example.com/api")
//!                 .with_params(Params::new().set("q", "status")),
//!         )
//!         .await?;
//!     if let Some(response) = completion.response() {
//!         println!("{} -> {}", response.status(), response.text());
//!     }
//!     Ok(())
//! }
//! ```

mod transport;

pub mod client;
pub mod modules;
pub mod request;
pub mod upload;

pub use crate::transport::{
    Transport,
    TransportBuilder,
    TransportConfig,
    TransportError,
    TransportResult,
};

pub use crate::request::{
    Completion,
    Disposition,
    InflightSnapshot,
    Params,
    ParamsSource,
    RequestHandle,
    RequestId,
    RequestOptions,
    ResolveError,
    Response,
    TRANSPORT_ERROR_STATUS,
    UrlSource,
    url_append,
};

pub use crate::client::{
    Credentials,
    ExchangeError,
    ExchangeRequest,
    HttpExchange,
    RawResponse,
    ReqwestExchange,
};

pub use crate::upload::{
    FieldToken,
    FormAttributes,
    HiddenSurface,
    MULTIPART_ENCODING,
    MemoryForm,
    MemorySurfaceHost,
    SubmissionRecord,
    SurfaceHost,
    UploadError,
    UploadForm,
    execute_form_upload,
};

pub use crate::modules::{
    EventDispatcher,
    GlobalStats,
    HeaderRejectedEvent,
    HostStats,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    RequestCompleteEvent,
    RequestExceptionEvent,
    TransportEvent,
    TransportEventHandler,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
