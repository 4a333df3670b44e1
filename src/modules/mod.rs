//! Cross-cutting services module
//!
//! Event hooks and metrics shared by every request path.

pub mod events;
pub mod metrics;

// Re-export commonly used types
pub use events::{
    EventDispatcher, HeaderRejectedEvent, LoggingHandler, MetricsHandler, RequestCompleteEvent,
    RequestExceptionEvent, TransportEvent, TransportEventHandler,
};
pub use metrics::{GlobalStats, HostStats, MetricsCollector, MetricsSnapshot};
