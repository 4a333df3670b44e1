//! Request domain: per-call options, option resolution, in-flight tracking,
//! and terminal outcomes.

pub mod options;
pub mod outcome;
pub mod plan;
pub mod registry;
pub mod response;

pub use options::{Params, ParamsSource, RequestOptions, UrlSource};
pub use outcome::{Completion, Disposition, RequestHandle, TRANSPORT_ERROR_STATUS};
pub use plan::{RequestPlan, ResolveError, ResolvedCall, UploadPlan, resolve_call, url_append};
pub use registry::{InflightSnapshot, RequestId};
pub use response::Response;
