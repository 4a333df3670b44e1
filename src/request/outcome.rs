//! Terminal request outcomes: disposition classification, the completion
//! record, and the handle callers await.

use tokio::sync::oneshot;

use crate::request::registry::RequestId;
use crate::request::response::Response;

/// Status codes some HTTP stacks report for network-level failures. They
/// classify as exceptions, not server failures.
pub const TRANSPORT_ERROR_STATUS: [u16; 6] = [12002, 12029, 12030, 12031, 12152, 13030];

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 2xx or 304.
    Success,
    /// The server answered with a non-success status.
    Failure,
    /// The request never completed normally: aborted, timed out, or failed
    /// at the transport level.
    Exception,
    /// A handler vetoed the request before it was issued.
    Suppressed,
}

/// Classify a normalized status code.
pub(crate) fn classify_status(status: u16) -> Disposition {
    if (200..300).contains(&status) || status == 304 {
        Disposition::Success
    } else if TRANSPORT_ERROR_STATUS.contains(&status) {
        Disposition::Exception
    } else {
        Disposition::Failure
    }
}

/// Terminal record for one request, delivered exactly once.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: RequestId,
    pub disposition: Disposition,
    pub aborted: bool,
    pub timed_out: bool,
    pub response: Option<Response>,
}

impl Completion {
    pub(crate) fn success(id: RequestId, response: Response) -> Self {
        Self {
            id,
            disposition: Disposition::Success,
            aborted: false,
            timed_out: false,
            response: Some(response),
        }
    }

    pub(crate) fn failure(id: RequestId, response: Response) -> Self {
        Self {
            id,
            disposition: Disposition::Failure,
            aborted: false,
            timed_out: false,
            response: Some(response),
        }
    }

    pub(crate) fn exception(
        id: RequestId,
        response: Response,
        aborted: bool,
        timed_out: bool,
    ) -> Self {
        Self {
            id,
            disposition: Disposition::Exception,
            aborted,
            timed_out,
            response: Some(response),
        }
    }

    pub(crate) fn suppressed(id: RequestId) -> Self {
        Self {
            id,
            disposition: Disposition::Suppressed,
            aborted: false,
            timed_out: false,
            response: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.disposition == Disposition::Success
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Normalized status, when a response exists.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(Response::status)
    }
}

/// Awaitable handle for an issued request.
///
/// The request runs whether or not the handle is awaited; dropping the
/// handle discards the completion but does not cancel the request.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    receiver: oneshot::Receiver<Completion>,
}

impl RequestHandle {
    pub(crate) fn channel(id: RequestId) -> (Self, oneshot::Sender<Completion>) {
        let (sender, receiver) = oneshot::channel();
        (Self { id, receiver }, sender)
    }

    /// Handle that is already complete, for requests that never launch.
    pub(crate) fn resolved(id: RequestId, completion: Completion) -> Self {
        let (handle, sender) = Self::channel(id);
        let _ = sender.send(completion);
        handle
    }

    /// Identifier assigned to this request.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the terminal completion. If the transport went away before
    /// delivering one, the request is reported as an aborted exception.
    pub async fn outcome(self) -> Completion {
        let id = self.id;
        match self.receiver.await {
            Ok(completion) => completion,
            Err(_) => Completion {
                id,
                disposition: Disposition::Exception,
                aborted: true,
                timed_out: false,
                response: Some(Response::aborted()),
            },
        }
    }
}
