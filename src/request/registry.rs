//! In-flight request registry: id allocation, tracking, and abort delivery.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use http::Method;
use tokio::sync::oneshot;

/// Monotonically increasing request identifier, scoped to one transport.
pub type RequestId = u64;

/// Read-only view of one tracked request.
#[derive(Debug, Clone)]
pub struct InflightSnapshot {
    pub id: RequestId,
    pub method: Method,
    pub url: String,
    pub started_at: DateTime<Utc>,
}

struct InflightEntry {
    method: Method,
    url: String,
    started_at: DateTime<Utc>,
    abort_tx: oneshot::Sender<()>,
}

/// Tracks issued requests until their terminal completion.
///
/// Entries are inserted when a request launches and removed exactly once,
/// either by the request worker on completion or by an abort. Abort signals
/// travel over the stored oneshot sender, so a request can be cancelled at
/// most once.
pub(crate) struct RequestRegistry {
    next_id: AtomicU64,
    inflight: Mutex<HashMap<RequestId, InflightEntry>>,
}

impl RequestRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next request id. Ids are consumed even by requests that
    /// never launch.
    pub(crate) fn allocate_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn track(
        &self,
        id: RequestId,
        method: Method,
        url: String,
        abort_tx: oneshot::Sender<()>,
    ) {
        let mut inflight = self.inflight.lock().expect("registry lock poisoned");
        inflight.insert(
            id,
            InflightEntry {
                method,
                url,
                started_at: Utc::now(),
                abort_tx,
            },
        );
    }

    /// Remove a completed request. Returns false when it was already gone,
    /// which makes completion and abort naturally idempotent.
    pub(crate) fn discharge(&self, id: RequestId) -> bool {
        let mut inflight = self.inflight.lock().expect("registry lock poisoned");
        inflight.remove(&id).is_some()
    }

    /// Signal abort for one request. Returns true when the request was still
    /// in flight.
    pub(crate) fn abort(&self, id: RequestId) -> bool {
        let entry = {
            let mut inflight = self.inflight.lock().expect("registry lock poisoned");
            inflight.remove(&id)
        };
        match entry {
            Some(entry) => {
                let _ = entry.abort_tx.send(());
                true
            }
            None => false,
        }
    }

    /// Abort everything in flight, returning how many requests were signalled.
    pub(crate) fn abort_all(&self) -> usize {
        let entries: Vec<InflightEntry> = {
            let mut inflight = self.inflight.lock().expect("registry lock poisoned");
            inflight.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        for entry in entries {
            let _ = entry.abort_tx.send(());
        }
        count
    }

    pub(crate) fn is_active(&self, id: RequestId) -> bool {
        let inflight = self.inflight.lock().expect("registry lock poisoned");
        inflight.contains_key(&id)
    }

    pub(crate) fn active_count(&self) -> usize {
        let inflight = self.inflight.lock().expect("registry lock poisoned");
        inflight.len()
    }

    /// Snapshot of the in-flight set, ordered by id.
    pub(crate) fn active(&self) -> Vec<InflightSnapshot> {
        let inflight = self.inflight.lock().expect("registry lock poisoned");
        let mut snapshots: Vec<InflightSnapshot> = inflight
            .iter()
            .map(|(id, entry)| InflightSnapshot {
                id: *id,
                method: entry.method.clone(),
                url: entry.url.clone(),
                started_at: entry.started_at,
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }
}
