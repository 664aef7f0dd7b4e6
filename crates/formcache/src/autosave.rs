//! Debounced auto-save queue.
//!
//! Requests are coalesced on a tokio task. Form state is read from the
//! [`FormSource`] when the debounce window closes, not when the request is
//! queued, so the write reflects the latest edits.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use formcache_types::AutoSaveScope;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Something that can report a form's current value.
pub trait FormSource: Send + Sync + 'static {
    fn raw_value(&self) -> Value;
}

impl FormSource for Value {
    fn raw_value(&self) -> Value {
        self.clone()
    }
}

/// Live form state shared with the UI layer.
impl FormSource for RwLock<Value> {
    fn raw_value(&self) -> Value {
        self.read().clone()
    }
}

impl<T: FormSource + ?Sized> FormSource for Arc<T> {
    fn raw_value(&self) -> Value {
        (**self).raw_value()
    }
}

/// A queued auto-save.
#[derive(Clone)]
pub struct AutoSaveRequest {
    pub form: Arc<dyn FormSource>,
    pub entity_type: String,
    pub entity_id: String,
}

impl AutoSaveRequest {
    fn entity(&self) -> (String, String) {
        (self.entity_type.clone(), self.entity_id.clone())
    }
}

impl fmt::Debug for AutoSaveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSaveRequest")
            .field("entity_type", &self.entity_type)
            .field("entity_id", &self.entity_id)
            .finish_non_exhaustive()
    }
}

/// Receives each request that survives its debounce window.
pub(crate) type SaveSink = Arc<dyn Fn(AutoSaveRequest) + Send + Sync>;

/// Handle to the debounce worker.
#[derive(Debug)]
pub(crate) struct AutoSaveQueue {
    tx: mpsc::UnboundedSender<AutoSaveRequest>,
    task: JoinHandle<()>,
}

impl AutoSaveQueue {
    /// Start the worker on the current runtime, if there is one.
    pub(crate) fn spawn(debounce: Duration, scope: AutoSaveScope, sink: SaveSink) -> Option<Self> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = match scope {
            AutoSaveScope::Global => runtime.spawn(run_global(rx, debounce, sink)),
            AutoSaveScope::PerEntity => runtime.spawn(run_per_entity(rx, debounce, sink)),
        };
        debug!(debounce_ms = debounce.as_millis() as u64, scope = ?scope, "Auto-save queue started");
        Some(Self { tx, task })
    }

    /// Queue a request. Returns `false` once the worker is gone.
    pub(crate) fn push(&self, request: AutoSaveRequest) -> bool {
        self.tx.send(request).is_ok()
    }

    /// Stop the worker. Requests still waiting out their window are dropped.
    pub(crate) fn close(self) {
        self.task.abort();
    }
}

/// One shared window: only the most recent request is saved.
async fn run_global(
    mut rx: mpsc::UnboundedReceiver<AutoSaveRequest>,
    debounce: Duration,
    sink: SaveSink,
) {
    let mut pending: Option<AutoSaveRequest> = None;
    let sleep = tokio::time::sleep(debounce);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            request = rx.recv() => match request {
                Some(request) => {
                    if let Some(replaced) = pending.replace(request) {
                        trace!(entity_type = %replaced.entity_type, entity_id = %replaced.entity_id, "Auto-save superseded");
                    }
                    sleep.as_mut().reset(Instant::now() + debounce);
                }
                None => break,
            },
            () = &mut sleep, if pending.is_some() => {
                if let Some(request) = pending.take() {
                    sink(request);
                }
            }
        }
    }
    debug!(dropped = pending.is_some(), "Auto-save queue closed");
}

/// One window per `(entity type, entity id)`.
async fn run_per_entity(
    mut rx: mpsc::UnboundedReceiver<AutoSaveRequest>,
    debounce: Duration,
    sink: SaveSink,
) {
    let mut pending: HashMap<(String, String), (Instant, AutoSaveRequest)> = HashMap::new();

    loop {
        let next_deadline = pending.values().map(|(deadline, _)| *deadline).min();
        tokio::select! {
            request = rx.recv() => match request {
                Some(request) => {
                    pending.insert(request.entity(), (Instant::now() + debounce, request));
                }
                None => break,
            },
            () = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                let now = Instant::now();
                let mut due: Vec<_> = pending
                    .iter()
                    .filter(|(_, (deadline, _))| *deadline <= now)
                    .map(|(entity, (deadline, _))| (*deadline, entity.clone()))
                    .collect();
                due.sort();
                for (_, entity) in due {
                    if let Some((_, request)) = pending.remove(&entity) {
                        sink(request);
                    }
                }
            }
        }
    }
    debug!(dropped = pending.len(), "Auto-save queue closed");
}
