use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use kitflow_core::types::{ExecutionEvent, JsonMap, SessionId};

use crate::kit::KitHandle;

/// Per-session bookkeeping owned by the orchestrator.
///
/// Every collection is internally synchronized; accessors hand out copies.
/// Log appends are serialized by the log mutex, and each event is stamped
/// while that mutex is held, so log order equals timestamp order.
pub struct ExecutionContext {
    session_id: SessionId,
    user_id: Option<String>,
    started_at: DateTime<Utc>,
    created: Instant,
    active_workflows: RwLock<HashMap<String, KitHandle>>,
    shared_state: RwLock<JsonMap>,
    execution_log: Mutex<Vec<ExecutionEvent>>,
}

impl ExecutionContext {
    pub fn new(session_id: SessionId, user_id: Option<String>) -> Self {
        Self {
            session_id,
            user_id,
            started_at: Utc::now(),
            created: Instant::now(),
            active_workflows: RwLock::new(HashMap::new()),
            shared_state: RwLock::new(HashMap::new()),
            execution_log: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the context was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.age() > timeout
    }

    /// Insert a kit under its workflow id, replacing any previous instance.
    /// Returns the replaced handle, if any.
    pub async fn insert_workflow(&self, workflow_id: &str, kit: KitHandle) -> Option<KitHandle> {
        self.active_workflows
            .write()
            .await
            .insert(workflow_id.to_string(), kit)
    }

    pub async fn workflow(&self, workflow_id: &str) -> Option<KitHandle> {
        self.active_workflows.read().await.get(workflow_id).cloned()
    }

    /// Sorted ids of the kits active in this session.
    pub async fn active_workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active_workflows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn set_shared(&self, key: impl Into<String>, value: serde_json::Value) {
        self.shared_state.write().await.insert(key.into(), value);
    }

    pub async fn shared(&self, key: &str) -> Option<serde_json::Value> {
        self.shared_state.read().await.get(key).cloned()
    }

    pub async fn shared_snapshot(&self) -> JsonMap {
        self.shared_state.read().await.clone()
    }

    /// Append an event, stamping it under the log lock. Returns the stored copy.
    pub async fn record(&self, mut event: ExecutionEvent) -> ExecutionEvent {
        let mut log = self.execution_log.lock().await;
        event.timestamp = Utc::now();
        log.push(event.clone());
        event
    }

    pub async fn log_snapshot(&self) -> Vec<ExecutionEvent> {
        self.execution_log.lock().await.clone()
    }

    pub async fn log_len(&self) -> usize {
        self.execution_log.lock().await.len()
    }

    /// Discard active kits and the execution log.
    pub async fn clear(&self) {
        self.active_workflows.write().await.clear();
        self.execution_log.lock().await.clear();
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
