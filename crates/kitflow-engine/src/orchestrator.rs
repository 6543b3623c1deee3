use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use kitflow_core::config::OrchestratorConfig;
use kitflow_core::error::{KitError, Result};
use kitflow_core::event::{EventBus, SessionEvents};
use kitflow_core::stage::WorkflowStage;
use kitflow_core::types::{
    ExecutionEvent, ExecutionEventKind, IntakeData, JsonMap, SessionId, WorkflowResult,
    WorkflowState,
};

use crate::context::ExecutionContext;
use crate::kit::{Kit, KitHandle};

/// Process-wide observer invoked for every event appended to any session log.
///
/// Listeners run synchronously on the emitting task, after the log lock has
/// been released. They must not block waiting on the orchestrator.
pub type EventListener = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Callback invoked after each of intake, analysis, document and guidance
/// during a tracked run.
pub type StageCallback<'a> = &'a (dyn Fn(WorkflowStage, &WorkflowState) + Send + Sync);

/// A kit paired with its intake payload, for batch execution.
pub struct KitRun {
    pub kit: KitHandle,
    pub intake: IntakeData,
}

impl KitRun {
    pub fn new(kit: KitHandle, intake: IntakeData) -> Self {
        Self { kit, intake }
    }
}

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Session-scoped kit orchestrator.
///
/// Owns one `ExecutionContext` per session, drives kits through their
/// lifecycle (atomically, tracked, or several at once), and records every
/// transition in the session's execution log.
///
/// Contexts live in process memory only; a multi-instance deployment would
/// need an external context store.
pub struct KitOrchestrator {
    contexts: RwLock<HashMap<SessionId, Arc<ExecutionContext>>>,
    listeners: RwLock<Vec<EventListener>>,
    event_bus: Arc<EventBus>,
    session_timeout: Duration,
}

impl KitOrchestrator {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            event_bus,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(Arc::new(EventBus::new(config.event_bus_capacity)))
            .with_session_timeout(config.session_timeout())
    }

    /// Set the age after which `cleanup_expired_sessions` reclaims a session.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Subscribe to the execution event broadcast.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Subscribe to one session's execution events.
    pub fn subscribe_session(&self, session_id: &SessionId) -> SessionEvents {
        self.event_bus.subscribe_session(session_id.clone())
    }

    // ── Contexts ────────────────────────────────────────────────

    /// Create a fresh context, replacing any existing one for the session.
    pub async fn create_context(
        &self,
        session_id: &SessionId,
        user_id: Option<String>,
    ) -> Arc<ExecutionContext> {
        let ctx = Arc::new(ExecutionContext::new(session_id.clone(), user_id));
        if self
            .contexts
            .write()
            .await
            .insert(session_id.clone(), ctx.clone())
            .is_some()
        {
            debug!(session_id = %session_id, "Replaced existing execution context");
        }
        ctx
    }

    pub async fn get_or_create_context(
        &self,
        session_id: &SessionId,
        user_id: Option<String>,
    ) -> Arc<ExecutionContext> {
        if let Some(ctx) = self.get_context(session_id).await {
            return ctx;
        }
        let mut contexts = self.contexts.write().await;
        contexts
            .entry(session_id.clone())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "Created execution context");
                Arc::new(ExecutionContext::new(session_id.clone(), user_id))
            })
            .clone()
    }

    pub async fn get_context(&self, session_id: &SessionId) -> Option<Arc<ExecutionContext>> {
        self.contexts.read().await.get(session_id).cloned()
    }

    /// Sorted ids of every live session.
    pub async fn get_active_sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.contexts.read().await.keys().cloned().collect();
        sessions.sort();
        sessions
    }

    // ── Registration & execution ────────────────────────────────

    /// Register a kit under its workflow id and log a `started` event.
    pub async fn register_kit(
        &self,
        session_id: &SessionId,
        kit: KitHandle,
    ) -> Arc<ExecutionContext> {
        let ctx = self.get_or_create_context(session_id, None).await;
        self.register_in(&ctx, kit).await;
        ctx
    }

    /// Register and run a kit to completion in one call.
    pub async fn execute_kit(
        &self,
        session_id: &SessionId,
        kit: KitHandle,
        intake: IntakeData,
    ) -> Result<WorkflowResult> {
        let ctx = self.register_kit(session_id, kit.clone()).await;
        self.run_registered(&ctx, kit, intake).await
    }

    /// Register and run a kit stage by stage, logging a `stage-completed`
    /// event and invoking `on_stage_complete` after each non-terminal stage.
    pub async fn execute_kit_with_tracking(
        &self,
        session_id: &SessionId,
        kit: KitHandle,
        intake: IntakeData,
        on_stage_complete: Option<StageCallback<'_>>,
    ) -> Result<WorkflowResult> {
        let ctx = self.register_kit(session_id, kit.clone()).await;
        let mut guard = kit.lock().await;
        let outcome = self
            .run_tracked(&ctx, &mut guard, intake, on_stage_complete)
            .await;
        self.settle(&ctx, &guard, outcome).await
    }

    /// Run several kits concurrently within one session.
    ///
    /// Every kit runs until it succeeds or fails. Results come back in input
    /// order; if any kit failed, the first failure in input order is returned
    /// once all of them have settled.
    pub async fn execute_multiple_kits(
        &self,
        session_id: &SessionId,
        runs: Vec<KitRun>,
    ) -> Result<Vec<WorkflowResult>> {
        self.execute_multiple_kits_settled(session_id, runs)
            .await
            .into_iter()
            .collect()
    }

    /// Like `execute_multiple_kits`, but returns every kit's outcome.
    pub async fn execute_multiple_kits_settled(
        &self,
        session_id: &SessionId,
        runs: Vec<KitRun>,
    ) -> Vec<Result<WorkflowResult>> {
        let ctx = self.get_or_create_context(session_id, None).await;
        for run in &runs {
            self.register_in(&ctx, run.kit.clone()).await;
        }

        info!(session_id = %session_id, count = runs.len(), "Executing kits concurrently");
        let futs: Vec<_> = runs
            .into_iter()
            .map(|run| self.run_registered(&ctx, run.kit, run.intake))
            .collect();
        futures::future::join_all(futs).await
    }

    // ── Shared state ────────────────────────────────────────────

    /// Write a value into the session's shared state on behalf of a kit.
    pub async fn share_state_to_kit(
        &self,
        session_id: &SessionId,
        workflow_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let ctx = self
            .get_context(session_id)
            .await
            .ok_or_else(|| KitError::UnknownSession(session_id.to_string()))?;
        ctx.set_shared(key, value).await;
        debug!(session_id = %session_id, workflow_id, key, "Shared state updated");
        Ok(())
    }

    pub async fn get_shared_state(
        &self,
        session_id: &SessionId,
        key: &str,
    ) -> Option<serde_json::Value> {
        self.get_context(session_id).await?.shared(key).await
    }

    /// The whole shared-state map; empty when the session does not exist.
    pub async fn get_all_shared_state(&self, session_id: &SessionId) -> JsonMap {
        match self.get_context(session_id).await {
            Some(ctx) => ctx.shared_snapshot().await,
            None => JsonMap::new(),
        }
    }

    // ── Events ──────────────────────────────────────────────────

    /// The session's event log; empty when the session does not exist.
    pub async fn get_execution_log(&self, session_id: &SessionId) -> Vec<ExecutionEvent> {
        match self.get_context(session_id).await {
            Some(ctx) => ctx.log_snapshot().await,
            None => Vec::new(),
        }
    }

    pub async fn on_execution_event(
        &self,
        listener: impl Fn(&ExecutionEvent) + Send + Sync + 'static,
    ) {
        self.listeners.write().await.push(Arc::new(listener));
    }

    // ── Cleanup ─────────────────────────────────────────────────

    /// Discard a session's kits and log, then drop the context.
    /// Returns false if the session did not exist.
    pub async fn cleanup_context(&self, session_id: &SessionId) -> bool {
        let removed = self.contexts.write().await.remove(session_id);
        match removed {
            Some(ctx) => {
                ctx.clear().await;
                debug!(session_id = %session_id, "Execution context cleaned up");
                true
            }
            None => false,
        }
    }

    /// Clean up every session older than the configured timeout.
    ///
    /// Never scheduled by the orchestrator itself; see `SessionSweeper`.
    pub async fn cleanup_expired_sessions(&self) -> Vec<SessionId> {
        // Expiry is checked and the entry removed under one write lock, so a
        // context recreated concurrently under the same id is never swept.
        let removed: Vec<(SessionId, Arc<ExecutionContext>)> = {
            let mut contexts = self.contexts.write().await;
            let expired: Vec<SessionId> = contexts
                .iter()
                .filter(|(_, ctx)| ctx.is_expired(self.session_timeout))
                .map(|(id, _)| id.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|id| contexts.remove(&id).map(|ctx| (id, ctx)))
                .collect()
        };

        let mut swept = Vec::with_capacity(removed.len());
        for (session_id, ctx) in removed {
            ctx.clear().await;
            debug!(session_id = %session_id, "Expired execution context cleaned up");
            swept.push(session_id);
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "Expired sessions reclaimed");
        }
        swept
    }

    // ── Internals ───────────────────────────────────────────────

    async fn register_in(&self, ctx: &ExecutionContext, kit: KitHandle) {
        let workflow_id = kit.lock().await.workflow_id().to_string();
        if ctx.insert_workflow(&workflow_id, kit).await.is_some() {
            debug!(
                session_id = %ctx.session_id(),
                workflow_id = %workflow_id,
                "Replaced active kit"
            );
        }
        info!(session_id = %ctx.session_id(), workflow_id = %workflow_id, "Kit registered");
        self.emit(
            ctx,
            ExecutionEvent::new(ExecutionEventKind::Started, ctx.session_id().clone(), workflow_id),
        )
        .await;
    }

    async fn run_registered(
        &self,
        ctx: &ExecutionContext,
        kit: KitHandle,
        intake: IntakeData,
    ) -> Result<WorkflowResult> {
        let mut guard = kit.lock().await;
        let outcome = guard.execute_full_workflow(intake).await;
        self.settle(ctx, &guard, outcome).await
    }

    async fn run_tracked(
        &self,
        ctx: &ExecutionContext,
        kit: &mut Kit,
        intake: IntakeData,
        on_stage_complete: Option<StageCallback<'_>>,
    ) -> Result<WorkflowResult> {
        kit.intake(intake).await?;
        self.stage_completed(ctx, kit, WorkflowStage::Intake, on_stage_complete).await;
        kit.analysis().await?;
        self.stage_completed(ctx, kit, WorkflowStage::Analysis, on_stage_complete).await;
        kit.document().await?;
        self.stage_completed(ctx, kit, WorkflowStage::Document, on_stage_complete).await;
        kit.guidance().await?;
        self.stage_completed(ctx, kit, WorkflowStage::Guidance, on_stage_complete).await;
        kit.complete().await
    }

    async fn stage_completed(
        &self,
        ctx: &ExecutionContext,
        kit: &Kit,
        stage: WorkflowStage,
        on_stage_complete: Option<StageCallback<'_>>,
    ) {
        let snapshot = kit.state();
        let mut event = ExecutionEvent::new(
            ExecutionEventKind::StageCompleted,
            ctx.session_id().clone(),
            kit.workflow_id(),
        )
        .with_stage(stage);
        if let Some(data) = to_payload(&snapshot) {
            event = event.with_data(data);
        }
        self.emit(ctx, event).await;

        if let Some(callback) = on_stage_complete {
            callback(stage, &snapshot);
        }
    }

    /// Record the outcome of a run and hand it back to the caller.
    async fn settle(
        &self,
        ctx: &ExecutionContext,
        kit: &Kit,
        outcome: Result<WorkflowResult>,
    ) -> Result<WorkflowResult> {
        let session_id = ctx.session_id().clone();
        match outcome {
            Ok(result) => {
                info!(
                    session_id = %session_id,
                    workflow_id = %kit.workflow_id(),
                    "Kit execution completed"
                );
                let mut event = ExecutionEvent::new(
                    ExecutionEventKind::Completed,
                    session_id,
                    kit.workflow_id(),
                );
                if let Some(data) = to_payload(&result) {
                    event = event.with_data(data);
                }
                self.emit(ctx, event).await;
                Ok(result)
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    workflow_id = %kit.workflow_id(),
                    error = %e,
                    "Kit execution failed"
                );
                let mut event =
                    ExecutionEvent::new(ExecutionEventKind::Error, session_id, kit.workflow_id())
                        .with_data(serde_json::json!({ "error": e.to_string() }));
                if let Some(stage) = e.stage() {
                    event = event.with_stage(stage);
                }
                self.emit(ctx, event).await;
                Err(e)
            }
        }
    }

    async fn emit(&self, ctx: &ExecutionContext, event: ExecutionEvent) {
        let recorded = ctx.record(event).await;
        let listeners: Vec<EventListener> = self.listeners.read().await.clone();
        for listener in &listeners {
            listener(&recorded);
        }
        self.event_bus.publish(recorded);
    }
}

impl Default for KitOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(EventBus::default()))
    }
}

fn to_payload<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "Failed to serialize event payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use kitflow_test_utils::ScriptedKit;

    fn sid(s: &str) -> SessionId {
        SessionId::from_string(s)
    }

    fn kinds(log: &[ExecutionEvent]) -> Vec<ExecutionEventKind> {
        log.iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn execute_kit_logs_started_and_completed() {
        let orch = KitOrchestrator::default();
        let session = sid("s-exec");
        let kit = Kit::new(ScriptedKit::new("tenancy")).into_handle();

        let result = orch
            .execute_kit(&session, kit.clone(), IntakeData::new("Mould in the bathroom"))
            .await
            .unwrap();
        assert_eq!(result.workflow_id, "tenancy");
        assert_eq!(kit.lock().await.progress(), 100);

        let log = orch.get_execution_log(&session).await;
        assert_eq!(
            kinds(&log),
            vec![ExecutionEventKind::Started, ExecutionEventKind::Completed]
        );
        assert_eq!(log[1].data.as_ref().unwrap()["workflowId"], "tenancy");

        let ctx = orch.get_context(&session).await.unwrap();
        assert_eq!(ctx.active_workflow_ids().await, vec!["tenancy".to_string()]);
    }

    #[tokio::test]
    async fn execute_kit_failure_is_logged_then_propagated() {
        let orch = KitOrchestrator::default();
        let session = sid("s-fail");
        let kit =
            Kit::new(ScriptedKit::new("claims").failing_at(WorkflowStage::Analysis)).into_handle();

        let err = orch
            .execute_kit(&session, kit.clone(), IntakeData::new("Unpaid invoice"))
            .await
            .unwrap_err();
        assert!(matches!(err, KitError::StageExecution { stage: WorkflowStage::Analysis, .. }));

        let log = orch.get_execution_log(&session).await;
        assert_eq!(kinds(&log), vec![ExecutionEventKind::Started, ExecutionEventKind::Error]);
        assert_eq!(log[1].stage, Some(WorkflowStage::Analysis));
        let message = log[1].data.as_ref().unwrap()["error"].as_str().unwrap().to_string();
        assert!(message.contains("analysis"));

        assert_eq!(kit.lock().await.current_stage(), WorkflowStage::Analysis);
    }

    #[tokio::test]
    async fn validation_error_is_logged() {
        let orch = KitOrchestrator::default();
        let session = sid("s-invalid");
        let kit = Kit::new(ScriptedKit::new("claims")).into_handle();

        let err = orch.execute_kit(&session, kit, IntakeData::new("")).await.unwrap_err();
        assert!(matches!(err, KitError::Validation { .. }));
        let log = orch.get_execution_log(&session).await;
        assert_eq!(log.last().unwrap().kind, ExecutionEventKind::Error);
        assert_eq!(log.last().unwrap().stage, Some(WorkflowStage::Intake));
    }

    #[tokio::test]
    async fn tracked_execution_reports_each_stage() {
        let orch = KitOrchestrator::default();
        let session = sid("s-tracked");
        let seen: Arc<StdMutex<Vec<(WorkflowStage, u8)>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = move |stage: WorkflowStage, state: &WorkflowState| {
            sink.lock().unwrap().push((stage, state.progress));
        };

        let kit = Kit::new(ScriptedKit::new("tenancy")).into_handle();
        let result = orch
            .execute_kit_with_tracking(
                &session,
                kit,
                IntakeData::new("Tenant dispute about repairs").with_jurisdiction("Ontario"),
                Some(&callback),
            )
            .await
            .unwrap();
        assert!(!result.next_steps.is_empty());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (WorkflowStage::Intake, 20),
                (WorkflowStage::Analysis, 40),
                (WorkflowStage::Document, 60),
                (WorkflowStage::Guidance, 80),
            ]
        );

        let log = orch.get_execution_log(&session).await;
        assert_eq!(
            kinds(&log),
            vec![
                ExecutionEventKind::Started,
                ExecutionEventKind::StageCompleted,
                ExecutionEventKind::StageCompleted,
                ExecutionEventKind::StageCompleted,
                ExecutionEventKind::StageCompleted,
                ExecutionEventKind::Completed,
            ]
        );
        let document_event = &log[3];
        assert_eq!(document_event.stage, Some(WorkflowStage::Document));
        assert_eq!(document_event.data.as_ref().unwrap()["progress"], 60);
    }

    #[tokio::test]
    async fn tracked_execution_without_callback_fails_at_stage() {
        let orch = KitOrchestrator::default();
        let session = sid("s-tracked-fail");
        let kit =
            Kit::new(ScriptedKit::new("claims").failing_at(WorkflowStage::Guidance)).into_handle();

        let err = orch
            .execute_kit_with_tracking(&session, kit, IntakeData::new("Broken contract"), None)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(WorkflowStage::Guidance));

        let log = orch.get_execution_log(&session).await;
        let stage_events = log
            .iter()
            .filter(|e| e.kind == ExecutionEventKind::StageCompleted)
            .count();
        assert_eq!(stage_events, 3);
        assert_eq!(log.last().unwrap().kind, ExecutionEventKind::Error);
    }

    #[tokio::test]
    async fn multiple_kits_run_in_isolation() {
        let orch = KitOrchestrator::default();
        let session = sid("s-multi");
        let descriptions = ["Eviction notice", "Unpaid wages", "Noisy neighbour"];
        // Later kits finish first.
        let runs: Vec<KitRun> = descriptions
            .iter()
            .enumerate()
            .map(|(i, desc)| {
                let hooks = ScriptedKit::new(format!("kit-{i}"))
                    .with_delay(WorkflowStage::Analysis, Duration::from_millis(60 - 20 * i as u64));
                KitRun::new(Kit::new(hooks).into_handle(), IntakeData::new(*desc))
            })
            .collect();

        let results = orch.execute_multiple_kits(&session, runs).await.unwrap();
        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.workflow_id, format!("kit-{i}"));
            assert_eq!(result.classification["description"], descriptions[i]);
        }

        let log = orch.get_execution_log(&session).await;
        let started = log.iter().filter(|e| e.kind == ExecutionEventKind::Started).count();
        assert_eq!(started, 3);
        let completed: Vec<&str> = log
            .iter()
            .filter(|e| e.kind == ExecutionEventKind::Completed)
            .map(|e| e.workflow_id.as_str())
            .collect();
        assert_eq!(completed, vec!["kit-2", "kit-1", "kit-0"]);
    }

    #[tokio::test]
    async fn multiple_kits_settle_before_reporting_failure() {
        let orch = KitOrchestrator::default();
        let session = sid("s-multi-fail");
        let runs = vec![
            KitRun::new(
                Kit::new(
                    ScriptedKit::new("ok-slow")
                        .with_delay(WorkflowStage::Guidance, Duration::from_millis(30)),
                )
                .into_handle(),
                IntakeData::new("First matter"),
            ),
            KitRun::new(
                Kit::new(ScriptedKit::new("broken").failing_at(WorkflowStage::Document))
                    .into_handle(),
                IntakeData::new("Second matter"),
            ),
        ];

        let err = orch.execute_multiple_kits(&session, runs).await.unwrap_err();
        assert!(matches!(err, KitError::StageExecution { stage: WorkflowStage::Document, .. }));

        let log = orch.get_execution_log(&session).await;
        assert!(log
            .iter()
            .any(|e| e.kind == ExecutionEventKind::Completed && e.workflow_id == "ok-slow"));
        assert!(log
            .iter()
            .any(|e| e.kind == ExecutionEventKind::Error && e.workflow_id == "broken"));
    }

    #[tokio::test]
    async fn concurrent_tracked_runs_keep_a_consistent_log() {
        let orch = KitOrchestrator::default();
        let session = sid("s-order");
        let slow = Kit::new(
            ScriptedKit::new("slow").with_delay(WorkflowStage::Analysis, Duration::from_millis(80)),
        )
        .into_handle();
        let fast = Kit::new(
            ScriptedKit::new("fast").with_delay(WorkflowStage::Analysis, Duration::from_millis(10)),
        )
        .into_handle();

        let (a, b) = tokio::join!(
            orch.execute_kit_with_tracking(&session, slow, IntakeData::new("Slow matter"), None),
            orch.execute_kit_with_tracking(&session, fast, IntakeData::new("Fast matter"), None),
        );
        a.unwrap();
        b.unwrap();

        let log = orch.get_execution_log(&session).await;
        assert_eq!(log.len(), 12);
        for pair in log.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }

        let completed: Vec<&str> = log
            .iter()
            .filter(|e| e.kind == ExecutionEventKind::Completed)
            .map(|e| e.workflow_id.as_str())
            .collect();
        assert_eq!(completed, vec!["fast", "slow"]);

        for event in log.iter().filter(|e| e.kind == ExecutionEventKind::StageCompleted) {
            let data = event.data.as_ref().unwrap();
            assert_eq!(data["workflowId"], event.workflow_id.as_str());
            let expected_desc = if event.workflow_id == "fast" {
                "Fast matter"
            } else {
                "Slow matter"
            };
            assert_eq!(data["userInputs"]["description"], expected_desc);
            let stage = event.stage.unwrap();
            assert_eq!(data["progress"], WorkflowStage::progress_for(stage.index() + 1));
        }
    }

    #[tokio::test]
    async fn shared_state_requires_a_session() {
        let orch = KitOrchestrator::default();
        let session = sid("s-shared");

        let err = orch
            .share_state_to_kit(&session, "claims", "amount", serde_json::json!(500))
            .await
            .unwrap_err();
        assert!(matches!(err, KitError::UnknownSession(_)));

        orch.create_context(&session, None).await;
        orch.share_state_to_kit(&session, "claims", "amount", serde_json::json!(500))
            .await
            .unwrap();
        orch.share_state_to_kit(&session, "tenancy", "province", serde_json::json!("ON"))
            .await
            .unwrap();

        assert_eq!(orch.get_shared_state(&session, "amount").await, Some(serde_json::json!(500)));
        assert_eq!(orch.get_shared_state(&session, "missing").await, None);
        assert_eq!(orch.get_all_shared_state(&session).await.len(), 2);
        assert!(orch.get_all_shared_state(&sid("nobody")).await.is_empty());
    }

    #[tokio::test]
    async fn create_context_overwrites_and_get_or_create_is_idempotent() {
        let orch = KitOrchestrator::default();
        let session = sid("s-ctx");

        let first = orch.get_or_create_context(&session, Some("u1".into())).await;
        let again = orch.get_or_create_context(&session, Some("u2".into())).await;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.user_id(), Some("u1"));

        let fresh = orch.create_context(&session, Some("u3".into())).await;
        assert!(!Arc::ptr_eq(&first, &fresh));
        let current = orch.get_context(&session).await.unwrap();
        assert_eq!(current.user_id(), Some("u3"));
    }

    #[tokio::test]
    async fn missing_session_has_empty_log() {
        let orch = KitOrchestrator::default();
        assert!(orch.get_execution_log(&sid("ghost")).await.is_empty());
        assert!(orch.get_context(&sid("ghost")).await.is_none());
        assert!(!orch.cleanup_context(&sid("ghost")).await);
    }

    #[tokio::test]
    async fn re_registering_a_kind_replaces_the_instance() {
        let orch = KitOrchestrator::default();
        let session = sid("s-replace");
        let first = Kit::new(ScriptedKit::new("claims")).into_handle();
        let second = Kit::new(ScriptedKit::new("claims")).into_handle();

        orch.register_kit(&session, first).await;
        let ctx = orch.register_kit(&session, second.clone()).await;

        assert_eq!(ctx.active_workflow_ids().await.len(), 1);
        assert!(Arc::ptr_eq(&ctx.workflow("claims").await.unwrap(), &second));
        assert_eq!(orch.get_execution_log(&session).await.len(), 2);
    }

    #[tokio::test]
    async fn listeners_and_bus_see_every_session() {
        let orch = KitOrchestrator::default();
        let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        orch.on_execution_event(move |event| {
            sink.lock()
                .unwrap()
                .push(format!("{}:{}", event.session_id, event.kind));
        })
        .await;
        let mut rx = orch.subscribe();

        for name in ["a", "b"] {
            let kit = Kit::new(ScriptedKit::new("claims")).into_handle();
            orch.execute_kit(&sid(name), kit, IntakeData::new("Matter")).await.unwrap();
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:started", "a:completed", "b:started", "b:completed"]
        );
        let first = rx.recv().await.unwrap();
        assert_eq!(first.session_id.as_str(), "a");
        assert_eq!(first.kind, ExecutionEventKind::Started);
    }

    #[tokio::test]
    async fn cleanup_context_discards_everything() {
        let orch = KitOrchestrator::default();
        let session = sid("s-clean");
        let kit = Kit::new(ScriptedKit::new("claims")).into_handle();
        orch.execute_kit(&session, kit, IntakeData::new("Matter")).await.unwrap();
        let ctx = orch.get_context(&session).await.unwrap();

        assert!(orch.cleanup_context(&session).await);
        assert!(orch.get_context(&session).await.is_none());
        assert!(orch.get_execution_log(&session).await.is_empty());
        assert_eq!(ctx.log_len().await, 0);
        assert!(ctx.active_workflow_ids().await.is_empty());
    }

    #[tokio::test]
    async fn expired_sessions_are_swept() {
        let orch = KitOrchestrator::default().with_session_timeout(Duration::from_millis(100));
        let old = sid("s-old");
        let young = sid("s-young");

        orch.create_context(&old, None).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        orch.create_context(&young, None).await;

        let removed = orch.cleanup_expired_sessions().await;
        assert_eq!(removed, vec![old.clone()]);
        assert_eq!(orch.get_active_sessions().await, vec![young]);
    }

    #[tokio::test]
    async fn sweep_keeps_context_recreated_under_expired_id() {
        let orch = KitOrchestrator::default().with_session_timeout(Duration::from_millis(50));
        let session = sid("s-reused");

        let stale = orch.create_context(&session, None).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Recreate the session while a sweep is in flight.
        let (removed, fresh) = tokio::join!(
            orch.cleanup_expired_sessions(),
            orch.create_context(&session, None)
        );
        fresh.set_shared("k", serde_json::json!(1)).await;

        let current = orch.get_context(&session).await.expect("fresh context survives");
        assert!(Arc::ptr_eq(&current, &fresh));
        assert!(!Arc::ptr_eq(&current, &stale));
        assert_eq!(orch.get_shared_state(&session, "k").await, Some(serde_json::json!(1)));
        assert!(removed.len() <= 1);

        // Whichever way the race went, the fresh context is young and stays.
        assert!(orch.cleanup_expired_sessions().await.is_empty());
        assert_eq!(orch.get_active_sessions().await, vec![session]);
    }

    #[tokio::test]
    async fn session_subscription_sees_only_its_session() {
        let orch = KitOrchestrator::default();
        let mine = sid("s-watch");
        let mut events = orch.subscribe_session(&mine);

        let other = Kit::new(ScriptedKit::new("a")).into_handle();
        orch.execute_kit(&sid("s-other"), other, IntakeData::new("x"))
            .await
            .unwrap();
        let watched = Kit::new(ScriptedKit::new("b")).into_handle();
        orch.execute_kit(&mine, watched, IntakeData::new("y"))
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.kind, ExecutionEventKind::Started);
        assert_eq!(second.kind, ExecutionEventKind::Completed);
        assert!([&first, &second].iter().all(|e| e.session_id == mine && e.workflow_id == "b"));
    }

    #[tokio::test]
    async fn swept_contexts_are_cleared() {
        let orch = KitOrchestrator::default().with_session_timeout(Duration::from_millis(50));
        let session = sid("s-cleared");

        let ctx = orch.register_kit(&session, Kit::new(ScriptedKit::new("k")).into_handle()).await;
        assert_eq!(ctx.log_len().await, 1);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(orch.cleanup_expired_sessions().await, vec![session]);
        assert_eq!(ctx.log_len().await, 0);
        assert!(ctx.active_workflow_ids().await.is_empty());
    }

    #[test]
    fn from_config_uses_configured_timeout() {
        let config = OrchestratorConfig {
            session_timeout_secs: 42,
            ..Default::default()
        };
        let orch = KitOrchestrator::from_config(&config);
        assert_eq!(orch.session_timeout(), Duration::from_secs(42));
    }
}
