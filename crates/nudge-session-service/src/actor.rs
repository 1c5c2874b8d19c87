// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session actor: the only writer of one project's session and history.
//!
//! The actor keeps nothing between requests beyond its address. Every
//! operation re-reads the persisted records inside a retried transaction,
//! writes the session and history records together, and only then
//! broadcasts to whatever connections are live at that moment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nudge_app_core::storage::{RecordKey, Storage, Transaction};
use nudge_core::vibes::is_known_vibe;
use nudge_core::{
    contains_element, nudge_component, validate_delta, Ast, ComponentId, HistoryState,
    HistorySummary, ProjectId, SessionState, StyleDelta, VibeId, DEFAULT_VIBE_ID,
};
use nudge_session_proto::{wire::encode_event, ServerEvent};
use tracing::{debug, info, warn};

use crate::connections::{ConnId, ConnectionRegistry};
use crate::error::SessionError;
use crate::retry::{self, RetryPolicy};

/// History label used when a patch arrives without one.
pub const DEFAULT_PATCH_DESCRIPTION: &str = "AST update";

/// Result of an undo or redo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// The pointer moved; the session now holds that snapshot.
    Applied {
        /// Session after the step.
        session: SessionState,
        /// History after the step.
        history: HistorySummary,
    },
    /// Already at the oldest (undo) or newest (redo) entry. Nothing changed.
    Boundary,
}

/// Realtime frames handled by the actor on behalf of one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeFrame {
    /// Resend the full state to the requester.
    SyncRequest,
    /// Switch vibe.
    VibeChange(VibeId),
    /// Merge components; validated before anything is read or written.
    AstPatch(serde_json::Value),
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Undo,
    Redo,
}

/// Owner of one project's session.
pub struct SessionActor {
    project: ProjectId,
    storage: Arc<dyn Storage>,
    connections: ConnectionRegistry,
    retry: RetryPolicy,
    session_key: RecordKey,
    history_key: RecordKey,
}

impl SessionActor {
    /// Actor for `project` over the shared storage and connection registry.
    pub fn new(
        project: impl Into<ProjectId>,
        storage: Arc<dyn Storage>,
        connections: ConnectionRegistry,
        retry: RetryPolicy,
    ) -> Self {
        let project = project.into();
        Self {
            session_key: RecordKey::new(project.clone(), "session"),
            history_key: RecordKey::new(project.clone(), "history"),
            project,
            storage,
            connections,
            retry,
        }
    }

    /// Project this actor owns.
    pub fn project(&self) -> &str {
        &self.project
    }

    async fn transact<T: Send>(
        &self,
        body: impl FnMut(&mut Transaction<'_, dyn Storage>) -> Result<T, SessionError> + Send,
    ) -> Result<T, SessionError> {
        retry::transact(&*self.storage, self.retry, &self.project, body).await
    }

    fn load_session(
        &self,
        txn: &mut Transaction<'_, dyn Storage>,
    ) -> Result<SessionState, SessionError> {
        txn.get::<SessionState>(&self.session_key)?.ok_or(SessionError::NotFound)
    }

    /// Stored history, or a fresh one rooted at `ast` when none was written yet.
    fn load_history(
        &self,
        txn: &mut Transaction<'_, dyn Storage>,
        ast: &Ast,
        now: DateTime<Utc>,
    ) -> Result<HistoryState, SessionError> {
        Ok(txn
            .get::<HistoryState>(&self.history_key)?
            .unwrap_or_else(|| HistoryState::new(ast.clone(), now)))
    }

    /// Merge `partial`, push the merged AST onto history and stage both records.
    fn stage_patch(
        &self,
        txn: &mut Transaction<'_, dyn Storage>,
        mut session: SessionState,
        partial: &Ast,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(SessionState, HistorySummary), SessionError> {
        let history = self.load_history(txn, &session.ast, now)?;
        session.ast.merge(partial);
        session.updated_at = now;
        let history = history.push(session.ast.clone(), description, now);
        txn.put(&self.session_key, &session)?;
        txn.put(&self.history_key, &history)?;
        Ok((session, history.summary()))
    }

    /// Create the session, or reset it (AST and history) if it exists.
    pub async fn init(&self, vibe_id: Option<VibeId>) -> Result<SessionState, SessionError> {
        let vibe_id = vibe_id.unwrap_or_else(|| DEFAULT_VIBE_ID.to_owned());
        if !is_known_vibe(&vibe_id) {
            return Err(SessionError::InvalidVibe(vibe_id));
        }
        let now = Utc::now();
        let session = self
            .transact(|txn| {
                let session = SessionState::new(self.project.clone(), vibe_id.clone(), now);
                txn.put(&self.session_key, &session)?;
                txn.put(&self.history_key, &HistoryState::new(Ast::new(), now))?;
                Ok(session)
            })
            .await?;
        info!(project = %self.project, vibe = %session.vibe_id, "session initialized");
        self.broadcast(&ServerEvent::StateUpdate(Some(session.clone())));
        Ok(session)
    }

    /// Current session.
    pub async fn get(&self) -> Result<SessionState, SessionError> {
        self.transact(|txn| self.load_session(txn)).await
    }

    /// Current session, `None` before `init`.
    pub async fn current(&self) -> Result<Option<SessionState>, SessionError> {
        self.transact(|txn| Ok(txn.get::<SessionState>(&self.session_key)?))
            .await
    }

    /// Switch the active vibe.
    pub async fn set_vibe(&self, vibe_id: VibeId) -> Result<SessionState, SessionError> {
        if !is_known_vibe(&vibe_id) {
            return Err(SessionError::InvalidVibe(vibe_id));
        }
        let now = Utc::now();
        let session = self
            .transact(|txn| {
                let mut session = self.load_session(txn)?;
                session.vibe_id.clone_from(&vibe_id);
                session.updated_at = now;
                txn.put(&self.session_key, &session)?;
                Ok(session)
            })
            .await?;
        self.broadcast(&ServerEvent::VibeChange(vibe_id));
        Ok(session)
    }

    /// Shallow-merge pre-built components and record the result in history.
    ///
    /// The markup is taken as-is; it does not pass through the patcher.
    pub async fn patch_ast(
        &self,
        partial: Ast,
        description: String,
    ) -> Result<SessionState, SessionError> {
        let now = Utc::now();
        let (session, summary) = self
            .transact(|txn| {
                let session = self.load_session(txn)?;
                self.stage_patch(txn, session, &partial, &description, now)
            })
            .await?;
        debug!(project = %self.project, components = partial.len(), "ast patched");
        self.broadcast(&ServerEvent::AstPatch(partial));
        self.broadcast(&ServerEvent::HistoryUpdate(summary));
        Ok(session)
    }

    /// Apply a style delta to one component through the patcher and guard.
    pub async fn nudge(
        &self,
        component_id: ComponentId,
        delta: StyleDelta,
        description: Option<String>,
    ) -> Result<SessionState, SessionError> {
        validate_delta(&delta)?;
        let description = description.unwrap_or_else(|| format!("Nudge {component_id}"));
        let now = Utc::now();
        let (session, summary, partial) = self
            .transact(|txn| {
                let session = self.load_session(txn)?;
                let component = session
                    .ast
                    .get(&component_id)
                    .ok_or_else(|| SessionError::ElementNotFound(component_id.clone()))?;
                let (updated, _) = nudge_component(component, &delta, now)?;
                let partial: Ast = std::iter::once(updated).collect();
                let (session, summary) =
                    self.stage_patch(txn, session, &partial, &description, now)?;
                Ok((session, summary, partial))
            })
            .await?;
        debug!(project = %self.project, component = %component_id, "component nudged");
        self.broadcast(&ServerEvent::AstPatch(partial));
        self.broadcast(&ServerEvent::HistoryUpdate(summary));
        Ok(session)
    }

    /// Step history back and restore that snapshot.
    pub async fn undo(&self) -> Result<HistoryOutcome, SessionError> {
        self.step(Step::Undo).await
    }

    /// Step history forward and restore that snapshot.
    pub async fn redo(&self) -> Result<HistoryOutcome, SessionError> {
        self.step(Step::Redo).await
    }

    async fn step(&self, step: Step) -> Result<HistoryOutcome, SessionError> {
        let now = Utc::now();
        let outcome = self
            .transact(|txn| {
                let session = txn.get::<SessionState>(&self.session_key)?;
                let base = session.as_ref().map(|s| s.ast.clone()).unwrap_or_default();
                let history = self.load_history(txn, &base, now)?;
                let (history, ast) = match step {
                    Step::Undo => history.undo(),
                    Step::Redo => history.redo(),
                };
                let Some(ast) = ast else {
                    return Ok(HistoryOutcome::Boundary);
                };
                let mut session = session.ok_or(SessionError::NotFound)?;
                session.ast = ast;
                session.updated_at = now;
                txn.put(&self.session_key, &session)?;
                txn.put(&self.history_key, &history)?;
                Ok(HistoryOutcome::Applied {
                    session,
                    history: history.summary(),
                })
            })
            .await?;
        match &outcome {
            HistoryOutcome::Applied { session, history } => {
                self.broadcast(&ServerEvent::AstPatch(session.ast.clone()));
                self.broadcast(&ServerEvent::HistoryUpdate(history.clone()));
            }
            HistoryOutcome::Boundary => debug!(project = %self.project, ?step, "history boundary"),
        }
        Ok(outcome)
    }

    /// History summary. Before `init` this describes an empty history.
    pub async fn history_summary(&self) -> Result<HistorySummary, SessionError> {
        let now = Utc::now();
        self.transact(|txn| {
            let base = txn
                .get::<SessionState>(&self.session_key)?
                .map(|s| s.ast)
                .unwrap_or_default();
            Ok(self.load_history(txn, &base, now)?.summary())
        })
        .await
    }

    /// Collapse history to the current snapshot.
    pub async fn clear_history(&self) -> Result<HistorySummary, SessionError> {
        let now = Utc::now();
        let summary = self
            .transact(|txn| {
                let session = self.load_session(txn)?;
                let history = self.load_history(txn, &session.ast, now)?.clear();
                txn.put(&self.history_key, &history)?;
                Ok(history.summary())
            })
            .await?;
        self.broadcast(&ServerEvent::HistoryUpdate(summary.clone()));
        Ok(summary)
    }

    /// Greet a newly attached connection with the current state, then let
    /// it receive broadcasts. Anything broadcast before this point is
    /// already part of the greeting.
    pub async fn join(&self, conn: ConnId) {
        match self.current().await {
            Ok(session) => {
                self.send_to(conn, &ServerEvent::StateUpdate(session));
            }
            Err(err) => self.reject(conn, &err),
        }
        self.connections.greeted(&self.project, conn);
    }

    /// Handle one realtime frame from `conn`. Failures go back to `conn` only.
    pub async fn realtime(&self, conn: ConnId, frame: RealtimeFrame) {
        let result = match frame {
            RealtimeFrame::SyncRequest => self.current().await.map(|session| {
                self.send_to(conn, &ServerEvent::StateUpdate(session));
            }),
            RealtimeFrame::VibeChange(vibe_id) => self.set_vibe(vibe_id).await.map(|_| ()),
            RealtimeFrame::AstPatch(value) => match parse_ast_patch(value) {
                Ok(partial) => self
                    .patch_ast(partial, DEFAULT_PATCH_DESCRIPTION.to_owned())
                    .await
                    .map(|_| ()),
                Err(err) => Err(err),
            },
        };
        if let Err(err) = result {
            self.reject(conn, &err);
        }
    }

    fn reject(&self, conn: ConnId, err: &SessionError) {
        warn!(project = %self.project, conn, code = err.code(), error = %err, "request rejected");
        self.send_to(conn, &ServerEvent::Error(err.payload()));
    }

    fn send_to(&self, conn: ConnId, event: &ServerEvent) {
        match encode_event(event) {
            Ok(frame) => {
                self.connections.send_to(&self.project, conn, frame);
            }
            Err(err) => {
                warn!(project = %self.project, event = event.type_name(), %err, "event encode failed");
            }
        }
    }

    /// Push `event` to every connection live right now.
    fn broadcast(&self, event: &ServerEvent) {
        let frame = match encode_event(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    project = %self.project,
                    event = event.type_name(),
                    %err,
                    "event encode failed"
                );
                return;
            }
        };
        let delivered = self.connections.broadcast(&self.project, &frame);
        debug!(project = %self.project, event = event.type_name(), delivered, "broadcast");
    }
}

/// Decode and check an inbound `ast_patch` payload.
///
/// Each entry must be keyed by its own id and its markup must carry an
/// element addressed by that id.
pub fn parse_ast_patch(value: serde_json::Value) -> Result<Ast, SessionError> {
    let partial: Ast = serde_json::from_value(value)
        .map_err(|err| SessionError::InvalidPayload(format!("ast_patch: {err}")))?;
    if partial.is_empty() {
        return Err(SessionError::InvalidPayload("ast_patch carries no components".to_owned()));
    }
    for (key, component) in partial.iter() {
        if *key != component.id {
            return Err(SessionError::InvalidPayload(format!(
                "ast_patch: entry {key} holds component {}",
                component.id
            )));
        }
        if !contains_element(&component.markup, key) {
            return Err(SessionError::InvalidPayload(format!(
                "ast_patch: markup of {key} has no element with that id"
            )));
        }
    }
    Ok(partial)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use nudge_app_core::MemoryStorage;
    use nudge_core::Component;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn actor(storage: &Arc<MemoryStorage>, connections: &ConnectionRegistry) -> SessionActor {
        let storage: Arc<dyn Storage> = storage.clone();
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        SessionActor::new("proj", storage, connections.clone(), retry)
    }

    fn component(id: &str, class: &str) -> Component {
        Component::new(id, format!(r#"<div data-id="{id}" class="{class}">x</div>"#), Utc::now())
    }

    #[tokio::test]
    async fn get_before_init_is_not_found() {
        let storage = Arc::new(MemoryStorage::new());
        let actor = actor(&storage, &ConnectionRegistry::new());
        assert!(matches!(actor.get().await, Err(SessionError::NotFound)));
        assert_eq!(actor.current().await.unwrap(), None);
    }

    #[tokio::test]
    async fn init_rejects_unknown_vibe_without_writing() {
        let storage = Arc::new(MemoryStorage::new());
        let actor = actor(&storage, &ConnectionRegistry::new());
        let err = actor.init(Some("grunge".into())).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidVibe(ref v) if v == "grunge"));
        assert_eq!(storage.commit_count(), 0);

        let session = actor.init(None).await.unwrap();
        assert_eq!(session.vibe_id, DEFAULT_VIBE_ID);
        assert_eq!(storage.commit_count(), 1);
    }

    #[tokio::test]
    async fn patch_writes_session_and_history_together() {
        let storage = Arc::new(MemoryStorage::new());
        let actor = actor(&storage, &ConnectionRegistry::new());
        actor.init(None).await.unwrap();
        let partial: Ast = [component("a", "p-4")].into_iter().collect();
        let session = actor.patch_ast(partial, "add a".into()).await.unwrap();
        assert!(session.ast.contains("a"));

        let history: HistoryState =
            serde_json::from_slice(&storage.raw(&RecordKey::new("proj", "history")).unwrap()).unwrap();
        assert_eq!(history.entries().len(), 2);
        assert_eq!(history.current_ast(), session.ast);
        assert_eq!(storage.commit_count(), 2);
    }

    #[tokio::test]
    async fn nudge_rewrites_classes_and_keeps_the_rest() {
        let storage = Arc::new(MemoryStorage::new());
        let actor = actor(&storage, &ConnectionRegistry::new());
        actor.init(None).await.unwrap();
        let button = Component::new(
            "b1",
            r#"<button data-id="b1" onclick="f()" class="px-4">Go</button>"#,
            Utc::now(),
        );
        actor
            .patch_ast([button].into_iter().collect(), "add button".into())
            .await
            .unwrap();

        let session = actor
            .nudge("b1".into(), StyleDelta::new(["px-6"], ["px-4"]), None)
            .await
            .unwrap();
        let b1 = session.ast.get("b1").unwrap();
        assert!(b1.markup.contains(r#"onclick="f()""#));
        assert_eq!(b1.classes.as_deref(), Some(["px-6".to_owned()].as_slice()));
        assert!(b1.updated_at.is_some());
        assert_eq!(actor.history_summary().await.unwrap().recent_entries[0].description, "Nudge b1");
    }

    #[tokio::test]
    async fn nudge_errors_leave_state_alone() {
        let storage = Arc::new(MemoryStorage::new());
        let actor = actor(&storage, &ConnectionRegistry::new());
        actor.init(None).await.unwrap();
        actor
            .patch_ast([component("a", "p-4")].into_iter().collect(), "add a".into())
            .await
            .unwrap();
        let commits = storage.commit_count();

        let missing = actor.nudge("zzz".into(), StyleDelta::new(["p-2"], ["p-4"]), None).await;
        assert!(matches!(missing, Err(SessionError::ElementNotFound(ref id)) if id == "zzz"));
        let bad = actor.nudge("a".into(), StyleDelta::new(["<script>"], Vec::<String>::new()), None).await;
        assert!(matches!(bad, Err(SessionError::InvalidDelta(_))));
        assert_eq!(storage.commit_count(), commits);
    }

    #[tokio::test]
    async fn logic_violation_leaves_state_and_followers_untouched() {
        let storage = Arc::new(MemoryStorage::new());
        let connections = ConnectionRegistry::new();
        let actor = actor(&storage, &connections);
        actor.init(None).await.unwrap();
        let markup = r#"<div data-id="c" class=a" onclick="f()">x</div>"#;
        let seeded = Component::new("c", markup, Utc::now());
        actor.patch_ast(std::iter::once(seeded).collect(), "seed".into()).await.unwrap();
        let commits = storage.commit_count();
        let (tx, mut rx) = mpsc::channel(8);
        connections.attach("proj", tx);

        let err = actor
            .nudge("c".into(), StyleDelta::new(["y="], Vec::<String>::new()), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_LOGIC_VIOLATION");
        assert!(matches!(err, SessionError::LogicViolation(ref v) if v.len() == 1));
        assert_eq!(storage.commit_count(), commits);
        assert!(rx.try_recv().is_err());
        let kept = actor.get().await.unwrap();
        assert_eq!(kept.ast.get("c").map(|c| c.markup.as_str()), Some(markup));
    }

    #[tokio::test]
    async fn greeting_precedes_any_broadcast_for_a_joining_connection() {
        let storage = Arc::new(MemoryStorage::new());
        let connections = ConnectionRegistry::new();
        let actor = actor(&storage, &connections);
        actor.init(None).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = connections.attach_pending("proj", tx);

        actor.set_vibe("high-fashion".into()).await.unwrap();
        assert!(rx.try_recv().is_err());

        actor.join(conn).await;
        let greeting: serde_json::Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(greeting["type"], "state_update");
        assert_eq!(greeting["payload"]["vibeId"], "high-fashion");

        actor.set_vibe("minimalist".into()).await.unwrap();
        let next: serde_json::Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(next["type"], "vibe_change");
    }

    #[tokio::test]
    async fn undo_at_the_start_is_a_boundary() {
        let storage = Arc::new(MemoryStorage::new());
        let actor = actor(&storage, &ConnectionRegistry::new());
        actor.init(None).await.unwrap();
        assert_eq!(actor.undo().await.unwrap(), HistoryOutcome::Boundary);
        assert_eq!(actor.redo().await.unwrap(), HistoryOutcome::Boundary);
        assert_eq!(storage.commit_count(), 1);
    }

    #[tokio::test]
    async fn clear_history_keeps_current_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        let actor = actor(&storage, &ConnectionRegistry::new());
        actor.init(None).await.unwrap();
        for id in ["a", "b"] {
            actor
                .patch_ast([component(id, "p-1")].into_iter().collect(), format!("add {id}"))
                .await
                .unwrap();
        }
        let summary = actor.clear_history().await.unwrap();
        assert_eq!(summary.total, 1);
        assert!(!summary.can_undo && !summary.can_redo);
        assert_eq!(actor.get().await.unwrap().ast.len(), 2);
    }

    #[tokio::test]
    async fn invalid_realtime_patch_errors_to_sender_only() {
        let storage = Arc::new(MemoryStorage::new());
        let connections = ConnectionRegistry::new();
        let actor = actor(&storage, &connections);
        actor.init(None).await.unwrap();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = connections.attach("proj", tx_a);
        connections.attach("proj", tx_b);

        actor
            .realtime(a, RealtimeFrame::AstPatch(json!({"x": {"id": "y", "markup": "<p></p>"}})))
            .await;
        let frame = rx_a.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], "E_INVALID_PAYLOAD");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn ast_patch_validation() {
        let now = Utc::now().to_rfc3339();
        let good = json!({"c1": {"id": "c1", "markup": "<div data-id=\"c1\">x</div>", "createdAt": now}});
        assert_eq!(parse_ast_patch(good).unwrap().len(), 1);

        let mismatched = json!({"c1": {"id": "c2", "markup": "<div data-id=\"c2\"></div>", "createdAt": now}});
        let no_element = json!({"c1": {"id": "c1", "markup": "<div></div>", "createdAt": now}});
        for bad in [json!({}), json!("nope"), mismatched, no_element] {
            assert!(matches!(parse_ast_patch(bad), Err(SessionError::InvalidPayload(_))));
        }
    }
}
