// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Actor registry: at most one live [`SessionActor`] per project.
//!
//! Requests for a project are queued on that project's mailbox and run one at
//! a time. An actor that stays idle past the configured timeout removes itself
//! and exits; the next request for the project spawns a fresh one. Nothing is
//! lost in between because actors hold no state outside storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use nudge_app_core::storage::Storage;
use nudge_core::{Ast, ComponentId, HistorySummary, ProjectId, SessionState, StyleDelta, VibeId};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::actor::{HistoryOutcome, RealtimeFrame, SessionActor};
use crate::connections::{ConnId, ConnectionRegistry};
use crate::error::SessionError;
use crate::retry::RetryPolicy;

/// Tunables for the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Retry budget for persistence writes.
    pub retry: RetryPolicy,
    /// How long an actor may sit with an empty mailbox before it is evicted.
    pub idle_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Init { vibe_id: Option<VibeId>, reply: Reply<SessionState> },
    Get { reply: Reply<SessionState> },
    SetVibe { vibe_id: VibeId, reply: Reply<SessionState> },
    PatchAst { partial: Ast, description: String, reply: Reply<SessionState> },
    Nudge {
        component_id: ComponentId,
        delta: StyleDelta,
        description: Option<String>,
        reply: Reply<SessionState>,
    },
    Undo { reply: Reply<HistoryOutcome> },
    Redo { reply: Reply<HistoryOutcome> },
    History { reply: Reply<HistorySummary> },
    ClearHistory { reply: Reply<HistorySummary> },
    Join { conn: ConnId },
    Realtime { conn: ConnId, frame: RealtimeFrame },
}

impl Command {
    // A dropped reply receiver means the caller gave up; the work still counts.
    async fn run(self, actor: &SessionActor) {
        match self {
            Self::Init { vibe_id, reply } => {
                let _ = reply.send(actor.init(vibe_id).await);
            }
            Self::Get { reply } => {
                let _ = reply.send(actor.get().await);
            }
            Self::SetVibe { vibe_id, reply } => {
                let _ = reply.send(actor.set_vibe(vibe_id).await);
            }
            Self::PatchAst {
                partial,
                description,
                reply,
            } => {
                let _ = reply.send(actor.patch_ast(partial, description).await);
            }
            Self::Nudge {
                component_id,
                delta,
                description,
                reply,
            } => {
                let _ = reply.send(actor.nudge(component_id, delta, description).await);
            }
            Self::Undo { reply } => {
                let _ = reply.send(actor.undo().await);
            }
            Self::Redo { reply } => {
                let _ = reply.send(actor.redo().await);
            }
            Self::History { reply } => {
                let _ = reply.send(actor.history_summary().await);
            }
            Self::ClearHistory { reply } => {
                let _ = reply.send(actor.clear_history().await);
            }
            Self::Join { conn } => actor.join(conn).await,
            Self::Realtime { conn, frame } => actor.realtime(conn, frame).await,
        }
    }
}

struct Slot {
    mailbox: mpsc::UnboundedSender<Command>,
    generation: u64,
}

struct HubInner {
    storage: Arc<dyn Storage>,
    connections: ConnectionRegistry,
    config: HubConfig,
    actors: Mutex<HashMap<ProjectId, Slot>>,
    generations: AtomicU64,
}

impl HubInner {
    fn actors(&self) -> MutexGuard<'_, HashMap<ProjectId, Slot>> {
        self.actors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the actor's slot if its mailbox is still empty. Returns whether
    /// the actor should exit.
    ///
    /// Senders only enqueue while holding the registry lock, so once the slot
    /// is gone nothing can reach this mailbox again.
    fn evict(
        &self,
        project: &str,
        generation: u64,
        mailbox: &mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let mut actors = self.actors();
        if !mailbox.is_empty() {
            return false;
        }
        if actors.get(project).is_some_and(|slot| slot.generation == generation) {
            actors.remove(project);
            debug!(project, generation, "idle session actor evicted");
        }
        true
    }
}

/// Entry point to every project's session.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Hub over `storage`. Actors are spawned on the current tokio runtime.
    pub fn new(storage: Arc<dyn Storage>, config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                storage,
                connections: ConnectionRegistry::new(),
                config,
                actors: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Live connections, shared with every actor.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    /// Handle addressing `project`'s actor.
    pub fn session(&self, project: impl Into<ProjectId>) -> SessionHandle {
        SessionHandle {
            hub: self.clone(),
            project: project.into(),
        }
    }

    /// Number of actors currently running.
    pub fn live_actors(&self) -> usize {
        self.inner.actors().len()
    }

    /// Whether `project` has a running actor.
    pub fn is_live(&self, project: &str) -> bool {
        self.inner.actors().contains_key(project)
    }

    fn dispatch(&self, project: &str, command: Command) {
        let mut actors = self.inner.actors();
        let command = match actors.get(project) {
            Some(slot) => match slot.mailbox.send(command) {
                Ok(()) => return,
                Err(mpsc::error::SendError(command)) => command,
            },
            None => command,
        };
        let (mailbox, rx) = mpsc::unbounded_channel();
        let _ = mailbox.send(command);
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let actor = SessionActor::new(
            project,
            Arc::clone(&self.inner.storage),
            self.inner.connections.clone(),
            self.inner.config.retry,
        );
        debug!(project, generation, "session actor spawned");
        tokio::spawn(run_actor(
            Arc::downgrade(&self.inner),
            actor,
            rx,
            generation,
            self.inner.config.idle_timeout,
        ));
        actors.insert(project.to_owned(), Slot { mailbox, generation });
    }
}

async fn run_actor(
    hub: Weak<HubInner>,
    actor: SessionActor,
    mut mailbox: mpsc::UnboundedReceiver<Command>,
    generation: u64,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, mailbox.recv()).await {
            Ok(Some(command)) => command.run(&actor).await,
            Ok(None) => break,
            Err(_) => {
                let Some(hub) = hub.upgrade() else { break };
                if hub.evict(actor.project(), generation, &mailbox) {
                    break;
                }
            }
        }
    }
    debug!(project = actor.project(), generation, "session actor stopped");
}

/// Typed client of one project's actor.
#[derive(Clone)]
pub struct SessionHandle {
    hub: Hub,
    project: ProjectId,
}

impl SessionHandle {
    /// Project this handle addresses.
    pub fn project(&self) -> &str {
        &self.project
    }

    async fn call<T: Send>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command + Send,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.hub.dispatch(&self.project, command(reply));
        rx.await.unwrap_or_else(|_| {
            Err(SessionError::Internal(format!(
                "session actor for {} stopped before replying",
                self.project
            )))
        })
    }

    /// See [`SessionActor::init`].
    pub async fn init(&self, vibe_id: Option<VibeId>) -> Result<SessionState, SessionError> {
        self.call(|reply| Command::Init { vibe_id, reply }).await
    }

    /// See [`SessionActor::get`].
    pub async fn get(&self) -> Result<SessionState, SessionError> {
        self.call(|reply| Command::Get { reply }).await
    }

    /// See [`SessionActor::set_vibe`].
    pub async fn set_vibe(&self, vibe_id: VibeId) -> Result<SessionState, SessionError> {
        self.call(|reply| Command::SetVibe { vibe_id, reply }).await
    }

    /// See [`SessionActor::patch_ast`].
    pub async fn patch_ast(&self, partial: Ast, description: String) -> Result<SessionState, SessionError> {
        self.call(|reply| Command::PatchAst {
            partial,
            description,
            reply,
        })
        .await
    }

    /// See [`SessionActor::nudge`].
    pub async fn nudge(
        &self,
        component_id: ComponentId,
        delta: StyleDelta,
        description: Option<String>,
    ) -> Result<SessionState, SessionError> {
        self.call(|reply| Command::Nudge {
            component_id,
            delta,
            description,
            reply,
        })
        .await
    }

    /// See [`SessionActor::undo`].
    pub async fn undo(&self) -> Result<HistoryOutcome, SessionError> {
        self.call(|reply| Command::Undo { reply }).await
    }

    /// See [`SessionActor::redo`].
    pub async fn redo(&self) -> Result<HistoryOutcome, SessionError> {
        self.call(|reply| Command::Redo { reply }).await
    }

    /// See [`SessionActor::history_summary`].
    pub async fn history_summary(&self) -> Result<HistorySummary, SessionError> {
        self.call(|reply| Command::History { reply }).await
    }

    /// See [`SessionActor::clear_history`].
    pub async fn clear_history(&self) -> Result<HistorySummary, SessionError> {
        self.call(|reply| Command::ClearHistory { reply }).await
    }

    /// Queue a `state_update` greeting for `conn`.
    pub fn join(&self, conn: ConnId) {
        self.hub.dispatch(&self.project, Command::Join { conn });
    }

    /// Queue a realtime frame from `conn`.
    pub fn realtime(&self, conn: ConnId, frame: RealtimeFrame) {
        self.hub.dispatch(&self.project, Command::Realtime { conn, frame });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use nudge_app_core::MemoryStorage;

    fn hub(idle: Duration) -> Hub {
        let config = HubConfig {
            idle_timeout: idle,
            ..HubConfig::default()
        };
        Hub::new(Arc::new(MemoryStorage::new()), config)
    }

    #[tokio::test]
    async fn one_actor_per_project() {
        let hub = hub(Duration::from_secs(60));
        hub.session("a").init(None).await.unwrap();
        hub.session("a").get().await.unwrap();
        hub.session("b").init(None).await.unwrap();
        assert_eq!(hub.live_actors(), 2);
        assert!(matches!(hub.session("c").get().await, Err(SessionError::NotFound)));
        assert_eq!(hub.live_actors(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_actor_is_evicted_and_resumes_from_storage() {
        let hub = hub(Duration::from_millis(100));
        let session = hub.session("p");
        let created = session.init(Some("high-fashion".into())).await.unwrap();
        assert!(hub.is_live("p"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!hub.is_live("p"));

        assert_eq!(session.get().await.unwrap(), created);
        assert!(hub.is_live("p"));
    }
}
