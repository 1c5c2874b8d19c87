// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-connection protocol loop.
//!
//! A connection first joins one project. After that, realtime frames are
//! queued on the project's actor and control requests are answered with a
//! `reply` frame. A dedicated writer task drains the connection's outbox so
//! a slow peer never stalls an actor.

use nudge_core::vibes::all_vibes;
use nudge_core::ProjectId;
use nudge_session_proto::wire::{decode_frame, encode_event, LineFramer};
use nudge_session_proto::{ClientFrame, JoinPayload, Op, Reply, Request, ServerEvent};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::actor::{HistoryOutcome, RealtimeFrame};
use crate::connections::{ConnId, Outbox};
use crate::error::SessionError;
use crate::registry::{Hub, SessionHandle};

const READ_CHUNK: usize = 16 * 1024;

/// Serve one client until it disconnects.
pub async fn serve_connection<S>(hub: Hub, stream: S, outbox_capacity: usize) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbox, mut pending) = mpsc::channel::<Vec<u8>>(outbox_capacity.max(1));
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = pending.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut conn = Connection {
        hub,
        outbox,
        joined: None,
    };
    let mut framer = LineFramer::new();
    let mut buf = vec![0_u8; READ_CHUNK];
    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(err) => break Err(err),
        };
        framer.extend(&buf[..n]);
        while let Some(line) = framer.next_line() {
            match line.and_then(|line| decode_frame(&line)) {
                Ok(frame) => conn.handle(frame).await,
                Err(err) => {
                    conn.send_error(&SessionError::InvalidPayload(err.to_string()))
                        .await;
                }
            }
        }
    };

    conn.leave();
    drop(conn);
    let _ = writer_task.await;
    result
}

struct Connection {
    hub: Hub,
    outbox: Outbox,
    joined: Option<(SessionHandle, ConnId)>,
}

impl Connection {
    async fn handle(&mut self, frame: ClientFrame) {
        match frame {
            ClientFrame::Join(JoinPayload { project_id }) => self.join(project_id).await,
            ClientFrame::Request(request) => {
                let reply = match &self.joined {
                    Some((session, _)) => execute(session, request).await,
                    None => Reply::err(request.id, not_joined().payload()),
                };
                self.send(&ServerEvent::Reply(reply)).await;
            }
            ClientFrame::SyncRequest => self.realtime(RealtimeFrame::SyncRequest).await,
            ClientFrame::VibeChange(vibe_id) => {
                self.realtime(RealtimeFrame::VibeChange(vibe_id)).await;
            }
            ClientFrame::AstPatch(value) => self.realtime(RealtimeFrame::AstPatch(value)).await,
        }
    }

    async fn join(&mut self, project: ProjectId) {
        if project.trim().is_empty() {
            self.send_error(&SessionError::InvalidPayload("projectId must not be empty".to_owned()))
                .await;
            return;
        }
        self.leave();
        let conn = self.hub.connections().attach_pending(&project, self.outbox.clone());
        let session = self.hub.session(project);
        info!(project = session.project(), conn, "connection joined");
        session.join(conn);
        self.joined = Some((session, conn));
    }

    fn leave(&mut self) {
        if let Some((session, conn)) = self.joined.take() {
            self.hub.connections().detach(session.project(), conn);
            debug!(project = session.project(), conn, "connection left");
        }
    }

    async fn realtime(&self, frame: RealtimeFrame) {
        match &self.joined {
            Some((session, conn)) => session.realtime(*conn, frame),
            None => self.send_error(&not_joined()).await,
        }
    }

    async fn send_error(&self, err: &SessionError) {
        warn!(code = err.code(), error = %err, "frame rejected");
        self.send(&ServerEvent::Error(err.payload())).await;
    }

    async fn send(&self, event: &ServerEvent) {
        match encode_event(event) {
            Ok(frame) => {
                if self.outbox.send(frame).await.is_err() {
                    debug!(event = event.type_name(), "connection writer gone");
                }
            }
            Err(err) => warn!(event = event.type_name(), %err, "event encode failed"),
        }
    }
}

fn not_joined() -> SessionError {
    SessionError::InvalidPayload("join a project first".to_owned())
}

fn to_data<T: Serialize>(result: Result<T, SessionError>) -> Result<Value, SessionError> {
    result.and_then(|value| {
        serde_json::to_value(value).map_err(|err| SessionError::Internal(err.to_string()))
    })
}

fn step_data(outcome: HistoryOutcome, boundary: Value) -> Value {
    match outcome {
        HistoryOutcome::Applied { session, history } => {
            json!({ "session": session, "history": history })
        }
        HistoryOutcome::Boundary => boundary,
    }
}

/// Run one control request against `session` and build its reply.
pub async fn execute(session: &SessionHandle, request: Request) -> Reply {
    let Request { id, op } = request;
    let result = match op {
        Op::Init { vibe_id } => to_data(session.init(vibe_id).await),
        Op::Get => to_data(session.get().await),
        Op::SetVibe { vibe_id } => to_data(session.set_vibe(vibe_id).await),
        Op::PatchAst {
            partial_ast,
            description,
        } => to_data(session.patch_ast(partial_ast, description).await),
        Op::Nudge {
            component_id,
            delta,
            description,
        } => to_data(session.nudge(component_id, delta, description).await),
        Op::Undo => session
            .undo()
            .await
            .map(|outcome| step_data(outcome, json!({ "nothingToUndo": true }))),
        Op::Redo => session
            .redo()
            .await
            .map(|outcome| step_data(outcome, json!({ "nothingToRedo": true }))),
        Op::History => to_data(session.history_summary().await),
        Op::ClearHistory => to_data(session.clear_history().await),
        Op::ListVibes => to_data(Ok(all_vibes())),
    };
    match result {
        Ok(data) => Reply::ok(id, data),
        Err(err) => {
            debug!(project = session.project(), id, code = err.code(), "request failed");
            Reply::err(id, err.payload())
        }
    }
}
