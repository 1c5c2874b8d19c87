// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session wire schema for the Nudge hub.
//!
//! Every frame is one JSON object. Realtime events use the `{type, payload}`
//! envelope shared with browser viewers; control-plane calls ride inside a
//! `request` frame and are answered by a `reply` frame with the same id.

pub use nudge_core::{Ast, HistorySummary, ProjectId, SessionState, StyleDelta, VibeId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod wire;

/// Default Unix socket path for the session hub.
///
/// Prefers a per-user runtime dir (XDG_RUNTIME_DIR) and falls back to `/tmp`
/// when unavailable.
pub fn default_socket_path() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    base.join("nudge-session.sock")
}

/// Error payload carried by `error` events and failed replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable identifier (e.g. "E_INVALID_VIBE").
    pub code: String,
    /// Human readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Build a payload.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Attach a connection to one project's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Project to follow.
    pub project_id: ProjectId,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Attach this connection to a project (first frame on a connection).
    Join(JoinPayload),
    /// Ask for the full current state (answered to the requester only).
    SyncRequest,
    /// Switch the project's vibe.
    VibeChange(VibeId),
    /// Merge components into the AST. Kept raw so a malformed payload can be
    /// answered with an `error` event instead of dropping the frame.
    AstPatch(serde_json::Value),
    /// Control-plane call.
    Request(Request),
}

/// Events sent by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full session (or `null` before `init`).
    StateUpdate(Option<SessionState>),
    /// New active vibe.
    VibeChange(VibeId),
    /// Components that changed (the full AST after undo/redo).
    AstPatch(Ast),
    /// History pointer moved or grew.
    HistoryUpdate(HistorySummary),
    /// Something the sender did was rejected.
    Error(ErrorPayload),
    /// Answer to a `request` frame.
    Reply(Reply),
}

impl ServerEvent {
    /// Event name as it appears in the `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StateUpdate(_) => "state_update",
            Self::VibeChange(_) => "vibe_change",
            Self::AstPatch(_) => "ast_patch",
            Self::HistoryUpdate(_) => "history_update",
            Self::Error(_) => "error",
            Self::Reply(_) => "reply",
        }
    }
}

/// Control-plane request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen correlation id echoed in the reply.
    pub id: u64,
    /// Operation.
    #[serde(flatten)]
    pub op: Op,
}

fn default_patch_description() -> String {
    "AST update".to_owned()
}

/// Control-plane operations, addressed to the joined project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Op {
    /// Create (or reset) the session.
    Init {
        /// Vibe to start with; the default vibe when absent.
        #[serde(default)]
        vibe_id: Option<VibeId>,
    },
    /// Read the session.
    Get,
    /// Switch vibe.
    SetVibe {
        /// Target vibe.
        vibe_id: VibeId,
    },
    /// Shallow-merge pre-built components.
    PatchAst {
        /// Components to overwrite.
        partial_ast: Ast,
        /// History label.
        #[serde(default = "default_patch_description")]
        description: String,
    },
    /// Apply a style delta to one component through the patcher and guard.
    Nudge {
        /// Target component.
        component_id: String,
        /// Classes to add/remove.
        delta: StyleDelta,
        /// History label.
        #[serde(default)]
        description: Option<String>,
    },
    /// Step history back.
    Undo,
    /// Step history forward.
    Redo,
    /// History summary.
    History,
    /// Collapse history to the current snapshot.
    ClearHistory,
    /// Registered vibes.
    ListVibes,
}

/// Answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Correlation id from the request.
    pub id: u64,
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Result body on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Reply {
    /// Successful reply.
    pub fn ok(id: u64, data: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed reply.
    pub fn err(id: u64, error: ErrorPayload) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}
