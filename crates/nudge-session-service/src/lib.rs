// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Nudge session hub.
//!
//! One [`SessionActor`] per project owns that project's session and undo
//! history. The [`Hub`] spawns actors on demand, routes requests to their
//! mailboxes and lets idle ones go. Connections live in a
//! [`ConnectionRegistry`] owned by the hub, so broadcasts always reach the
//! set of clients that is live at the moment of the change.

pub mod actor;
pub mod connections;
pub mod error;
pub mod prefs;
pub mod registry;
pub mod retry;
pub mod server;

pub use actor::{
    parse_ast_patch, HistoryOutcome, RealtimeFrame, SessionActor, DEFAULT_PATCH_DESCRIPTION,
};
pub use connections::{ConnId, ConnectionRegistry};
pub use error::SessionError;
pub use prefs::{SessionHostPrefs, PREFS_KEY};
pub use registry::{Hub, HubConfig, SessionHandle};
pub use retry::RetryPolicy;
pub use server::serve_connection;
