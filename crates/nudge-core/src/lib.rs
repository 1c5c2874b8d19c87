// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Style-mutation engine for Nudge sessions.
//!
//! Everything in this crate is pure: no I/O, no clocks (callers pass `now`),
//! no shared state. The session service composes these pieces:
//!
//! * [`model`] – component AST, style deltas, session state.
//! * [`markup`] – tolerant opening/closing tag scanner shared by the patcher
//!   and the guard.
//! * [`patcher`] – rewrite one element's class list from a [`StyleDelta`].
//! * [`guard`] – prove a rewrite left every protected attribute and the tag
//!   count untouched.
//! * [`history`] – capped undo/redo over immutable AST snapshots.
//! * [`vibes`] – registry of known theme token sets.

pub mod guard;
pub mod history;
pub mod markup;
pub mod model;
pub mod patcher;
pub mod vibes;

pub use guard::{validate_nudge_preserves_logic, Violation};
pub use history::{HistoryEntry, HistoryState, HistorySummary, MAX_HISTORY_SIZE};
pub use model::{Ast, Component, ComponentId, ProjectId, SessionState, StyleDelta, VibeId};
pub use patcher::{
    apply_delta, contains_element, extract_classes, nudge_component, validate_delta, PatchError,
    PatchOutcome,
};
pub use vibes::{get_vibe, VibeTokens, DEFAULT_VIBE_ID};
