// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Errors surfaced by session operations.

use nudge_app_core::storage::StorageError;
use nudge_core::{ComponentId, PatchError, VibeId, Violation};
use nudge_session_proto::ErrorPayload;
use thiserror::Error;

/// Failure of one session request. The actor stays usable after any of these.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Target component is not in the AST or its markup.
    #[error("element not found: {0}")]
    ElementNotFound(ComponentId),
    /// Style delta failed token validation.
    #[error("invalid delta: {}", .0.join("; "))]
    InvalidDelta(Vec<String>),
    /// Patch would have touched behavior or structure.
    #[error("logic violation: {}", join_violations(.0))]
    LogicViolation(Vec<Violation>),
    /// Vibe id is not registered.
    #[error("invalid vibe id: {0}")]
    InvalidVibe(VibeId),
    /// The project was never initialized.
    #[error("session not initialized")]
    NotFound,
    /// Storage kept conflicting until the retry budget ran out.
    #[error("storage conflict after {attempts} attempt(s): {source}")]
    StorageConflict {
        /// Attempts made, including the first.
        attempts: u32,
        /// Last failure.
        #[source]
        source: StorageError,
    },
    /// Inbound frame could not be accepted.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Anything else; never broadcast.
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_violations(violations: &[Violation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl SessionError {
    /// Stable machine code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ElementNotFound(_) => "E_ELEMENT_NOT_FOUND",
            Self::InvalidDelta(_) => "E_INVALID_DELTA",
            Self::LogicViolation(_) => "E_LOGIC_VIOLATION",
            Self::InvalidVibe(_) => "E_INVALID_VIBE",
            Self::NotFound => "E_NOT_FOUND",
            Self::StorageConflict { .. } => "E_STORAGE_CONFLICT",
            Self::InvalidPayload(_) => "E_INVALID_PAYLOAD",
            Self::Internal(_) => "E_INTERNAL",
        }
    }

    /// Wire form used by `error` events and failed replies.
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self.to_string())
    }
}

impl From<PatchError> for SessionError {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::ElementNotFound(id) => Self::ElementNotFound(id),
            PatchError::InvalidDelta(issues) => Self::InvalidDelta(issues),
            PatchError::LogicViolation(violations) => Self::LogicViolation(violations),
            PatchError::DynamicClassList(id) => {
                Self::InvalidDelta(vec![format!("{id}: class list is a computed expression")])
            }
        }
    }
}

/// Storage failures seen inside a transaction body. Transient ones start out
/// as a one-attempt conflict; the retry loop fills in the final count.
impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            Self::StorageConflict {
                attempts: 1,
                source: err,
            }
        } else {
            Self::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_app_core::storage::RecordKey;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SessionError::NotFound.code(), "E_NOT_FOUND");
        assert_eq!(SessionError::InvalidVibe("x".into()).payload().code, "E_INVALID_VIBE");
        let conflict = SessionError::from(StorageError::Conflict(RecordKey::new("p", "session")));
        assert_eq!(conflict.code(), "E_STORAGE_CONFLICT");
    }

    #[test]
    fn computed_class_lists_read_as_invalid_delta() {
        let err = SessionError::from(PatchError::DynamicClassList("c1".into()));
        assert!(matches!(err, SessionError::InvalidDelta(ref issues) if issues[0].starts_with("c1")));
    }
}
