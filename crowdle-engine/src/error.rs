// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crowdle_common::{CommandError, EventDecodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A staged write lost an optimistic concurrency race. `expected_version`
    /// is `None` for inserts of an id that already exists.
    #[error("{entity} {id} was modified concurrently (expected version {expected_version:?})")]
    Conflict {
        entity: &'static str,
        id: String,
        expected_version: Option<u64>,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt {entity} record {id}: {message}")]
    Corrupt {
        entity: &'static str,
        id: String,
        message: String,
    },
}

impl StoreError {
    pub fn conflict(entity: &'static str, id: impl ToString, expected_version: Option<u64>) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
            expected_version,
        }
    }

    pub fn corrupt(entity: &'static str, id: impl ToString, message: impl ToString) -> Self {
        Self::Corrupt {
            entity,
            id: id.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("unknown event type {0}")]
    UnknownEventType(String),
}

impl From<EventDecodeError> for TransportError {
    fn from(error: EventDecodeError) -> Self {
        match error {
            EventDecodeError::UnknownEventType(kind) => Self::UnknownEventType(kind),
            EventDecodeError::Payload { .. } => Self::Decode(error.to_string()),
        }
    }
}

/// How a caller outside the engine should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Rejected,
    Conflict,
    Unavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("dictionary: {0}")]
    Dictionary(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Command(CommandError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Command(CommandError::AlreadyActive { .. }) => ErrorKind::Conflict,
            Self::Command(_) | Self::Dictionary(_) => ErrorKind::Rejected,
            Self::Store(StoreError::Conflict { .. }) => ErrorKind::Conflict,
            Self::Store(StoreError::Unavailable(_)) | Self::Transport(TransportError::Unavailable(_)) => {
                ErrorKind::Unavailable
            }
            Self::Store(StoreError::Corrupt { .. }) | Self::Transport(_) => ErrorKind::Internal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }

    pub fn as_command(&self) -> Option<&CommandError> {
        match self {
            Self::Command(error) => Some(error),
            _ => None,
        }
    }
}

/// Errors that may go away if the same operation is tried again.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl Retryable for TransportError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl Retryable for EngineError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Store(error) => error.is_transient(),
            Self::Transport(error) => error.is_transient(),
            Self::Command(_) | Self::Dictionary(_) => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn kinds_separate_not_found_conflict_and_unavailable() {
        let not_found: EngineError = CommandError::not_found("session", Uuid::new_v4()).into();
        let rejected: EngineError = CommandError::invalid_state("session is not active").into();
        let conflict: EngineError = StoreError::conflict("session", Uuid::new_v4(), Some(3)).into();
        let down: EngineError = TransportError::Unavailable("broker gone".to_string()).into();

        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(rejected.kind(), ErrorKind::Rejected);
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert_eq!(down.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn only_unavailability_is_transient() {
        assert!(EngineError::from(StoreError::Unavailable("timeout".into())).is_transient());
        assert!(!EngineError::from(StoreError::conflict("round", "r1", Some(1))).is_transient());
        assert!(!EngineError::from(CommandError::invalid_state("closed")).is_transient());
        assert!(!EngineError::from(TransportError::Decode("bad json".into())).is_transient());
    }
}
