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

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{RoundId, SessionId};

/// Business-rule rejection of a state machine command.
///
/// These are never retried: they mean the caller acted on a stale view of
/// the session, or asked for something the rules forbid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("round {round_id} has already closed")]
    RoundExpired { round_id: RoundId },

    #[error("round {round_id} does not expire until {round_end}")]
    RoundNotExpired {
        round_id: RoundId,
        round_end: DateTime<Utc>,
    },

    #[error("tenant {tenant} already has active session {session_id}")]
    AlreadyActive {
        tenant: String,
        session_id: SessionId,
    },

    #[error("session {session_id} already played its {limit} rounds")]
    RoundLimitReached { session_id: SessionId, limit: u32 },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid guess: {0}")]
    InvalidGuess(String),
}

impl CommandError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("unknown event type {0}")]
    UnknownEventType(String),

    #[error("malformed {event_type} payload: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn messages_name_the_offending_entity() {
        let id = Uuid::new_v4();
        let err = CommandError::not_found("session", id);
        assert_eq!(err.to_string(), format!("session {id} not found"));

        let err = CommandError::RoundLimitReached {
            session_id: id,
            limit: 6,
        };
        assert!(err.to_string().contains("6 rounds"));
    }
}
