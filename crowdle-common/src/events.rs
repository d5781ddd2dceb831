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

//! Domain events and the envelope they travel in.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    error::EventDecodeError,
    model::{GuessId, LetterResult, RoundId, SessionId},
};

/// Implemented by every concrete event payload.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Into<GameEvent> + Clone + Send + Sync + 'static
{
    /// Discriminator carried in `EventEnvelope::event_type`.
    const EVENT_TYPE: &'static str;

    fn session_id(&self) -> SessionId;

    fn from_game_event(event: GameEvent) -> Option<Self>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSessionStarted {
    pub session_id: SessionId,
    pub round_id: RoundId,
    pub word_length: u32,
    pub number_of_rounds: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRoundStarted {
    pub session_id: SessionId,
    pub round_id: RoundId,
    pub round_expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuessAdded {
    pub session_id: SessionId,
    pub round_id: RoundId,
    pub guess_id: GuessId,
    pub user: String,
    pub word: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundExtended {
    pub session_id: SessionId,
    pub round_id: RoundId,
    pub round_expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEnded {
    pub session_id: SessionId,
    pub round_id: RoundId,
    pub guess: String,
    pub result: Vec<LetterResult>,
    pub supporting_votes: u32,
    #[serde(default)]
    pub used_letters: Vec<char>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundTerminated {
    pub session_id: SessionId,
    pub round_id: RoundId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTerminated {
    pub session_id: SessionId,
}

/// The secret word is only published once the session is over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEndedWithSuccess {
    pub session_id: SessionId,
    pub word: String,
    pub rounds_played: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEndedWithFailure {
    pub session_id: SessionId,
    pub word: String,
    pub rounds_played: u32,
}

macro_rules! game_events {
    ($($name:ident),+ $(,)?) => {
        /// Every event the game emits, as one closed set.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum GameEvent {
            $($name($name),)+
        }

        impl GameEvent {
            /// Event types in registration order.
            pub const ALL_TYPES: &'static [&'static str] = &[$(stringify!($name)),+];

            pub fn event_type(&self) -> &'static str {
                match self {
                    $(Self::$name(_) => <$name as DomainEvent>::EVENT_TYPE,)+
                }
            }

            pub fn session_id(&self) -> SessionId {
                match self {
                    $(Self::$name(event) => event.session_id,)+
                }
            }

            pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
                match self {
                    $(Self::$name(event) => serde_json::to_value(event),)+
                }
            }
        }

        $(
            impl DomainEvent for $name {
                const EVENT_TYPE: &'static str = stringify!($name);

                fn session_id(&self) -> SessionId {
                    self.session_id
                }

                fn from_game_event(event: GameEvent) -> Option<Self> {
                    match event {
                        GameEvent::$name(event) => Some(event),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }

            impl From<$name> for GameEvent {
                fn from(event: $name) -> Self {
                    GameEvent::$name(event)
                }
            }
        )+
    };
}

game_events!(
    NewSessionStarted,
    NewRoundStarted,
    GuessAdded,
    RoundExtended,
    RoundEnded,
    RoundTerminated,
    SessionTerminated,
    SessionEndedWithSuccess,
    SessionEndedWithFailure,
);

/// Identity of the process instance that emitted an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventSource {
    pub source_type: String,
    pub source_id: String,
}

impl EventSource {
    pub fn new(source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_type, self.source_id)
    }
}

/// What actually goes over the wire.
///
/// `source` and `timestamp` stay empty until the publisher hands the envelope
/// to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub event_type: String,
    pub tenant: String,
    pub session_id: SessionId,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(tenant: impl Into<String>, event: &GameEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            tenant: tenant.into(),
            session_id: event.session_id(),
            source: None,
            timestamp: None,
            payload: event.to_payload()?,
        })
    }

    pub fn stamped(mut self, source: EventSource, timestamp: DateTime<Utc>) -> Self {
        self.source = Some(source);
        self.timestamp = Some(timestamp);
        self
    }

    pub fn is_from(&self, source: &EventSource) -> bool {
        self.source.as_ref() == Some(source)
    }

    /// Decodes the payload as one concrete event type.
    pub fn decode_as<E: DomainEvent>(&self) -> Result<E, EventDecodeError> {
        if self.event_type != E::EVENT_TYPE {
            return Err(EventDecodeError::UnknownEventType(self.event_type.clone()));
        }
        serde_json::from_value(self.payload.clone()).map_err(|source| EventDecodeError::Payload {
            event_type: self.event_type.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_discriminator_and_session() {
        let session_id = Uuid::new_v4();
        let event = GameEvent::from(SessionTerminated { session_id });
        let envelope = EventEnvelope::new("t1", &event).unwrap();

        assert_eq!(envelope.event_type, "SessionTerminated");
        assert_eq!(envelope.session_id, session_id);
        assert!(envelope.source.is_none());
        assert!(envelope.timestamp.is_none());
        assert_eq!(envelope.payload["session_id"], session_id.to_string());
    }

    #[test]
    fn stamped_envelope_recognises_its_source() {
        let me = EventSource::new("game-service", "worker-1");
        let other = EventSource::new("game-service", "worker-2");
        let envelope = EventEnvelope::new(
            "t1",
            &SessionTerminated {
                session_id: Uuid::new_v4(),
            }
            .into(),
        )
        .unwrap()
        .stamped(me.clone(), Utc::now());

        assert!(envelope.is_from(&me));
        assert!(!envelope.is_from(&other));
        assert_eq!(me.to_string(), "game-service#worker-1");
    }

    #[test]
    fn decode_as_rejects_other_event_types() {
        let envelope = EventEnvelope::new(
            "t1",
            &RoundTerminated {
                session_id: Uuid::new_v4(),
                round_id: Uuid::new_v4(),
            }
            .into(),
        )
        .unwrap();

        assert!(envelope.decode_as::<RoundTerminated>().is_ok());
        assert!(matches!(
            envelope.decode_as::<SessionTerminated>(),
            Err(EventDecodeError::UnknownEventType(_))
        ));
    }

    #[test]
    fn every_event_type_is_listed_once() {
        assert_eq!(GameEvent::ALL_TYPES.len(), 9);
        assert!(GameEvent::ALL_TYPES.contains(&RoundEnded::EVENT_TYPE));
    }
}
