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

use std::collections::HashMap;

use serde_json::Value;

use crate::{
    error::EventDecodeError,
    events::{
        DomainEvent, EventEnvelope, GameEvent, GuessAdded, NewRoundStarted, NewSessionStarted,
        RoundEnded, RoundExtended, RoundTerminated, SessionEndedWithFailure,
        SessionEndedWithSuccess, SessionTerminated,
    },
};

type DecodeFn = fn(Value) -> Result<GameEvent, serde_json::Error>;

fn decode_into<E: DomainEvent>(payload: Value) -> Result<GameEvent, serde_json::Error> {
    serde_json::from_value::<E>(payload).map(Into::into)
}

/// Maps wire discriminators to decoders. Filled by explicit `register` calls.
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
    order: Vec<&'static str>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full game vocabulary.
    pub fn with_game_events() -> Self {
        let mut registry = Self::new();
        registry
            .register::<NewSessionStarted>()
            .register::<NewRoundStarted>()
            .register::<GuessAdded>()
            .register::<RoundExtended>()
            .register::<RoundEnded>()
            .register::<RoundTerminated>()
            .register::<SessionTerminated>()
            .register::<SessionEndedWithSuccess>()
            .register::<SessionEndedWithFailure>();
        registry
    }

    pub fn register<E: DomainEvent>(&mut self) -> &mut Self {
        if self.decoders.insert(E::EVENT_TYPE, decode_into::<E>).is_none() {
            self.order.push(E::EVENT_TYPE);
        }
        self
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Registered event types, in registration order.
    pub fn event_types(&self) -> &[&'static str] {
        &self.order
    }

    pub fn decode(&self, envelope: &EventEnvelope) -> Result<GameEvent, EventDecodeError> {
        let decode = self
            .decoders
            .get(envelope.event_type.as_str())
            .ok_or_else(|| EventDecodeError::UnknownEventType(envelope.event_type.clone()))?;
        decode(envelope.payload.clone()).map_err(|source| EventDecodeError::Payload {
            event_type: envelope.event_type.clone(),
            source,
        })
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("event_types", &self.order)
            .finish()
    }
}
