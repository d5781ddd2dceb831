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

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use crowdle_common::{DomainEvent, EventEnvelope};
use tracing::debug;

use crate::error::{EngineResult, TransportError};

type HandlerFuture = Pin<Box<dyn Future<Output = EngineResult<()>> + Send>>;
type Handler = Arc<dyn Fn(EventEnvelope) -> HandlerFuture + Send + Sync>;

/// Subscriber functions per event type, registered explicitly at startup.
///
/// Handlers of one type run in registration order; the first failure stops
/// the rest, and the whole delivery is retried or dropped by the consumer.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Vec<(&'static str, Handler)>>,
    order: Vec<&'static str>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `E`. It receives the envelope's tenant and the
    /// decoded payload.
    pub fn on<E, F, Fut>(&mut self, name: &'static str, handler: F) -> &mut Self
    where
        E: DomainEvent,
        F: Fn(String, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |envelope: EventEnvelope| -> HandlerFuture {
            match envelope.decode_as::<E>() {
                Ok(event) => Box::pin(handler(envelope.tenant, event)),
                Err(error) => {
                    let error = TransportError::from(error);
                    Box::pin(async move { Err(error.into()) })
                }
            }
        });
        let entry = self.handlers.entry(E::EVENT_TYPE).or_default();
        if entry.is_empty() {
            self.order.push(E::EVENT_TYPE);
        }
        entry.push((name, handler));
        self
    }

    /// Event types with at least one handler, in registration order.
    pub fn event_types(&self) -> &[&'static str] {
        &self.order
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub async fn dispatch(&self, envelope: &EventEnvelope) -> EngineResult<()> {
        let Some(handlers) = self.handlers.get(envelope.event_type.as_str()) else {
            return Err(TransportError::UnknownEventType(envelope.event_type.clone()).into());
        };
        for (name, handler) in handlers {
            debug!(
                handler = name,
                event_type = %envelope.event_type,
                session_id = %envelope.session_id,
                "dispatching event"
            );
            handler(envelope.clone()).await?;
        }
        Ok(())
    }
}
