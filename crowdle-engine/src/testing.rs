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

//! Hand-written doubles shared by the unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowdle_common::{DomainEvent, EventEnvelope};

use crate::{
    bus::{EventPublisher, EventTransport, LocalSubscription, Subscription},
    error::TransportError,
    scheduler::{DelayScheduler, RoundRecheck},
};

#[derive(Default)]
pub struct RecordingPublisher {
    envelopes: Mutex<Vec<EventEnvelope>>,
}

impl RecordingPublisher {
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.envelopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn types(&self) -> Vec<String> {
        self.envelopes()
            .into_iter()
            .map(|envelope| envelope.event_type)
            .collect()
    }

    pub fn last<E: DomainEvent>(&self) -> Option<E> {
        self.envelopes()
            .iter()
            .rev()
            .find_map(|envelope| envelope.decode_as::<E>().ok())
    }

    pub fn clear(&self) {
        self.envelopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), TransportError> {
        self.envelopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope);
        Ok(())
    }
}

/// Fails the first `failures` sends as unavailable, then records.
#[derive(Default)]
pub struct FailingTransport {
    failures: Mutex<u32>,
    sent: Mutex<Vec<EventEnvelope>>,
}

impl FailingTransport {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<EventEnvelope> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventTransport for FailingTransport {
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        {
            let mut failures = self
                .failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::Unavailable("broker down".to_string()));
            }
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope.clone());
        Ok(())
    }
}

/// Remembers what was scheduled; nothing is ever delivered.
#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<(RoundRecheck, DateTime<Utc>)>>,
}

impl RecordingScheduler {
    pub fn scheduled(&self) -> Vec<(RoundRecheck, DateTime<Utc>)> {
        self.scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DelayScheduler for RecordingScheduler {
    async fn schedule(
        &self,
        recheck: RoundRecheck,
        deliver_at: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        self.scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((recheck, deliver_at));
        Ok(())
    }

    async fn subscribe(
        &self,
        _group: &str,
    ) -> Result<Box<dyn Subscription<RoundRecheck>>, TransportError> {
        let (_sender, subscription) = LocalSubscription::channel();
        Ok(Box::new(subscription))
    }
}
