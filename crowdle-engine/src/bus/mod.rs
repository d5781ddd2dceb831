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

//! Event publication and consumption.
//!
//! Commands publish through [`QueuedPublisher`], which stamps each envelope
//! with this instance's identity and hands it to two places: one outbound
//! queue per event type (drained by a publish loop into the transport) and,
//! for event types this process handles itself, one local queue per type.
//! Consumers on the shared bus skip envelopes stamped with their own
//! identity, since those were already handled through the local queue.
//!
//! With several instances in one consumer group, the shared-bus copy may land
//! on a sibling, which handles the event a second time. Handlers re-read the
//! session from the store and every write is version checked, so the second
//! pass finds nothing to do or loses with a conflict.

mod kafka;
mod memory;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use crowdle_common::{Clock, EventEnvelope, EventSource};
use tokio::sync::{Mutex, mpsc};

use crate::error::TransportError;

pub use kafka::{KafkaEventBus, KafkaSettings, KafkaSubscription, topic_for_event_type};
pub use memory::InMemoryEventBus;

/// Where a delivery came from, for acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<T> {
    pub payload: T,
    pub receipt: Receipt,
}

/// A consumer-group member reading one stream.
///
/// A delivery that is never acknowledged is handed out again, either by the
/// next `poll` on this subscription or to the next subscriber of the group.
#[async_trait]
pub trait Subscription<T>: Send {
    /// `Ok(None)` when nothing arrived within `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery<T>>, TransportError>;

    async fn ack(&mut self, receipt: Receipt) -> Result<(), TransportError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), TransportError>;
}

/// The wire side of the bus.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), TransportError>;
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        event_type: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription<EventEnvelope>>, TransportError>;
}

/// Receiving half of one event type's outbound queue.
///
/// An envelope taken but not confirmed sent is kept and returned first by the
/// next `next`, so a restarted publish loop resends it.
#[derive(Clone)]
pub struct OutboundQueue {
    event_type: &'static str,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<EventEnvelope>>>,
    unsent: Arc<StdMutex<Option<EventEnvelope>>>,
}

impl OutboundQueue {
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    /// `None` once every publisher handle is gone.
    pub async fn next(&self) -> Option<EventEnvelope> {
        let unsent = lock(&self.unsent).take();
        if unsent.is_some() {
            return unsent;
        }
        let envelope = self.receiver.lock().await.recv().await?;
        *lock(&self.unsent) = Some(envelope.clone());
        Some(envelope)
    }

    pub fn mark_sent(&self) {
        lock(&self.unsent).take();
    }
}

/// An in-process queue read through the [`Subscription`] contract.
///
/// Every handle shares one receiver and one unacknowledged slot, so a
/// restarted reader picks up what a failed one left unacknowledged.
pub struct LocalSubscription<T> {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
    unacked: Arc<StdMutex<Option<Delivery<T>>>>,
    next_offset: Arc<StdMutex<i64>>,
}

impl<T> LocalSubscription<T> {
    pub fn channel() -> (mpsc::UnboundedSender<T>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            Self {
                receiver: Arc::new(Mutex::new(receiver)),
                unacked: Arc::new(StdMutex::new(None)),
                next_offset: Arc::new(StdMutex::new(0)),
            },
        )
    }

    pub fn handle(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            unacked: self.unacked.clone(),
            next_offset: self.next_offset.clone(),
        }
    }
}

#[async_trait]
impl<T> Subscription<T> for LocalSubscription<T>
where
    T: Clone + Send + 'static,
{
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery<T>>, TransportError> {
        let unacked = lock(&self.unacked).clone();
        if unacked.is_some() {
            return Ok(unacked);
        }
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(payload)) => {
                let offset = {
                    let mut next = lock(&self.next_offset);
                    let offset = *next;
                    *next += 1;
                    offset
                };
                let delivery = Delivery {
                    payload,
                    receipt: Receipt {
                        partition: 0,
                        offset,
                    },
                };
                *lock(&self.unacked) = Some(delivery.clone());
                Ok(Some(delivery))
            }
            Ok(None) => Err(TransportError::Unavailable("local queue closed".to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn ack(&mut self, receipt: Receipt) -> Result<(), TransportError> {
        let mut unacked = lock(&self.unacked);
        if unacked.as_ref().map(|delivery| delivery.receipt) == Some(receipt) {
            unacked.take();
        }
        Ok(())
    }
}

/// The queues behind a [`QueuedPublisher`], handed to the loops that drain them.
pub struct PublisherQueues {
    pub outbound: Vec<OutboundQueue>,
    local: HashMap<&'static str, LocalSubscription<EventEnvelope>>,
}

impl PublisherQueues {
    /// A fresh handle on the local queue for `event_type`. All handles share
    /// one queue and one unacknowledged slot.
    pub fn local(&self, event_type: &str) -> Option<LocalSubscription<EventEnvelope>> {
        self.local.get(event_type).map(LocalSubscription::handle)
    }

    pub fn local_event_types(&self) -> Vec<&'static str> {
        self.local.keys().copied().collect()
    }
}

/// Stamps envelopes and fans them out to per-type queues.
///
/// Never blocks: the queues are unbounded and drained by dedicated loops.
#[derive(Clone)]
pub struct QueuedPublisher {
    source: EventSource,
    clock: Arc<dyn Clock>,
    outbound: HashMap<&'static str, mpsc::UnboundedSender<EventEnvelope>>,
    local: HashMap<&'static str, mpsc::UnboundedSender<EventEnvelope>>,
}

impl QueuedPublisher {
    pub fn new(
        source: EventSource,
        clock: Arc<dyn Clock>,
        outbound_types: &[&'static str],
        local_types: &[&'static str],
    ) -> (Self, PublisherQueues) {
        let mut outbound = HashMap::new();
        let mut queues = Vec::new();
        for &event_type in outbound_types {
            let (sender, receiver) = mpsc::unbounded_channel();
            outbound.insert(event_type, sender);
            queues.push(OutboundQueue {
                event_type,
                receiver: Arc::new(Mutex::new(receiver)),
                unsent: Arc::new(StdMutex::new(None)),
            });
        }

        let mut local = HashMap::new();
        let mut subscriptions = HashMap::new();
        for &event_type in local_types {
            let (sender, subscription) = LocalSubscription::channel();
            local.insert(event_type, sender);
            subscriptions.insert(event_type, subscription);
        }

        (
            Self {
                source,
                clock,
                outbound,
                local,
            },
            PublisherQueues {
                outbound: queues,
                local: subscriptions,
            },
        )
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }
}

#[async_trait]
impl EventPublisher for QueuedPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), TransportError> {
        let outbound = self.outbound.get(envelope.event_type.as_str());
        let local = self.local.get(envelope.event_type.as_str());
        if outbound.is_none() && local.is_none() {
            return Err(TransportError::UnknownEventType(envelope.event_type));
        }

        let envelope = envelope.stamped(self.source.clone(), self.clock.now());
        if let Some(sender) = local {
            sender
                .send(envelope.clone())
                .map_err(|_| TransportError::Unavailable("local event queue closed".to_string()))?;
        }
        if let Some(sender) = outbound {
            sender
                .send(envelope)
                .map_err(|_| TransportError::Unavailable("outbound queue closed".to_string()))?;
        }
        Ok(())
    }
}

pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crowdle_common::{GameEvent, ManualClock, RoundEnded, RoundTerminated, SessionTerminated};
    use uuid::Uuid;

    fn publisher() -> (QueuedPublisher, PublisherQueues) {
        QueuedPublisher::new(
            EventSource::new("game-service", "w1"),
            Arc::new(ManualClock::new(Utc::now())),
            &["SessionTerminated", "RoundTerminated"],
            &["SessionTerminated"],
        )
    }

    fn envelope(event: GameEvent) -> EventEnvelope {
        EventEnvelope::new("t1", &event).unwrap()
    }

    #[tokio::test]
    async fn publish_stamps_and_feeds_outbound_and_local_queues() {
        let (publisher, queues) = publisher();
        let session_id = Uuid::new_v4();
        publisher
            .publish(envelope(SessionTerminated { session_id }.into()))
            .await
            .unwrap();

        let outbound = queues
            .outbound
            .iter()
            .find(|queue| queue.event_type() == "SessionTerminated")
            .unwrap();
        let sent = outbound.next().await.unwrap();
        assert!(sent.is_from(publisher.source()));
        assert!(sent.timestamp.is_some());

        let mut local = queues.local("SessionTerminated").unwrap();
        let delivery = local.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(delivery.payload.id, sent.id);
    }

    #[tokio::test]
    async fn unknown_event_types_are_rejected() {
        let (publisher, _queues) = publisher();
        let event = RoundEnded {
            session_id: Uuid::new_v4(),
            round_id: Uuid::new_v4(),
            guess: "CRANE".to_string(),
            result: Vec::new(),
            supporting_votes: 1,
            used_letters: Vec::new(),
        };
        let err = publisher.publish(envelope(event.into())).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownEventType(kind) if kind == "RoundEnded"));
    }

    #[tokio::test]
    async fn unsent_envelope_is_returned_again_after_restart() {
        let (publisher, queues) = publisher();
        publisher
            .publish(envelope(
                RoundTerminated {
                    session_id: Uuid::new_v4(),
                    round_id: Uuid::new_v4(),
                }
                .into(),
            ))
            .await
            .unwrap();

        let queue = queues
            .outbound
            .iter()
            .find(|queue| queue.event_type() == "RoundTerminated")
            .unwrap();
        let first = queue.next().await.unwrap();
        // A loop died before confirming the send.
        let again = queue.clone().next().await.unwrap();
        assert_eq!(first.id, again.id);
        queue.mark_sent();
    }

    #[tokio::test]
    async fn unacked_local_delivery_is_redelivered() {
        let (publisher, queues) = publisher();
        publisher
            .publish(envelope(
                SessionTerminated {
                    session_id: Uuid::new_v4(),
                }
                .into(),
            ))
            .await
            .unwrap();

        let mut first = queues.local("SessionTerminated").unwrap();
        let delivery = first.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        drop(first);

        let mut second = queues.local("SessionTerminated").unwrap();
        let redelivered = second.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(redelivered, delivery);

        second.ack(redelivered.receipt).await.unwrap();
        assert!(second.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }
}
