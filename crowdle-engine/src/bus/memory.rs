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

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use crowdle_common::EventEnvelope;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{Delivery, EventSubscriber, EventTransport, Receipt, Subscription, lock};
use crate::error::TransportError;

struct GroupState {
    receiver: Mutex<mpsc::UnboundedReceiver<Delivery<EventEnvelope>>>,
    /// Deliveries abandoned by a dropped subscription, handed out first.
    returned: StdMutex<VecDeque<Delivery<EventEnvelope>>>,
}

struct Group {
    sender: mpsc::UnboundedSender<Delivery<EventEnvelope>>,
    state: Arc<GroupState>,
}

/// Events kept per topic for late groups, and in the cross-topic log.
pub const DEFAULT_RETAINED_EVENTS: usize = 1024;

#[derive(Default)]
struct Topic {
    /// The retained tail, oldest first, with its offsets.
    history: VecDeque<Delivery<EventEnvelope>>,
    next_offset: i64,
    groups: HashMap<String, Group>,
}

/// A process-local bus with the same group semantics as the Kafka one:
/// each group sees every event once, and a group created late starts from
/// the oldest event the topic still retains.
pub struct InMemoryEventBus {
    topics: StdMutex<HashMap<String, Topic>>,
    log: StdMutex<VecDeque<EventEnvelope>>,
    retained: usize,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_EVENTS)
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `retained` events per topic, and as many in the log.
    pub fn with_retention(retained: usize) -> Self {
        Self {
            topics: StdMutex::new(HashMap::new()),
            log: StdMutex::new(VecDeque::new()),
            retained: retained.max(1),
        }
    }

    /// The most recent sends, across all event types, in send order.
    pub fn published(&self) -> Vec<EventEnvelope> {
        lock(&self.log).iter().cloned().collect()
    }

    pub fn published_types(&self) -> Vec<String> {
        lock(&self.log)
            .iter()
            .map(|envelope| envelope.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventTransport for InMemoryEventBus {
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        let mut topics = lock(&self.topics);
        let topic = topics.entry(envelope.event_type.clone()).or_default();
        let delivery = Delivery {
            payload: envelope.clone(),
            receipt: Receipt {
                partition: 0,
                offset: topic.next_offset,
            },
        };
        topic.next_offset += 1;
        for group in topic.groups.values() {
            // A closed group has no members left to care.
            let _ = group.sender.send(delivery.clone());
        }
        push_bounded(&mut topic.history, delivery, self.retained);
        drop(topics);
        push_bounded(&mut lock(&self.log), envelope.clone(), self.retained);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for InMemoryEventBus {
    async fn subscribe(
        &self,
        event_type: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription<EventEnvelope>>, TransportError> {
        let mut topics = lock(&self.topics);
        let topic = topics.entry(event_type.to_string()).or_default();
        let state = match topic.groups.get(group) {
            Some(existing) => existing.state.clone(),
            None => {
                let (sender, receiver) = mpsc::unbounded_channel();
                for delivery in &topic.history {
                    let _ = sender.send(delivery.clone());
                }
                let state = Arc::new(GroupState {
                    receiver: Mutex::new(receiver),
                    returned: StdMutex::new(VecDeque::new()),
                });
                topic.groups.insert(
                    group.to_string(),
                    Group {
                        sender,
                        state: state.clone(),
                    },
                );
                debug!(event_type, group, replayed = topic.history.len(), "in-memory consumer group created");
                state
            }
        };
        Ok(Box::new(InMemorySubscription {
            state,
            in_flight: None,
        }))
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    if queue.len() == capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}

struct InMemorySubscription {
    state: Arc<GroupState>,
    in_flight: Option<Delivery<EventEnvelope>>,
}

#[async_trait]
impl Subscription<EventEnvelope> for InMemorySubscription {
    async fn poll(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Delivery<EventEnvelope>>, TransportError> {
        if self.in_flight.is_some() {
            return Ok(self.in_flight.clone());
        }

        let returned = lock(&self.state.returned).pop_front();
        let delivery = match returned {
            Some(delivery) => Some(delivery),
            None => {
                let mut receiver = self.state.receiver.lock().await;
                match tokio::time::timeout(timeout, receiver.recv()).await {
                    Ok(Some(delivery)) => Some(delivery),
                    Ok(None) => {
                        return Err(TransportError::Unavailable("in-memory bus closed".to_string()));
                    }
                    Err(_) => None,
                }
            }
        };
        self.in_flight = delivery.clone();
        Ok(delivery)
    }

    async fn ack(&mut self, receipt: Receipt) -> Result<(), TransportError> {
        if self.in_flight.as_ref().map(|delivery| delivery.receipt) == Some(receipt) {
            self.in_flight = None;
        }
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        if let Some(delivery) = self.in_flight.take() {
            lock(&self.state.returned).push_front(delivery);
        }
    }
}
