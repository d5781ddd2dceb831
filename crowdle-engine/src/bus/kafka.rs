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

use std::{marker::PhantomData, time::Duration};

use async_trait::async_trait;
use crowdle_common::EventEnvelope;
use rdkafka::{
    Message, Offset, TopicPartitionList,
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    producer::{FutureProducer, FutureRecord},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use super::{Delivery, EventSubscriber, EventTransport, Receipt, Subscription};
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub topic_prefix: String,
}

impl KafkaSettings {
    /// `None` when `KAFKA_BOOTSTRAP_SERVERS` is unset.
    pub fn from_env() -> Option<Self> {
        let bootstrap_servers = std::env::var("KAFKA_BOOTSTRAP_SERVERS")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;
        Some(Self {
            bootstrap_servers,
            topic_prefix: std::env::var("CROWDLE_TOPIC_PREFIX")
                .ok()
                .unwrap_or_else(|| "crowdle.events".to_string()),
        })
    }

    pub fn event_topic(&self, event_type: &str) -> String {
        topic_for_event_type(&self.topic_prefix, event_type)
    }

    /// Where game-service asks for a recheck to be delivered later.
    pub fn recheck_scheduled_topic(&self) -> String {
        format!("{}.recheck_scheduled.v1", self.topic_prefix)
    }

    /// Where the timer-service delivers rechecks once due.
    pub fn recheck_due_topic(&self) -> String {
        format!("{}.recheck_due.v1", self.topic_prefix)
    }

    pub fn consumer(&self, group: &str) -> Result<StreamConsumer, TransportError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("topic.metadata.refresh.interval.ms", "1000")
            .set("topic.metadata.refresh.fast.interval.ms", "250")
            .create()
            .map_err(|error| {
                TransportError::Unavailable(format!("failed to create Kafka consumer: {error}"))
            })
    }

    pub fn producer(&self) -> Result<FutureProducer, TransportError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|error| {
                TransportError::Unavailable(format!("failed to create Kafka producer: {error}"))
            })
    }
}

/// `crowdle.events` + `RoundEnded` -> `crowdle.events.round_ended.v1`.
pub fn topic_for_event_type(prefix: &str, event_type: &str) -> String {
    let mut snake = String::with_capacity(event_type.len() + 4);
    for (index, ch) in event_type.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    format!("{prefix}.{snake}.v1")
}

/// Kafka transport: one topic per event type, keyed by tenant so a tenant's
/// events stay on one partition.
#[derive(Clone)]
pub struct KafkaEventBus {
    settings: KafkaSettings,
    producer: FutureProducer,
}

impl KafkaEventBus {
    pub fn new(settings: KafkaSettings) -> Result<Self, TransportError> {
        let producer = settings.producer()?;
        Ok(Self { settings, producer })
    }

    pub fn settings(&self) -> &KafkaSettings {
        &self.settings
    }

    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(), TransportError> {
        let payload =
            serde_json::to_string(value).map_err(|error| TransportError::Encode(error.to_string()))?;
        self.producer
            .send(
                FutureRecord::to(topic).key(key).payload(&payload),
                Duration::from_secs(5),
            )
            .await
            .map_err(|(error, _)| TransportError::Unavailable(format!("Kafka publish failed: {error:?}")))?;
        Ok(())
    }

    pub fn subscribe_topic<T>(&self, topic: &str, group: &str) -> Result<KafkaSubscription<T>, TransportError> {
        KafkaSubscription::new(&self.settings, topic, group)
    }
}

#[async_trait]
impl EventTransport for KafkaEventBus {
    async fn send(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        let topic = self.settings.event_topic(&envelope.event_type);
        self.send_json(&topic, &envelope.tenant, envelope).await
    }
}

#[async_trait]
impl EventSubscriber for KafkaEventBus {
    async fn subscribe(
        &self,
        event_type: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription<EventEnvelope>>, TransportError> {
        let topic = self.settings.event_topic(event_type);
        let subscription: KafkaSubscription<EventEnvelope> = self.subscribe_topic(&topic, group)?;
        Ok(Box::new(subscription))
    }
}

/// One consumer-group member on one topic.
///
/// Offsets are committed only on `ack`; anything polled but not acked comes
/// back once the subscription is recreated.
pub struct KafkaSubscription<T> {
    consumer: StreamConsumer,
    topic: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> KafkaSubscription<T> {
    pub fn new(settings: &KafkaSettings, topic: &str, group: &str) -> Result<Self, TransportError> {
        let consumer = settings.consumer(group)?;
        consumer.subscribe(&[topic]).map_err(|error| {
            TransportError::Unavailable(format!("failed to subscribe to {topic}: {error}"))
        })?;
        info!(topic = %topic, group = %group, "Kafka consumer subscribed");
        Ok(Self {
            consumer,
            topic: topic.to_string(),
            _payload: PhantomData,
        })
    }
}

#[async_trait]
impl<T> Subscription<T> for KafkaSubscription<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery<T>>, TransportError> {
        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(error)) => {
                return Err(TransportError::Unavailable(format!(
                    "Kafka receive failed: {error}"
                )));
            }
            Ok(Ok(message)) => message,
        };

        let receipt = Receipt {
            partition: message.partition(),
            offset: message.offset(),
        };
        let decoded = match message.payload() {
            Some(payload) => serde_json::from_slice::<T>(payload).map_err(|error| error.to_string()),
            None => Err("empty payload".to_string()),
        };

        match decoded {
            Ok(payload) => Ok(Some(Delivery { payload, receipt })),
            Err(reason) => {
                warn!(
                    topic = %self.topic,
                    offset = receipt.offset,
                    reason = %reason,
                    "skipping malformed Kafka payload"
                );
                if let Err(error) = self.consumer.commit_message(&message, CommitMode::Async) {
                    warn!(?error, "failed to commit malformed payload message");
                }
                Ok(None)
            }
        }
    }

    async fn ack(&mut self, receipt: Receipt) -> Result<(), TransportError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, receipt.partition, Offset::Offset(receipt.offset + 1))
            .map_err(|error| TransportError::Unavailable(format!("invalid commit offset: {error}")))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|error| TransportError::Unavailable(format!("Kafka commit failed: {error}")))
    }
}
