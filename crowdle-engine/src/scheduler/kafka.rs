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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{DelayScheduler, RoundRecheck, ScheduledRecheck};
use crate::{
    bus::{KafkaEventBus, Subscription},
    error::TransportError,
};

/// Hands timers to the timer-service over Kafka and reads them back from the
/// "due" topic once they fire.
#[derive(Clone)]
pub struct KafkaDelayScheduler {
    bus: KafkaEventBus,
}

impl KafkaDelayScheduler {
    pub fn new(bus: KafkaEventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl DelayScheduler for KafkaDelayScheduler {
    async fn schedule(
        &self,
        recheck: RoundRecheck,
        deliver_at: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        let topic = self.bus.settings().recheck_scheduled_topic();
        let key = recheck.round_id.to_string();
        debug!(round_id = %key, deliver_at = %deliver_at, topic = %topic, "scheduling recheck");
        self.bus
            .send_json(&topic, &key, &ScheduledRecheck { recheck, deliver_at })
            .await
    }

    async fn subscribe(
        &self,
        group: &str,
    ) -> Result<Box<dyn Subscription<RoundRecheck>>, TransportError> {
        let topic = self.bus.settings().recheck_due_topic();
        let subscription = self.bus.subscribe_topic::<RoundRecheck>(&topic, group)?;
        Ok(Box::new(subscription))
    }
}
