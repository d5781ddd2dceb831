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

use crowdle_common::{EventEnvelope, EventRegistry};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    bus::Subscription,
    consumer::{ConsumerSettings, consume},
    error::{EngineError, EngineResult, TransportError},
};

/// One broadcast channel per tenant for connected realtime clients.
pub struct TenantChannels {
    channels: DashMap<String, broadcast::Sender<EventEnvelope>>,
    capacity: usize,
}

impl TenantChannels {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, tenant: &str) -> broadcast::Receiver<EventEnvelope> {
        self.channels
            .entry(tenant.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Number of clients the envelope reached.
    pub fn publish(&self, envelope: &EventEnvelope) -> usize {
        let delivered = match self.channels.get(&envelope.tenant) {
            Some(sender) => sender.send(envelope.clone()).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            self.channels
                .remove_if(&envelope.tenant, |_, sender| sender.receiver_count() == 0);
        }
        delivered
    }

    /// Drops channels nobody listens on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before - self.channels.len()
    }

    pub fn tenants(&self) -> usize {
        self.channels.len()
    }
}

/// Feeds every decodable event from `subscription` to the tenant channels.
pub async fn run_realtime_consumer(
    name: &str,
    subscription: Box<dyn Subscription<EventEnvelope>>,
    channels: &TenantChannels,
    registry: &EventRegistry,
    settings: &ConsumerSettings,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    consume(name, subscription, settings, cancel, |envelope: EventEnvelope| {
        let result = registry
            .decode(&envelope)
            .map_err(TransportError::from)
            .map(|_| {
                let clients = channels.publish(&envelope);
                debug!(
                    tenant = %envelope.tenant,
                    event_type = %envelope.event_type,
                    clients,
                    "event fanned out"
                );
            });
        async move { result.map_err(EngineError::from) }
    })
    .await
}
