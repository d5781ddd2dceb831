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

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowdle_common::Clock;
use tokio::sync::mpsc;
use tracing::debug;

use super::{DelayScheduler, RecheckTimers, RoundRecheck};
use crate::{
    bus::{LocalSubscription, Subscription},
    error::TransportError,
};

/// Timers as spawned sleeps. Pending timers die with the process; the
/// orchestrator's startup pass re-arms them.
pub struct InMemoryDelayScheduler {
    clock: Arc<dyn Clock>,
    timers: Arc<RecheckTimers>,
    due: mpsc::UnboundedSender<RoundRecheck>,
    subscription: LocalSubscription<RoundRecheck>,
}

impl InMemoryDelayScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (due, subscription) = LocalSubscription::channel();
        Self {
            clock,
            timers: Arc::new(RecheckTimers::new()),
            due,
            subscription,
        }
    }

    pub fn armed(&self) -> usize {
        self.timers.armed()
    }
}

#[async_trait]
impl DelayScheduler for InMemoryDelayScheduler {
    async fn schedule(
        &self,
        recheck: RoundRecheck,
        deliver_at: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        let delay = (deliver_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let generation = self.timers.arm(recheck.round_id);
        debug!(
            session_id = %recheck.session_id,
            round_id = %recheck.round_id,
            generation,
            delay_ms = delay.as_millis() as u64,
            "recheck timer armed"
        );

        let timers = self.timers.clone();
        let due = self.due.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if timers.fire(recheck.round_id, generation) {
                // The receiving side only goes away at shutdown.
                let _ = due.send(recheck);
            }
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        _group: &str,
    ) -> Result<Box<dyn Subscription<RoundRecheck>>, TransportError> {
        Ok(Box::new(self.subscription.handle()))
    }
}
