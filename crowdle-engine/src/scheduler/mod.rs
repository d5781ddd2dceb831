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

//! "Look at this round again at time T."

mod kafka;
mod memory;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowdle_common::{RoundId, SessionId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{bus::Subscription, error::TransportError};

pub use kafka::KafkaDelayScheduler;
pub use memory::InMemoryDelayScheduler;

/// Payload of a delayed recheck. Carries enough to log and route; the
/// decision itself is always re-derived from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundRecheck {
    pub session_id: SessionId,
    pub round_id: RoundId,
    pub tenant: String,
    pub expiry: DateTime<Utc>,
}

/// What travels to the timer-service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledRecheck {
    pub recheck: RoundRecheck,
    pub deliver_at: DateTime<Utc>,
}

#[async_trait]
pub trait DelayScheduler: Send + Sync {
    /// `deliver_at` in the past means "as soon as possible".
    async fn schedule(
        &self,
        recheck: RoundRecheck,
        deliver_at: DateTime<Utc>,
    ) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        group: &str,
    ) -> Result<Box<dyn Subscription<RoundRecheck>>, TransportError>;
}

/// One live timer per round. Re-arming a round bumps its generation, so the
/// earlier timer finds itself stale when it wakes.
#[derive(Debug, Default)]
pub struct RecheckTimers {
    current: DashMap<RoundId, u64>,
    next_generation: AtomicU64,
}

impl RecheckTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, round_id: RoundId) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.current.insert(round_id, generation);
        generation
    }

    pub fn is_current(&self, round_id: RoundId, generation: u64) -> bool {
        self.current
            .get(&round_id)
            .is_some_and(|current| *current == generation)
    }

    /// Consumes the timer if it is still the live one for its round.
    pub fn fire(&self, round_id: RoundId, generation: u64) -> bool {
        self.current
            .remove_if(&round_id, |_, current| *current == generation)
            .is_some()
    }

    pub fn armed(&self) -> usize {
        self.current.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn rearming_supersedes_the_older_timer() {
        let timers = RecheckTimers::new();
        let round = Uuid::new_v4();

        let first = timers.arm(round);
        let second = timers.arm(round);
        assert!(!timers.is_current(round, first));
        assert!(timers.is_current(round, second));

        assert!(!timers.fire(round, first));
        assert_eq!(timers.armed(), 1);
        assert!(timers.fire(round, second));
        assert_eq!(timers.armed(), 0);
        assert!(!timers.fire(round, second));
    }

    #[test]
    fn rounds_do_not_interfere() {
        let timers = RecheckTimers::new();
        let a = timers.arm(Uuid::new_v4());
        let b_round = Uuid::new_v4();
        let b = timers.arm(b_round);
        assert_ne!(a, b);
        assert!(timers.fire(b_round, b));
        assert_eq!(timers.armed(), 1);
    }
}
