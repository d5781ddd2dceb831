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

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use crowdle_common::{Clock, SystemClock};
use crowdle_engine::{
    TransportError,
    bus::{KafkaEventBus, KafkaSettings},
    config::WorkerSettings,
    consumer::consume,
    retry::RetryPolicy,
    scheduler::{RecheckTimers, RoundRecheck, ScheduledRecheck},
    supervisor::{LoopContext, Supervisor, spawn_shutdown_signal},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where due rechecks go once their timer fires.
#[async_trait]
trait RecheckSink: Send + Sync {
    async fn deliver(&self, recheck: &RoundRecheck) -> Result<(), TransportError>;
}

struct KafkaRecheckSink {
    bus: KafkaEventBus,
    topic: String,
}

#[async_trait]
impl RecheckSink for KafkaRecheckSink {
    async fn deliver(&self, recheck: &RoundRecheck) -> Result<(), TransportError> {
        // Keyed by round so every recheck of one round lands on one partition.
        self.bus
            .send_json(&self.topic, &recheck.round_id.to_string(), recheck)
            .await
    }
}

/// In-process timers, at most one live per round.
#[derive(Clone)]
struct TimerQueue {
    timers: Arc<RecheckTimers>,
    sink: Arc<dyn RecheckSink>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl TimerQueue {
    fn new(
        sink: Arc<dyn RecheckSink>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            timers: Arc::new(RecheckTimers::new()),
            sink,
            clock,
            retry,
            shutdown,
        }
    }

    /// Arms (or re-arms) the timer for the recheck's round.
    fn arm(&self, scheduled: ScheduledRecheck) -> u64 {
        let ScheduledRecheck {
            recheck,
            deliver_at,
        } = scheduled;
        let generation = self.timers.arm(recheck.round_id);
        let delay = (deliver_at - self.clock.now())
            .to_std()
            .unwrap_or_default();
        debug!(
            session_id = %recheck.session_id,
            round_id = %recheck.round_id,
            generation,
            delay_ms = delay.as_millis() as u64,
            "recheck timer armed"
        );

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if !queue.timers.fire(recheck.round_id, generation) {
                return;
            }
            match queue
                .retry
                .run("deliver recheck", || queue.sink.deliver(&recheck))
                .await
            {
                Ok(()) => info!(
                    session_id = %recheck.session_id,
                    round_id = %recheck.round_id,
                    "recheck delivered"
                ),
                Err(error) => warn!(
                    session_id = %recheck.session_id,
                    round_id = %recheck.round_id,
                    error = %error,
                    "recheck dropped after retries"
                ),
            }
        });
        generation
    }

    fn armed(&self) -> usize {
        self.timers.armed()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "timer_service=debug,crowdle_engine=info".to_string()),
        )
        .init();

    let settings = WorkerSettings::from_env("timer-service")?;
    let kafka = KafkaSettings::from_env()
        .context("KAFKA_BOOTSTRAP_SERVERS must be set for timer-service")?;
    let bus = KafkaEventBus::new(kafka).context("failed to create timer-service producer")?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_signal(shutdown.clone());

    let queue = TimerQueue::new(
        Arc::new(KafkaRecheckSink {
            bus: bus.clone(),
            topic: bus.settings().recheck_due_topic(),
        }),
        Arc::new(SystemClock),
        settings.retry_policy(),
        shutdown.clone(),
    );

    let consumer = settings.consumer_settings();
    let group = settings.consumer_group();
    let mut supervisor = Supervisor::new(settings.supervisor_config());
    supervisor.add("scheduled-rechecks", move |mut context: LoopContext| {
        let bus = bus.clone();
        let queue = queue.clone();
        let consumer = consumer.clone();
        let group = group.clone();
        async move {
            let topic = bus.settings().recheck_scheduled_topic();
            let subscription = bus
                .subscribe_topic::<ScheduledRecheck>(&topic, &group)
                .with_context(|| format!("failed to subscribe to {topic}"))?;
            info!(topic = %topic, group = %group, "timer-service subscribed");
            context.ready();
            consume(
                context.name(),
                Box::new(subscription),
                &consumer,
                context.cancel_token(),
                |scheduled: ScheduledRecheck| {
                    queue.arm(scheduled);
                    debug!(armed = queue.armed(), "timer queue updated");
                    async { Ok(()) }
                },
            )
            .await?;
            Ok(())
        }
    });

    supervisor
        .run(shutdown)
        .await
        .context("timer-service loops gave up")?;
    info!("timer-service shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use crowdle_common::ManualClock;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<RoundRecheck>>,
    }

    impl RecordingSink {
        fn delivered(&self) -> Vec<RoundRecheck> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecheckSink for RecordingSink {
        async fn deliver(&self, recheck: &RoundRecheck) -> Result<(), TransportError> {
            self.delivered.lock().unwrap().push(recheck.clone());
            Ok(())
        }
    }

    fn queue(sink: Arc<RecordingSink>, clock: Arc<ManualClock>) -> TimerQueue {
        TimerQueue::new(
            sink,
            clock,
            RetryPolicy::new(1, std::time::Duration::from_millis(1), std::time::Duration::from_millis(1)),
            CancellationToken::new(),
        )
    }

    fn scheduled(round_id: Uuid, deliver_at: chrono::DateTime<Utc>) -> ScheduledRecheck {
        ScheduledRecheck {
            recheck: RoundRecheck {
                session_id: Uuid::new_v4(),
                round_id,
                tenant: "t1".to_string(),
                expiry: deliver_at,
            },
            deliver_at,
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn overdue_recheck_is_delivered_right_away() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sink = Arc::new(RecordingSink::default());
        let queue = queue(sink.clone(), clock.clone());

        let round_id = Uuid::new_v4();
        queue.arm(scheduled(round_id, clock.now() - Duration::seconds(5)));
        settle().await;

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].round_id, round_id);
        assert_eq!(queue.armed(), 0);
    }

    #[tokio::test]
    async fn rescheduling_a_round_only_delivers_the_latest_timer() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sink = Arc::new(RecordingSink::default());
        let queue = queue(sink.clone(), clock.clone());

        let round_id = Uuid::new_v4();
        let first = queue.arm(scheduled(round_id, clock.now() + Duration::milliseconds(50)));
        let second = queue.arm(scheduled(round_id, clock.now() + Duration::milliseconds(150)));
        assert!(second > first);

        settle().await;
        assert!(sink.delivered().is_empty());
        assert_eq!(queue.armed(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(queue.armed(), 0);
    }

    #[tokio::test]
    async fn shutdown_drops_pending_timers() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sink = Arc::new(RecordingSink::default());
        let queue = queue(sink.clone(), clock.clone());

        queue.arm(scheduled(Uuid::new_v4(), clock.now() + Duration::milliseconds(50)));
        queue.shutdown.cancel();
        settle().await;
        assert!(sink.delivered().is_empty());
    }
}
