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
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowdle_common::{Clock, EventEnvelope, GameRules, SessionState, SystemClock};
use crowdle_engine::{
    GameEngine, StartSession, SubmitGuess, TransportError, Worker, WorkerAdapters,
    bus::{InMemoryEventBus, LocalSubscription, Subscription},
    config::WorkerSettings,
    dictionary::WordListDictionary,
    scheduler::{DelayScheduler, InMemoryDelayScheduler, RoundRecheck},
    store::InMemoryGameStore,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Accepts every recheck and never delivers one, like a timer-service that
/// restarted with its queue empty.
#[derive(Default)]
struct ForgetfulScheduler {
    senders: Mutex<Vec<mpsc::UnboundedSender<RoundRecheck>>>,
}

#[async_trait]
impl DelayScheduler for ForgetfulScheduler {
    async fn schedule(
        &self,
        _recheck: RoundRecheck,
        _deliver_at: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn subscribe(
        &self,
        _group: &str,
    ) -> Result<Box<dyn Subscription<RoundRecheck>>, TransportError> {
        let (sender, subscription) = LocalSubscription::channel();
        self.senders.lock().unwrap().push(sender);
        Ok(Box::new(subscription))
    }
}

struct Running {
    engine: Arc<GameEngine>,
    bus: Arc<InMemoryEventBus>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Running {
    fn start(rules: GameRules) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let scheduler = Arc::new(InMemoryDelayScheduler::new(clock.clone()));
        Self::start_with(rules, scheduler, Duration::from_secs(60))
    }

    fn start_with(
        rules: GameRules,
        scheduler: Arc<dyn DelayScheduler>,
        recheck_sweep_interval: Duration,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let bus = Arc::new(InMemoryEventBus::new());
        let adapters = WorkerAdapters {
            store: Arc::new(InMemoryGameStore::new()),
            transport: bus.clone(),
            subscriber: bus.clone(),
            scheduler,
            dictionary: Arc::new(WordListDictionary::builtin()),
            clock,
        };
        let settings = WorkerSettings {
            instance_type: "game-service".to_string(),
            instance_id: Uuid::new_v4().simple().to_string(),
            poll_interval: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(2),
            max_restarts: 0,
            restart_backoff: Duration::from_millis(10),
            retry_attempts: 3,
            recheck_sweep_interval,
        };
        let worker = Worker::build(&settings, adapters, rules);
        let engine = worker.engine();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(worker.run(shutdown.clone()));
        Self {
            engine,
            bus,
            shutdown,
            task,
        }
    }

    async fn wait_for_event(&self, event_type: &str, within: Duration) -> EventEnvelope {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if let Some(envelope) = self
                .bus
                .published()
                .into_iter()
                .find(|envelope| envelope.event_type == event_type)
            {
                return envelope;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "{event_type} not published within {within:?}; saw {:?}",
                    self.bus.published_types()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap().unwrap();
    }
}

fn single_round_rules(initial_round_length: u32) -> GameRules {
    GameRules {
        initial_round_length,
        number_of_rounds: 1,
        minimum_answers_required: 1,
        ..GameRules::default()
    }
}

async fn play_forced_round(running: &Running, word: &str) -> Uuid {
    let session_id = running
        .engine
        .create_session(StartSession {
            tenant: "t1".to_string(),
            word: Some("CRANE".to_string()),
            rules: None,
        })
        .await
        .unwrap();
    running
        .engine
        .add_guess(SubmitGuess {
            session_id,
            expected_version: None,
            user: "u1".to_string(),
            word: word.to_string(),
            timestamp: running.engine.now(),
        })
        .await
        .unwrap();
    running.engine.end_active_round(session_id, true).await.unwrap();
    session_id
}

#[tokio::test]
async fn wrong_final_guess_ends_the_session_with_failure() {
    let running = Running::start(single_round_rules(600));
    let session_id = play_forced_round(&running, "crone").await;

    let ended = running.wait_for_event("RoundEnded", Duration::from_secs(2)).await;
    let failed = running
        .wait_for_event("SessionEndedWithFailure", Duration::from_secs(2))
        .await;
    assert_eq!(failed.session_id, session_id);
    assert!(ended.timestamp <= failed.timestamp);
    assert!(!running.bus.published_types().contains(&"SessionEndedWithSuccess".to_string()));
    assert_eq!(
        running.engine.session(session_id).await.unwrap().state,
        SessionState::Fail
    );
    running.stop().await;
}

#[tokio::test]
async fn correct_guess_ends_the_session_with_success() {
    let running = Running::start(single_round_rules(600));
    let session_id = play_forced_round(&running, "crane").await;

    let success = running
        .wait_for_event("SessionEndedWithSuccess", Duration::from_secs(2))
        .await;
    assert_eq!(success.session_id, session_id);
    assert_eq!(success.payload["word"], "CRANE");
    assert_eq!(
        running.engine.session(session_id).await.unwrap().state,
        SessionState::Success
    );
    running.stop().await;
}

#[tokio::test]
async fn expired_round_is_closed_by_the_recheck_timer() {
    let running = Running::start(single_round_rules(1));
    let session_id = running
        .engine
        .create_session(StartSession {
            tenant: "t1".to_string(),
            word: Some("CRANE".to_string()),
            rules: None,
        })
        .await
        .unwrap();
    running
        .engine
        .add_guess(SubmitGuess {
            session_id,
            expected_version: None,
            user: "u1".to_string(),
            word: "slate".to_string(),
            timestamp: running.engine.now(),
        })
        .await
        .unwrap();

    let ended = running.wait_for_event("RoundEnded", Duration::from_secs(4)).await;
    assert_eq!(ended.payload["guess"], "SLATE");
    running
        .wait_for_event("SessionEndedWithFailure", Duration::from_secs(2))
        .await;
    running.stop().await;
}

#[tokio::test]
async fn starved_session_is_extended_once_then_terminated() {
    let running = Running::start(GameRules {
        initial_round_length: 1,
        round_extension_length: 1,
        maximum_round_extensions: 1,
        minimum_answers_required: 1,
        ..GameRules::default()
    });
    let session_id = running
        .engine
        .create_session(StartSession {
            tenant: "t1".to_string(),
            word: Some("CRANE".to_string()),
            rules: None,
        })
        .await
        .unwrap();

    running.wait_for_event("RoundExtended", Duration::from_secs(4)).await;
    running
        .wait_for_event("SessionTerminated", Duration::from_secs(4))
        .await;
    let types = running.bus.published_types();
    assert_eq!(types.iter().filter(|kind| *kind == "RoundExtended").count(), 1);
    assert!(types.contains(&"RoundTerminated".to_string()));
    assert_eq!(
        running.engine.session(session_id).await.unwrap().state,
        SessionState::Terminated
    );
    running.stop().await;
}

#[tokio::test]
async fn round_whose_recheck_was_lost_is_closed_by_the_sweep() {
    let running = Running::start_with(
        single_round_rules(1),
        Arc::new(ForgetfulScheduler::default()),
        Duration::from_millis(200),
    );
    let session_id = running
        .engine
        .create_session(StartSession {
            tenant: "t1".to_string(),
            word: Some("CRANE".to_string()),
            rules: None,
        })
        .await
        .unwrap();
    running
        .engine
        .add_guess(SubmitGuess {
            session_id,
            expected_version: None,
            user: "u1".to_string(),
            word: "crone".to_string(),
            timestamp: running.engine.now(),
        })
        .await
        .unwrap();

    let ended = running.wait_for_event("RoundEnded", Duration::from_secs(4)).await;
    assert_eq!(ended.payload["session_id"], session_id.to_string());
    running
        .wait_for_event("SessionEndedWithFailure", Duration::from_secs(2))
        .await;
    running.stop().await;
}
