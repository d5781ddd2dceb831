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

//! Assembles a game worker: engine, orchestrator and the loops that feed them.

use std::sync::Arc;

use anyhow::Context;
use crowdle_common::{
    Clock, DomainEvent, EventRegistry, GameRules, NewRoundStarted, RoundEnded, RoundExtended,
};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::{
    bus::{
        EventSubscriber, EventTransport, InMemoryEventBus, KafkaEventBus, KafkaSettings,
        QueuedPublisher,
    },
    config::WorkerSettings,
    consumer::{run_event_consumer, run_publish_loop, run_recheck_consumer},
    dictionary::{DictionaryService, WordListDictionary},
    handlers::HandlerRegistry,
    machine::GameEngine,
    orchestrator::Orchestrator,
    scheduler::{DelayScheduler, InMemoryDelayScheduler, KafkaDelayScheduler},
    store::{DynamoGameStore, GameStore, InMemoryGameStore},
    supervisor::{LoopContext, Supervisor},
};

/// Event types the orchestrator reacts to.
pub const ORCHESTRATED_EVENT_TYPES: [&str; 3] = [
    NewRoundStarted::EVENT_TYPE,
    RoundExtended::EVENT_TYPE,
    RoundEnded::EVENT_TYPE,
];

/// The external collaborators a worker runs against.
#[derive(Clone)]
pub struct WorkerAdapters {
    pub store: Arc<dyn GameStore>,
    pub transport: Arc<dyn EventTransport>,
    pub subscriber: Arc<dyn EventSubscriber>,
    pub scheduler: Arc<dyn DelayScheduler>,
    pub dictionary: Arc<dyn DictionaryService>,
    pub clock: Arc<dyn Clock>,
}

impl WorkerAdapters {
    /// Single-process mode: nothing leaves this process.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        Self {
            store: Arc::new(InMemoryGameStore::new()),
            transport: bus.clone(),
            subscriber: bus,
            scheduler: Arc::new(InMemoryDelayScheduler::new(clock.clone())),
            dictionary: Arc::new(WordListDictionary::builtin()),
            clock,
        }
    }

    /// DynamoDB when configured, Kafka when configured, in-memory otherwise.
    pub async fn from_env(clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let mut adapters = Self::in_memory(clock);
        adapters.dictionary = Arc::new(WordListDictionary::load());

        match DynamoGameStore::from_env().await {
            Some(store) => adapters.store = Arc::new(store),
            None => info!("DYNAMODB_ENDPOINT/AWS_REGION not set, using in-memory game store"),
        }

        match KafkaSettings::from_env() {
            Some(settings) => {
                let bus = KafkaEventBus::new(settings).context("failed to create Kafka event bus")?;
                info!(
                    topic_prefix = %bus.settings().topic_prefix,
                    "Kafka event bus and delay scheduler enabled"
                );
                adapters.scheduler = Arc::new(KafkaDelayScheduler::new(bus.clone()));
                let bus = Arc::new(bus);
                adapters.transport = bus.clone();
                adapters.subscriber = bus;
            }
            None => info!("KAFKA_BOOTSTRAP_SERVERS not set, using in-memory event bus"),
        }
        Ok(adapters)
    }
}

pub struct Worker {
    engine: Arc<GameEngine>,
    orchestrator: Arc<Orchestrator>,
    supervisor: Supervisor,
}

impl Worker {
    pub fn build(settings: &WorkerSettings, adapters: WorkerAdapters, default_rules: GameRules) -> Self {
        let registry = EventRegistry::with_game_events();
        let source = settings.source();
        let (publisher, queues) = QueuedPublisher::new(
            source.clone(),
            adapters.clock.clone(),
            registry.event_types(),
            &ORCHESTRATED_EVENT_TYPES,
        );

        let engine = Arc::new(GameEngine::new(
            adapters.store.clone(),
            Arc::new(publisher),
            adapters.dictionary.clone(),
            adapters.clock.clone(),
            default_rules,
        ));
        let orchestrator = Arc::new(Orchestrator::new(engine.clone(), adapters.scheduler.clone()));
        let mut handlers = HandlerRegistry::new();
        orchestrator.register(&mut handlers);
        let handlers = Arc::new(handlers);

        let consumer = settings.consumer_settings();
        let group = settings.consumer_group();
        let mut supervisor = Supervisor::new(settings.supervisor_config());

        for queue in queues.outbound.iter().cloned() {
            let transport = adapters.transport.clone();
            let retry = settings.retry_policy();
            supervisor.add(
                format!("publish:{}", queue.event_type()),
                move |mut context: LoopContext| {
                    let queue = queue.clone();
                    let transport = transport.clone();
                    let retry = retry.clone();
                    async move {
                        context.ready();
                        run_publish_loop(queue, transport, &retry, context.cancel_token()).await?;
                        Ok(())
                    }
                },
            );
        }

        for event_type in handlers.event_types().iter().copied() {
            // Events this instance published itself arrive here first.
            if let Some(local) = queues.local(event_type) {
                let handlers = handlers.clone();
                let consumer = consumer.clone();
                supervisor.add(format!("local:{event_type}"), move |mut context: LoopContext| {
                    let subscription = Box::new(local.handle());
                    let handlers = handlers.clone();
                    let consumer = consumer.clone();
                    async move {
                        context.ready();
                        let name = context.name().to_string();
                        run_event_consumer(
                            &name,
                            subscription,
                            handlers,
                            None,
                            &consumer,
                            context.cancel_token(),
                        )
                        .await?;
                        Ok(())
                    }
                });
            }

            // Everyone else's, from the shared bus.
            let subscriber = adapters.subscriber.clone();
            let handlers = handlers.clone();
            let consumer = consumer.clone();
            let group = group.clone();
            let source = source.clone();
            supervisor.add(format!("bus:{event_type}"), move |mut context: LoopContext| {
                let subscriber = subscriber.clone();
                let handlers = handlers.clone();
                let consumer = consumer.clone();
                let group = group.clone();
                let source = source.clone();
                async move {
                    let subscription = subscriber
                        .subscribe(event_type, &group)
                        .await
                        .with_context(|| format!("failed to subscribe to {event_type}"))?;
                    context.ready();
                    let name = context.name().to_string();
                    run_event_consumer(
                        &name,
                        subscription,
                        handlers,
                        Some(source),
                        &consumer,
                        context.cancel_token(),
                    )
                    .await?;
                    Ok(())
                }
            });
        }

        {
            let scheduler = adapters.scheduler.clone();
            let orchestrator = orchestrator.clone();
            supervisor.add("rechecks", move |mut context: LoopContext| {
                let scheduler = scheduler.clone();
                let orchestrator = orchestrator.clone();
                let consumer = consumer.clone();
                let group = group.clone();
                async move {
                    let subscription = scheduler
                        .subscribe(&group)
                        .await
                        .context("failed to subscribe to due rechecks")?;
                    // Timers may have been lost while the loops were down.
                    orchestrator
                        .initialize()
                        .await
                        .context("failed to re-arm rechecks")?;
                    context.ready();
                    run_recheck_consumer(subscription, orchestrator, &consumer, context.cancel_token())
                        .await?;
                    Ok(())
                }
            });
        }

        {
            let orchestrator = orchestrator.clone();
            let period = settings
                .recheck_sweep_interval
                .max(std::time::Duration::from_millis(1));
            // A round only counts as lost once its recheck is a full period late.
            let grace = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::MAX);
            supervisor.add("recheck-sweep", move |mut context: LoopContext| {
                let orchestrator = orchestrator.clone();
                async move {
                    context.ready();
                    let cancel = context.cancel_token();
                    let mut ticker =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = ticker.tick() => {}
                        }
                        if let Err(error) = orchestrator.sweep_overdue(grace).await {
                            warn!(error = %error, "recheck sweep failed, trying again next tick");
                        }
                    }
                }
            });
        }

        info!(
            source = %source,
            loops = ?supervisor.loop_names(),
            "game worker assembled"
        );
        Self {
            engine,
            orchestrator,
            supervisor,
        }
    }

    pub fn engine(&self) -> Arc<GameEngine> {
        self.engine.clone()
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    /// Runs until `shutdown` is cancelled or the restart budget is spent.
    pub async fn run(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        self.supervisor
            .run(shutdown)
            .await
            .context("game worker loops gave up")
    }
}
