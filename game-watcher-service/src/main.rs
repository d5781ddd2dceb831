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

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use crowdle_common::{EventEnvelope, EventRegistry};
use crowdle_engine::{
    bus::{EventSubscriber, KafkaEventBus, KafkaSettings},
    config::WorkerSettings,
    realtime::{TenantChannels, run_realtime_consumer},
    supervisor::{LoopContext, Supervisor, spawn_shutdown_signal},
};
use tokio::{
    sync::broadcast,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct AppState {
    channels: Arc<TenantChannels>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "game_watcher_service=debug,crowdle_engine=info,tower_http=info".to_string()
        }))
        .init();

    let settings = WorkerSettings::from_env("game-watcher-service")?;
    let kafka = KafkaSettings::from_env()
        .context("KAFKA_BOOTSTRAP_SERVERS must be set for game-watcher-service")?;
    let subscriber: Arc<dyn EventSubscriber> = Arc::new(
        KafkaEventBus::new(kafka).context("failed to create game-watcher-service Kafka client")?,
    );
    let channel_capacity = std::env::var("WATCHER_CHANNEL_CAPACITY")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(256)
        .max(1);
    let channels = Arc::new(TenantChannels::new(channel_capacity));
    let supervisor = build_supervisor(&settings, subscriber, channels.clone());

    let shutdown = CancellationToken::new();
    spawn_shutdown_signal(shutdown.clone());

    let loops_shutdown = shutdown.clone();
    let loops = tokio::spawn(async move {
        let result = supervisor.run(loops_shutdown.clone()).await;
        loops_shutdown.cancel();
        result
    });

    let bind_addr = parse_bind_addr("WATCHER_SERVICE_BIND", "0.0.0.0:8083")?;
    info!(%bind_addr, instance_id = %settings.instance_id, "game-watcher-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, build_router(AppState { channels }))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    loops
        .await
        .context("watcher loops panicked")?
        .context("watcher loops gave up")?;
    info!("game-watcher-service stopped");
    Ok(())
}

/// Every instance reads every event, so each one gets its own consumer group.
fn watcher_group(settings: &WorkerSettings) -> String {
    format!("game-watcher-{}", settings.instance_id)
}

fn build_supervisor(
    settings: &WorkerSettings,
    subscriber: Arc<dyn EventSubscriber>,
    channels: Arc<TenantChannels>,
) -> Supervisor {
    let registry = Arc::new(EventRegistry::with_game_events());
    let consumer = settings.consumer_settings();
    let group = watcher_group(settings);
    let mut supervisor = Supervisor::new(settings.supervisor_config());

    for event_type in registry.event_types().iter().copied() {
        let subscriber = subscriber.clone();
        let channels = channels.clone();
        let registry = registry.clone();
        let consumer = consumer.clone();
        let group = group.clone();
        supervisor.add(format!("realtime:{event_type}"), move |mut context: LoopContext| {
            let subscriber = subscriber.clone();
            let channels = channels.clone();
            let registry = registry.clone();
            let consumer = consumer.clone();
            let group = group.clone();
            async move {
                let subscription = subscriber
                    .subscribe(event_type, &group)
                    .await
                    .with_context(|| format!("failed to subscribe to {event_type}"))?;
                context.ready();
                run_realtime_consumer(
                    context.name(),
                    subscription,
                    &channels,
                    &registry,
                    &consumer,
                    context.cancel_token(),
                )
                .await?;
                Ok(())
            }
        });
    }

    supervisor.add("prune-channels", move |mut context: LoopContext| {
        let channels = channels.clone();
        async move {
            context.ready();
            let mut ticker = interval(Duration::from_secs(30));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = context.cancel_token().cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = channels.prune();
                        if removed > 0 {
                            debug!(removed, tenants = channels.tenants(), "pruned idle tenant channels");
                        }
                    }
                }
            }
            Ok(())
        }
    });

    supervisor
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/tenants/{tenant}/stream", get(stream_handler))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "game-watcher-service"}))
}

async fn stream_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Path(tenant): Path<String>,
) -> impl IntoResponse {
    // Subscribe before the upgrade so nothing published meanwhile is missed.
    let events = state.channels.subscribe(&tenant);
    ws.on_upgrade(move |socket| handle_socket(socket, tenant, events))
}

async fn handle_socket(
    mut socket: WebSocket,
    tenant: String,
    mut events: broadcast::Receiver<EventEnvelope>,
) {
    let connected = serde_json::json!({
        "event_type": "CONNECTED",
        "tenant": tenant,
        "connected_at": Utc::now(),
    })
    .to_string();
    if send_ws_text(&mut socket, &tenant, "CONNECTED", connected)
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(tenant = %tenant, error = ?error, "websocket receive failed");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(envelope) => {
                    let payload = match serde_json::to_string(&envelope) {
                        Ok(payload) => payload,
                        Err(error) => {
                            warn!(tenant = %tenant, error = %error, "failed to encode event for websocket");
                            continue;
                        }
                    };
                    if send_ws_text(&mut socket, &tenant, &envelope.event_type, payload)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(tenant = %tenant, skipped, "watcher stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!(tenant = %tenant, "watcher stream closed");
}

async fn send_ws_text(
    socket: &mut WebSocket,
    tenant: &str,
    event_type: &str,
    payload: String,
) -> Result<(), ()> {
    debug!(tenant, event_type, "pushing websocket event");
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|error| {
            warn!(
                tenant,
                event_type,
                error = ?error,
                "failed to push websocket event"
            );
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdle_common::{GameEvent, SessionTerminated};
    use crowdle_engine::bus::{EventTransport, InMemoryEventBus};
    use uuid::Uuid;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            instance_type: "game-watcher-service".to_string(),
            instance_id: "w1".to_string(),
            poll_interval: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(200),
            startup_timeout: Duration::from_secs(1),
            max_restarts: 0,
            restart_backoff: Duration::from_millis(10),
            retry_attempts: 1,
            recheck_sweep_interval: Duration::from_secs(60),
        }
    }

    fn terminated(tenant: &str) -> EventEnvelope {
        EventEnvelope::new(
            tenant,
            &GameEvent::from(SessionTerminated {
                session_id: Uuid::new_v4(),
            }),
        )
        .unwrap()
    }

    #[test]
    fn each_instance_reads_with_its_own_group() {
        let mut other = settings();
        other.instance_id = "w2".to_string();
        assert_eq!(watcher_group(&settings()), "game-watcher-w1");
        assert_ne!(watcher_group(&settings()), watcher_group(&other));
    }

    #[tokio::test]
    async fn bus_events_reach_the_tenant_stream() {
        let bus = Arc::new(InMemoryEventBus::new());
        let channels = Arc::new(TenantChannels::new(16));
        let supervisor = build_supervisor(&settings(), bus.clone(), channels.clone());
        let shutdown = CancellationToken::new();
        let loops = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { supervisor.run(shutdown).await }
        });

        let mut t1 = channels.subscribe("t1");
        let event = terminated("t1");
        bus.send(&event).await.unwrap();
        bus.send(&terminated("t2")).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), t1.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, event);

        shutdown.cancel();
        loops.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let payload = health().await.0;
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["service"], "game-watcher-service");
    }
}
