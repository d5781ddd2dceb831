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

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use crowdle_common::{CommandError, GameRules, SessionId, SystemClock};
use crowdle_engine::{
    EngineError, ErrorKind, GameEngine, RoundOutcome, SessionView, StartSession, SubmitGuess,
    Worker, WorkerAdapters,
    config::{WorkerSettings, load_default_rules},
    supervisor::spawn_shutdown_signal,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    engine: Arc<GameEngine>,
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    tenant: String,
    #[serde(default)]
    word: Option<String>,
    #[serde(default)]
    rules: Option<GameRules>,
}

#[derive(Debug, Serialize)]
struct StartSessionResponse {
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
struct GuessRequest {
    user: String,
    word: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    expected_version: Option<u64>,
}

#[derive(Debug, Serialize)]
struct GuessResponse {
    guess_id: uuid::Uuid,
}

#[derive(Debug, Default, Deserialize)]
struct EndRoundQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum EndRoundResponse {
    Extended { round_expiry: DateTime<Utc> },
    Terminated,
    Ended { guess: String, result: Vec<crowdle_common::LetterResult> },
}

impl From<RoundOutcome> for EndRoundResponse {
    fn from(outcome: RoundOutcome) -> Self {
        match outcome {
            RoundOutcome::Extended { round_expiry } => Self::Extended { round_expiry },
            RoundOutcome::Terminated => Self::Terminated,
            RoundOutcome::Ended { guess, result } => Self::Ended { guess, result },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "game_service=debug,crowdle_engine=debug,tower_http=info".to_string()
        }))
        .init();

    let settings = WorkerSettings::from_env("game-service")?;
    let adapters = WorkerAdapters::from_env(Arc::new(SystemClock)).await?;
    let worker = Worker::build(&settings, adapters, load_default_rules());
    let state = AppState {
        engine: worker.engine(),
    };

    let shutdown = CancellationToken::new();
    spawn_shutdown_signal(shutdown.clone());

    let worker_shutdown = shutdown.clone();
    let worker_task = tokio::spawn(async move {
        let result = worker.run(worker_shutdown.clone()).await;
        // A worker that gave up takes the HTTP surface down with it.
        worker_shutdown.cancel();
        result
    });

    let bind_addr = parse_bind_addr("GAME_SERVICE_BIND", "0.0.0.0:8084")?;
    info!(%bind_addr, instance_id = %settings.instance_id, "game-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    worker_task.await.context("game worker task panicked")??;
    info!("game-service stopped");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sessions", post(start_session_handler))
        .route("/v1/sessions/{session_id}", get(session_view_handler))
        .route("/v1/sessions/{session_id}/guesses", post(add_guess_handler))
        .route("/v1/sessions/{session_id}/rounds/end", post(end_round_handler))
        .route("/v1/tenants/{tenant}/session", get(tenant_session_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "game-service"}))
}

async fn start_session_handler(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<StartSessionResponse>), ApiError> {
    if let Some(active) = state.engine.find_active_session(&request.tenant).await? {
        return Err(EngineError::from(CommandError::AlreadyActive {
            tenant: request.tenant,
            session_id: active.id,
        })
        .into());
    }
    let session_id = state
        .engine
        .create_session(StartSession {
            tenant: request.tenant,
            word: request.word,
            rules: request.rules,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(StartSessionResponse { session_id })))
}

async fn add_guess_handler(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<GuessRequest>,
) -> Result<(StatusCode, Json<GuessResponse>), ApiError> {
    let guess_id = state
        .engine
        .add_guess(SubmitGuess {
            session_id,
            expected_version: request.expected_version,
            user: request.user,
            word: request.word,
            timestamp: request.timestamp.unwrap_or_else(|| state.engine.now()),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(GuessResponse { guess_id })))
}

async fn end_round_handler(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<EndRoundQuery>,
) -> Result<Json<EndRoundResponse>, ApiError> {
    let outcome = state
        .engine
        .end_active_round(session_id, query.force)
        .await?;
    Ok(Json(outcome.into()))
}

async fn session_view_handler(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.engine.session_view(session_id, None).await?))
}

async fn tenant_session_handler(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let Some(session) = state.engine.find_active_session(&tenant).await? else {
        return Err(ApiError::not_found(format!(
            "tenant {tenant} has no active session"
        )));
    };
    Ok(Json(state.engine.session_view(session.id, None).await?))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let status = match error.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Rejected => match error.as_command() {
                Some(CommandError::InvalidGuess(_) | CommandError::InvalidOptions(_)) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                _ => StatusCode::BAD_REQUEST,
            },
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdle_common::SessionState;
    use crowdle_engine::StoreError;
    use uuid::Uuid;

    fn state() -> AppState {
        let worker = Worker::build(
            &WorkerSettings {
                instance_type: "game-service".to_string(),
                instance_id: "test".to_string(),
                poll_interval: std::time::Duration::from_millis(20),
                shutdown_grace: std::time::Duration::from_millis(200),
                startup_timeout: std::time::Duration::from_secs(1),
                max_restarts: 0,
                restart_backoff: std::time::Duration::from_millis(10),
                retry_attempts: 1,
                recheck_sweep_interval: std::time::Duration::from_secs(60),
            },
            WorkerAdapters::in_memory(Arc::new(SystemClock)),
            GameRules::default(),
        );
        AppState {
            engine: worker.engine(),
        }
    }

    fn start_request(tenant: &str) -> StartSessionRequest {
        StartSessionRequest {
            tenant: tenant.to_string(),
            word: Some("CRANE".to_string()),
            rules: None,
        }
    }

    #[test]
    fn engine_error_kinds_map_to_distinct_statuses() {
        let cases = [
            (
                EngineError::from(CommandError::not_found("session", Uuid::new_v4())),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::from(CommandError::invalid_state("round is closed")),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::from(CommandError::InvalidGuess("wrong length".to_string())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::from(StoreError::conflict("session", Uuid::new_v4(), Some(2))),
                StatusCode::CONFLICT,
            ),
            (
                EngineError::from(StoreError::Unavailable("throttled".to_string())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }
    }

    #[tokio::test]
    async fn second_session_for_a_tenant_is_a_conflict() {
        let state = state();
        let (status, Json(created)) =
            start_session_handler(State(state.clone()), Json(start_request("t1")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let error = start_session_handler(State(state.clone()), Json(start_request("t1")))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::CONFLICT);
        assert!(error.message.contains(&created.session_id.to_string()));
    }

    #[tokio::test]
    async fn tenant_session_view_hides_the_word_while_active() {
        let state = state();
        start_session_handler(State(state.clone()), Json(start_request("t1")))
            .await
            .unwrap();
        add_guess_handler(
            State(state.clone()),
            Path(
                state
                    .engine
                    .find_active_session("t1")
                    .await
                    .unwrap()
                    .unwrap()
                    .id,
            ),
            Json(GuessRequest {
                user: "u1".to_string(),
                word: "crone".to_string(),
                timestamp: None,
                expected_version: None,
            }),
        )
        .await
        .unwrap();

        let Json(view) = tenant_session_handler(State(state.clone()), Path("t1".to_string()))
            .await
            .unwrap();
        assert_eq!(view.state, SessionState::Active);
        assert_eq!(view.word, None);
        assert_eq!(view.tally.len(), 1);
        assert_eq!(view.tally[0].word, "CRONE");
    }

    #[tokio::test]
    async fn forced_end_reports_the_winning_guess() {
        let state = state();
        let (_, Json(created)) =
            start_session_handler(State(state.clone()), Json(start_request("t1")))
                .await
                .unwrap();
        add_guess_handler(
            State(state.clone()),
            Path(created.session_id),
            Json(GuessRequest {
                user: "u1".to_string(),
                word: "crane".to_string(),
                timestamp: None,
                expected_version: None,
            }),
        )
        .await
        .unwrap();

        let Json(response) = end_round_handler(
            State(state.clone()),
            Path(created.session_id),
            Query(EndRoundQuery { force: true }),
        )
        .await
        .unwrap();
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["outcome"], "ended");
        assert_eq!(body["guess"], "CRANE");
    }

    #[tokio::test]
    async fn unknown_tenant_has_no_session() {
        let error = tenant_session_handler(State(state()), Path("nobody".to_string()))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }
}
