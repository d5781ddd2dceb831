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

//! Turns "time has passed" and "a round ended" into state machine commands.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use crowdle_common::{
    NewRoundStarted, RoundEnded, RoundExtended, RoundId, SessionId, is_correct_guess,
};
use tracing::{debug, info, warn};

use crate::{
    error::{EngineResult, Retryable},
    handlers::HandlerRegistry,
    machine::GameEngine,
    scheduler::{DelayScheduler, RoundRecheck},
};

pub struct Orchestrator {
    engine: Arc<GameEngine>,
    scheduler: Arc<dyn DelayScheduler>,
}

impl Orchestrator {
    pub fn new(engine: Arc<GameEngine>, scheduler: Arc<dyn DelayScheduler>) -> Self {
        Self { engine, scheduler }
    }

    /// Wires the orchestrator's reactions into `handlers`.
    pub fn register(self: &Arc<Self>, handlers: &mut HandlerRegistry) {
        let orchestrator = self.clone();
        handlers.on::<NewRoundStarted, _, _>("schedule-round-recheck", move |tenant, event| {
            let orchestrator = orchestrator.clone();
            async move { orchestrator.on_new_round_started(&tenant, event).await }
        });
        let orchestrator = self.clone();
        handlers.on::<RoundExtended, _, _>("reschedule-round-recheck", move |tenant, event| {
            let orchestrator = orchestrator.clone();
            async move { orchestrator.on_round_extended(&tenant, event).await }
        });
        let orchestrator = self.clone();
        handlers.on::<RoundEnded, _, _>("advance-session", move |_, event| {
            let orchestrator = orchestrator.clone();
            async move { orchestrator.on_round_ended(event).await }
        });
    }

    pub async fn on_new_round_started(&self, tenant: &str, event: NewRoundStarted) -> EngineResult<()> {
        self.schedule(tenant, event.session_id, event.round_id, event.round_expiry)
            .await
    }

    pub async fn on_round_extended(&self, tenant: &str, event: RoundExtended) -> EngineResult<()> {
        self.schedule(tenant, event.session_id, event.round_id, event.round_expiry)
            .await
    }

    /// Decides the session's fate from what the store says now, not from the
    /// event payload.
    pub async fn on_round_ended(&self, event: RoundEnded) -> EngineResult<()> {
        let session = self.engine.session(event.session_id).await?;
        if !session.is_active() || session.has_open_round() {
            debug!(
                session_id = %session.id,
                round_id = %event.round_id,
                state = ?session.state,
                "session already moved past this round"
            );
            return Ok(());
        }

        let round = self.engine.round(event.round_id).await?;
        let rules = self.engine.session_rules(session.id).await?;
        if round
            .guess
            .as_deref()
            .is_some_and(|guess| is_correct_guess(&session.word, guess))
        {
            return self.engine.end_session_with_success(session.id).await;
        }

        let played = self.engine.rounds(session.id).await?.len();
        if played >= rules.number_of_rounds as usize {
            return self.engine.end_session_with_failure(session.id).await;
        }

        self.engine.create_new_round(session.id).await.map(|_| ())
    }

    pub async fn on_recheck(&self, recheck: RoundRecheck) -> EngineResult<()> {
        let session = self.engine.session(recheck.session_id).await?;
        if session.active_round_id != Some(recheck.round_id) {
            debug!(
                session_id = %recheck.session_id,
                round_id = %recheck.round_id,
                "recheck for a round that is no longer active"
            );
            return Ok(());
        }
        let now = self.engine.now();
        if let Some(round_end) = session.active_round_end.filter(|round_end| *round_end > now) {
            if recheck.expiry < round_end {
                // Extended since this recheck was scheduled; a later one is armed.
                debug!(
                    session_id = %recheck.session_id,
                    round_id = %recheck.round_id,
                    round_end = %round_end,
                    "recheck superseded by an extension"
                );
                return Ok(());
            }
            // The live timer fired ahead of this clock. Nothing else will close
            // the round, so arm it again.
            warn!(
                session_id = %recheck.session_id,
                round_id = %recheck.round_id,
                round_end = %round_end,
                early_ms = (round_end - now).num_milliseconds(),
                "recheck arrived before the round deadline, re-arming"
            );
            return self
                .schedule(&session.tenant, session.id, recheck.round_id, round_end)
                .await;
        }

        let outcome = self.engine.end_active_round(recheck.session_id, false).await?;
        debug!(
            session_id = %recheck.session_id,
            round_id = %recheck.round_id,
            outcome = ?outcome,
            "recheck handled"
        );
        Ok(())
    }

    /// Re-arms a recheck for every open round. Run on each start, since timers
    /// may have been lost while the process or the broker was down.
    pub async fn initialize(&self) -> EngineResult<usize> {
        let mut scheduled = 0;
        for session in self.engine.active_sessions().await? {
            let (Some(round_id), Some(round_end)) = (session.active_round_id, session.active_round_end)
            else {
                continue;
            };
            self.schedule(&session.tenant, session.id, round_id, round_end)
                .await?;
            scheduled += 1;
        }
        info!(scheduled, "rechecks re-armed for open rounds");
        Ok(scheduled)
    }

    /// Runs the close decision for every open round more than `grace` past
    /// its deadline. Rechecks that were lost in the timer queue, or dropped
    /// after failed deliveries, end up here.
    pub async fn sweep_overdue(&self, grace: Duration) -> EngineResult<usize> {
        let now = self.engine.now();
        let mut swept = 0;
        for session in self.engine.active_sessions().await? {
            let (Some(round_id), Some(round_end)) = (session.active_round_id, session.active_round_end)
            else {
                continue;
            };
            if round_end
                .checked_add_signed(grace)
                .is_none_or(|due| due > now)
            {
                continue;
            }
            let recheck = RoundRecheck {
                session_id: session.id,
                round_id,
                tenant: session.tenant,
                expiry: round_end,
            };
            match self.on_recheck(recheck).await {
                Ok(()) => swept += 1,
                Err(error) if error.is_transient() => return Err(error),
                Err(error) => warn!(
                    session_id = %session.id,
                    round_id = %round_id,
                    error = %error,
                    "overdue round left as is"
                ),
            }
        }
        if swept > 0 {
            info!(swept, "overdue rounds swept");
        }
        Ok(swept)
    }

    async fn schedule(
        &self,
        tenant: &str,
        session_id: SessionId,
        round_id: RoundId,
        expiry: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.scheduler
            .schedule(
                RoundRecheck {
                    session_id,
                    round_id,
                    tenant: tenant.to_string(),
                    expiry,
                },
                expiry,
            )
            .await?;
        debug!(session_id = %session_id, round_id = %round_id, expiry = %expiry, "recheck scheduled");
        Ok(())
    }
}
