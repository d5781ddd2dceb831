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

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use crowdle_common::{Guess, GuessId, Options, OptionsOwner, Round, RoundId, Session, SessionId};
use tokio::sync::RwLock;

use super::{GameStore, WriteOp};
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, Session>,
    rounds: HashMap<RoundId, Round>,
    guesses: HashMap<GuessId, Guess>,
    guess_order: Vec<GuessId>,
    options: HashMap<String, Options>,
}

impl Tables {
    fn check(&self, op: &WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::InsertSession(session) if self.sessions.contains_key(&session.id) => {
                Err(StoreError::conflict("session", session.id, None))
            }
            WriteOp::UpdateSession(session) => {
                match self.sessions.get(&session.id).map(|current| current.version) {
                    Some(version) if version == session.version => Ok(()),
                    _ => Err(StoreError::conflict(
                        "session",
                        session.id,
                        Some(session.version),
                    )),
                }
            }
            WriteOp::InsertRound(round) if self.rounds.contains_key(&round.id) => {
                Err(StoreError::conflict("round", round.id, None))
            }
            WriteOp::UpdateRound(round) => {
                match self.rounds.get(&round.id).map(|current| current.version) {
                    Some(version) if version == round.version => Ok(()),
                    _ => Err(StoreError::conflict("round", round.id, Some(round.version))),
                }
            }
            WriteOp::InsertGuess(guess) if self.guesses.contains_key(&guess.id) => {
                Err(StoreError::conflict("guess", guess.id, None))
            }
            WriteOp::InsertOptions(options) if self.options.contains_key(&options.owner.key()) => {
                Err(StoreError::conflict("options", options.owner.key(), None))
            }
            _ => Ok(()),
        }
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::InsertSession(mut session) => {
                session.version = 0;
                self.sessions.insert(session.id, session);
            }
            WriteOp::UpdateSession(mut session) => {
                session.version += 1;
                self.sessions.insert(session.id, session);
            }
            WriteOp::InsertRound(mut round) => {
                round.version = 0;
                self.rounds.insert(round.id, round);
            }
            WriteOp::UpdateRound(mut round) => {
                round.version += 1;
                self.rounds.insert(round.id, round);
            }
            WriteOp::InsertGuess(guess) => {
                self.guess_order.push(guess.id);
                self.guesses.insert(guess.id, guess);
            }
            WriteOp::InsertOptions(options) => {
                self.options.insert(options.owner.key(), options);
            }
        }
    }
}

fn op_key(op: &WriteOp) -> String {
    match op {
        WriteOp::InsertSession(session) | WriteOp::UpdateSession(session) => {
            format!("session#{}", session.id)
        }
        WriteOp::InsertRound(round) | WriteOp::UpdateRound(round) => format!("round#{}", round.id),
        WriteOp::InsertGuess(guess) => format!("guess#{}", guess.id),
        WriteOp::InsertOptions(options) => format!("options#{}", options.owner.key()),
    }
}

/// Process-local store for single-instance runs and tests.
#[derive(Default)]
pub struct InMemoryGameStore {
    tables: RwLock<Tables>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn active_session_for_tenant(
        &self,
        tenant: &str,
    ) -> Result<Option<Session>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|session| session.tenant == tenant && session.is_active())
            .max_by_key(|session| session.created_at)
            .cloned())
    }

    async fn active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|session| session.is_active())
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }

    async fn round(&self, id: RoundId) -> Result<Option<Round>, StoreError> {
        Ok(self.tables.read().await.rounds.get(&id).cloned())
    }

    async fn rounds_for_session(&self, session_id: SessionId) -> Result<Vec<Round>, StoreError> {
        let tables = self.tables.read().await;
        let mut rounds: Vec<Round> = tables
            .rounds
            .values()
            .filter(|round| round.session_id == session_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|round| round.created_at);
        Ok(rounds)
    }

    async fn guesses_for_round(&self, round_id: RoundId) -> Result<Vec<Guess>, StoreError> {
        let tables = self.tables.read().await;
        let mut guesses: Vec<Guess> = tables
            .guess_order
            .iter()
            .filter_map(|id| tables.guesses.get(id))
            .filter(|guess| guess.round_id == round_id)
            .cloned()
            .collect();
        // Stable: equal timestamps stay in arrival order.
        guesses.sort_by_key(|guess| guess.timestamp);
        Ok(guesses)
    }

    async fn options(&self, owner: &OptionsOwner) -> Result<Option<Options>, StoreError> {
        Ok(self.tables.read().await.options.get(&owner.key()).cloned())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        let mut touched = HashSet::new();
        for op in &ops {
            if !touched.insert(op_key(op)) {
                return Err(StoreError::conflict(op.entity(), op_key(op), None));
            }
            tables.check(op)?;
        }

        for op in ops {
            tables.apply(op);
        }
        Ok(())
    }
}
