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

//! Persistence contract: read methods plus an atomic batch of staged writes.
//!
//! Updates of sessions and rounds are compare-and-swap on `version`: the
//! staged entity carries the version it was loaded at, and the store writes it
//! back as `version + 1` only if nobody else got there first.

mod dynamo;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use crowdle_common::{Guess, Options, OptionsOwner, Round, RoundId, Session, SessionId};

use crate::error::StoreError;

pub use dynamo::{DynamoGameStore, DynamoTables};
pub use memory::InMemoryGameStore;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    InsertSession(Session),
    UpdateSession(Session),
    InsertRound(Round),
    UpdateRound(Round),
    InsertGuess(Guess),
    InsertOptions(Options),
}

impl WriteOp {
    pub fn entity(&self) -> &'static str {
        match self {
            Self::InsertSession(_) | Self::UpdateSession(_) => "session",
            Self::InsertRound(_) | Self::UpdateRound(_) => "round",
            Self::InsertGuess(_) => "guess",
            Self::InsertOptions(_) => "options",
        }
    }
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    async fn active_session_for_tenant(&self, tenant: &str)
    -> Result<Option<Session>, StoreError>;

    async fn active_sessions(&self) -> Result<Vec<Session>, StoreError>;

    async fn round(&self, id: RoundId) -> Result<Option<Round>, StoreError>;

    /// Oldest first.
    async fn rounds_for_session(&self, session_id: SessionId) -> Result<Vec<Round>, StoreError>;

    /// Ordered by guess timestamp.
    async fn guesses_for_round(&self, round_id: RoundId) -> Result<Vec<Guess>, StoreError>;

    async fn options(&self, owner: &OptionsOwner) -> Result<Option<Options>, StoreError>;

    /// Applies every op or none of them.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}

/// Stages writes against a store until `commit`.
///
/// Reads go straight to the store; nothing staged is visible to them.
pub struct UnitOfWork {
    store: Arc<dyn GameStore>,
    staged: Vec<WriteOp>,
}

impl UnitOfWork {
    pub fn begin(store: Arc<dyn GameStore>) -> Self {
        Self {
            store,
            staged: Vec::new(),
        }
    }

    pub fn sessions(&mut self) -> SessionRepository<'_> {
        SessionRepository { uow: self }
    }

    pub fn rounds(&mut self) -> RoundRepository<'_> {
        RoundRepository { uow: self }
    }

    pub fn guesses(&mut self) -> GuessRepository<'_> {
        GuessRepository { uow: self }
    }

    pub fn options(&mut self) -> OptionsRepository<'_> {
        OptionsRepository { uow: self }
    }

    pub fn staged(&self) -> &[WriteOp] {
        &self.staged
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        self.store.commit(self.staged).await
    }
}

pub struct SessionRepository<'a> {
    uow: &'a mut UnitOfWork,
}

impl SessionRepository<'_> {
    pub async fn get(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.uow.store.session(id).await
    }

    pub fn add(&mut self, session: Session) {
        self.uow.staged.push(WriteOp::InsertSession(session));
    }

    /// `session.version` must be the version it was read at.
    pub fn update(&mut self, session: Session) {
        self.uow.staged.push(WriteOp::UpdateSession(session));
    }
}

pub struct RoundRepository<'a> {
    uow: &'a mut UnitOfWork,
}

impl RoundRepository<'_> {
    pub async fn get(&self, id: RoundId) -> Result<Option<Round>, StoreError> {
        self.uow.store.round(id).await
    }

    pub async fn for_session(&self, session_id: SessionId) -> Result<Vec<Round>, StoreError> {
        self.uow.store.rounds_for_session(session_id).await
    }

    pub fn add(&mut self, round: Round) {
        self.uow.staged.push(WriteOp::InsertRound(round));
    }

    pub fn update(&mut self, round: Round) {
        self.uow.staged.push(WriteOp::UpdateRound(round));
    }
}

pub struct GuessRepository<'a> {
    uow: &'a mut UnitOfWork,
}

impl GuessRepository<'_> {
    pub async fn for_round(&self, round_id: RoundId) -> Result<Vec<Guess>, StoreError> {
        self.uow.store.guesses_for_round(round_id).await
    }

    pub fn add(&mut self, guess: Guess) {
        self.uow.staged.push(WriteOp::InsertGuess(guess));
    }
}

pub struct OptionsRepository<'a> {
    uow: &'a mut UnitOfWork,
}

impl OptionsRepository<'_> {
    pub async fn get(&self, owner: &OptionsOwner) -> Result<Option<Options>, StoreError> {
        self.uow.store.options(owner).await
    }

    pub fn add(&mut self, options: Options) {
        self.uow.staged.push(WriteOp::InsertOptions(options));
    }
}
