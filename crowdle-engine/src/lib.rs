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

//! The crowdle game engine: the round/session state machine, the
//! orchestration that drives it from events and timers, and the storage,
//! bus and scheduler adapters it runs against.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod dictionary;
pub mod error;
pub mod handlers;
pub mod machine;
pub mod orchestrator;
pub mod realtime;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{EngineError, EngineResult, ErrorKind, StoreError, TransportError};
pub use machine::{GameEngine, RoundOutcome, SessionView, StartSession, SubmitGuess};
pub use orchestrator::Orchestrator;
pub use worker::{Worker, WorkerAdapters};
