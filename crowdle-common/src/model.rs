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

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;
pub type RoundId = Uuid;
pub type GuessId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Inactive,
    Active,
    Success,
    Fail,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail | Self::Terminated)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    Active,
    Inactive,
    Terminated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LetterResult {
    CorrectLetterCorrectPosition,
    CorrectLetterIncorrectPosition,
    Invalid,
}

/// One game instance for a tenant.
///
/// `word` is the secret answer. It must not be handed to clients while the
/// session is still `ACTIVE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub tenant: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub word: String,
    #[serde(default)]
    pub used_letters: BTreeSet<char>,
    pub active_round_id: Option<RoundId>,
    pub active_round_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Session {
    /// A freshly started session with its first round already open.
    pub fn start(
        id: SessionId,
        tenant: impl Into<String>,
        word: impl Into<String>,
        created_at: DateTime<Utc>,
        first_round: RoundId,
        first_round_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant: tenant.into(),
            created_at,
            state: SessionState::Active,
            word: word.into(),
            used_letters: BTreeSet::new(),
            active_round_id: Some(first_round),
            active_round_end: Some(first_round_end),
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn has_open_round(&self) -> bool {
        self.active_round_id.is_some()
    }

    pub fn open_round(&mut self, round_id: RoundId, round_end: DateTime<Utc>) {
        self.active_round_id = Some(round_id);
        self.active_round_end = Some(round_end);
    }

    pub fn clear_active_round(&mut self) {
        self.active_round_id = None;
        self.active_round_end = None;
    }

    /// Folds the letters of a closed round's word into `used_letters`.
    pub fn record_letters(&mut self, word: &str) {
        self.used_letters
            .extend(word.chars().flat_map(char::to_uppercase));
    }

    /// Closing states drop the active round pointer along with the state change.
    pub fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.clear_active_round();
    }

    /// `active_round_id` set iff `active_round_end` set iff the session is active.
    ///
    /// A session between rounds is active without an open round, so only the
    /// forward direction of the last implication is checked here.
    pub fn pointers_consistent(&self) -> bool {
        let pointers_agree = self.active_round_id.is_some() == self.active_round_end.is_some();
        pointers_agree && (self.active_round_id.is_none() || self.is_active())
    }
}

/// One timed voting window within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Round {
    pub id: RoundId,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub state: RoundState,
    pub guess: Option<String>,
    pub result: Option<Vec<LetterResult>>,
    #[serde(default)]
    pub version: u64,
}

impl Round {
    pub fn open(session_id: SessionId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            created_at,
            state: RoundState::Active,
            guess: None,
            result: None,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == RoundState::Active
    }

    pub fn close(&mut self, guess: String, result: Vec<LetterResult>) {
        self.state = RoundState::Inactive;
        self.guess = Some(guess);
        self.result = Some(result);
    }

    pub fn terminate(&mut self) {
        self.state = RoundState::Terminated;
        self.guess = None;
        self.result = None;
    }
}

/// One user's word submission. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guess {
    pub id: GuessId,
    pub word: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub session_id: SessionId,
    pub round_id: RoundId,
}

impl Guess {
    pub fn new(
        session_id: SessionId,
        round_id: RoundId,
        user: impl Into<String>,
        word: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            word: word.into(),
            timestamp,
            user: user.into(),
            session_id,
            round_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> Session {
        let now = Utc::now();
        Session::start(
            Uuid::new_v4(),
            "twitch#room",
            "CRANE",
            now,
            Uuid::new_v4(),
            now + Duration::seconds(60),
        )
    }

    #[test]
    fn started_session_is_active_with_open_round() {
        let session = session();
        assert!(session.is_active());
        assert!(session.has_open_round());
        assert!(session.pointers_consistent());
        assert_eq!(session.version, 0);
    }

    #[test]
    fn finishing_a_session_clears_round_pointers() {
        let mut session = session();
        session.finish(SessionState::Terminated);
        assert!(session.state.is_terminal());
        assert_eq!(session.active_round_id, None);
        assert_eq!(session.active_round_end, None);
        assert!(session.pointers_consistent());
    }

    #[test]
    fn used_letters_are_upper_case_sorted_and_distinct() {
        let mut session = session();
        session.record_letters("crone");
        session.record_letters("CARES");
        let letters: String = session.used_letters.iter().collect();
        assert_eq!(letters, "ACENORS");
    }

    #[test]
    fn round_close_and_terminate_keep_guess_result_invariant() {
        let mut round = Round::open(Uuid::new_v4(), Utc::now());
        assert!(round.is_active());

        round.close(
            "CRONE".to_string(),
            vec![LetterResult::CorrectLetterCorrectPosition; 5],
        );
        assert_eq!(round.state, RoundState::Inactive);
        assert!(round.guess.is_some() && round.result.is_some());

        let mut starved = Round::open(Uuid::new_v4(), Utc::now());
        starved.terminate();
        assert_eq!(starved.state, RoundState::Terminated);
        assert!(starved.guess.is_none() && starved.result.is_none());
    }

    #[test]
    fn states_serialize_in_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::Terminated).unwrap(),
            "\"TERMINATED\""
        );
        assert_eq!(
            serde_json::to_string(&LetterResult::CorrectLetterIncorrectPosition).unwrap(),
            "\"CORRECT_LETTER_INCORRECT_POSITION\""
        );
    }
}
