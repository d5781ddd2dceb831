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

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    DEFAULT_DICTIONARY_NAME, DEFAULT_INITIAL_ROUND_LENGTH_SECONDS,
    DEFAULT_MAXIMUM_ROUND_EXTENSIONS, DEFAULT_MINIMUM_ANSWERS_REQUIRED, DEFAULT_NUMBER_OF_ROUNDS,
    DEFAULT_ROUND_EXTENSION_LENGTH_SECONDS, DEFAULT_ROUND_EXTENSION_WINDOW_SECONDS,
    DEFAULT_ROUND_VOTES_PER_USER, DEFAULT_WORD_LENGTH, error::CommandError, model::SessionId,
};

pub type OptionsId = Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TiebreakerStrategy {
    #[default]
    Random,
    FirstIn,
    LastIn,
}

/// Whether an options row is a tenant default or a session's private snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionsOwner {
    Tenant(String),
    Session(SessionId),
}

impl OptionsOwner {
    /// Storage key for the owner, e.g. `tenant#twitch#room`.
    pub fn key(&self) -> String {
        match self {
            Self::Tenant(tenant) => format!("tenant#{tenant}"),
            Self::Session(session_id) => format!("session#{session_id}"),
        }
    }
}

/// The tunable rules of a game. Lengths are whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GameRules {
    pub initial_round_length: u32,
    pub round_extension_window: u32,
    pub round_extension_length: u32,
    pub maximum_round_extensions: u32,
    pub minimum_answers_required: u32,
    pub round_votes_per_user: u32,
    pub tiebreaker_strategy: TiebreakerStrategy,
    pub number_of_rounds: u32,
    pub word_length: u32,
    pub allow_guesses_after_round_end: bool,
    pub dictionary_name: String,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            initial_round_length: DEFAULT_INITIAL_ROUND_LENGTH_SECONDS,
            round_extension_window: DEFAULT_ROUND_EXTENSION_WINDOW_SECONDS,
            round_extension_length: DEFAULT_ROUND_EXTENSION_LENGTH_SECONDS,
            maximum_round_extensions: DEFAULT_MAXIMUM_ROUND_EXTENSIONS,
            minimum_answers_required: DEFAULT_MINIMUM_ANSWERS_REQUIRED,
            round_votes_per_user: DEFAULT_ROUND_VOTES_PER_USER,
            tiebreaker_strategy: TiebreakerStrategy::default(),
            number_of_rounds: DEFAULT_NUMBER_OF_ROUNDS,
            word_length: DEFAULT_WORD_LENGTH,
            allow_guesses_after_round_end: false,
            dictionary_name: DEFAULT_DICTIONARY_NAME.to_string(),
        }
    }
}

impl GameRules {
    pub fn initial_round_duration(&self) -> Duration {
        Duration::seconds(i64::from(self.initial_round_length))
    }

    pub fn extension_duration(&self) -> Duration {
        Duration::seconds(i64::from(self.round_extension_length))
    }

    /// How many extensions a round created at `round_created_at` has had by `now`.
    ///
    /// Whole seconds, floored, never negative. Always zero when extensions are
    /// zero-length.
    pub fn extensions_so_far(&self, round_created_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        if self.round_extension_length == 0 {
            return 0;
        }
        let overtime = (now - round_created_at).num_seconds() - i64::from(self.initial_round_length);
        if overtime <= 0 {
            return 0;
        }
        let extensions = overtime / i64::from(self.round_extension_length);
        u32::try_from(extensions).unwrap_or(u32::MAX)
    }

    /// Whether a round still short of answers may be extended once more.
    pub fn may_extend(&self, round_created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.round_extension_length > 0
            && self.extensions_so_far(round_created_at, now) < self.maximum_round_extensions
    }

    pub fn validate(&self) -> Result<(), CommandError> {
        if self.initial_round_length == 0 {
            return Err(CommandError::InvalidOptions(
                "initial_round_length must be positive".to_string(),
            ));
        }
        if self.round_votes_per_user == 0 {
            return Err(CommandError::InvalidOptions(
                "round_votes_per_user must be at least 1".to_string(),
            ));
        }
        if self.number_of_rounds == 0 {
            return Err(CommandError::InvalidOptions(
                "number_of_rounds must be at least 1".to_string(),
            ));
        }
        if self.word_length == 0 {
            return Err(CommandError::InvalidOptions(
                "word_length must be at least 1".to_string(),
            ));
        }
        if self.dictionary_name.trim().is_empty() {
            return Err(CommandError::InvalidOptions(
                "dictionary_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A persisted options row. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Options {
    pub id: OptionsId,
    pub owner: OptionsOwner,
    pub created_at: DateTime<Utc>,
    pub rules: GameRules,
}

impl Options {
    pub fn for_tenant(tenant: impl Into<String>, rules: GameRules, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: OptionsOwner::Tenant(tenant.into()),
            created_at: now,
            rules,
        }
    }

    /// A private copy owned by one session, with a fresh id.
    pub fn snapshot_for_session(
        session_id: SessionId,
        rules: GameRules,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: OptionsOwner::Session(session_id),
            created_at: now,
            rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(initial: u32, extension: u32, max: u32) -> GameRules {
        GameRules {
            initial_round_length: initial,
            round_extension_length: extension,
            maximum_round_extensions: max,
            ..GameRules::default()
        }
    }

    #[test]
    fn extensions_so_far_counts_whole_elapsed_extensions() {
        let rules = rules(60, 30, 2);
        let created = Utc::now();

        assert_eq!(rules.extensions_so_far(created, created), 0);
        assert_eq!(rules.extensions_so_far(created, created + Duration::seconds(60)), 0);
        assert_eq!(rules.extensions_so_far(created, created + Duration::seconds(89)), 0);
        assert_eq!(rules.extensions_so_far(created, created + Duration::seconds(90)), 1);
        assert_eq!(rules.extensions_so_far(created, created + Duration::seconds(120)), 2);

        assert!(rules.may_extend(created, created + Duration::seconds(60)));
        assert!(rules.may_extend(created, created + Duration::seconds(90)));
        assert!(!rules.may_extend(created, created + Duration::seconds(120)));
    }

    #[test]
    fn zero_length_extension_disables_extending() {
        let rules = rules(60, 0, 5);
        let created = Utc::now();
        assert_eq!(rules.extensions_so_far(created, created + Duration::seconds(600)), 0);
        assert!(!rules.may_extend(created, created + Duration::seconds(60)));
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let parsed: GameRules =
            serde_yaml::from_str("number_of_rounds: 1\ntiebreaker_strategy: FIRST_IN\n").unwrap();
        assert_eq!(parsed.number_of_rounds, 1);
        assert_eq!(parsed.tiebreaker_strategy, TiebreakerStrategy::FirstIn);
        assert_eq!(parsed.word_length, DEFAULT_WORD_LENGTH);
        assert_eq!(parsed.dictionary_name, DEFAULT_DICTIONARY_NAME);
    }

    #[test]
    fn validate_rejects_zero_votes_per_user() {
        let mut rules = GameRules::default();
        assert!(rules.validate().is_ok());
        rules.round_votes_per_user = 0;
        assert!(matches!(rules.validate(), Err(CommandError::InvalidOptions(_))));
    }

    #[test]
    fn session_snapshot_is_owned_by_the_session() {
        let session_id = Uuid::new_v4();
        let tenant = Options::for_tenant("t1", GameRules::default(), Utc::now());
        let snapshot = Options::snapshot_for_session(session_id, tenant.rules.clone(), Utc::now());
        assert_ne!(snapshot.id, tenant.id);
        assert_eq!(snapshot.owner, OptionsOwner::Session(session_id));
        assert_eq!(snapshot.owner.key(), format!("session#{session_id}"));
        assert_eq!(tenant.owner.key(), "tenant#t1");
    }
}
