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

//! Shared vocabulary of the crowdle services: the session/round/guess data
//! model, per-session options, domain events and the pure round-closing
//! algorithms (decimation, winner selection, letter scoring).

pub mod clock;
pub mod decimate;
pub mod error;
pub mod events;
pub mod model;
pub mod options;
pub mod registry;
pub mod scoring;
pub mod selection;

use regex::Regex;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decimate::decimate;
pub use error::{CommandError, EventDecodeError};
pub use events::{
    DomainEvent, EventEnvelope, EventSource, GameEvent, GuessAdded, NewRoundStarted,
    NewSessionStarted, RoundEnded, RoundExtended, RoundTerminated, SessionEndedWithFailure,
    SessionEndedWithSuccess, SessionTerminated,
};
pub use model::{
    Guess, GuessId, LetterResult, Round, RoundId, RoundState, Session, SessionId, SessionState,
};
pub use options::{GameRules, Options, OptionsId, OptionsOwner, TiebreakerStrategy};
pub use registry::EventRegistry;
pub use scoring::{is_correct_guess, normalize_word, score_guess};
pub use selection::{Selection, select_winner, select_winner_with};

pub const DEFAULT_INITIAL_ROUND_LENGTH_SECONDS: u32 = 120;
pub const DEFAULT_ROUND_EXTENSION_WINDOW_SECONDS: u32 = 15;
pub const DEFAULT_ROUND_EXTENSION_LENGTH_SECONDS: u32 = 30;
pub const DEFAULT_MAXIMUM_ROUND_EXTENSIONS: u32 = 3;
pub const DEFAULT_MINIMUM_ANSWERS_REQUIRED: u32 = 1;
pub const DEFAULT_ROUND_VOTES_PER_USER: u32 = 1;
pub const DEFAULT_NUMBER_OF_ROUNDS: u32 = 6;
pub const DEFAULT_WORD_LENGTH: u32 = 5;
pub const DEFAULT_DICTIONARY_NAME: &str = "default";

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    match Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re
            .replace_all(input, |caps: &regex::Captures| {
                std::env::var(&caps[1]).unwrap_or_default()
            })
            .into_owned(),
        Err(_) => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_vars_replaces_known_and_blanks_unknown() {
        // PATH is set in every test environment.
        let path = std::env::var("PATH").unwrap_or_default();
        let expanded = expand_env_vars("path=${PATH};missing=${CROWDLE_SURELY_UNSET_VAR};");
        assert_eq!(expanded, format!("path={path};missing=;"));
    }

    #[test]
    fn expand_env_vars_leaves_plain_text_alone() {
        assert_eq!(expand_env_vars("no variables $HOME {x}"), "no variables $HOME {x}");
    }
}
