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

use std::collections::{BTreeMap, HashSet};

use crate::{model::Guess, options::GameRules, scoring::normalize_word};

/// Reduces raw guesses to each user's most recent distinct words, at most
/// `round_votes_per_user` of them.
///
/// Output is grouped by user; within a user, newest first. Words compare
/// case-insensitively.
pub fn decimate(guesses: &[Guess], rules: &GameRules) -> Vec<Guess> {
    let cap = rules.round_votes_per_user as usize;

    let mut by_user: BTreeMap<&str, Vec<&Guess>> = BTreeMap::new();
    for guess in guesses {
        by_user.entry(guess.user.as_str()).or_default().push(guess);
    }

    let mut kept = Vec::with_capacity(guesses.len().min(by_user.len() * cap));
    for mut user_guesses in by_user.into_values() {
        // Stable, so equal timestamps keep submission order.
        user_guesses.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut seen = HashSet::new();
        kept.extend(
            user_guesses
                .into_iter()
                .filter(|guess| seen.insert(normalize_word(&guess.word)))
                .take(cap)
                .cloned(),
        );
    }
    kept
}
