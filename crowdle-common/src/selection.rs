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

use rand::Rng;

use crate::{
    model::Guess,
    options::{GameRules, TiebreakerStrategy},
    scoring::normalize_word,
};

/// The winning word of a round and the guesses that voted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub word: String,
    pub supporting: Vec<Guess>,
}

impl Selection {
    pub fn votes(&self) -> usize {
        self.supporting.len()
    }
}

pub fn select_winner(guesses: &[Guess], rules: &GameRules) -> Option<Selection> {
    select_winner_with(guesses, rules, &mut rand::rng())
}

/// Picks the most-voted word among already decimated guesses.
///
/// Ties on vote count go to `rules.tiebreaker_strategy`. `None` only when
/// there are no guesses.
pub fn select_winner_with<R: Rng>(
    guesses: &[Guess],
    rules: &GameRules,
    rng: &mut R,
) -> Option<Selection> {
    // Vec keeps first-seen order so FIRST_IN/LAST_IN ties resolve the same way every run.
    let mut groups: Vec<Selection> = Vec::new();
    for guess in guesses {
        let word = normalize_word(&guess.word);
        match groups.iter_mut().find(|group| group.word == word) {
            Some(group) => group.supporting.push(guess.clone()),
            None => groups.push(Selection {
                word,
                supporting: vec![guess.clone()],
            }),
        }
    }

    let top = groups.iter().map(Selection::votes).max()?;
    let mut pool: Vec<Selection> = groups
        .into_iter()
        .filter(|group| group.votes() == top)
        .collect();

    if pool.len() == 1 {
        return pool.pop();
    }

    let index = match rules.tiebreaker_strategy {
        TiebreakerStrategy::FirstIn => pool
            .iter()
            .enumerate()
            .filter_map(|(index, group)| {
                group
                    .supporting
                    .iter()
                    .map(|guess| guess.timestamp)
                    .min()
                    .map(|earliest| (index, earliest))
            })
            .min_by_key(|(_, earliest)| *earliest)
            .map(|(index, _)| index),
        TiebreakerStrategy::LastIn => pool
            .iter()
            .enumerate()
            .filter_map(|(index, group)| {
                group
                    .supporting
                    .iter()
                    .map(|guess| guess.timestamp)
                    .max()
                    .map(|latest| (index, latest))
            })
            .max_by_key(|(_, latest)| *latest)
            .map(|(index, _)| index),
        TiebreakerStrategy::Random => Some(rng.random_range(0..pool.len())),
    }?;

    Some(pool.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rand::{SeedableRng, rngs::StdRng};
    use uuid::Uuid;

    fn guesses(raw: &[(&str, &str, i64)]) -> Vec<Guess> {
        let base = Utc::now();
        let session_id = Uuid::new_v4();
        let round_id = Uuid::new_v4();
        raw.iter()
            .map(|(user, word, t)| {
                Guess::new(session_id, round_id, *user, *word, base + Duration::seconds(*t))
            })
            .collect()
    }

    fn rules(strategy: TiebreakerStrategy) -> GameRules {
        GameRules {
            tiebreaker_strategy: strategy,
            ..GameRules::default()
        }
    }

    fn tie() -> Vec<Guess> {
        guesses(&[("u1", "A", 1), ("u2", "A", 2), ("u3", "B", 3), ("u4", "B", 4)])
    }

    #[test]
    fn first_in_prefers_the_earliest_supported_word() {
        let winner = select_winner(&tie(), &rules(TiebreakerStrategy::FirstIn)).unwrap();
        assert_eq!(winner.word, "A");
        assert_eq!(winner.votes(), 2);
    }

    #[test]
    fn last_in_prefers_the_latest_supported_word() {
        let winner = select_winner(&tie(), &rules(TiebreakerStrategy::LastIn)).unwrap();
        assert_eq!(winner.word, "B");
    }

    #[test]
    fn tie_order_in_input_does_not_matter() {
        let mut reversed = tie();
        reversed.reverse();
        let first = select_winner(&reversed, &rules(TiebreakerStrategy::FirstIn)).unwrap();
        let last = select_winner(&reversed, &rules(TiebreakerStrategy::LastIn)).unwrap();
        assert_eq!(first.word, "A");
        assert_eq!(last.word, "B");
    }

    #[test]
    fn single_maximum_wins_under_every_strategy() {
        let raw = guesses(&[("u1", "A", 1), ("u2", "A", 2), ("u3", "A", 3), ("u4", "B", 4)]);
        for strategy in [
            TiebreakerStrategy::Random,
            TiebreakerStrategy::FirstIn,
            TiebreakerStrategy::LastIn,
        ] {
            let winner = select_winner(&raw, &rules(strategy)).unwrap();
            assert_eq!(winner.word, "A");
            assert_eq!(winner.votes(), 3);
        }
    }

    #[test]
    fn random_only_picks_from_the_tied_pool() {
        let raw = guesses(&[
            ("u1", "A", 1),
            ("u2", "A", 2),
            ("u3", "B", 3),
            ("u4", "B", 4),
            ("u5", "C", 5),
        ]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..64 {
            let winner =
                select_winner_with(&raw, &rules(TiebreakerStrategy::Random), &mut rng).unwrap();
            seen.insert(winner.word);
        }
        assert!(!seen.contains("C"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn words_group_case_insensitively() {
        let raw = guesses(&[("u1", "crane", 1), ("u2", "CRANE", 2), ("u3", "SLATE", 3)]);
        let winner = select_winner(&raw, &rules(TiebreakerStrategy::Random)).unwrap();
        assert_eq!(winner.word, "CRANE");
        assert_eq!(winner.votes(), 2);
    }

    #[test]
    fn no_guesses_no_winner() {
        assert!(select_winner(&[], &GameRules::default()).is_none());
    }
}
