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

use crate::model::LetterResult;

/// Canonical stored form of a word: trimmed and upper-cased.
pub fn normalize_word(word: &str) -> String {
    word.trim().to_uppercase()
}

pub fn is_correct_guess(secret: &str, guess: &str) -> bool {
    normalize_word(secret) == normalize_word(guess)
}

/// One result per letter of `secret`.
///
/// A letter present elsewhere in the secret counts as misplaced every time it
/// appears; repeated letters are not consumed. Positions past the end of a
/// short guess are `Invalid`.
pub fn score_guess(secret: &str, guess: &str) -> Vec<LetterResult> {
    let secret: Vec<char> = normalize_word(secret).chars().collect();
    let guess: Vec<char> = normalize_word(guess).chars().collect();

    secret
        .iter()
        .enumerate()
        .map(|(index, expected)| match guess.get(index) {
            Some(letter) if letter == expected => LetterResult::CorrectLetterCorrectPosition,
            Some(letter) if secret.contains(letter) => LetterResult::CorrectLetterIncorrectPosition,
            _ => LetterResult::Invalid,
        })
        .collect()
}
