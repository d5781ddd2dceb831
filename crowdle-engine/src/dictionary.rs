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

use std::collections::HashMap;

use async_trait::async_trait;
use crowdle_common::{GameRules, normalize_word};
use rand::seq::IndexedRandom;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    config::load_yaml_config,
    error::{EngineError, EngineResult},
};

/// Source of secret words.
#[async_trait]
pub trait DictionaryService: Send + Sync {
    /// A word of `rules.word_length` letters from `rules.dictionary_name`.
    async fn random_word(&self, rules: &GameRules) -> EngineResult<String>;
}

const BUILTIN_WORDS: &[&str] = &[
    "ABOUT", "ACTOR", "ADOPT", "AGENT", "ALARM", "ALBUM", "ANGLE", "APPLE", "ARENA", "AWARD",
    "BADGE", "BEACH", "BLAZE", "BOARD", "BRAIN", "BREAD", "BRICK", "CABIN", "CANDY", "CHAIR",
    "CHARM", "CHEST", "CLOCK", "CLOUD", "CRANE", "CROWD", "DANCE", "DREAM", "EAGLE", "FIELD",
    "FLAME", "FROST", "GHOST", "GLOBE", "GRAPE", "HEART", "HONEY", "HOUSE", "JUICE", "KNIFE",
    "LEMON", "LIGHT", "MAPLE", "MOUSE", "NIGHT", "OCEAN", "PIANO", "PLANT", "QUEEN", "RIVER",
    "ROBOT", "SHEEP", "SHINE", "SMILE", "SNAKE", "STONE", "STORM", "TIGER", "TOAST", "TRAIN",
    "VOICE", "WATER", "WHALE", "WORLD", "YOUTH", "ZEBRA",
];

#[derive(Debug, Deserialize)]
struct DictionaryConfigFile {
    #[serde(default)]
    dictionaries: HashMap<String, Vec<String>>,
}

/// Named in-memory word lists.
#[derive(Debug, Clone)]
pub struct WordListDictionary {
    lists: HashMap<String, Vec<String>>,
}

impl WordListDictionary {
    /// Only the built-in `default` list.
    pub fn builtin() -> Self {
        let mut lists = HashMap::new();
        lists.insert(
            crowdle_common::DEFAULT_DICTIONARY_NAME.to_string(),
            BUILTIN_WORDS.iter().map(|word| word.to_string()).collect(),
        );
        Self { lists }
    }

    /// Word lists from YAML of the form `dictionaries: { name: [WORD, ...] }`.
    /// Lists found there replace the built-in list of the same name.
    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        let parsed = serde_yaml::from_str::<DictionaryConfigFile>(raw)?;
        Ok(Self::builtin().with_lists(parsed.dictionaries))
    }

    /// Built-in lists plus whatever `DICTIONARY_CONFIG_PATH` points at.
    pub fn load() -> Self {
        let Some(parsed) = load_yaml_config::<DictionaryConfigFile>("DICTIONARY_CONFIG_PATH") else {
            return Self::builtin();
        };
        let dictionary = Self::builtin().with_lists(parsed.dictionaries);
        info!(dictionaries = ?dictionary.names(), "loaded dictionary config");
        dictionary
    }

    fn with_lists(mut self, lists: HashMap<String, Vec<String>>) -> Self {
        for (name, words) in lists {
            let words: Vec<String> = words
                .iter()
                .map(|word| normalize_word(word))
                .filter(|word| !word.is_empty() && word.chars().all(|ch| ch.is_alphabetic()))
                .collect();
            if words.is_empty() {
                warn!(dictionary = %name, "ignoring dictionary without usable words");
                continue;
            }
            self.lists.insert(name, words);
        }
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.lists.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl DictionaryService for WordListDictionary {
    async fn random_word(&self, rules: &GameRules) -> EngineResult<String> {
        let Some(words) = self.lists.get(&rules.dictionary_name) else {
            return Err(EngineError::Dictionary(format!(
                "unknown dictionary {}",
                rules.dictionary_name
            )));
        };
        let length = rules.word_length as usize;
        let candidates: Vec<&String> = words
            .iter()
            .filter(|word| word.chars().count() == length)
            .collect();
        candidates
            .choose(&mut rand::rng())
            .map(|word| (*word).clone())
            .ok_or_else(|| {
                EngineError::Dictionary(format!(
                    "dictionary {} has no {length}-letter words",
                    rules.dictionary_name
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtin_words_match_the_requested_length() {
        let dictionary = WordListDictionary::builtin();
        let word = dictionary.random_word(&GameRules::default()).await.unwrap();
        assert_eq!(word.chars().count(), 5);
        assert_eq!(word, word.to_uppercase());
    }

    #[tokio::test]
    async fn missing_length_or_dictionary_is_an_error() {
        let dictionary = WordListDictionary::builtin();
        let rules = GameRules {
            word_length: 9,
            ..GameRules::default()
        };
        assert!(matches!(
            dictionary.random_word(&rules).await,
            Err(EngineError::Dictionary(_))
        ));

        let rules = GameRules {
            dictionary_name: "klingon".to_string(),
            ..GameRules::default()
        };
        assert!(matches!(
            dictionary.random_word(&rules).await,
            Err(EngineError::Dictionary(_))
        ));
    }

    #[tokio::test]
    async fn yaml_lists_are_normalised_and_named() {
        let dictionary = WordListDictionary::from_yaml_str(
            "dictionaries:\n  animals:\n    - ' otter '\n    - seal\n    - 'not a word'\n  empty: []\n",
        )
        .unwrap();
        assert_eq!(dictionary.names(), vec!["animals", "default"]);

        let rules = GameRules {
            dictionary_name: "animals".to_string(),
            word_length: 5,
            ..GameRules::default()
        };
        assert_eq!(dictionary.random_word(&rules).await.unwrap(), "OTTER");
    }
}
