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

//! The session/round state machine.
//!
//! Every command reloads what it needs from the store, re-validates its
//! preconditions against that state, stages its writes in one unit of work
//! and publishes events only after the commit succeeded. Re-running a
//! command on state that has already moved on is a [`CommandError`], never a
//! second transition.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use crowdle_common::{
    Clock, CommandError, EventEnvelope, GameEvent, GameRules, Guess, GuessAdded, GuessId,
    LetterResult, NewRoundStarted, NewSessionStarted, Options, OptionsOwner, Round, RoundEnded,
    RoundExtended, RoundId, RoundState, RoundTerminated, Session, SessionEndedWithFailure,
    SessionEndedWithSuccess, SessionId, SessionState, SessionTerminated, decimate, normalize_word,
    score_guess, select_winner,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    bus::EventPublisher,
    dictionary::DictionaryService,
    error::{EngineError, EngineResult, StoreError, TransportError},
    store::{GameStore, UnitOfWork},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSession {
    pub tenant: String,
    #[serde(default)]
    pub word: Option<String>,
    #[serde(default)]
    pub rules: Option<GameRules>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitGuess {
    pub session_id: SessionId,
    /// Session version the caller last saw, if it wants the check.
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub user: String,
    pub word: String,
    pub timestamp: DateTime<Utc>,
}

/// What a close-round attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Extended { round_expiry: DateTime<Utc> },
    Terminated,
    Ended {
        guess: String,
        result: Vec<LetterResult>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WordTally {
    pub word: String,
    pub votes: u32,
}

/// Client-safe read model of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub tenant: String,
    pub state: SessionState,
    /// Only filled in once the session is over.
    pub word: Option<String>,
    pub word_length: u32,
    pub number_of_rounds: u32,
    pub used_letters: Vec<char>,
    pub active_round_id: Option<RoundId>,
    pub active_round_end: Option<DateTime<Utc>>,
    pub rounds: Vec<Round>,
    pub tally: Vec<WordTally>,
    pub version: u64,
}

pub struct GameEngine {
    store: Arc<dyn GameStore>,
    publisher: Arc<dyn EventPublisher>,
    dictionary: Arc<dyn DictionaryService>,
    clock: Arc<dyn Clock>,
    default_rules: GameRules,
}

impl GameEngine {
    pub fn new(
        store: Arc<dyn GameStore>,
        publisher: Arc<dyn EventPublisher>,
        dictionary: Arc<dyn DictionaryService>,
        clock: Arc<dyn Clock>,
        default_rules: GameRules,
    ) -> Self {
        Self {
            store,
            publisher,
            dictionary,
            clock,
            default_rules,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Starts a session with its first round open.
    ///
    /// Does not check for another active session of the tenant; callers do
    /// that through [`GameEngine::find_active_session`].
    pub async fn create_session(&self, request: StartSession) -> EngineResult<SessionId> {
        let tenant = request.tenant.trim().to_string();
        if tenant.is_empty() {
            return Err(CommandError::invalid_state("tenant must not be empty").into());
        }

        let tenant_rules = self.tenant_rules(&tenant).await?;
        let rules = request.rules.unwrap_or(tenant_rules);
        rules.validate()?;

        let word = match request.word {
            Some(word) => {
                let word = normalize_word(&word);
                if word.chars().count() != rules.word_length as usize
                    || !word.chars().all(char::is_alphabetic)
                {
                    return Err(CommandError::InvalidOptions(format!(
                        "secret word must be {} letters",
                        rules.word_length
                    ))
                    .into());
                }
                word
            }
            None => normalize_word(&self.dictionary.random_word(&rules).await?),
        };

        let now = self.clock.now();
        let session_id = Uuid::new_v4();
        let round = Round::open(session_id, now);
        let round_expiry = now + rules.initial_round_duration();
        let session = Session::start(session_id, &tenant, word, now, round.id, round_expiry);

        let mut uow = UnitOfWork::begin(self.store.clone());
        uow.sessions().add(session);
        uow.rounds().add(round.clone());
        uow.options()
            .add(Options::snapshot_for_session(session_id, rules.clone(), now));
        uow.commit().await?;

        info!(
            tenant = %tenant,
            session_id = %session_id,
            round_id = %round.id,
            round_expiry = %round_expiry,
            "session started"
        );

        self.publish(
            &tenant,
            NewSessionStarted {
                session_id,
                round_id: round.id,
                word_length: rules.word_length,
                number_of_rounds: rules.number_of_rounds,
                created_at: now,
            },
        )
        .await?;
        self.publish(
            &tenant,
            NewRoundStarted {
                session_id,
                round_id: round.id,
                round_expiry,
            },
        )
        .await?;
        Ok(session_id)
    }

    /// Tenant defaults, created from the process defaults on first use.
    async fn tenant_rules(&self, tenant: &str) -> EngineResult<GameRules> {
        let owner = OptionsOwner::Tenant(tenant.to_string());
        if let Some(options) = self.store.options(&owner).await? {
            return Ok(options.rules);
        }

        let mut uow = UnitOfWork::begin(self.store.clone());
        uow.options().add(Options::for_tenant(
            tenant,
            self.default_rules.clone(),
            self.clock.now(),
        ));
        match uow.commit().await {
            Ok(()) => {
                debug!(tenant = %tenant, "created tenant options from defaults");
                Ok(self.default_rules.clone())
            }
            // Someone else created them first.
            Err(StoreError::Conflict { .. }) => self
                .store
                .options(&owner)
                .await?
                .map(|options| options.rules)
                .ok_or_else(|| CommandError::not_found("options", owner.key()).into()),
            Err(error) => Err(error.into()),
        }
    }

    pub async fn add_guess(&self, request: SubmitGuess) -> EngineResult<GuessId> {
        let mut uow = UnitOfWork::begin(self.store.clone());
        let session = self.load_session(&mut uow, request.session_id).await?;
        if !session.is_active() {
            return Err(CommandError::invalid_state(format!(
                "session {} is {:?}",
                session.id, session.state
            ))
            .into());
        }
        if let Some(expected) = request.expected_version
            && expected != session.version
        {
            return Err(StoreError::conflict("session", session.id, Some(expected)).into());
        }
        let Some(round_id) = session.active_round_id else {
            return Err(CommandError::invalid_state(format!(
                "session {} has no active round",
                session.id
            ))
            .into());
        };
        let round = uow
            .rounds()
            .get(round_id)
            .await?
            .ok_or_else(|| CommandError::not_found("round", round_id))?;
        let rules = self.session_rules(session.id).await?;

        let word = normalize_word(&request.word);
        if word.chars().count() != rules.word_length as usize {
            return Err(CommandError::InvalidGuess(format!(
                "expected {} letters, got {}",
                rules.word_length,
                word.chars().count()
            ))
            .into());
        }

        let now = self.clock.now();
        let closing = !round.is_active()
            || session.active_round_end.is_some_and(|round_end| round_end <= now);
        if closing && !rules.allow_guesses_after_round_end && now > request.timestamp {
            return Err(CommandError::RoundExpired { round_id }.into());
        }

        let user = request.user.trim().to_string();
        if user.is_empty() {
            return Err(CommandError::InvalidGuess("user must not be empty".to_string()).into());
        }

        let guess = Guess::new(session.id, round_id, user, word, request.timestamp);
        uow.guesses().add(guess.clone());
        uow.commit().await?;

        debug!(
            session_id = %session.id,
            round_id = %round_id,
            user = %guess.user,
            "guess added"
        );

        self.publish(
            &session.tenant,
            GuessAdded {
                session_id: session.id,
                round_id,
                guess_id: guess.id,
                user: guess.user,
                word: guess.word,
                timestamp: guess.timestamp,
            },
        )
        .await?;
        Ok(guess.id)
    }

    pub async fn create_new_round(&self, session_id: SessionId) -> EngineResult<RoundId> {
        let mut uow = UnitOfWork::begin(self.store.clone());
        let mut session = self.load_session(&mut uow, session_id).await?;
        if !session.is_active() {
            return Err(CommandError::invalid_state(format!(
                "session {session_id} is {:?}",
                session.state
            ))
            .into());
        }
        if session.has_open_round() {
            return Err(CommandError::invalid_state(format!(
                "session {session_id} already has an active round"
            ))
            .into());
        }
        let rules = self.session_rules(session_id).await?;
        let played = uow.rounds().for_session(session_id).await?.len();
        if played >= rules.number_of_rounds as usize {
            return Err(CommandError::RoundLimitReached {
                session_id,
                limit: rules.number_of_rounds,
            }
            .into());
        }

        let now = self.clock.now();
        let round = Round::open(session_id, now);
        let round_expiry = now + rules.initial_round_duration();
        session.open_round(round.id, round_expiry);

        uow.sessions().update(session.clone());
        uow.rounds().add(round.clone());
        match uow.commit().await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(CommandError::invalid_state(format!(
                    "session {session_id} changed while opening a round"
                ))
                .into());
            }
            Err(error) => return Err(error.into()),
        }

        info!(
            session_id = %session_id,
            round_id = %round.id,
            round_number = played + 1,
            round_expiry = %round_expiry,
            "round started"
        );

        self.publish(
            &session.tenant,
            NewRoundStarted {
                session_id,
                round_id: round.id,
                round_expiry,
            },
        )
        .await?;
        Ok(round.id)
    }

    /// Decides what happens to the session's active round.
    ///
    /// Without `force`, a round that has not reached its deadline is left
    /// alone, and one short of answers is extended while extensions remain.
    /// A round with no guesses at all terminates the session; anything else
    /// closes with a winner, even below the minimum.
    pub async fn end_active_round(
        &self,
        session_id: SessionId,
        force: bool,
    ) -> EngineResult<RoundOutcome> {
        let mut uow = UnitOfWork::begin(self.store.clone());
        let mut session = self.load_session(&mut uow, session_id).await?;
        if !session.is_active() {
            return Err(CommandError::invalid_state(format!(
                "session {session_id} is {:?}",
                session.state
            ))
            .into());
        }
        let (Some(round_id), Some(round_end)) = (session.active_round_id, session.active_round_end)
        else {
            return Err(CommandError::invalid_state(format!(
                "session {session_id} has no active round"
            ))
            .into());
        };
        let mut round = uow
            .rounds()
            .get(round_id)
            .await?
            .ok_or_else(|| CommandError::not_found("round", round_id))?;
        if !round.is_active() {
            return Err(CommandError::invalid_state(format!(
                "round {round_id} is {:?}",
                round.state
            ))
            .into());
        }
        let rules = self.session_rules(session_id).await?;
        let guesses = uow.guesses().for_round(round_id).await?;
        let counted = decimate(&guesses, &rules);
        let now = self.clock.now();

        if !force {
            if round_end > now {
                return Err(CommandError::RoundNotExpired {
                    round_id,
                    round_end,
                }
                .into());
            }
            if (counted.len() as u64) < u64::from(rules.minimum_answers_required)
                && rules.may_extend(round.created_at, now)
            {
                let round_expiry = round_end + rules.extension_duration();
                session.active_round_end = Some(round_expiry);
                uow.sessions().update(session.clone());
                uow.commit().await?;

                info!(
                    session_id = %session_id,
                    round_id = %round_id,
                    counted = counted.len(),
                    required = rules.minimum_answers_required,
                    round_expiry = %round_expiry,
                    "round extended"
                );
                self.publish(
                    &session.tenant,
                    RoundExtended {
                        session_id,
                        round_id,
                        round_expiry,
                    },
                )
                .await?;
                return Ok(RoundOutcome::Extended { round_expiry });
            }
        }

        let selection = if guesses.is_empty() {
            None
        } else {
            select_winner(&counted, &rules)
        };

        let Some(selection) = selection else {
            round.terminate();
            session.finish(SessionState::Terminated);
            uow.rounds().update(round);
            uow.sessions().update(session.clone());
            uow.commit().await?;

            warn!(session_id = %session_id, round_id = %round_id, "round had no guesses, session terminated");
            self.publish(&session.tenant, RoundTerminated { session_id, round_id })
                .await?;
            self.publish(&session.tenant, SessionTerminated { session_id })
                .await?;
            return Ok(RoundOutcome::Terminated);
        };

        let result = score_guess(&session.word, &selection.word);
        round.close(selection.word.clone(), result.clone());
        session.clear_active_round();
        session.record_letters(&selection.word);
        uow.rounds().update(round);
        uow.sessions().update(session.clone());
        uow.commit().await?;

        info!(
            session_id = %session_id,
            round_id = %round_id,
            guess = %selection.word,
            votes = selection.votes(),
            guesses = guesses.len(),
            "round ended"
        );
        self.publish(
            &session.tenant,
            RoundEnded {
                session_id,
                round_id,
                guess: selection.word.clone(),
                result: result.clone(),
                supporting_votes: u32::try_from(selection.votes()).unwrap_or(u32::MAX),
                used_letters: session.used_letters.iter().copied().collect(),
            },
        )
        .await?;
        Ok(RoundOutcome::Ended {
            guess: selection.word,
            result,
        })
    }

    pub async fn end_session_with_success(&self, session_id: SessionId) -> EngineResult<()> {
        let (session, rounds_played) = self.finish_session(session_id, SessionState::Success).await?;
        self.publish(
            &session.tenant,
            SessionEndedWithSuccess {
                session_id,
                word: session.word.clone(),
                rounds_played,
            },
        )
        .await
    }

    pub async fn end_session_with_failure(&self, session_id: SessionId) -> EngineResult<()> {
        let (session, rounds_played) = self.finish_session(session_id, SessionState::Fail).await?;
        self.publish(
            &session.tenant,
            SessionEndedWithFailure {
                session_id,
                word: session.word.clone(),
                rounds_played,
            },
        )
        .await
    }

    async fn finish_session(
        &self,
        session_id: SessionId,
        state: SessionState,
    ) -> EngineResult<(Session, u32)> {
        let mut uow = UnitOfWork::begin(self.store.clone());
        let mut session = self.load_session(&mut uow, session_id).await?;
        if !session.is_active() {
            return Err(CommandError::invalid_state(format!(
                "session {session_id} is {:?}",
                session.state
            ))
            .into());
        }
        if session.has_open_round() {
            return Err(CommandError::invalid_state(format!(
                "session {session_id} still has an active round"
            ))
            .into());
        }
        let rounds_played = uow
            .rounds()
            .for_session(session_id)
            .await?
            .iter()
            .filter(|round| round.state == RoundState::Inactive)
            .count();

        session.finish(state);
        uow.sessions().update(session.clone());
        uow.commit().await?;

        info!(
            session_id = %session_id,
            state = ?state,
            rounds_played,
            "session finished"
        );
        Ok((session, u32::try_from(rounds_played).unwrap_or(u32::MAX)))
    }

    pub async fn find_active_session(&self, tenant: &str) -> EngineResult<Option<Session>> {
        Ok(self.store.active_session_for_tenant(tenant).await?)
    }

    pub async fn active_sessions(&self) -> EngineResult<Vec<Session>> {
        Ok(self.store.active_sessions().await?)
    }

    pub async fn session(&self, session_id: SessionId) -> EngineResult<Session> {
        self.store
            .session(session_id)
            .await?
            .ok_or_else(|| CommandError::not_found("session", session_id).into())
    }

    pub async fn round(&self, round_id: RoundId) -> EngineResult<Round> {
        self.store
            .round(round_id)
            .await?
            .ok_or_else(|| CommandError::not_found("round", round_id).into())
    }

    /// Oldest first.
    pub async fn rounds(&self, session_id: SessionId) -> EngineResult<Vec<Round>> {
        Ok(self.store.rounds_for_session(session_id).await?)
    }

    pub async fn session_rules(&self, session_id: SessionId) -> EngineResult<GameRules> {
        let owner = OptionsOwner::Session(session_id);
        self.store
            .options(&owner)
            .await?
            .map(|options| options.rules)
            .ok_or_else(|| CommandError::not_found("options", owner.key()).into())
    }

    /// Read model for clients.
    ///
    /// Rounds created after `as_of` are left out, so a renderer reacting to an
    /// older event does not pick up a round that event could not know about.
    pub async fn session_view(
        &self,
        session_id: SessionId,
        as_of: Option<DateTime<Utc>>,
    ) -> EngineResult<SessionView> {
        let session = self.session(session_id).await?;
        let rules = self.session_rules(session_id).await?;
        let rounds: Vec<Round> = self
            .rounds(session_id)
            .await?
            .into_iter()
            .filter(|round| as_of.is_none_or(|as_of| round.created_at <= as_of))
            .collect();

        let tally = match session.active_round_id {
            Some(round_id) => {
                let guesses = self.store.guesses_for_round(round_id).await?;
                tally(&decimate(&guesses, &rules))
            }
            None => Vec::new(),
        };

        Ok(SessionView {
            id: session.id,
            tenant: session.tenant,
            state: session.state,
            word: (session.state != SessionState::Active).then_some(session.word),
            word_length: rules.word_length,
            number_of_rounds: rules.number_of_rounds,
            used_letters: session.used_letters.into_iter().collect(),
            active_round_id: session.active_round_id,
            active_round_end: session.active_round_end,
            rounds,
            tally,
            version: session.version,
        })
    }

    async fn load_session(
        &self,
        uow: &mut UnitOfWork,
        session_id: SessionId,
    ) -> EngineResult<Session> {
        uow.sessions()
            .get(session_id)
            .await?
            .ok_or_else(|| CommandError::not_found("session", session_id).into())
    }

    async fn publish<E>(&self, tenant: &str, event: E) -> EngineResult<()>
    where
        E: Into<GameEvent>,
    {
        let event: GameEvent = event.into();
        let envelope = EventEnvelope::new(tenant, &event)
            .map_err(|error| TransportError::Encode(error.to_string()))?;
        self.publisher.publish(envelope).await.map_err(|error| {
            warn!(
                tenant = %tenant,
                event_type = event.event_type(),
                error = %error,
                "failed to queue event"
            );
            EngineError::from(error)
        })
    }
}

/// Votes per word, most votes first, ties alphabetical.
fn tally(guesses: &[Guess]) -> Vec<WordTally> {
    let mut votes: BTreeMap<&str, u32> = BTreeMap::new();
    for guess in guesses {
        *votes.entry(guess.word.as_str()).or_default() += 1;
    }
    let mut tally: Vec<WordTally> = votes
        .into_iter()
        .map(|(word, votes)| WordTally {
            word: word.to_string(),
            votes,
        })
        .collect();
    tally.sort_by(|a, b| b.votes.cmp(&a.votes));
    tally
}
