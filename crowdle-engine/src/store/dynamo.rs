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
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{
    Client as DynamoClient,
    error::DisplayErrorContext,
    operation::transact_write_items::TransactWriteItemsError,
    types::{AttributeValue, Put, TransactWriteItem},
};
use crowdle_common::{Guess, Options, OptionsOwner, Round, RoundId, Session, SessionId};
use serde::{Serialize, de::DeserializeOwned};
use tracing::info;

use super::{GameStore, WriteOp};
use crate::error::StoreError;

type Item = HashMap<String, AttributeValue>;

const ROUNDS_BY_SESSION_INDEX: &str = "session_id-index";
const GUESSES_BY_ROUND_INDEX: &str = "round_id-index";
const SESSIONS_BY_TENANT_INDEX: &str = "tenant-index";

#[derive(Debug, Clone)]
pub struct DynamoTables {
    pub sessions: String,
    pub rounds: String,
    pub guesses: String,
    pub options: String,
}

impl DynamoTables {
    pub fn from_env() -> Self {
        Self {
            sessions: std::env::var("CROWDLE_SESSIONS_TABLE")
                .ok()
                .unwrap_or_else(|| "crowdle_sessions".to_string()),
            rounds: std::env::var("CROWDLE_ROUNDS_TABLE")
                .ok()
                .unwrap_or_else(|| "crowdle_rounds".to_string()),
            guesses: std::env::var("CROWDLE_GUESSES_TABLE")
                .ok()
                .unwrap_or_else(|| "crowdle_guesses".to_string()),
            options: std::env::var("CROWDLE_OPTIONS_TABLE")
                .ok()
                .unwrap_or_else(|| "crowdle_options".to_string()),
        }
    }
}

/// DynamoDB-backed store. Each entity is one item holding its key
/// attributes, a numeric `version` used in condition expressions, and the
/// full JSON `body`.
#[derive(Clone)]
pub struct DynamoGameStore {
    client: DynamoClient,
    tables: DynamoTables,
}

impl DynamoGameStore {
    pub fn new(client: DynamoClient, tables: DynamoTables) -> Self {
        Self { client, tables }
    }

    /// `None` unless `DYNAMODB_ENDPOINT` or `AWS_REGION` is set.
    pub async fn from_env() -> Option<Self> {
        if std::env::var("DYNAMODB_ENDPOINT").is_err() && std::env::var("AWS_REGION").is_err() {
            return None;
        }
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(endpoint) = std::env::var("DYNAMODB_ENDPOINT") {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        let tables = DynamoTables::from_env();
        info!(sessions_table = %tables.sessions, "crowdle DynamoDB game store enabled");
        Some(Self::new(DynamoClient::new(&config), tables))
    }

    async fn get(&self, table: &str, key: &str, value: String) -> Result<Option<Item>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .key(key, AttributeValue::S(value))
            .consistent_read(true)
            .send()
            .await
            .map_err(unavailable)?;
        Ok(output.item().cloned())
    }

    async fn query_index(
        &self,
        table: &str,
        index: &str,
        key: &str,
        value: String,
    ) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut start: Option<Item> = None;
        loop {
            let output = self
                .client
                .query()
                .table_name(table)
                .index_name(index)
                .key_condition_expression("#key = :value")
                .expression_attribute_names("#key", key)
                .expression_attribute_values(":value", AttributeValue::S(value.clone()))
                .set_exclusive_start_key(start.take())
                .send()
                .await
                .map_err(unavailable)?;
            items.extend(output.items().iter().cloned());
            match output.last_evaluated_key() {
                Some(next) if !next.is_empty() => start = Some(next.clone()),
                _ => break,
            }
        }
        Ok(items)
    }

    async fn scan_active_sessions(&self) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut start: Option<Item> = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.tables.sessions)
                .filter_expression("#state = :active")
                .expression_attribute_names("#state", "state")
                .expression_attribute_values(":active", AttributeValue::S("ACTIVE".to_string()))
                .set_exclusive_start_key(start.take())
                .send()
                .await
                .map_err(unavailable)?;
            items.extend(output.items().iter().cloned());
            match output.last_evaluated_key() {
                Some(next) if !next.is_empty() => start = Some(next.clone()),
                _ => break,
            }
        }
        Ok(items)
    }

    fn session_item(&self, session: &Session) -> Result<Item, StoreError> {
        let mut item = body_item("session", session.id.to_string(), session, session.version)?;
        item.insert("tenant".to_string(), AttributeValue::S(session.tenant.clone()));
        item.insert("state".to_string(), AttributeValue::S(enum_text(&session.state)?));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(session.created_at.to_rfc3339()),
        );
        Ok(item)
    }

    fn round_item(&self, round: &Round) -> Result<Item, StoreError> {
        let mut item = body_item("round", round.id.to_string(), round, round.version)?;
        item.insert(
            "session_id".to_string(),
            AttributeValue::S(round.session_id.to_string()),
        );
        item.insert("state".to_string(), AttributeValue::S(enum_text(&round.state)?));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(round.created_at.to_rfc3339()),
        );
        Ok(item)
    }

    fn guess_item(&self, guess: &Guess) -> Result<Item, StoreError> {
        let mut item = body_item("guess", guess.id.to_string(), guess, 0)?;
        item.insert("round_id".to_string(), AttributeValue::S(guess.round_id.to_string()));
        item.insert(
            "session_id".to_string(),
            AttributeValue::S(guess.session_id.to_string()),
        );
        item.insert("user".to_string(), AttributeValue::S(guess.user.clone()));
        item.insert(
            "timestamp".to_string(),
            AttributeValue::S(guess.timestamp.to_rfc3339()),
        );
        Ok(item)
    }

    fn options_item(&self, options: &Options) -> Result<Item, StoreError> {
        let mut item = body_item("options", options.id.to_string(), options, 0)?;
        item.insert("owner_key".to_string(), AttributeValue::S(options.owner.key()));
        Ok(item)
    }

    /// Builds the transaction item for one op, plus what to report if its
    /// condition fails.
    fn transact_item(
        &self,
        op: &WriteOp,
    ) -> Result<(TransactWriteItem, (&'static str, String, Option<u64>)), StoreError> {
        let not_exists = "attribute_not_exists(id)";
        let same_version = "version = :expected";
        let (table, item, condition, expected, id) = match op {
            WriteOp::InsertSession(session) => {
                let mut session = session.clone();
                session.version = 0;
                (
                    &self.tables.sessions,
                    self.session_item(&session)?,
                    not_exists,
                    None,
                    session.id.to_string(),
                )
            }
            WriteOp::UpdateSession(session) => {
                let expected = session.version;
                let mut session = session.clone();
                session.version = expected + 1;
                (
                    &self.tables.sessions,
                    self.session_item(&session)?,
                    same_version,
                    Some(expected),
                    session.id.to_string(),
                )
            }
            WriteOp::InsertRound(round) => {
                let mut round = round.clone();
                round.version = 0;
                (
                    &self.tables.rounds,
                    self.round_item(&round)?,
                    not_exists,
                    None,
                    round.id.to_string(),
                )
            }
            WriteOp::UpdateRound(round) => {
                let expected = round.version;
                let mut round = round.clone();
                round.version = expected + 1;
                (
                    &self.tables.rounds,
                    self.round_item(&round)?,
                    same_version,
                    Some(expected),
                    round.id.to_string(),
                )
            }
            WriteOp::InsertGuess(guess) => {
                (
                    &self.tables.guesses,
                    self.guess_item(guess)?,
                    not_exists,
                    None,
                    guess.id.to_string(),
                )
            }
            WriteOp::InsertOptions(options) => (
                &self.tables.options,
                self.options_item(options)?,
                "attribute_not_exists(owner_key)",
                None,
                options.owner.key(),
            ),
        };

        let mut put = Put::builder()
            .table_name(table)
            .set_item(Some(item))
            .condition_expression(condition);
        if let Some(expected) = expected {
            put = put.expression_attribute_values(":expected", AttributeValue::N(expected.to_string()));
        }
        let put = put
            .build()
            .map_err(|error| StoreError::Unavailable(format!("invalid put request: {error}")))?;
        Ok((
            TransactWriteItem::builder().put(put).build(),
            (op.entity(), id, expected),
        ))
    }
}

fn unavailable<E>(error: aws_sdk_dynamodb::error::SdkError<E>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Unavailable(DisplayErrorContext(&error).to_string())
}

fn enum_text<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map(|text| text.trim_matches('"').to_string())
        .map_err(|error| StoreError::Unavailable(format!("failed to encode enum: {error}")))
}

fn body_item<T: Serialize>(
    entity: &'static str,
    id: String,
    value: &T,
    version: u64,
) -> Result<Item, StoreError> {
    let body = serde_json::to_string(value).map_err(|error| StoreError::corrupt(entity, &id, error))?;
    let mut item = HashMap::new();
    item.insert("id".to_string(), AttributeValue::S(id));
    item.insert("version".to_string(), AttributeValue::N(version.to_string()));
    item.insert("body".to_string(), AttributeValue::S(body));
    Ok(item)
}

fn decode<T: DeserializeOwned>(entity: &'static str, item: &Item) -> Result<T, StoreError> {
    let id = item
        .get("id")
        .and_then(|value| value.as_s().ok())
        .cloned()
        .unwrap_or_default();
    let body = item
        .get("body")
        .and_then(|value| value.as_s().ok())
        .ok_or_else(|| StoreError::corrupt(entity, &id, "missing body"))?;
    serde_json::from_str(body).map_err(|error| StoreError::corrupt(entity, &id, error))
}

fn decode_all<T: DeserializeOwned>(entity: &'static str, items: &[Item]) -> Result<Vec<T>, StoreError> {
    items.iter().map(|item| decode(entity, item)).collect()
}

#[async_trait]
impl GameStore for DynamoGameStore {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.get(&self.tables.sessions, "id", id.to_string())
            .await?
            .map(|item| decode("session", &item))
            .transpose()
    }

    async fn active_session_for_tenant(
        &self,
        tenant: &str,
    ) -> Result<Option<Session>, StoreError> {
        let items = self
            .query_index(
                &self.tables.sessions,
                SESSIONS_BY_TENANT_INDEX,
                "tenant",
                tenant.to_string(),
            )
            .await?;
        let sessions: Vec<Session> = decode_all("session", &items)?;
        Ok(sessions
            .into_iter()
            .filter(Session::is_active)
            .max_by_key(|session| session.created_at))
    }

    async fn active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let items = self.scan_active_sessions().await?;
        let mut sessions: Vec<Session> = decode_all("session", &items)?;
        // The scan filter runs before the body is read; re-check the decoded state.
        sessions.retain(Session::is_active);
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }

    async fn round(&self, id: RoundId) -> Result<Option<Round>, StoreError> {
        self.get(&self.tables.rounds, "id", id.to_string())
            .await?
            .map(|item| decode("round", &item))
            .transpose()
    }

    async fn rounds_for_session(&self, session_id: SessionId) -> Result<Vec<Round>, StoreError> {
        let items = self
            .query_index(
                &self.tables.rounds,
                ROUNDS_BY_SESSION_INDEX,
                "session_id",
                session_id.to_string(),
            )
            .await?;
        let mut rounds: Vec<Round> = decode_all("round", &items)?;
        rounds.sort_by_key(|round| round.created_at);
        Ok(rounds)
    }

    async fn guesses_for_round(&self, round_id: RoundId) -> Result<Vec<Guess>, StoreError> {
        let items = self
            .query_index(
                &self.tables.guesses,
                GUESSES_BY_ROUND_INDEX,
                "round_id",
                round_id.to_string(),
            )
            .await?;
        let mut guesses: Vec<Guess> = decode_all("guess", &items)?;
        guesses.sort_by_key(|guess| guess.timestamp);
        Ok(guesses)
    }

    async fn options(&self, owner: &OptionsOwner) -> Result<Option<Options>, StoreError> {
        self.get(&self.tables.options, "owner_key", owner.key())
            .await?
            .map(|item| decode("options", &item))
            .transpose()
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut items = Vec::with_capacity(ops.len());
        let mut guards = Vec::with_capacity(ops.len());
        for op in &ops {
            let (item, guard) = self.transact_item(op)?;
            items.push(item);
            guards.push(guard);
        }

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(error) => {
                if let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) =
                    error.as_service_error()
                {
                    let (entity, id, expected) = cancelled
                        .cancellation_reasons()
                        .iter()
                        .position(|reason| reason.code() == Some("ConditionalCheckFailed"))
                        .and_then(|index| guards.get(index).cloned())
                        .unwrap_or(("batch", String::new(), None));
                    return Err(StoreError::conflict(entity, id, expected));
                }
                Err(unavailable(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn store() -> DynamoGameStore {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_dynamodb::config::Region::new("us-east-1"))
            .build();
        DynamoGameStore::new(
            DynamoClient::from_conf(config),
            DynamoTables {
                sessions: "s".to_string(),
                rounds: "r".to_string(),
                guesses: "g".to_string(),
                options: "o".to_string(),
            },
        )
    }

    #[test]
    fn session_item_carries_index_attributes_and_round_trips() {
        let now = Utc::now();
        let session = Session::start(
            Uuid::new_v4(),
            "t1",
            "CRANE",
            now,
            Uuid::new_v4(),
            now + Duration::seconds(30),
        );
        let item = store().session_item(&session).unwrap();

        assert_eq!(item["state"].as_s().unwrap(), "ACTIVE");
        assert_eq!(item["tenant"].as_s().unwrap(), "t1");
        assert_eq!(item["version"].as_n().unwrap(), "0");
        let decoded: Session = decode("session", &item).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn update_is_conditioned_on_the_loaded_version() {
        let mut round = Round::open(Uuid::new_v4(), Utc::now());
        round.version = 4;
        let (_, guard) = store().transact_item(&WriteOp::UpdateRound(round.clone())).unwrap();
        assert_eq!(guard, ("round", round.id.to_string(), Some(4)));
    }

    #[test]
    fn missing_body_is_corrupt() {
        let mut item = Item::new();
        item.insert("id".to_string(), AttributeValue::S("x".to_string()));
        let err = decode::<Round>("round", &item).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { entity: "round", .. }));
    }
}
