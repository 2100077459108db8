//! Redis-backed [`Store`]. Layout follows `config::key`/`config::field`:
//! one hash per user/group/message plus index sets, and one hash or set per
//! rule table. Redis hash/set writes are atomic per key, which is exactly
//! the per-unique-key atomicity the store contract asks for.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use teloxide::types::{ChatId, MessageId, UserId};

use crate::config::{field, key, suffix};

use super::{
    AutoReplyRule, BannedPattern, DeleteOutcome, GroupRecord, MessageRecord, PatternKind,
    RestrictionDuration, Store, StoreError, StoreResult, UpsertOutcome, UserRecord,
};

/// Production store. The multiplexed connection is cheap to clone and safe to
/// share across concurrently handled updates.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to Redis. Failure here is a startup configuration error.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(RedisStore { conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

fn user_key(id: UserId) -> String {
    format!("{}{}", key::USERS_PREFIX, id.0)
}

fn chat_key(id: ChatId) -> String {
    format!("{}{}", key::CHATS_PREFIX, id.0)
}

fn chat_messages_key(id: ChatId) -> String {
    format!("{}{}{}", key::CHATS_PREFIX, id.0, suffix::MESSAGES)
}

fn message_key(id: MessageId) -> String {
    format!("{}{}", key::MESSAGES_PREFIX, id.0)
}

fn pattern_table(kind: PatternKind) -> &'static str {
    match kind {
        PatternKind::Word => key::BANNED_WORDS,
        PatternKind::LinkSubstring => key::BANNED_LINKS,
    }
}

fn timestamp(ts: i64, context: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("{context}: timestamp {ts} out of range")))
}

fn parse_user(id: UserId, fields: HashMap<String, String>) -> StoreResult<UserRecord> {
    let get_i64 = |name: &str| -> StoreResult<i64> {
        match fields.get(name) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::Corrupt(format!("user {}: bad field {name}", id.0))),
            None => Ok(0),
        }
    };
    let muted_until = match fields.get(field::MUTED_UNTIL) {
        Some(raw) => {
            let ts = raw
                .parse::<i64>()
                .map_err(|_| StoreError::Corrupt(format!("user {}: bad muted_until", id.0)))?;
            Some(timestamp(ts, "muted_until")?)
        }
        None => None,
    };
    Ok(UserRecord {
        id,
        display_name: fields.get(field::DISPLAY_NAME).cloned().unwrap_or_default(),
        blocked: fields.get(field::BLOCKED).map(String::as_str) == Some("1"),
        warning_count: get_i64(field::WARNINGS)?,
        muted_until,
        message_count: get_i64(field::MSG_COUNT)?,
        first_seen: timestamp(get_i64(field::FIRST_SEEN)?, "first_seen")?,
    })
}

#[async_trait]
impl Store for RedisStore {
    async fn upsert_banned_pattern(&self, pattern: &BannedPattern) -> StoreResult<UpsertOutcome> {
        let mut conn = self.conn();
        let value = match pattern.kind {
            PatternKind::Word => pattern.value.to_lowercase(),
            PatternKind::LinkSubstring => pattern.value.clone(),
        };
        let added: i64 = conn
            .hset(pattern_table(pattern.kind), value, pattern.duration.encode())
            .await?;
        Ok(if added == 1 {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn banned_patterns(&self, kind: PatternKind) -> StoreResult<Vec<BannedPattern>> {
        let mut conn = self.conn();
        let entries: HashMap<String, String> = conn.hgetall(pattern_table(kind)).await?;
        let mut patterns = Vec::with_capacity(entries.len());
        for (value, encoded) in entries {
            match RestrictionDuration::decode(&encoded) {
                Some(duration) => patterns.push(BannedPattern { value, kind, duration }),
                None => log::warn!("skipping banned pattern {value:?}: bad duration {encoded:?}"),
            }
        }
        Ok(patterns)
    }

    async fn delete_banned_pattern(
        &self,
        kind: PatternKind,
        value: &str,
    ) -> StoreResult<DeleteOutcome> {
        let mut conn = self.conn();
        let value = match kind {
            PatternKind::Word => value.to_lowercase(),
            PatternKind::LinkSubstring => value.to_string(),
        };
        let removed: i64 = conn.hdel(pattern_table(kind), value).await?;
        Ok(if removed > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    async fn upsert_whitelist_prefix(&self, prefix: &str) -> StoreResult<UpsertOutcome> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key::WHITELISTED_LINKS, prefix).await?;
        Ok(if added == 1 {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn whitelist_prefixes(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.smembers(key::WHITELISTED_LINKS).await?)
    }

    async fn delete_whitelist_prefix(&self, prefix: &str) -> StoreResult<DeleteOutcome> {
        let mut conn = self.conn();
        let removed: i64 = conn.srem(key::WHITELISTED_LINKS, prefix).await?;
        Ok(if removed > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    async fn upsert_auto_reply(
        &self,
        keyword: &str,
        response: &str,
    ) -> StoreResult<UpsertOutcome> {
        let mut conn = self.conn();
        let added: i64 = conn
            .hset(key::AUTO_REPLIES, keyword.to_lowercase(), response)
            .await?;
        Ok(if added == 1 {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn auto_replies(&self) -> StoreResult<Vec<AutoReplyRule>> {
        let mut conn = self.conn();
        let entries: HashMap<String, String> = conn.hgetall(key::AUTO_REPLIES).await?;
        Ok(entries
            .into_iter()
            .map(|(keyword, response)| AutoReplyRule { keyword, response })
            .collect())
    }

    async fn delete_auto_reply(&self, keyword: &str) -> StoreResult<DeleteOutcome> {
        let mut conn = self.conn();
        let removed: i64 = conn.hdel(key::AUTO_REPLIES, keyword.to_lowercase()).await?;
        Ok(if removed > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    async fn setting(&self, key_name: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.hget(key::SETTINGS, key_name).await?)
    }

    async fn set_setting(&self, key_name: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.hset(key::SETTINGS, key_name, value).await?;
        Ok(())
    }

    async fn set_setting_if_absent(&self, key_name: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        Ok(conn.hset_nx(key::SETTINGS, key_name, value).await?)
    }

    async fn upsert_user(
        &self,
        id: UserId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        // SADD tells exactly one caller that the user is new, so the
        // first-seen fields are written once even under concurrent upserts.
        let added: i64 = conn.sadd(key::USERS_INDEX, id.0).await?;
        if added == 1 {
            let _: () = conn
                .hset_multiple(
                    user_key(id),
                    &[
                        (field::DISPLAY_NAME, display_name.to_string()),
                        (field::BLOCKED, "0".to_string()),
                        (field::WARNINGS, "0".to_string()),
                        (field::MSG_COUNT, "0".to_string()),
                        (field::FIRST_SEEN, now.timestamp().to_string()),
                    ],
                )
                .await?;
        } else {
            let _: i64 = conn
                .hset(user_key(id), field::DISPLAY_NAME, display_name)
                .await?;
        }
        Ok(())
    }

    async fn user(&self, id: UserId) -> StoreResult<Option<UserRecord>> {
        let mut conn = self.conn();
        let fields: HashMap<String, String> = conn.hgetall(user_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_user(id, fields).map(Some)
    }

    async fn all_users(&self) -> StoreResult<Vec<UserRecord>> {
        let mut conn = self.conn();
        let ids: Vec<u64> = conn.smembers(key::USERS_INDEX).await?;
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.user(UserId(id)).await? {
                users.push(user);
            }
        }
        Ok(users)
    }

    async fn active_user_ids(&self) -> StoreResult<Vec<UserId>> {
        let mut conn = self.conn();
        let ids: Vec<u64> = conn.smembers(key::USERS_INDEX).await?;
        let mut active = Vec::with_capacity(ids.len());
        for id in ids {
            let blocked: Option<String> = conn.hget(user_key(UserId(id)), field::BLOCKED).await?;
            if blocked.as_deref() != Some("1") {
                active.push(UserId(id));
            }
        }
        Ok(active)
    }

    async fn set_user_blocked(&self, id: UserId, blocked: bool) -> StoreResult<()> {
        let mut conn = self.conn();
        let value = if blocked { "1" } else { "0" };
        let _: i64 = conn.hset(user_key(id), field::BLOCKED, value).await?;
        Ok(())
    }

    async fn blocked_user_count(&self) -> StoreResult<u64> {
        let mut conn = self.conn();
        let ids: Vec<u64> = conn.smembers(key::USERS_INDEX).await?;
        let mut count = 0u64;
        for id in ids {
            let blocked: Option<String> = conn.hget(user_key(UserId(id)), field::BLOCKED).await?;
            if blocked.as_deref() == Some("1") {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn incr_message_count(&self, id: UserId) -> StoreResult<i64> {
        let mut conn = self.conn();
        Ok(conn.hincr(user_key(id), field::MSG_COUNT, 1).await?)
    }

    async fn incr_warning_count(&self, id: UserId) -> StoreResult<i64> {
        let mut conn = self.conn();
        Ok(conn.hincr(user_key(id), field::WARNINGS, 1).await?)
    }

    async fn muted_until(&self, id: UserId) -> StoreResult<Option<DateTime<Utc>>> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.hget(user_key(id), field::MUTED_UNTIL).await?;
        match raw {
            Some(raw) => {
                let ts = raw
                    .parse::<i64>()
                    .map_err(|_| StoreError::Corrupt(format!("user {}: bad muted_until", id.0)))?;
                timestamp(ts, "muted_until").map(Some)
            }
            None => Ok(None),
        }
    }

    async fn set_muted_until(
        &self,
        id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        match until {
            Some(until) => {
                let _: i64 = conn
                    .hset(user_key(id), field::MUTED_UNTIL, until.timestamp())
                    .await?;
            }
            None => {
                let _: i64 = conn.hdel(user_key(id), field::MUTED_UNTIL).await?;
            }
        }
        Ok(())
    }

    async fn upsert_group(&self, id: ChatId, title: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.sadd(key::CHATS_INDEX, id.0).await?;
        let _: i64 = conn.hset(chat_key(id), field::TITLE, title).await?;
        Ok(())
    }

    async fn remove_group(&self, id: ChatId) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.srem(key::CHATS_INDEX, id.0).await?;
        let _: i64 = conn.del(chat_key(id)).await?;
        Ok(())
    }

    async fn groups(&self) -> StoreResult<Vec<GroupRecord>> {
        let mut conn = self.conn();
        let ids: Vec<i64> = conn.smembers(key::CHATS_INDEX).await?;
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            let title: Option<String> = conn.hget(chat_key(ChatId(id)), field::TITLE).await?;
            groups.push(GroupRecord {
                id: ChatId(id),
                title: title.unwrap_or_default(),
            });
        }
        Ok(groups)
    }

    async fn record_message(&self, record: &MessageRecord) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: () = conn
            .hset_multiple(
                message_key(record.message_id),
                &[
                    (field::USER_ID, record.user_id.0.to_string()),
                    (field::CHAT_ID, record.group_id.0.to_string()),
                    (field::TEXT, record.text.clone()),
                    (
                        field::REACTIONS,
                        record.positive_reaction_count.to_string(),
                    ),
                    (field::TIMESTAMP, record.timestamp.timestamp().to_string()),
                ],
            )
            .await?;
        let _: i64 = conn
            .zadd(
                chat_messages_key(record.group_id),
                record.message_id.0,
                record.timestamp.timestamp(),
            )
            .await?;
        Ok(())
    }

    async fn set_reaction_count(&self, message_id: MessageId, count: i64) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn
            .hset(message_key(message_id), field::REACTIONS, count)
            .await?;
        Ok(())
    }

    async fn messages_since(
        &self,
        group: ChatId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageRecord>> {
        let mut conn = self.conn();
        let ids: Vec<i32> = conn
            .zrangebyscore(chat_messages_key(group), since.timestamp(), "+inf")
            .await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let message_id = MessageId(id);
            let fields: HashMap<String, String> = conn.hgetall(message_key(message_id)).await?;
            if fields.is_empty() {
                continue;
            }
            let get_i64 = |name: &str| -> StoreResult<i64> {
                fields
                    .get(name)
                    .map(|raw| {
                        raw.parse::<i64>().map_err(|_| {
                            StoreError::Corrupt(format!("message {id}: bad field {name}"))
                        })
                    })
                    .unwrap_or(Ok(0))
            };
            records.push(MessageRecord {
                message_id,
                user_id: UserId(get_i64(field::USER_ID)? as u64),
                group_id: ChatId(get_i64(field::CHAT_ID)?),
                text: fields.get(field::TEXT).cloned().unwrap_or_default(),
                positive_reaction_count: get_i64(field::REACTIONS)?,
                timestamp: timestamp(get_i64(field::TIMESTAMP)?, "message timestamp")?,
            });
        }
        Ok(records)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
