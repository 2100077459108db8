//! Persistent data model and the abstract keyed store behind it.
//!
//! Business conditions (duplicate keys, missing entries) are returned as
//! explicit outcomes so callers can render feedback; only storage
//! unavailability surfaces as [`StoreError`].

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teloxide::types::{ChatId, MessageId, UserId};

use crate::config::{setting, DEFAULT_WARNING_MESSAGE, DEFAULT_WELCOME_MESSAGE};

/// How long a matched banned pattern mutes the offending user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionDuration {
    /// Only the message is removed; the sender keeps posting rights.
    None,
    Day,
    Week,
    Month,
    CustomDays(u32),
}

impl RestrictionDuration {
    /// Stable string encoding used for storage and callback payloads.
    pub fn encode(&self) -> String {
        match self {
            RestrictionDuration::None => "none".to_string(),
            RestrictionDuration::Day => "day".to_string(),
            RestrictionDuration::Week => "week".to_string(),
            RestrictionDuration::Month => "month".to_string(),
            RestrictionDuration::CustomDays(n) => format!("days:{n}"),
        }
    }

    /// Parse the [`encode`](Self::encode) representation.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "none" => Some(RestrictionDuration::None),
            "day" => Some(RestrictionDuration::Day),
            "week" => Some(RestrictionDuration::Week),
            "month" => Some(RestrictionDuration::Month),
            _ => s
                .strip_prefix("days:")
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .map(RestrictionDuration::CustomDays),
        }
    }

    /// The concrete mute length, or `None` when no restriction applies.
    pub fn as_chrono(&self) -> Option<chrono::Duration> {
        match self {
            RestrictionDuration::None => None,
            RestrictionDuration::Day => Some(chrono::Duration::days(1)),
            RestrictionDuration::Week => Some(chrono::Duration::days(7)),
            RestrictionDuration::Month => Some(chrono::Duration::days(30)),
            RestrictionDuration::CustomDays(n) => Some(chrono::Duration::days(*n as i64)),
        }
    }

    /// Human-readable label for panel feedback.
    pub fn label(&self) -> String {
        match self {
            RestrictionDuration::None => "no restriction".to_string(),
            RestrictionDuration::Day => "1 day".to_string(),
            RestrictionDuration::Week => "1 week".to_string(),
            RestrictionDuration::Month => "1 month".to_string(),
            RestrictionDuration::CustomDays(n) => format!("{n} days"),
        }
    }
}

/// Which text feature a [`BannedPattern`] inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    /// Matches a whole token of the normalized message text.
    Word,
    /// Matches a substring of any URL found in the message.
    LinkSubstring,
}

/// A moderation rule: messages matching `value` are removed and the sender is
/// muted for `duration`. Unique on `(kind, value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannedPattern {
    pub value: String,
    pub kind: PatternKind,
    pub duration: RestrictionDuration,
}

/// Keyword-triggered canned response. Unique on the lower-cased keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoReplyRule {
    pub keyword: String,
    pub response: String,
}

/// A user known to the bot. Created on first observed interaction, never
/// deleted. `blocked` flips to true only on a confirmed permanent delivery
/// failure and back to false only on an explicit `/start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    pub blocked: bool,
    pub warning_count: i64,
    pub muted_until: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub first_seen: DateTime<Utc>,
}

/// A group the bot currently moderates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: ChatId,
    pub title: String,
}

/// Engagement snapshot of a single group message. The reaction count mirrors
/// the transport's latest snapshot and is overwritten, never incremented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub group_id: ChatId,
    pub text: String,
    pub positive_reaction_count: i64,
    pub timestamp: DateTime<Utc>,
}

/// Result of an upsert against a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Result of a delete against a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Hard storage failures. Business conditions never appear here.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Backend(String),
    #[error("malformed stored record: {0}")]
    Corrupt(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The abstract keyed store every component talks to. All operations are
/// atomic with respect to their unique key; concurrent upserts of the same
/// key resolve last-writer-wins without creating duplicates.
#[async_trait]
pub trait Store: Send + Sync {
    // Banned patterns.
    async fn upsert_banned_pattern(&self, pattern: &BannedPattern) -> StoreResult<UpsertOutcome>;
    async fn banned_patterns(&self, kind: PatternKind) -> StoreResult<Vec<BannedPattern>>;
    async fn delete_banned_pattern(&self, kind: PatternKind, value: &str)
        -> StoreResult<DeleteOutcome>;

    // Whitelisted link prefixes.
    async fn upsert_whitelist_prefix(&self, prefix: &str) -> StoreResult<UpsertOutcome>;
    async fn whitelist_prefixes(&self) -> StoreResult<Vec<String>>;
    async fn delete_whitelist_prefix(&self, prefix: &str) -> StoreResult<DeleteOutcome>;

    // Auto-reply rules, keyed by lower-cased keyword.
    async fn upsert_auto_reply(&self, keyword: &str, response: &str)
        -> StoreResult<UpsertOutcome>;
    async fn auto_replies(&self) -> StoreResult<Vec<AutoReplyRule>>;
    async fn delete_auto_reply(&self, keyword: &str) -> StoreResult<DeleteOutcome>;

    // Settings.
    async fn setting(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Returns true when the key was absent and has now been written.
    async fn set_setting_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;

    // Users.
    /// Create the record on first sight (zero counters, `first_seen = now`);
    /// afterwards only refresh the display name.
    async fn upsert_user(
        &self,
        id: UserId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn user(&self, id: UserId) -> StoreResult<Option<UserRecord>>;
    async fn all_users(&self) -> StoreResult<Vec<UserRecord>>;
    async fn active_user_ids(&self) -> StoreResult<Vec<UserId>>;
    async fn set_user_blocked(&self, id: UserId, blocked: bool) -> StoreResult<()>;
    async fn blocked_user_count(&self) -> StoreResult<u64>;
    async fn incr_message_count(&self, id: UserId) -> StoreResult<i64>;
    async fn incr_warning_count(&self, id: UserId) -> StoreResult<i64>;
    async fn muted_until(&self, id: UserId) -> StoreResult<Option<DateTime<Utc>>>;
    async fn set_muted_until(
        &self,
        id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    // Groups.
    async fn upsert_group(&self, id: ChatId, title: &str) -> StoreResult<()>;
    async fn remove_group(&self, id: ChatId) -> StoreResult<()>;
    async fn groups(&self) -> StoreResult<Vec<GroupRecord>>;

    // Engagement.
    async fn record_message(&self, record: &MessageRecord) -> StoreResult<()>;
    async fn set_reaction_count(&self, message_id: MessageId, count: i64) -> StoreResult<()>;
    async fn messages_since(
        &self,
        group: ChatId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageRecord>>;

    /// Liveness probe used at startup; an unreachable store is fatal.
    async fn ping(&self) -> StoreResult<()>;
}

/// Seed the well-known settings with defaults, insert-if-absent, so a fresh
/// deployment answers `/start` sensibly before the admin configures anything.
pub async fn seed_default_settings(store: &dyn Store) -> StoreResult<()> {
    store
        .set_setting_if_absent(setting::WELCOME_MESSAGE, DEFAULT_WELCOME_MESSAGE)
        .await?;
    store
        .set_setting_if_absent(setting::WARNING_MESSAGE, DEFAULT_WARNING_MESSAGE)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_codec_round_trips() {
        let cases = [
            RestrictionDuration::None,
            RestrictionDuration::Day,
            RestrictionDuration::Week,
            RestrictionDuration::Month,
            RestrictionDuration::CustomDays(12),
        ];
        for duration in cases {
            assert_eq!(RestrictionDuration::decode(&duration.encode()), Some(duration));
        }
    }

    #[test]
    fn duration_decode_rejects_garbage() {
        assert_eq!(RestrictionDuration::decode("fortnight"), None);
        assert_eq!(RestrictionDuration::decode("days:"), None);
        assert_eq!(RestrictionDuration::decode("days:0"), None);
        assert_eq!(RestrictionDuration::decode("days:-3"), None);
    }

    #[test]
    fn duration_lengths() {
        assert_eq!(RestrictionDuration::None.as_chrono(), None);
        assert_eq!(
            RestrictionDuration::Day.as_chrono(),
            Some(chrono::Duration::days(1))
        );
        assert_eq!(
            RestrictionDuration::CustomDays(3).as_chrono(),
            Some(chrono::Duration::days(3))
        );
    }
}
