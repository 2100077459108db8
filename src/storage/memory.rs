//! In-memory [`Store`] backend. Backs the test suite and offline runs;
//! implements exactly the same upsert/outcome contract as [`RedisStore`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::types::{ChatId, MessageId, UserId};

use super::{
    AutoReplyRule, BannedPattern, DeleteOutcome, GroupRecord, MessageRecord, PatternKind,
    RestrictionDuration, Store, StoreResult, UpsertOutcome, UserRecord,
};

#[derive(Default)]
struct Inner {
    banned_words: HashMap<String, RestrictionDuration>,
    banned_links: HashMap<String, RestrictionDuration>,
    whitelist: Vec<String>,
    auto_replies: HashMap<String, String>,
    settings: HashMap<String, String>,
    users: HashMap<u64, UserRecord>,
    groups: HashMap<i64, GroupRecord>,
    messages: HashMap<i32, MessageRecord>,
}

/// Mutex-guarded map store. Every operation takes the lock once, so per-key
/// atomicity holds trivially.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }
}

fn upsert_outcome(previous: Option<impl Sized>) -> UpsertOutcome {
    if previous.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    }
}

fn delete_outcome(removed: bool) -> DeleteOutcome {
    if removed {
        DeleteOutcome::Deleted
    } else {
        DeleteOutcome::NotFound
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_banned_pattern(&self, pattern: &BannedPattern) -> StoreResult<UpsertOutcome> {
        let mut inner = self.lock();
        let table = match pattern.kind {
            PatternKind::Word => &mut inner.banned_words,
            PatternKind::LinkSubstring => &mut inner.banned_links,
        };
        let value = match pattern.kind {
            PatternKind::Word => pattern.value.to_lowercase(),
            PatternKind::LinkSubstring => pattern.value.clone(),
        };
        Ok(upsert_outcome(table.insert(value, pattern.duration)))
    }

    async fn banned_patterns(&self, kind: PatternKind) -> StoreResult<Vec<BannedPattern>> {
        let inner = self.lock();
        let table = match kind {
            PatternKind::Word => &inner.banned_words,
            PatternKind::LinkSubstring => &inner.banned_links,
        };
        Ok(table
            .iter()
            .map(|(value, duration)| BannedPattern {
                value: value.clone(),
                kind,
                duration: *duration,
            })
            .collect())
    }

    async fn delete_banned_pattern(
        &self,
        kind: PatternKind,
        value: &str,
    ) -> StoreResult<DeleteOutcome> {
        let mut inner = self.lock();
        let removed = match kind {
            PatternKind::Word => inner.banned_words.remove(&value.to_lowercase()).is_some(),
            PatternKind::LinkSubstring => inner.banned_links.remove(value).is_some(),
        };
        Ok(delete_outcome(removed))
    }

    async fn upsert_whitelist_prefix(&self, prefix: &str) -> StoreResult<UpsertOutcome> {
        let mut inner = self.lock();
        if inner.whitelist.iter().any(|p| p == prefix) {
            Ok(UpsertOutcome::Updated)
        } else {
            inner.whitelist.push(prefix.to_string());
            Ok(UpsertOutcome::Created)
        }
    }

    async fn whitelist_prefixes(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock().whitelist.clone())
    }

    async fn delete_whitelist_prefix(&self, prefix: &str) -> StoreResult<DeleteOutcome> {
        let mut inner = self.lock();
        let before = inner.whitelist.len();
        inner.whitelist.retain(|p| p != prefix);
        Ok(delete_outcome(inner.whitelist.len() < before))
    }

    async fn upsert_auto_reply(
        &self,
        keyword: &str,
        response: &str,
    ) -> StoreResult<UpsertOutcome> {
        let mut inner = self.lock();
        let previous = inner
            .auto_replies
            .insert(keyword.to_lowercase(), response.to_string());
        Ok(upsert_outcome(previous))
    }

    async fn auto_replies(&self) -> StoreResult<Vec<AutoReplyRule>> {
        Ok(self
            .lock()
            .auto_replies
            .iter()
            .map(|(keyword, response)| AutoReplyRule {
                keyword: keyword.clone(),
                response: response.clone(),
            })
            .collect())
    }

    async fn delete_auto_reply(&self, keyword: &str) -> StoreResult<DeleteOutcome> {
        let removed = self
            .lock()
            .auto_replies
            .remove(&keyword.to_lowercase())
            .is_some();
        Ok(delete_outcome(removed))
    }

    async fn setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock().settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock().settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_setting_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut inner = self.lock();
        if inner.settings.contains_key(key) {
            Ok(false)
        } else {
            inner.settings.insert(key.to_string(), value.to_string());
            Ok(true)
        }
    }

    async fn upsert_user(
        &self,
        id: UserId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        inner
            .users
            .entry(id.0)
            .and_modify(|user| user.display_name = display_name.to_string())
            .or_insert_with(|| UserRecord {
                id,
                display_name: display_name.to_string(),
                blocked: false,
                warning_count: 0,
                muted_until: None,
                message_count: 0,
                first_seen: now,
            });
        Ok(())
    }

    async fn user(&self, id: UserId) -> StoreResult<Option<UserRecord>> {
        Ok(self.lock().users.get(&id.0).cloned())
    }

    async fn all_users(&self) -> StoreResult<Vec<UserRecord>> {
        Ok(self.lock().users.values().cloned().collect())
    }

    async fn active_user_ids(&self) -> StoreResult<Vec<UserId>> {
        Ok(self
            .lock()
            .users
            .values()
            .filter(|user| !user.blocked)
            .map(|user| user.id)
            .collect())
    }

    async fn set_user_blocked(&self, id: UserId, blocked: bool) -> StoreResult<()> {
        if let Some(user) = self.lock().users.get_mut(&id.0) {
            user.blocked = blocked;
        }
        Ok(())
    }

    async fn blocked_user_count(&self) -> StoreResult<u64> {
        Ok(self.lock().users.values().filter(|user| user.blocked).count() as u64)
    }

    async fn incr_message_count(&self, id: UserId) -> StoreResult<i64> {
        let mut inner = self.lock();
        match inner.users.get_mut(&id.0) {
            Some(user) => {
                user.message_count += 1;
                Ok(user.message_count)
            }
            None => Ok(0),
        }
    }

    async fn incr_warning_count(&self, id: UserId) -> StoreResult<i64> {
        let mut inner = self.lock();
        match inner.users.get_mut(&id.0) {
            Some(user) => {
                user.warning_count += 1;
                Ok(user.warning_count)
            }
            None => Ok(0),
        }
    }

    async fn muted_until(&self, id: UserId) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.lock().users.get(&id.0).and_then(|user| user.muted_until))
    }

    async fn set_muted_until(
        &self,
        id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        if let Some(user) = self.lock().users.get_mut(&id.0) {
            user.muted_until = until;
        }
        Ok(())
    }

    async fn upsert_group(&self, id: ChatId, title: &str) -> StoreResult<()> {
        self.lock().groups.insert(
            id.0,
            GroupRecord {
                id,
                title: title.to_string(),
            },
        );
        Ok(())
    }

    async fn remove_group(&self, id: ChatId) -> StoreResult<()> {
        self.lock().groups.remove(&id.0);
        Ok(())
    }

    async fn groups(&self) -> StoreResult<Vec<GroupRecord>> {
        Ok(self.lock().groups.values().cloned().collect())
    }

    async fn record_message(&self, record: &MessageRecord) -> StoreResult<()> {
        self.lock().messages.insert(record.message_id.0, record.clone());
        Ok(())
    }

    async fn set_reaction_count(&self, message_id: MessageId, count: i64) -> StoreResult<()> {
        if let Some(record) = self.lock().messages.get_mut(&message_id.0) {
            record.positive_reaction_count = count;
        }
        Ok(())
    }

    async fn messages_since(
        &self,
        group: ChatId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageRecord>> {
        Ok(self
            .lock()
            .messages
            .values()
            .filter(|record| record.group_id == group && record.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
