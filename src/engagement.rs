//! Engagement aggregation: reaction snapshots per message and message counts
//! per user, reduced to leaderboard reports.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use teloxide::types::{ChatId, MessageId, UserId};

use crate::storage::{MessageRecord, Store, StoreResult, UserRecord};

#[derive(Clone)]
pub struct EngagementTracker {
    store: Arc<dyn Store>,
}

impl EngagementTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        EngagementTracker { store }
    }

    /// Record a message once, with a zero reaction snapshot.
    pub async fn record_message(
        &self,
        message_id: MessageId,
        user_id: UserId,
        group_id: ChatId,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.store
            .record_message(&MessageRecord {
                message_id,
                user_id,
                group_id,
                text: text.to_string(),
                positive_reaction_count: 0,
                timestamp,
            })
            .await
    }

    /// Overwrite the reaction snapshot with the transport's latest count.
    pub async fn update_reaction_count(
        &self,
        message_id: MessageId,
        count: i64,
    ) -> StoreResult<()> {
        self.store.set_reaction_count(message_id, count).await
    }

    /// Most-reacted messages of a group over the trailing window, reaction
    /// count descending, ties broken by earlier timestamp.
    pub async fn top_reacted_messages(
        &self,
        group: ChatId,
        window: Duration,
        limit: usize,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageRecord>> {
        let mut records = self.store.messages_since(group, now - window).await?;
        records.sort_by(|a, b| {
            b.positive_reaction_count
                .cmp(&a.positive_reaction_count)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        records.truncate(limit);
        Ok(records)
    }

    /// Most-active users, message count descending, ties broken by earlier
    /// first-seen time.
    pub async fn top_active_users(&self, limit: usize) -> StoreResult<Vec<UserRecord>> {
        let mut users = self.store.all_users().await?;
        users.sort_by(|a, b| {
            b.message_count
                .cmp(&a.message_count)
                .then(a.first_seen.cmp(&b.first_seen))
        });
        users.truncate(limit);
        Ok(users)
    }
}
