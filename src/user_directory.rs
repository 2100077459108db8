//! Directory of every user the bot has ever seen: delivery status, warning
//! and message counters, and mute expiry live on the user record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::types::UserId;

use crate::storage::{Store, StoreResult, UserRecord};

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn Store>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        UserDirectory { store }
    }

    /// Record an observed interaction: creates the user on first sight,
    /// refreshes the display name afterwards. Does NOT touch the blocked
    /// flag; that stays monotonic until an explicit [`reactivate`](Self::reactivate).
    pub async fn observe(
        &self,
        id: UserId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.store.upsert_user(id, display_name, now).await
    }

    /// Explicit re-interaction (`/start`): upserts the user and clears the
    /// blocked flag, re-opening the delivery channel.
    pub async fn reactivate(
        &self,
        id: UserId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.store.upsert_user(id, display_name, now).await?;
        self.store.set_user_blocked(id, false).await
    }

    /// Confirmed permanent delivery failure.
    pub async fn mark_blocked(&self, id: UserId) -> StoreResult<()> {
        self.store.set_user_blocked(id, true).await
    }

    pub async fn get(&self, id: UserId) -> StoreResult<Option<UserRecord>> {
        self.store.user(id).await
    }

    pub async fn record_message_sent(&self, id: UserId) -> StoreResult<i64> {
        self.store.incr_message_count(id).await
    }

    pub async fn record_warning(&self, id: UserId) -> StoreResult<i64> {
        self.store.incr_warning_count(id).await
    }

    /// Ids of all users eligible for delivery (not blocked).
    pub async fn active_user_ids(&self) -> StoreResult<Vec<UserId>> {
        self.store.active_user_ids().await
    }

    pub async fn blocked_count(&self) -> StoreResult<u64> {
        self.store.blocked_user_count().await
    }
}
