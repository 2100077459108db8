//! Time-bounded user restrictions. Mute state is read lazily against "now";
//! there is no background timer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::types::UserId;

use crate::storage::{RestrictionDuration, Store, StoreResult};

#[derive(Clone)]
pub struct RestrictionManager {
    store: Arc<dyn Store>,
}

impl RestrictionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        RestrictionManager { store }
    }

    /// A user is restricted iff `muted_until` is set and strictly in the
    /// future. An expired mute is cleared opportunistically on read.
    pub async fn is_restricted(&self, user: UserId, now: DateTime<Utc>) -> StoreResult<bool> {
        match self.store.muted_until(user).await? {
            Some(until) if until > now => Ok(true),
            Some(_) => {
                self.store.set_muted_until(user, None).await?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Apply a restriction. `RestrictionDuration::None` changes no state.
    /// Re-application while already muted overwrites to the new
    /// `now + duration`; restrictions never stack.
    pub async fn apply_restriction(
        &self,
        user: UserId,
        duration: RestrictionDuration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        match duration.as_chrono() {
            Some(length) => {
                let until = now + length;
                self.store.set_muted_until(user, Some(until)).await?;
                Ok(Some(until))
            }
            None => Ok(None),
        }
    }
}
