use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use guardian_telegram_bot::restriction_manager::RestrictionManager;
use guardian_telegram_bot::storage::{MemoryStore, RestrictionDuration, Store};
use teloxide::types::UserId;

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

async fn harness() -> (Arc<MemoryStore>, RestrictionManager, UserId) {
    let store = Arc::new(MemoryStore::new());
    let manager = RestrictionManager::new(store.clone());
    let user = UserId(123);
    store.upsert_user(user, "U", t0()).await.unwrap();
    (store, manager, user)
}

#[tokio::test]
async fn test_restriction_is_time_bounded() -> Result<(), Box<dyn Error + Send + Sync>> {
    let (store, manager, user) = harness().await;

    let until = manager
        .apply_restriction(user, RestrictionDuration::Day, t0())
        .await?;
    assert_eq!(until, Some(t0() + Duration::days(1)));

    // Restricted strictly before expiry, active at and after it.
    assert!(manager.is_restricted(user, t0() + Duration::hours(1)).await?);
    assert!(!manager.is_restricted(user, t0() + Duration::hours(25)).await?);

    // The expired mute was cleared on read.
    assert_eq!(store.muted_until(user).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_reapplication_overwrites_and_never_stacks(
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (store, manager, user) = harness().await;

    manager
        .apply_restriction(user, RestrictionDuration::Day, t0())
        .await?;
    let second = manager
        .apply_restriction(user, RestrictionDuration::Week, t0() + Duration::hours(1))
        .await?;

    let expected = t0() + Duration::hours(1) + Duration::days(7);
    assert_eq!(second, Some(expected));
    assert_eq!(store.muted_until(user).await?, Some(expected));
    Ok(())
}

#[tokio::test]
async fn test_none_duration_changes_no_state() -> Result<(), Box<dyn Error + Send + Sync>> {
    let (store, manager, user) = harness().await;

    assert_eq!(
        manager
            .apply_restriction(user, RestrictionDuration::None, t0())
            .await?,
        None
    );
    assert_eq!(store.muted_until(user).await?, None);

    // Also leaves an existing mute untouched.
    manager
        .apply_restriction(user, RestrictionDuration::Day, t0())
        .await?;
    manager
        .apply_restriction(user, RestrictionDuration::None, t0() + Duration::hours(2))
        .await?;
    assert_eq!(store.muted_until(user).await?, Some(t0() + Duration::days(1)));
    Ok(())
}
