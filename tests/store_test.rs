use std::error::Error;

use chrono::DateTime;
use guardian_telegram_bot::config::setting;
use guardian_telegram_bot::storage::{
    seed_default_settings, BannedPattern, DeleteOutcome, MemoryStore, PatternKind,
    RestrictionDuration, Store, UpsertOutcome,
};
use teloxide::types::{ChatId, UserId};

fn t0() -> chrono::DateTime<chrono::Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

#[tokio::test]
async fn test_upsert_idempotence() -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = MemoryStore::new();

    let first = store
        .upsert_banned_pattern(&BannedPattern {
            value: "spam".to_string(),
            kind: PatternKind::Word,
            duration: RestrictionDuration::Day,
        })
        .await?;
    assert_eq!(first, UpsertOutcome::Created);

    // Same key, different duration: exactly one entry, second duration wins.
    let second = store
        .upsert_banned_pattern(&BannedPattern {
            value: "spam".to_string(),
            kind: PatternKind::Word,
            duration: RestrictionDuration::Month,
        })
        .await?;
    assert_eq!(second, UpsertOutcome::Updated);

    let patterns = store.banned_patterns(PatternKind::Word).await?;
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].duration, RestrictionDuration::Month);
    Ok(())
}

#[tokio::test]
async fn test_delete_outcomes() -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = MemoryStore::new();
    store
        .upsert_banned_pattern(&BannedPattern {
            value: "junk".to_string(),
            kind: PatternKind::LinkSubstring,
            duration: RestrictionDuration::None,
        })
        .await?;

    assert_eq!(
        store
            .delete_banned_pattern(PatternKind::LinkSubstring, "junk")
            .await?,
        DeleteOutcome::Deleted
    );
    assert_eq!(
        store
            .delete_banned_pattern(PatternKind::LinkSubstring, "junk")
            .await?,
        DeleteOutcome::NotFound
    );
    Ok(())
}

#[tokio::test]
async fn test_auto_reply_keyword_is_case_insensitive() -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = MemoryStore::new();
    assert_eq!(
        store.upsert_auto_reply("Hello", "hi!").await?,
        UpsertOutcome::Created
    );
    assert_eq!(
        store.upsert_auto_reply("HELLO", "welcome!").await?,
        UpsertOutcome::Updated
    );

    let replies = store.auto_replies().await?;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].keyword, "hello");
    assert_eq!(replies[0].response, "welcome!");

    assert_eq!(store.delete_auto_reply("hello").await?, DeleteOutcome::Deleted);
    Ok(())
}

#[tokio::test]
async fn test_whitelist_set_semantics() -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = MemoryStore::new();
    assert_eq!(
        store.upsert_whitelist_prefix("https://ok.example/").await?,
        UpsertOutcome::Created
    );
    assert_eq!(
        store.upsert_whitelist_prefix("https://ok.example/").await?,
        UpsertOutcome::Updated
    );
    assert_eq!(store.whitelist_prefixes().await?.len(), 1);

    assert_eq!(
        store.delete_whitelist_prefix("https://ok.example/").await?,
        DeleteOutcome::Deleted
    );
    assert_eq!(
        store.delete_whitelist_prefix("https://ok.example/").await?,
        DeleteOutcome::NotFound
    );
    Ok(())
}

#[tokio::test]
async fn test_settings_and_seeding() -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = MemoryStore::new();
    assert_eq!(store.setting("welcome_message").await?, None);

    seed_default_settings(&store).await?;
    assert!(store.setting(setting::WELCOME_MESSAGE).await?.is_some());
    assert!(store.setting(setting::WARNING_MESSAGE).await?.is_some());

    // Seeding never overwrites an admin-configured value.
    store.set_setting(setting::WELCOME_MESSAGE, "custom").await?;
    seed_default_settings(&store).await?;
    assert_eq!(
        store.setting(setting::WELCOME_MESSAGE).await?.as_deref(),
        Some("custom")
    );
    Ok(())
}

#[tokio::test]
async fn test_user_lifecycle() -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = MemoryStore::new();
    let id = UserId(42);

    store.upsert_user(id, "Alice", t0()).await?;
    let user = store.user(id).await?.unwrap();
    assert_eq!(user.display_name, "Alice");
    assert!(!user.blocked);
    assert_eq!(user.message_count, 0);
    assert_eq!(user.first_seen, t0());

    // A later upsert refreshes the name but keeps first-seen and counters.
    store.incr_message_count(id).await?;
    store
        .upsert_user(id, "Alice B.", t0() + chrono::Duration::hours(1))
        .await?;
    let user = store.user(id).await?.unwrap();
    assert_eq!(user.display_name, "Alice B.");
    assert_eq!(user.first_seen, t0());
    assert_eq!(user.message_count, 1);

    store.set_user_blocked(id, true).await?;
    assert_eq!(store.blocked_user_count().await?, 1);
    assert!(store.active_user_ids().await?.is_empty());

    // Blocked stays set across ordinary upserts; only an explicit reset
    // clears it.
    store.upsert_user(id, "Alice B.", t0()).await?;
    assert!(store.user(id).await?.unwrap().blocked);
    store.set_user_blocked(id, false).await?;
    assert_eq!(store.active_user_ids().await?, vec![id]);
    Ok(())
}

#[tokio::test]
async fn test_group_registry() -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = MemoryStore::new();
    let id = ChatId(-100_500);

    store.upsert_group(id, "testers").await?;
    let groups = store.groups().await?;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].title, "testers");

    store.remove_group(id).await?;
    assert!(store.groups().await?.is_empty());
    Ok(())
}
