use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use guardian_telegram_bot::engagement::EngagementTracker;
use guardian_telegram_bot::storage::{MemoryStore, Store};
use teloxide::types::{ChatId, MessageId, UserId};

const GROUP: ChatId = ChatId(-100_900);

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn harness() -> (Arc<MemoryStore>, EngagementTracker) {
    let store = Arc::new(MemoryStore::new());
    let tracker = EngagementTracker::new(store.clone());
    (store, tracker)
}

#[tokio::test]
async fn test_top_reacted_messages_ordering() -> Result<(), Box<dyn Error + Send + Sync>> {
    let (_store, tracker) = harness();
    let counts = [5i64, 2, 8, 1];
    for (i, count) in counts.iter().enumerate() {
        let id = MessageId(i as i32 + 1);
        tracker
            .record_message(
                id,
                UserId(7),
                GROUP,
                &format!("message {}", i + 1),
                t0() + Duration::minutes(i as i64),
            )
            .await?;
        tracker.update_reaction_count(id, *count).await?;
    }

    let now = t0() + Duration::hours(1);
    let top = tracker
        .top_reacted_messages(GROUP, Duration::days(7), 2, now)
        .await?;
    let reactions: Vec<i64> = top.iter().map(|r| r.positive_reaction_count).collect();
    assert_eq!(reactions, vec![8, 5]);
    Ok(())
}

#[tokio::test]
async fn test_reaction_ties_break_by_earlier_timestamp() -> Result<(), Box<dyn Error + Send + Sync>>
{
    let (_store, tracker) = harness();
    tracker
        .record_message(MessageId(1), UserId(7), GROUP, "late", t0() + Duration::minutes(10))
        .await?;
    tracker
        .record_message(MessageId(2), UserId(7), GROUP, "early", t0())
        .await?;
    tracker.update_reaction_count(MessageId(1), 5).await?;
    tracker.update_reaction_count(MessageId(2), 5).await?;

    let top = tracker
        .top_reacted_messages(GROUP, Duration::days(7), 2, t0() + Duration::hours(1))
        .await?;
    assert_eq!(top[0].message_id, MessageId(2));
    assert_eq!(top[1].message_id, MessageId(1));
    Ok(())
}

#[tokio::test]
async fn test_window_excludes_old_messages() -> Result<(), Box<dyn Error + Send + Sync>> {
    let (_store, tracker) = harness();
    let now = t0() + Duration::days(10);
    tracker
        .record_message(MessageId(1), UserId(7), GROUP, "ancient", t0())
        .await?;
    tracker
        .record_message(MessageId(2), UserId(7), GROUP, "recent", now - Duration::days(1))
        .await?;
    tracker.update_reaction_count(MessageId(1), 100).await?;
    tracker.update_reaction_count(MessageId(2), 1).await?;

    let top = tracker
        .top_reacted_messages(GROUP, Duration::days(7), 10, now)
        .await?;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].message_id, MessageId(2));
    Ok(())
}

#[tokio::test]
async fn test_reaction_count_is_overwritten_not_incremented(
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (_store, tracker) = harness();
    tracker
        .record_message(MessageId(1), UserId(7), GROUP, "m", t0())
        .await?;
    tracker.update_reaction_count(MessageId(1), 4).await?;
    tracker.update_reaction_count(MessageId(1), 3).await?;

    let top = tracker
        .top_reacted_messages(GROUP, Duration::days(7), 1, t0() + Duration::hours(1))
        .await?;
    assert_eq!(top[0].positive_reaction_count, 3);
    Ok(())
}

#[tokio::test]
async fn test_top_active_users() -> Result<(), Box<dyn Error + Send + Sync>> {
    let (store, tracker) = harness();
    store.upsert_user(UserId(1), "early", t0()).await?;
    store
        .upsert_user(UserId(2), "late", t0() + Duration::minutes(1))
        .await?;
    store
        .upsert_user(UserId(3), "busy", t0() + Duration::minutes(2))
        .await?;

    for _ in 0..3 {
        store.incr_message_count(UserId(3)).await?;
    }
    store.incr_message_count(UserId(1)).await?;
    store.incr_message_count(UserId(2)).await?;

    let top = tracker.top_active_users(10).await?;
    // Most messages first; equal counts break toward the earlier first-seen.
    assert_eq!(top[0].id, UserId(3));
    assert_eq!(top[1].id, UserId(1));
    assert_eq!(top[2].id, UserId(2));

    let top = tracker.top_active_users(1).await?;
    assert_eq!(top.len(), 1);
    Ok(())
}
