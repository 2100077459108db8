use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use guardian_telegram_bot::moderation::{
    BlockCause, IncomingMessage, MessageModerator, RestrictionApplied, Verdict,
};
use guardian_telegram_bot::restriction_manager::RestrictionManager;
use guardian_telegram_bot::storage::{
    BannedPattern, MemoryStore, PatternKind, RestrictionDuration, Store,
};
use guardian_telegram_bot::transport::MockTransport;
use guardian_telegram_bot::user_directory::UserDirectory;
use teloxide::types::{ChatId, MessageId, UserId};

const GROUP: ChatId = ChatId(-100_700);
const SENDER: UserId = UserId(123);

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

struct Harness {
    store: Arc<MemoryStore>,
    transport: Arc<MockTransport>,
    moderator: MessageModerator,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    let users = UserDirectory::new(store.clone());
    let restrictions = RestrictionManager::new(store.clone());
    let moderator = MessageModerator::new(
        store.clone(),
        restrictions,
        users.clone(),
        transport.clone(),
    );
    users.observe(SENDER, "Mallory", t0()).await.unwrap();
    Harness {
        store,
        transport,
        moderator,
    }
}

fn message(text: &str, id: i32, at: DateTime<Utc>) -> IncomingMessage {
    IncomingMessage {
        sender: SENDER,
        sender_name: "Mallory".to_string(),
        is_administrator: false,
        chat: GROUP,
        message_id: MessageId(id),
        text: text.to_string(),
        timestamp: at,
    }
}

async fn ban_word(store: &MemoryStore, word: &str, duration: RestrictionDuration) {
    store
        .upsert_banned_pattern(&BannedPattern {
            value: word.to_string(),
            kind: PatternKind::Word,
            duration,
        })
        .await
        .unwrap();
}

async fn ban_link(store: &MemoryStore, substring: &str, duration: RestrictionDuration) {
    store
        .upsert_banned_pattern(&BannedPattern {
            value: substring.to_string(),
            kind: PatternKind::LinkSubstring,
            duration,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_banned_word_is_deleted_and_restricted() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    ban_word(&h.store, "spam", RestrictionDuration::Day).await;

    let verdict = h.moderator.moderate(&message("this is spam content", 1, t0())).await?;
    assert_eq!(
        verdict,
        Verdict::Blocked(BlockCause::BannedWord {
            pattern: "spam".to_string(),
            restriction: RestrictionApplied::Applied(RestrictionDuration::Day),
        })
    );

    // Deleted, warned, restricted, counted.
    assert_eq!(h.transport.deleted_messages(), vec![MessageId(1)]);
    let warnings = h.transport.texts_sent_to(GROUP);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("Mallory"));
    assert_eq!(
        h.transport.restrictions(),
        vec![(SENDER, t0() + Duration::days(1))]
    );
    let user = h.store.user(SENDER).await?.unwrap();
    assert_eq!(user.warning_count, 1);
    assert_eq!(user.muted_until, Some(t0() + Duration::days(1)));
    assert_eq!(user.message_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_muted_user_is_suppressed_then_resumes() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    ban_word(&h.store, "spam", RestrictionDuration::Day).await;
    h.moderator.moderate(&message("this is spam content", 1, t0())).await?;

    // One hour later: discarded silently, nothing counted, no new warning.
    let verdict = h
        .moderator
        .moderate(&message("hello again", 2, t0() + Duration::hours(1)))
        .await?;
    assert_eq!(verdict, Verdict::Blocked(BlockCause::Muted));
    assert_eq!(
        h.transport.deleted_messages(),
        vec![MessageId(1), MessageId(2)]
    );
    assert_eq!(h.transport.texts_sent_to(GROUP).len(), 1);
    let user = h.store.user(SENDER).await?.unwrap();
    assert_eq!(user.message_count, 0);
    assert_eq!(user.warning_count, 1);

    // After expiry moderation resumes without manual intervention.
    let verdict = h
        .moderator
        .moderate(&message("hello once more", 3, t0() + Duration::hours(25)))
        .await?;
    assert_eq!(verdict, Verdict::Allowed);
    assert_eq!(h.store.user(SENDER).await?.unwrap().message_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_whitelist_precedence_over_banned_links() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    h.store
        .upsert_whitelist_prefix("https://good.example/")
        .await?;
    ban_link(&h.store, "bad", RestrictionDuration::Week).await;

    // The URL matches a whitelist prefix AND contains a banned substring:
    // the whitelist wins.
    let verdict = h
        .moderator
        .moderate(&message("see https://good.example/bad/page", 1, t0()))
        .await?;
    assert_eq!(verdict, Verdict::Allowed);
    assert!(h.transport.deleted_messages().is_empty());

    let verdict = h
        .moderator
        .moderate(&message("see https://evil.example/bad/page", 2, t0()))
        .await?;
    assert_eq!(
        verdict,
        Verdict::Blocked(BlockCause::BannedLink {
            pattern: "bad".to_string(),
            restriction: RestrictionApplied::Applied(RestrictionDuration::Week),
        })
    );
    assert_eq!(h.transport.deleted_messages(), vec![MessageId(2)]);
    Ok(())
}

#[tokio::test]
async fn test_administrators_are_exempt() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    ban_word(&h.store, "spam", RestrictionDuration::Day).await;

    let mut msg = message("spam spam spam", 1, t0());
    msg.is_administrator = true;
    assert_eq!(h.moderator.moderate(&msg).await?, Verdict::Allowed);
    assert!(h.transport.actions().is_empty());
    assert_eq!(h.store.user(SENDER).await?.unwrap().message_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_auto_reply_runs_before_ban_checks() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    h.store.upsert_auto_reply("price", "See the pinned post.").await?;
    ban_word(&h.store, "spam", RestrictionDuration::Day).await;

    let verdict = h
        .moderator
        .moderate(&message("what is the PRICE of spam?", 1, t0()))
        .await?;
    assert_eq!(
        verdict,
        Verdict::AutoReplied {
            keyword: "price".to_string()
        }
    );
    assert_eq!(
        h.transport.texts_sent_to(GROUP),
        vec!["See the pinned post.".to_string()]
    );
    assert!(h.transport.deleted_messages().is_empty());

    let user = h.store.user(SENDER).await?.unwrap();
    assert_eq!(user.message_count, 1);
    assert_eq!(user.muted_until, None);
    Ok(())
}

#[tokio::test]
async fn test_word_boundary_semantics() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    ban_word(&h.store, "spam", RestrictionDuration::Day).await;

    // Substring inside a longer token does not trigger.
    let verdict = h
        .moderator
        .moderate(&message("the spammer has arrived", 1, t0()))
        .await?;
    assert_eq!(verdict, Verdict::Allowed);
    assert_eq!(h.store.user(SENDER).await?.unwrap().message_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_none_duration_removes_message_only() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    ban_word(&h.store, "junk", RestrictionDuration::None).await;

    let verdict = h.moderator.moderate(&message("pure junk", 1, t0())).await?;
    assert_eq!(
        verdict,
        Verdict::Blocked(BlockCause::BannedWord {
            pattern: "junk".to_string(),
            restriction: RestrictionApplied::NotApplied,
        })
    );
    assert_eq!(h.transport.deleted_messages(), vec![MessageId(1)]);
    assert!(h.transport.restrictions().is_empty());

    let user = h.store.user(SENDER).await?.unwrap();
    assert_eq!(user.muted_until, None);
    assert_eq!(user.warning_count, 1);

    // Not muted: the next clean message goes through.
    let verdict = h
        .moderator
        .moderate(&message("clean message", 2, t0() + Duration::minutes(1)))
        .await?;
    assert_eq!(verdict, Verdict::Allowed);
    Ok(())
}

#[tokio::test]
async fn test_single_restriction_per_message() -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    ban_word(&h.store, "spam", RestrictionDuration::Day).await;
    ban_word(&h.store, "scam", RestrictionDuration::Week).await;

    // Both words match; first match wins and only one punishment lands.
    let verdict = h.moderator.moderate(&message("spam and scam", 1, t0())).await?;
    assert!(matches!(verdict, Verdict::Blocked(BlockCause::BannedWord { .. })));
    assert_eq!(h.transport.restrictions().len(), 1);
    assert_eq!(h.store.user(SENDER).await?.unwrap().warning_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_transport_refusal_never_crashes_moderation(
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let h = harness().await;
    h.transport.refuse_moderation();
    ban_word(&h.store, "spam", RestrictionDuration::Day).await;

    // Delete and restrict are refused by the transport; the verdict and the
    // stored mute still stand, and no error escapes.
    let verdict = h.moderator.moderate(&message("spam here", 1, t0())).await?;
    assert!(matches!(verdict, Verdict::Blocked(BlockCause::BannedWord { .. })));
    assert!(h.transport.deleted_messages().is_empty());
    assert_eq!(
        h.store.user(SENDER).await?.unwrap().muted_until,
        Some(t0() + Duration::days(1))
    );
    Ok(())
}
