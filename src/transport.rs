//! Outbound chat-transport seam. Moderation, broadcasting, and the admin
//! dialog talk to [`Transport`] instead of the Telegram API directly, so the
//! decision logic stays independent of the wire and testable offline.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::payloads::RestrictChatMemberSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatId, ChatPermissions, MessageId, UserId};
use teloxide::{ApiError, Bot, RequestError};
use tokio_util::sync::CancellationToken;

/// Per-recipient result of a broadcast-style delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The recipient has blocked the bot (or is gone); further delivery will
    /// never succeed.
    PermanentFailure,
    /// Any other delivery error; the recipient's state is left unchanged.
    TransientFailure,
}

/// Failures of moderation-path transport actions.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport refused the action for lack of rights. Logged and
    /// skipped; never aborts moderation.
    #[error("transport refused the action: {0}")]
    Forbidden(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// The chat id of a user's private conversation with the bot.
pub fn user_chat(user: UserId) -> ChatId {
    ChatId(user.0 as i64)
}

/// Outbound actions the engine may take against the chat transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn delete_message(&self, chat: ChatId, message: MessageId)
        -> Result<(), TransportError>;
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<(), TransportError>;
    async fn restrict_user(
        &self,
        chat: ChatId,
        user: UserId,
        until: DateTime<Utc>,
    ) -> Result<(), TransportError>;
    /// Deliver a broadcast payload to a user's private chat.
    async fn broadcast_send(&self, user: UserId, payload: &str) -> DeliveryOutcome;
    /// Zero-content delivery check used by the blocked-user sweep.
    async fn probe(&self, user: UserId) -> DeliveryOutcome;
}

fn is_permanent(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Api(
            ApiError::BotBlocked
                | ApiError::UserDeactivated
                | ApiError::ChatNotFound
                | ApiError::CantInitiateConversation
                | ApiError::CantTalkWithBots
        )
    )
}

fn is_forbidden(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Api(
            ApiError::NotEnoughRightsToRestrict
                | ApiError::MessageCantBeDeleted
                | ApiError::CantRestrictSelf
        )
    )
}

fn map_moderation_error(err: RequestError) -> TransportError {
    if is_forbidden(&err) {
        TransportError::Forbidden(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

fn map_delivery(result: Result<(), RequestError>) -> DeliveryOutcome {
    match result {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(err) if is_permanent(&err) => DeliveryOutcome::PermanentFailure,
        Err(_) => DeliveryOutcome::TransientFailure,
    }
}

/// Telegram transport over a [`teloxide::Bot`].
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        TelegramTransport { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> Result<(), TransportError> {
        self.bot
            .delete_message(chat, message)
            .await
            .map(|_| ())
            .map_err(map_moderation_error)
    }

    async fn send_message(&self, chat: ChatId, text: &str) -> Result<(), TransportError> {
        self.bot
            .send_message(chat, text)
            .await
            .map(|_| ())
            .map_err(map_moderation_error)
    }

    async fn restrict_user(
        &self,
        chat: ChatId,
        user: UserId,
        until: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        self.bot
            .restrict_chat_member(chat, user, ChatPermissions::empty())
            .until_date(until)
            .await
            .map(|_| ())
            .map_err(map_moderation_error)
    }

    async fn broadcast_send(&self, user: UserId, payload: &str) -> DeliveryOutcome {
        map_delivery(
            self.bot
                .send_message(user_chat(user), payload)
                .await
                .map(|_| ()),
        )
    }

    async fn probe(&self, user: UserId) -> DeliveryOutcome {
        map_delivery(
            self.bot
                .send_chat_action(user_chat(user), ChatAction::Typing)
                .await
                .map(|_| ()),
        )
    }
}

/// Everything a [`MockTransport`] was asked to do, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    DeletedMessage { chat: ChatId, message: MessageId },
    SentMessage { chat: ChatId, text: String },
    RestrictedUser { chat: ChatId, user: UserId, until: DateTime<Utc> },
    Broadcast { user: UserId, payload: String },
    Probed { user: UserId },
}

/// Recording transport double for the test suite. Failure sets steer the
/// outcome per recipient; `refuse_moderation` simulates a transport that
/// lacks delete/restrict rights.
#[derive(Default)]
pub struct MockTransport {
    actions: Mutex<Vec<TransportAction>>,
    permanent_failures: Mutex<HashSet<u64>>,
    transient_failures: Mutex<HashSet<u64>>,
    refuse_moderation: AtomicBool,
    broadcast_count: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All deliveries to `user` report a permanent failure.
    pub fn fail_permanently(&self, user: UserId) {
        self.permanent_failures.lock().unwrap().insert(user.0);
    }

    /// All deliveries to `user` report a transient failure.
    pub fn fail_transiently(&self, user: UserId) {
        self.transient_failures.lock().unwrap().insert(user.0);
    }

    /// Make delete/restrict return [`TransportError::Forbidden`].
    pub fn refuse_moderation(&self) {
        self.refuse_moderation.store(true, Ordering::SeqCst);
    }

    /// Cancel `token` once `count` broadcast sends have been attempted.
    pub fn cancel_after_broadcasts(&self, count: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((count, token));
    }

    pub fn actions(&self) -> Vec<TransportAction> {
        self.actions.lock().unwrap().clone()
    }

    /// Texts sent to `chat`, in order.
    pub fn texts_sent_to(&self, chat: ChatId) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                TransportAction::SentMessage { chat: c, text } if c == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_messages(&self) -> Vec<MessageId> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                TransportAction::DeletedMessage { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn restrictions(&self) -> Vec<(UserId, DateTime<Utc>)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                TransportAction::RestrictedUser { user, until, .. } => Some((user, until)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: TransportAction) {
        self.actions.lock().unwrap().push(action);
    }

    fn outcome_for(&self, user: UserId) -> DeliveryOutcome {
        if self.permanent_failures.lock().unwrap().contains(&user.0) {
            DeliveryOutcome::PermanentFailure
        } else if self.transient_failures.lock().unwrap().contains(&user.0) {
            DeliveryOutcome::TransientFailure
        } else {
            DeliveryOutcome::Delivered
        }
    }

    fn moderation_result(&self) -> Result<(), TransportError> {
        if self.refuse_moderation.load(Ordering::SeqCst) {
            Err(TransportError::Forbidden("not enough rights".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> Result<(), TransportError> {
        let result = self.moderation_result();
        if result.is_ok() {
            self.record(TransportAction::DeletedMessage { chat, message });
        }
        result
    }

    async fn send_message(&self, chat: ChatId, text: &str) -> Result<(), TransportError> {
        self.record(TransportAction::SentMessage {
            chat,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn restrict_user(
        &self,
        chat: ChatId,
        user: UserId,
        until: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        let result = self.moderation_result();
        if result.is_ok() {
            self.record(TransportAction::RestrictedUser { chat, user, until });
        }
        result
    }

    async fn broadcast_send(&self, user: UserId, payload: &str) -> DeliveryOutcome {
        self.record(TransportAction::Broadcast {
            user,
            payload: payload.to_string(),
        });
        let attempted = self.broadcast_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((count, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if attempted >= *count {
                token.cancel();
            }
        }
        self.outcome_for(user)
    }

    async fn probe(&self, user: UserId) -> DeliveryOutcome {
        self.record(TransportAction::Probed { user });
        self.outcome_for(user)
    }
}
