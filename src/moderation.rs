//! Per-message moderation decision engine.
//!
//! Evaluation order is fixed: administrator exemption, mute suppression,
//! auto-replies, banned links (with whitelist precedence), banned words,
//! allow. First match wins and at most one restriction is applied per
//! message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use teloxide::types::{ChatId, MessageId, UserId};

use crate::config::{setting, DEFAULT_WARNING_MESSAGE};
use crate::restriction_manager::RestrictionManager;
use crate::storage::{BannedPattern, PatternKind, RestrictionDuration, Store, StoreResult};
use crate::transport::{Transport, TransportError};
use crate::user_directory::UserDirectory;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());

/// An inbound group message, already reduced to what moderation needs.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub sender: UserId,
    pub sender_name: String,
    /// True for the configured administrator and for group owners/admins;
    /// decided by the caller before moderation runs.
    pub is_administrator: bool,
    pub chat: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Whether a matched pattern's restriction duration took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionApplied {
    Applied(RestrictionDuration),
    NotApplied,
}

/// Why a message was blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockCause {
    /// The sender is currently muted; the message is discarded silently.
    Muted,
    BannedWord { pattern: String, restriction: RestrictionApplied },
    BannedLink { pattern: String, restriction: RestrictionApplied },
}

/// Moderation outcome for a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    AutoReplied { keyword: String },
    Blocked(BlockCause),
}

#[derive(Clone)]
pub struct MessageModerator {
    store: Arc<dyn Store>,
    restrictions: RestrictionManager,
    users: UserDirectory,
    transport: Arc<dyn Transport>,
}

/// All URL-like substrings of the normalized text.
pub fn extract_urls(text: &str) -> Vec<&str> {
    URL_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Whole-token match: the pattern must cover a complete word of the text,
/// not merely appear as a substring.
pub fn word_matches(text: &str, word: &str) -> bool {
    let pattern = format!(r"\b{}\b", regex::escape(&word.to_lowercase()));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(err) => {
            log::warn!("unusable banned word {word:?}: {err}");
            false
        }
    }
}

fn log_transport_refusal(what: &str, result: Result<(), TransportError>) {
    match result {
        Ok(()) => {}
        Err(TransportError::Forbidden(reason)) => {
            log::warn!("{what} refused by transport: {reason}");
        }
        Err(TransportError::Other(reason)) => {
            log::error!("{what} failed: {reason}");
        }
    }
}

impl MessageModerator {
    pub fn new(
        store: Arc<dyn Store>,
        restrictions: RestrictionManager,
        users: UserDirectory,
        transport: Arc<dyn Transport>,
    ) -> Self {
        MessageModerator {
            store,
            restrictions,
            users,
            transport,
        }
    }

    /// Decide and enforce. Transport refusals (missing delete/restrict
    /// rights) are logged and moderation continues; only storage failures
    /// propagate.
    pub async fn moderate(&self, msg: &IncomingMessage) -> StoreResult<Verdict> {
        if msg.is_administrator {
            return Ok(Verdict::Allowed);
        }

        if self
            .restrictions
            .is_restricted(msg.sender, msg.timestamp)
            .await?
        {
            // Silent discard: no warning, no counters.
            log_transport_refusal(
                "deleting muted user's message",
                self.transport.delete_message(msg.chat, msg.message_id).await,
            );
            return Ok(Verdict::Blocked(BlockCause::Muted));
        }

        let normalized = msg.text.to_lowercase();

        for rule in self.store.auto_replies().await? {
            if normalized.contains(&rule.keyword) {
                self.users.record_message_sent(msg.sender).await?;
                log_transport_refusal(
                    "sending auto-reply",
                    self.transport.send_message(msg.chat, &rule.response).await,
                );
                return Ok(Verdict::AutoReplied {
                    keyword: rule.keyword,
                });
            }
        }

        let whitelist = self.store.whitelist_prefixes().await?;
        let link_rules = self.store.banned_patterns(PatternKind::LinkSubstring).await?;
        for url in extract_urls(&normalized) {
            // Whitelist precedence: a matching prefix exempts the URL from
            // every banned-link check, regardless of overlap.
            if whitelist
                .iter()
                .any(|prefix| url.starts_with(&prefix.to_lowercase()))
            {
                continue;
            }
            if let Some(rule) = link_rules
                .iter()
                .find(|rule| url.contains(&rule.value.to_lowercase()))
            {
                let restriction = self.punish(msg, rule).await?;
                return Ok(Verdict::Blocked(BlockCause::BannedLink {
                    pattern: rule.value.clone(),
                    restriction,
                }));
            }
        }

        for rule in self.store.banned_patterns(PatternKind::Word).await? {
            if word_matches(&normalized, &rule.value) {
                let restriction = self.punish(msg, &rule).await?;
                return Ok(Verdict::Blocked(BlockCause::BannedWord {
                    pattern: rule.value,
                    restriction,
                }));
            }
        }

        self.users.record_message_sent(msg.sender).await?;
        Ok(Verdict::Allowed)
    }

    /// The delete / warn / restrict / count sequence shared by both banned
    /// pattern kinds.
    async fn punish(
        &self,
        msg: &IncomingMessage,
        rule: &BannedPattern,
    ) -> StoreResult<RestrictionApplied> {
        log_transport_refusal(
            "deleting message",
            self.transport.delete_message(msg.chat, msg.message_id).await,
        );

        let warning = self
            .store
            .setting(setting::WARNING_MESSAGE)
            .await?
            .unwrap_or_else(|| DEFAULT_WARNING_MESSAGE.to_string())
            .replace("{user}", &msg.sender_name);
        log_transport_refusal(
            "sending warning",
            self.transport.send_message(msg.chat, &warning).await,
        );

        let applied = match self
            .restrictions
            .apply_restriction(msg.sender, rule.duration, msg.timestamp)
            .await?
        {
            Some(until) => {
                log_transport_refusal(
                    "restricting user",
                    self.transport.restrict_user(msg.chat, msg.sender, until).await,
                );
                RestrictionApplied::Applied(rule.duration)
            }
            None => RestrictionApplied::NotApplied,
        };

        self.users.record_warning(msg.sender).await?;
        Ok(applied)
    }
}
