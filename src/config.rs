//! Centralized configuration: Redis key layout, settings names, timing
//! constants, and the environment-derived [`BotConfig`] injected into every
//! handler at startup.

use anyhow::Context;
use std::env;
use teloxide::types::UserId;

/// **Redis Key Prefixes and Names:** identify categories of data stored in Redis.
pub mod key {
    /// Prefix for user record hashes (e.g. `"guard:users:<user_id>"`).
    pub const USERS_PREFIX: &str = "guard:users:";
    /// Set of all known user ids.
    pub const USERS_INDEX: &str = "guard:users";
    /// Prefix for group record hashes (e.g. `"guard:chats:<chat_id>"`).
    pub const CHATS_PREFIX: &str = "guard:chats:";
    /// Set of all groups the bot currently belongs to.
    pub const CHATS_INDEX: &str = "guard:chats";
    /// Hash of banned words: word -> encoded restriction duration.
    pub const BANNED_WORDS: &str = "guard:banned_words";
    /// Hash of banned link substrings: pattern -> encoded restriction duration.
    pub const BANNED_LINKS: &str = "guard:banned_links";
    /// Set of whitelisted link prefixes.
    pub const WHITELISTED_LINKS: &str = "guard:whitelisted_links";
    /// Hash of auto-reply rules: lower-cased keyword -> reply text.
    pub const AUTO_REPLIES: &str = "guard:auto_replies";
    /// Hash of free-form settings: key -> value.
    pub const SETTINGS: &str = "guard:settings";
    /// Prefix for message record hashes (e.g. `"guard:messages:<message_id>"`).
    pub const MESSAGES_PREFIX: &str = "guard:messages:";
}

/// **Redis Key Suffixes:** common endings for composite Redis keys.
pub mod suffix {
    /// Suffix for a group's timestamp-ordered message index
    /// (e.g. `"guard:chats:<chat_id>:messages"`, a ZSET scored by unix time).
    pub const MESSAGES: &str = ":messages";
}

/// **Redis Hash Field Names:** keys within Redis hashes for user/group/message properties.
pub mod field {
    /// Display name of a user in the `guard:users:<id>` hash.
    pub const DISPLAY_NAME: &str = "display_name";
    /// Whether delivery to the user is known to fail permanently (`"0"`/`"1"`).
    pub const BLOCKED: &str = "blocked";
    /// Number of moderation warnings issued to the user.
    pub const WARNINGS: &str = "warnings";
    /// Unix timestamp until which the user is muted; absent when not muted.
    pub const MUTED_UNTIL: &str = "muted_until";
    /// Number of accepted messages observed from the user.
    pub const MSG_COUNT: &str = "msg_count";
    /// Unix timestamp of the user's first observed interaction.
    pub const FIRST_SEEN: &str = "first_seen";
    /// Title of a group in the `guard:chats:<id>` hash.
    pub const TITLE: &str = "title";
    /// Sender id of a recorded message.
    pub const USER_ID: &str = "user_id";
    /// Group id of a recorded message.
    pub const CHAT_ID: &str = "chat_id";
    /// Text of a recorded message.
    pub const TEXT: &str = "text";
    /// Latest positive-reaction snapshot for a recorded message.
    pub const REACTIONS: &str = "reactions";
    /// Unix timestamp of a recorded message.
    pub const TIMESTAMP: &str = "timestamp";
}

/// **Setting Keys:** well-known entries of the settings table.
pub mod setting {
    /// Greeting sent on `/start` and shown above the admin panel.
    pub const WELCOME_MESSAGE: &str = "welcome_message";
    /// Warning posted when a message is removed; `{user}` expands to the sender.
    pub const WARNING_MESSAGE: &str = "warning_message";
}

/// Default value seeded for [`setting::WELCOME_MESSAGE`] on first startup.
pub const DEFAULT_WELCOME_MESSAGE: &str = "Welcome to the group guardian bot!";

/// Default value seeded for [`setting::WARNING_MESSAGE`] on first startup.
pub const DEFAULT_WARNING_MESSAGE: &str =
    "A message from {user} was removed for violating the group rules.";

/// Inactivity timeout after which an open admin dialog resets to idle.
pub const DIALOG_TIMEOUT_SECS: i64 = 300;

/// Delay between individual broadcast sends, to respect transport rate limits.
pub const BROADCAST_PACE_MS: u64 = 100;

/// Trailing window over which the reaction leaderboard is computed.
pub const LEADERBOARD_WINDOW_DAYS: i64 = 7;

/// Number of entries shown in leaderboard reports.
pub const LEADERBOARD_LIMIT: usize = 10;

/// Fallback trigger phrase that opens the admin panel from a private chat.
pub const DEFAULT_PANEL_TRIGGER: &str = "guardian";

/// Configuration assembled once at startup and passed by reference into every
/// component; there is no ambient global state.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram bot token.
    pub token: String,
    /// The single administrator principal. All panel and dialog interactions
    /// are keyed to this identity.
    pub admin_id: UserId,
    /// Connection string of the backing store.
    pub redis_url: String,
    /// Trigger phrase that opens the admin panel (compared case-insensitively).
    pub panel_trigger: String,
}

impl BotConfig {
    /// Read the configuration from the environment. Missing or malformed
    /// variables are fatal: the process must not start without them.
    pub fn from_env() -> anyhow::Result<Self> {
        let token = env::var("BOT_TOKEN").context("BOT_TOKEN must be set")?;
        let admin_id = env::var("ADMIN_ID")
            .context("ADMIN_ID must be set")?
            .parse::<u64>()
            .context("ADMIN_ID must be a numeric Telegram user id")?;
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let panel_trigger =
            env::var("PANEL_TRIGGER").unwrap_or_else(|_| DEFAULT_PANEL_TRIGGER.to_string());
        Ok(BotConfig {
            token,
            admin_id: UserId(admin_id),
            redis_url,
            panel_trigger,
        })
    }
}
