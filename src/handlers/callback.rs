//! Inline-keyboard callbacks: the admin control panel.
//!
//! Callback payloads are compact JSON, parsed once into [`CallbackCommand`]
//! at this boundary. Unknown or malformed payloads, and payloads from anyone
//! but the administrator, fail closed: logged, acknowledged, ignored.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use teloxide::payloads::EditMessageTextSetters;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, UserId,
};
use tokio_util::sync::CancellationToken;

use crate::config::{LEADERBOARD_LIMIT, LEADERBOARD_WINDOW_DAYS};
use crate::dialog::{DialogEffect, DialogEntry, RuleTarget, SettingTarget};
use crate::handlers::AppState;
use crate::storage::{
    DeleteOutcome, MessageRecord, PatternKind, RestrictionDuration, Store, StoreResult,
    UserRecord,
};

/// A validated panel command. The wire form is compact JSON tagged with
/// `"a"`; Telegram limits callback data to 64 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "a")]
pub enum CallbackCommand {
    #[serde(rename = "menu")]
    MainMenu,
    #[serde(rename = "ban")]
    ManageBanning,
    #[serde(rename = "bcast")]
    ManageBroadcast,
    #[serde(rename = "cfg")]
    ManageSettings,
    #[serde(rename = "eng")]
    ManageEngagement,
    #[serde(rename = "close")]
    ClosePanel,
    #[serde(rename = "list")]
    ListRules {
        #[serde(rename = "k")]
        kind: RuleTarget,
    },
    #[serde(rename = "add")]
    AddRule {
        #[serde(rename = "k")]
        kind: RuleTarget,
    },
    #[serde(rename = "delmenu")]
    DeleteMenu {
        #[serde(rename = "k")]
        kind: RuleTarget,
    },
    #[serde(rename = "del")]
    ConfirmDelete {
        #[serde(rename = "k")]
        kind: RuleTarget,
        #[serde(rename = "v")]
        value: String,
    },
    #[serde(rename = "dur")]
    PickDuration {
        #[serde(rename = "d")]
        duration: String,
    },
    #[serde(rename = "durc")]
    CustomDuration,
    #[serde(rename = "go")]
    BroadcastStart,
    #[serde(rename = "stop")]
    BroadcastCancel,
    #[serde(rename = "sweep")]
    CheckBlocked,
    #[serde(rename = "welcome")]
    EditWelcome,
    #[serde(rename = "warn")]
    EditWarning,
    #[serde(rename = "topm")]
    TopMessages {
        #[serde(rename = "g")]
        group: i64,
    },
    #[serde(rename = "topu")]
    TopUsers,
    #[serde(rename = "reply")]
    SupportReply {
        #[serde(rename = "u")]
        user: u64,
    },
}

impl CallbackCommand {
    /// Wire form, or `None` when it would exceed Telegram's 64-byte limit.
    pub fn encode(&self) -> Option<String> {
        let data = serde_json::to_string(self).ok()?;
        if data.len() <= 64 {
            Some(data)
        } else {
            None
        }
    }

    /// Parse the wire form; anything unrecognized is rejected here.
    pub fn parse(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}

fn button(label: &str, command: &CallbackCommand) -> Option<InlineKeyboardButton> {
    match command.encode() {
        Some(data) => Some(InlineKeyboardButton::callback(label, data)),
        None => {
            log::warn!("callback payload too long for {label:?}, button skipped");
            None
        }
    }
}

fn rows(buttons: Vec<Option<InlineKeyboardButton>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        buttons
            .into_iter()
            .flatten()
            .map(|b| vec![b])
            .collect::<Vec<_>>(),
    )
}

pub fn main_menu_keyboard() -> InlineKeyboardMarkup {
    rows(vec![
        button("🚫 Manage banning", &CallbackCommand::ManageBanning),
        button("📢 Broadcast", &CallbackCommand::ManageBroadcast),
        button("⚙️ Settings", &CallbackCommand::ManageSettings),
        button("📊 Engagement", &CallbackCommand::ManageEngagement),
        button("❌ Close", &CallbackCommand::ClosePanel),
    ])
}

fn banning_keyboard() -> InlineKeyboardMarkup {
    let list = |kind| CallbackCommand::ListRules { kind };
    rows(vec![
        button("📝 Banned words", &list(RuleTarget::BannedWord)),
        button("🔗 Banned links", &list(RuleTarget::BannedLink)),
        button("✅ Whitelisted links", &list(RuleTarget::WhitelistPrefix)),
        button("🤖 Auto-replies", &list(RuleTarget::AutoReply)),
        button("⬅️ Back", &CallbackCommand::MainMenu),
    ])
}

fn rules_keyboard(kind: RuleTarget) -> InlineKeyboardMarkup {
    rows(vec![
        button("➕ Add", &CallbackCommand::AddRule { kind }),
        button("🗑️ Delete", &CallbackCommand::DeleteMenu { kind }),
        button("⬅️ Back", &CallbackCommand::ManageBanning),
    ])
}

fn delete_keyboard(kind: RuleTarget, values: &[String]) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Option<InlineKeyboardButton>> = values
        .iter()
        .map(|value| {
            button(
                &format!("🗑️ {value}"),
                &CallbackCommand::ConfirmDelete {
                    kind,
                    value: value.clone(),
                },
            )
        })
        .collect();
    buttons.push(button("⬅️ Back", &CallbackCommand::ListRules { kind }));
    rows(buttons)
}

pub fn duration_keyboard() -> InlineKeyboardMarkup {
    let pick = |duration: RestrictionDuration| CallbackCommand::PickDuration {
        duration: duration.encode(),
    };
    rows(vec![
        button("No restriction", &pick(RestrictionDuration::None)),
        button("1 day", &pick(RestrictionDuration::Day)),
        button("1 week", &pick(RestrictionDuration::Week)),
        button("1 month", &pick(RestrictionDuration::Month)),
        button("Custom…", &CallbackCommand::CustomDuration),
    ])
}

fn broadcast_keyboard(blocked_count: u64) -> InlineKeyboardMarkup {
    rows(vec![
        button("✍️ New broadcast", &CallbackCommand::BroadcastStart),
        button("🛑 Cancel running broadcast", &CallbackCommand::BroadcastCancel),
        button(
            &format!("👥 Check blocked users ({blocked_count})"),
            &CallbackCommand::CheckBlocked,
        ),
        button("⬅️ Back", &CallbackCommand::MainMenu),
    ])
}

fn settings_keyboard() -> InlineKeyboardMarkup {
    rows(vec![
        button("👋 Edit welcome message", &CallbackCommand::EditWelcome),
        button("⚠️ Edit warning message", &CallbackCommand::EditWarning),
        button("⬅️ Back", &CallbackCommand::MainMenu),
    ])
}

fn engagement_keyboard(groups: &[crate::storage::GroupRecord]) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Option<InlineKeyboardButton>> = groups
        .iter()
        .map(|group| {
            button(
                &format!("🏆 Top messages: {}", group.title),
                &CallbackCommand::TopMessages { group: group.id.0 },
            )
        })
        .collect();
    buttons.push(button("🥇 Most active users", &CallbackCommand::TopUsers));
    buttons.push(button("⬅️ Back", &CallbackCommand::MainMenu));
    rows(buttons)
}

pub fn support_reply_keyboard(user: UserId) -> InlineKeyboardMarkup {
    rows(vec![button(
        "✍️ Reply to user",
        &CallbackCommand::SupportReply { user: user.0 },
    )])
}

async fn rule_values(store: &dyn Store, kind: RuleTarget) -> StoreResult<Vec<String>> {
    Ok(match kind {
        RuleTarget::BannedWord => store
            .banned_patterns(PatternKind::Word)
            .await?
            .into_iter()
            .map(|p| p.value)
            .collect(),
        RuleTarget::BannedLink => store
            .banned_patterns(PatternKind::LinkSubstring)
            .await?
            .into_iter()
            .map(|p| p.value)
            .collect(),
        RuleTarget::WhitelistPrefix => store.whitelist_prefixes().await?,
        RuleTarget::AutoReply => store
            .auto_replies()
            .await?
            .into_iter()
            .map(|r| r.keyword)
            .collect(),
    })
}

async fn rule_list_text(store: &dyn Store, kind: RuleTarget) -> StoreResult<String> {
    let lines: Vec<String> = match kind {
        RuleTarget::BannedWord | RuleTarget::BannedLink => {
            let pattern_kind = match kind {
                RuleTarget::BannedWord => PatternKind::Word,
                _ => PatternKind::LinkSubstring,
            };
            let mut patterns = store.banned_patterns(pattern_kind).await?;
            patterns.sort_by(|a, b| a.value.cmp(&b.value));
            patterns
                .into_iter()
                .map(|p| format!("- {} ({})", p.value, p.duration.label()))
                .collect()
        }
        RuleTarget::WhitelistPrefix => {
            let mut prefixes = store.whitelist_prefixes().await?;
            prefixes.sort();
            prefixes.into_iter().map(|p| format!("- {p}")).collect()
        }
        RuleTarget::AutoReply => {
            let mut replies = store.auto_replies().await?;
            replies.sort_by(|a, b| a.keyword.cmp(&b.keyword));
            replies
                .into_iter()
                .map(|r| format!("- {} -> {}", r.keyword, r.response))
                .collect()
        }
    };
    let body = if lines.is_empty() {
        "No entries.".to_string()
    } else {
        lines.join("\n")
    };
    Ok(format!("{}:\n{body}", kind.label()))
}

async fn delete_rule(
    store: &dyn Store,
    kind: RuleTarget,
    value: &str,
) -> StoreResult<DeleteOutcome> {
    match kind {
        RuleTarget::BannedWord => store.delete_banned_pattern(PatternKind::Word, value).await,
        RuleTarget::BannedLink => {
            store
                .delete_banned_pattern(PatternKind::LinkSubstring, value)
                .await
        }
        RuleTarget::WhitelistPrefix => store.delete_whitelist_prefix(value).await,
        RuleTarget::AutoReply => store.delete_auto_reply(value).await,
    }
}

fn snippet(text: &str) -> String {
    let short: String = text.chars().take(40).collect();
    if short.len() < text.len() {
        format!("{short}…")
    } else {
        short
    }
}

fn format_top_messages(records: &[MessageRecord]) -> String {
    if records.is_empty() {
        return "No messages in the window.".to_string();
    }
    records
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {} reactions — {}", i + 1, r.positive_reaction_count, snippet(&r.text)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_top_users(users: &[UserRecord]) -> String {
    if users.is_empty() {
        return "No users yet.".to_string();
    }
    users
        .iter()
        .enumerate()
        .map(|(i, u)| format!("{}. {} — {} messages", i + 1, u.display_name, u.message_count))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn handle_callback(
    bot: Bot,
    query: CallbackQuery,
    state: AppState,
) -> anyhow::Result<()> {
    let Some(data) = query.data.clone() else {
        bot.answer_callback_query(query.id).await?;
        return Ok(());
    };

    if query.from.id != state.config.admin_id {
        log::warn!("callback from non-admin {} ignored", query.from.id);
        bot.answer_callback_query(query.id).await?;
        return Ok(());
    }

    let Some(command) = CallbackCommand::parse(&data) else {
        log::warn!("rejecting malformed callback payload {data:?}");
        bot.answer_callback_query(query.id).await?;
        return Ok(());
    };

    let Some(message) = query.message else {
        bot.answer_callback_query(query.id).await?;
        return Ok(());
    };
    // Panel messages only ever live in the administrator's private chat.
    let chat = state.admin_chat();
    let message_id = message.id();
    bot.answer_callback_query(query.id).await?;

    dispatch_command(&bot, chat, message_id, command, &state).await
}

async fn dispatch_command(
    bot: &Bot,
    chat: ChatId,
    message_id: MessageId,
    command: CallbackCommand,
    state: &AppState,
) -> anyhow::Result<()> {
    let admin = state.config.admin_id;
    let now = Utc::now();

    match command {
        CallbackCommand::MainMenu => {
            bot.edit_message_text(chat, message_id, "Admin control panel:")
                .reply_markup(main_menu_keyboard())
                .await?;
        }
        CallbackCommand::ManageBanning => {
            bot.edit_message_text(chat, message_id, "Rule management:")
                .reply_markup(banning_keyboard())
                .await?;
        }
        CallbackCommand::ManageBroadcast => {
            let blocked = state.users.blocked_count().await?;
            bot.edit_message_text(chat, message_id, "Broadcasting:")
                .reply_markup(broadcast_keyboard(blocked))
                .await?;
        }
        CallbackCommand::ManageSettings => {
            bot.edit_message_text(chat, message_id, "Settings:")
                .reply_markup(settings_keyboard())
                .await?;
        }
        CallbackCommand::ManageEngagement => {
            let groups = state.store.groups().await?;
            bot.edit_message_text(chat, message_id, "Engagement reports:")
                .reply_markup(engagement_keyboard(&groups))
                .await?;
        }
        CallbackCommand::ClosePanel => {
            if let Err(err) = bot.delete_message(chat, message_id).await {
                log::debug!("could not close panel: {err}");
            }
        }
        CallbackCommand::ListRules { kind } => {
            let text = rule_list_text(state.store.as_ref(), kind).await?;
            bot.edit_message_text(chat, message_id, text)
                .reply_markup(rules_keyboard(kind))
                .await?;
        }
        CallbackCommand::AddRule { kind } => {
            if let Some(prompt) = state
                .session
                .begin(admin, DialogEntry::AddRule(kind), now)
                .await
            {
                bot.send_message(chat, format!("{prompt} Send /cancel to abort."))
                    .await?;
            }
        }
        CallbackCommand::DeleteMenu { kind } => {
            let values = rule_values(state.store.as_ref(), kind).await?;
            if values.is_empty() {
                bot.edit_message_text(chat, message_id, format!("No {} to delete.", kind.label()))
                    .reply_markup(rules_keyboard(kind))
                    .await?;
            } else {
                bot.edit_message_text(chat, message_id, "Pick the entry to delete:")
                    .reply_markup(delete_keyboard(kind, &values))
                    .await?;
            }
        }
        CallbackCommand::ConfirmDelete { kind, value } => {
            let outcome = delete_rule(state.store.as_ref(), kind, &value).await?;
            let note = match outcome {
                DeleteOutcome::Deleted => format!("Deleted {value:?}.\n\n"),
                DeleteOutcome::NotFound => format!("{value:?} was already gone.\n\n"),
            };
            let text = rule_list_text(state.store.as_ref(), kind).await?;
            bot.edit_message_text(chat, message_id, format!("{note}{text}"))
                .reply_markup(rules_keyboard(kind))
                .await?;
        }
        CallbackCommand::PickDuration { duration } => {
            let Some(duration) = RestrictionDuration::decode(&duration) else {
                log::warn!("rejecting malformed duration payload {duration:?}");
                return Ok(());
            };
            let effect = state.session.on_duration(admin, duration, now).await;
            if let DialogEffect::Commit(spec) = effect {
                let outcome = spec.apply(state.store.as_ref()).await?;
                bot.edit_message_text(chat, message_id, spec.confirmation(outcome))
                    .await?;
            }
        }
        CallbackCommand::CustomDuration => {
            if let DialogEffect::Prompt(prompt) =
                state.session.request_custom_days(admin, now).await
            {
                bot.edit_message_text(chat, message_id, prompt).await?;
            }
        }
        CallbackCommand::BroadcastStart => {
            if let Some(prompt) = state.session.begin(admin, DialogEntry::Broadcast, now).await {
                bot.send_message(chat, format!("{prompt} Send /cancel to abort."))
                    .await?;
            }
        }
        CallbackCommand::BroadcastCancel => {
            let cancelled = {
                let mut active = state.active_broadcast.lock().await;
                match active.take() {
                    Some(token) => {
                        token.cancel();
                        true
                    }
                    None => false,
                }
            };
            let text = if cancelled {
                "Broadcast cancellation requested."
            } else {
                "No broadcast is running."
            };
            bot.send_message(chat, text).await?;
        }
        CallbackCommand::CheckBlocked => {
            bot.send_message(chat, "Checking all users, this may take a while…")
                .await?;
            let dispatcher = state.broadcasts.clone();
            let transport = state.transport.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                match dispatcher.check_blocked(&token).await {
                    Ok(report) => {
                        let _ = transport.send_message(chat, &report.to_string()).await;
                    }
                    Err(err) => log::error!("blocked-user sweep failed: {err}"),
                }
            });
        }
        CallbackCommand::EditWelcome => {
            if let Some(prompt) = state
                .session
                .begin(admin, DialogEntry::EditSetting(SettingTarget::Welcome), now)
                .await
            {
                bot.send_message(chat, prompt).await?;
            }
        }
        CallbackCommand::EditWarning => {
            if let Some(prompt) = state
                .session
                .begin(admin, DialogEntry::EditSetting(SettingTarget::Warning), now)
                .await
            {
                bot.send_message(chat, prompt).await?;
            }
        }
        CallbackCommand::TopMessages { group } => {
            let window = chrono::Duration::days(LEADERBOARD_WINDOW_DAYS);
            let records = state
                .engagement
                .top_reacted_messages(ChatId(group), window, LEADERBOARD_LIMIT, now)
                .await?;
            bot.edit_message_text(chat, message_id, format_top_messages(&records))
                .reply_markup(rows(vec![button("⬅️ Back", &CallbackCommand::ManageEngagement)]))
                .await?;
        }
        CallbackCommand::TopUsers => {
            let users = state.engagement.top_active_users(LEADERBOARD_LIMIT).await?;
            bot.edit_message_text(chat, message_id, format_top_users(&users))
                .reply_markup(rows(vec![button("⬅️ Back", &CallbackCommand::ManageEngagement)]))
                .await?;
        }
        CallbackCommand::SupportReply { user } => {
            if let Some(prompt) = state
                .session
                .begin(admin, DialogEntry::SupportReply(UserId(user)), now)
                .await
            {
                bot.send_message(chat, prompt).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_codec_round_trips() {
        let commands = [
            CallbackCommand::MainMenu,
            CallbackCommand::ListRules {
                kind: RuleTarget::BannedWord,
            },
            CallbackCommand::ConfirmDelete {
                kind: RuleTarget::AutoReply,
                value: "hello".to_string(),
            },
            CallbackCommand::PickDuration {
                duration: RestrictionDuration::CustomDays(9).encode(),
            },
            CallbackCommand::SupportReply { user: 42 },
            CallbackCommand::TopMessages { group: -100123 },
        ];
        for command in commands {
            let encoded = command.encode().expect("fits in callback data");
            assert!(encoded.len() <= 64);
            assert_eq!(CallbackCommand::parse(&encoded), Some(command));
        }
    }

    #[test]
    fn malformed_payloads_fail_closed() {
        assert_eq!(CallbackCommand::parse(""), None);
        assert_eq!(CallbackCommand::parse("garbage"), None);
        assert_eq!(CallbackCommand::parse(r#"{"a":"nope"}"#), None);
        assert_eq!(CallbackCommand::parse(r#"{"a":"del","k":"bw"}"#), None);
    }

    #[test]
    fn oversized_payload_is_refused() {
        let command = CallbackCommand::ConfirmDelete {
            kind: RuleTarget::BannedLink,
            value: "x".repeat(100),
        };
        assert_eq!(command.encode(), None);
    }
}
