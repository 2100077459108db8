//! Inbound message handling.
//!
//! Private chats: admin dialog input, the panel trigger phrase, and support
//! tickets forwarded to the administrator. Group chats: the moderation path.

use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatMemberStatus, Message, User, UserId};

use crate::config::setting;
use crate::dialog::DialogEffect;
use crate::handlers::callback::{duration_keyboard, main_menu_keyboard, support_reply_keyboard};
use crate::handlers::{launch_broadcast, AppState};
use crate::moderation::{IncomingMessage, Verdict};
use crate::transport::user_chat;

pub async fn handle_message(bot: Bot, msg: Message, state: AppState) -> anyhow::Result<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let Some(text) = msg.text().map(str::to_owned) else {
        return Ok(());
    };
    let now = msg.date;

    // Every observed interaction keeps the directory current.
    state.users.observe(user.id, &user.full_name(), now).await?;

    if msg.chat.is_private() {
        handle_private(&bot, &msg, &text, &user, &state).await
    } else {
        handle_group(&bot, &msg, &text, &user, &state).await
    }
}

async fn handle_private(
    bot: &Bot,
    msg: &Message,
    text: &str,
    user: &User,
    state: &AppState,
) -> anyhow::Result<()> {
    let now = msg.date;

    if user.id != state.config.admin_id {
        // Support ticket: forward to the admin with a reply button.
        let admin_chat = state.admin_chat();
        if let Err(err) = bot.forward_message(admin_chat, msg.chat.id, msg.id).await {
            log::warn!("could not forward support message from {}: {err}", user.id);
            return Ok(());
        }
        bot.send_message(
            admin_chat,
            format!("Support message from {} (id {}).", user.full_name(), user.id),
        )
        .reply_markup(support_reply_keyboard(user.id))
        .await?;
        return Ok(());
    }

    if text.trim().eq_ignore_ascii_case(&state.config.panel_trigger) {
        let welcome = state
            .store
            .setting(setting::WELCOME_MESSAGE)
            .await?
            .unwrap_or_default();
        bot.send_message(msg.chat.id, format!("{welcome}\n\nAdmin control panel:"))
            .reply_markup(main_menu_keyboard())
            .await?;
        return Ok(());
    }

    let effect = state.session.on_text(user.id, text, now).await;
    if effect == DialogEffect::None {
        log::debug!("admin text outside any dialog, ignoring");
        return Ok(());
    }
    run_dialog_effect(bot, msg.chat.id, effect, state).await
}

/// Execute the outcome of a dialog step. Shared with the callback handler.
pub(crate) async fn run_dialog_effect(
    bot: &Bot,
    chat: ChatId,
    effect: DialogEffect,
    state: &AppState,
) -> anyhow::Result<()> {
    match effect {
        DialogEffect::None => {}
        DialogEffect::Prompt(prompt) => {
            bot.send_message(chat, prompt).await?;
        }
        DialogEffect::AskDuration { value, .. } => {
            bot.send_message(
                chat,
                format!("Pick a restriction duration for {value:?}:"),
            )
            .reply_markup(duration_keyboard())
            .await?;
        }
        DialogEffect::Commit(spec) => {
            let outcome = spec.apply(state.store.as_ref()).await?;
            bot.send_message(chat, spec.confirmation(outcome)).await?;
        }
        DialogEffect::Broadcast(payload) => {
            bot.send_message(chat, "Broadcast started.").await?;
            launch_broadcast(state, payload, chat).await;
        }
        DialogEffect::SupportReply { user, text } => {
            match state.transport.send_message(user_chat(user), &text).await {
                Ok(()) => {
                    bot.send_message(chat, "Reply delivered.").await?;
                }
                Err(err) => {
                    log::warn!("support reply to {} failed: {err}", user.0);
                    bot.send_message(chat, "Could not deliver the reply.").await?;
                }
            }
        }
    }
    Ok(())
}

async fn handle_group(
    bot: &Bot,
    msg: &Message,
    text: &str,
    user: &User,
    state: &AppState,
) -> anyhow::Result<()> {
    let is_administrator =
        user.id == state.config.admin_id || is_chat_admin(bot, msg.chat.id, user.id).await;

    let incoming = IncomingMessage {
        sender: user.id,
        sender_name: user.full_name(),
        is_administrator,
        chat: msg.chat.id,
        message_id: msg.id,
        text: text.to_string(),
        timestamp: msg.date,
    };

    let verdict = state.moderator.moderate(&incoming).await?;
    match &verdict {
        Verdict::Allowed | Verdict::AutoReplied { .. } => {
            state
                .engagement
                .record_message(msg.id, user.id, msg.chat.id, text, msg.date)
                .await?;
        }
        Verdict::Blocked(cause) => {
            log::info!(
                "blocked message {} from user {} in chat {}: {cause:?}",
                msg.id.0,
                user.id,
                msg.chat.id
            );
        }
    }
    Ok(())
}

/// Group owners and admins are exempt from moderation.
async fn is_chat_admin(bot: &Bot, chat: ChatId, user: UserId) -> bool {
    match bot.get_chat_member(chat, user).await {
        Ok(member) => matches!(
            member.status(),
            ChatMemberStatus::Owner | ChatMemberStatus::Administrator
        ),
        Err(err) => {
            log::warn!("could not check admin status for {user} in {chat}: {err}");
            false
        }
    }
}
