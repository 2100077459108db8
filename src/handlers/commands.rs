//! Slash commands.

use teloxide::prelude::*;
use teloxide::types::Message;
use teloxide::utils::command::BotCommands;

use crate::config::{setting, DEFAULT_WELCOME_MESSAGE};
use crate::handlers::callback::main_menu_keyboard;
use crate::handlers::AppState;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "register yourself and show the welcome message")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "cancel the current admin dialog")]
    Cancel,
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: AppState,
) -> anyhow::Result<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let now = msg.date;

    match cmd {
        Command::Start => {
            // The explicit re-interaction that may clear a blocked flag.
            state
                .users
                .reactivate(user.id, &user.full_name(), now)
                .await?;
            let welcome = state
                .store
                .setting(setting::WELCOME_MESSAGE)
                .await?
                .unwrap_or_else(|| DEFAULT_WELCOME_MESSAGE.to_string());
            if user.id == state.config.admin_id && msg.chat.is_private() {
                bot.send_message(
                    msg.chat.id,
                    format!("{welcome}\n\nYou are the administrator. Control panel:"),
                )
                .reply_markup(main_menu_keyboard())
                .await?;
            } else {
                bot.send_message(msg.chat.id, welcome).await?;
            }
        }
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::Cancel => {
            if user.id != state.config.admin_id {
                return Ok(());
            }
            let text = if state.session.cancel(user.id, now).await {
                "Cancelled."
            } else {
                "Nothing to cancel."
            };
            bot.send_message(msg.chat.id, text).await?;
        }
    }
    Ok(())
}
