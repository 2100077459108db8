//! Group registry upkeep from `my_chat_member` updates: groups are recorded
//! when the bot joins and dropped when it leaves.

use teloxide::types::{ChatMemberStatus, ChatMemberUpdated};

use crate::handlers::AppState;

pub async fn handle_my_chat_member(
    update: ChatMemberUpdated,
    state: AppState,
) -> anyhow::Result<()> {
    let chat = &update.chat;
    if !(chat.is_group() || chat.is_supergroup()) {
        return Ok(());
    }
    match update.new_chat_member.status() {
        ChatMemberStatus::Left | ChatMemberStatus::Banned => {
            state.store.remove_group(chat.id).await?;
            log::info!("left group {} ({:?})", chat.id, chat.title());
        }
        _ => {
            state
                .store
                .upsert_group(chat.id, chat.title().unwrap_or_default())
                .await?;
            log::info!("registered group {} ({:?})", chat.id, chat.title());
        }
    }
    Ok(())
}
