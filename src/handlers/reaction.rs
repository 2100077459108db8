//! Reaction-count updates feed the engagement tracker. The transport sends
//! absolute snapshots, so the stored count is overwritten, not incremented.

use teloxide::types::MessageReactionCountUpdated;

use crate::handlers::AppState;

pub async fn handle_reaction_count(
    update: MessageReactionCountUpdated,
    state: AppState,
) -> anyhow::Result<()> {
    let total: i64 = update
        .reactions
        .iter()
        .map(|reaction| reaction.total_count as i64)
        .sum();
    state
        .engagement
        .update_reaction_count(update.message_id, total)
        .await?;
    Ok(())
}
