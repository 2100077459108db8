//! Update dispatch: wires inbound Telegram events to the moderation engine,
//! the admin dialog, and the engagement tracker.

pub mod callback;
pub mod chat_member;
pub mod commands;
pub mod message;
pub mod reaction;

pub use callback::CallbackCommand;
pub use commands::Command;

use std::sync::Arc;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::dptree;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastDispatcher;
use crate::config::BotConfig;
use crate::dialog::AdminConfigSession;
use crate::engagement::EngagementTracker;
use crate::moderation::MessageModerator;
use crate::restriction_manager::RestrictionManager;
use crate::storage::Store;
use crate::transport::{user_chat, Transport};
use crate::user_directory::UserDirectory;

/// Everything a handler needs, constructed once at startup and injected via
/// `dptree` dependencies; no ambient global state.
#[derive(Clone)]
pub struct AppState {
    pub config: BotConfig,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn Transport>,
    pub users: UserDirectory,
    pub restrictions: RestrictionManager,
    pub moderator: MessageModerator,
    pub session: Arc<AdminConfigSession>,
    pub broadcasts: BroadcastDispatcher,
    pub engagement: EngagementTracker,
    /// Cancellation handle of the broadcast currently in flight, if any.
    pub active_broadcast: Arc<Mutex<Option<CancellationToken>>>,
}

impl AppState {
    pub fn new(config: BotConfig, store: Arc<dyn Store>, transport: Arc<dyn Transport>) -> Self {
        let users = UserDirectory::new(store.clone());
        let restrictions = RestrictionManager::new(store.clone());
        let moderator = MessageModerator::new(
            store.clone(),
            restrictions.clone(),
            users.clone(),
            transport.clone(),
        );
        let session = Arc::new(AdminConfigSession::new(config.admin_id));
        let broadcasts = BroadcastDispatcher::new(users.clone(), transport.clone());
        let engagement = EngagementTracker::new(store.clone());
        AppState {
            config,
            store,
            transport,
            users,
            restrictions,
            moderator,
            session,
            broadcasts,
            engagement,
            active_broadcast: Arc::new(Mutex::new(None)),
        }
    }

    /// The administrator's private chat.
    pub fn admin_chat(&self) -> ChatId {
        user_chat(self.config.admin_id)
    }
}

/// Launch a broadcast as a background task. Refuses to start a second run
/// while one is in flight; the finished report goes to `feedback_chat`.
pub(crate) async fn launch_broadcast(state: &AppState, payload: String, feedback_chat: ChatId) {
    let token = CancellationToken::new();
    {
        let mut active = state.active_broadcast.lock().await;
        if active.as_ref().is_some_and(|t| !t.is_cancelled()) {
            let _ = state
                .transport
                .send_message(feedback_chat, "A broadcast is already running.")
                .await;
            return;
        }
        *active = Some(token.clone());
    }
    let dispatcher = state.broadcasts.clone();
    let transport = state.transport.clone();
    let slot = state.active_broadcast.clone();
    tokio::spawn(async move {
        let result = dispatcher.broadcast(&payload, &token).await;
        slot.lock().await.take();
        match result {
            Ok(report) => {
                let _ = transport.send_message(feedback_chat, &report.to_string()).await;
            }
            Err(err) => {
                log::error!("broadcast aborted: {err}");
                let _ = transport
                    .send_message(feedback_chat, "Broadcast aborted by a storage failure.")
                    .await;
            }
        }
    });
}

/// Combines all update handlers into one dispatcher and runs it.
pub async fn run_dispatcher(bot: Bot, state: AppState) {
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(commands::handle_command),
        )
        .branch(Update::filter_message().endpoint(message::handle_message))
        .branch(Update::filter_callback_query().endpoint(callback::handle_callback))
        .branch(Update::filter_my_chat_member().endpoint(chat_member::handle_my_chat_member))
        .branch(
            Update::filter_message_reaction_count_updated()
                .endpoint(reaction::handle_reaction_count),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|update| async move {
            log::debug!("unhandled update: {:?}", update.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "an error occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
