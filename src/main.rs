use std::sync::Arc;

use dotenv::dotenv;
use teloxide::Bot;

use guardian_telegram_bot::config::BotConfig;
use guardian_telegram_bot::handlers::{run_dispatcher, AppState};
use guardian_telegram_bot::storage::{seed_default_settings, RedisStore, Store};
use guardian_telegram_bot::transport::TelegramTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    dotenv().ok();
    log::info!("Starting the group guardian bot...");

    let config = BotConfig::from_env()?;
    let bot = Bot::new(config.token.clone());

    // An unreachable store at startup is fatal; the process must not run
    // half-configured.
    let store = RedisStore::connect(&config.redis_url).await?;
    store.ping().await?;
    seed_default_settings(&store).await?;

    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let state = AppState::new(config, Arc::new(store), transport);

    run_dispatcher(bot, state).await;
    Ok(())
}
