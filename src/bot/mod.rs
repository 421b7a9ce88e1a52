//! Telegram front end.
//!
//! Messages containing links (or `/get <reference>`) become jobs; finished
//! jobs are delivered back to the chat that asked for them.

pub mod format;
pub mod handlers;
pub mod notifier;

use std::sync::Arc;
use std::time::Duration;

use teloxide::dispatching::HandlerExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::config::{BotConfig, RetryConfig};
use crate::dispatch::PipelineDispatcher;
use crate::error::{Error, Result};

/// Long polling waits 10s per request; leave room for the reply.
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Send me a link, or use one of these commands:")]
pub enum Command {
    #[command(description = "show this help")]
    Help,
    #[command(description = "show this help")]
    Start,
    #[command(description = "fetch a link or content id")]
    Get(String),
    #[command(description = "fetch and reply with a download link")]
    Link(String),
    #[command(description = "show a job's progress")]
    Status(String),
    #[command(description = "cancel a job")]
    Cancel(String),
    #[command(description = "list your recent jobs")]
    Jobs,
    #[command(description = "list your download links")]
    Files,
}

/// Bot API client for `config` whose requests give up after `timeout`.
pub fn client(config: &BotConfig, timeout: Duration) -> Result<Bot> {
    let http = teloxide::net::default_reqwest_settings()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create Telegram client: {}", e)))?;

    let bot = Bot::with_client(&config.token, http);
    match &config.api_url {
        Some(url) => Ok(bot.set_api_url(url::Url::parse(url)?)),
        None => Ok(bot),
    }
}

/// Run the bot until Ctrl-C. Job notifications are delivered by a task
/// running alongside.
pub async fn run(config: &BotConfig, retry: RetryConfig, dispatcher: Arc<PipelineDispatcher>) -> Result<()> {
    let bot = client(config, POLL_REQUEST_TIMEOUT)?;

    let me = bot.get_me().await?;
    tracing::info!(username = %me.username(), "Bot connected");
    bot.set_my_commands(Command::bot_commands()).await?;

    let notifications = notifier::spawn(bot.clone(), dispatcher.subscribe(), retry);

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handlers::handle_command),
        )
        .branch(dptree::endpoint(handlers::handle_text));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    notifications.abort();
    tracing::info!("Bot stopped");
    Ok(())
}
