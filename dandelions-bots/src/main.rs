//! dandelions-bot: answers Nostr mentions and DMs with LLM output.
//!
//! Runs until Ctrl+C. Provider keys come from the settings file or
//! `<PROVIDER>_API_KEY` environment variables.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use dandelions_bots::bot::NostrBot;
use dandelions_bots::config::{CommonArgs, Settings};
use dandelions_bots::handlers;
use dandelions_bots::llm::LlmManager;
use dandelions_bots::logging;
use dandelions_bots::store::EventStore;

#[derive(Parser)]
#[command(name = "dandelions-bot", about = "Nostr bot powered by multiple LLM providers")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Probe every provider at startup and log the result
    #[arg(long)]
    test_providers: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing(&["dandelions_bots=info", "dandelions_sdk=info"])?;
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli.common)?;

    let llm = Arc::new(LlmManager::from_settings(&settings.llm).await);
    if cli.test_providers {
        for (name, ok) in llm.test_all_providers().await {
            tracing::info!(provider = %name, reachable = ok, "Provider check");
        }
    }
    let store = Arc::new(EventStore::open(&settings.bot.db_path)?);

    let bot = Arc::new(NostrBot::new(&settings, llm, store)?);
    handlers::register_defaults(&bot);
    bot.start()?;

    tracing::info!(npub = %bot.keys().npub(), "Dandelions bot running, Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    bot.stop();
    Ok(())
}
