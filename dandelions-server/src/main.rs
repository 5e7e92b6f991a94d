//! dandelions-server: the Nostr bot plus the MCP tool server.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use dandelions_bots::bot::NostrBot;
use dandelions_bots::config::{CommonArgs, Settings};
use dandelions_bots::handlers;
use dandelions_bots::llm::LlmManager;
use dandelions_bots::logging;
use dandelions_bots::store::EventStore;
use dandelions_server::{McpServer, ToolContext};

#[derive(Parser)]
#[command(name = "dandelions-server", about = "Dandelions Nostr bot with an MCP tool server")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// MCP listen host (overrides the settings file)
    #[arg(long, env = "MCP_HOST")]
    mcp_host: Option<String>,

    /// MCP listen port (overrides the settings file)
    #[arg(long, env = "MCP_PORT")]
    mcp_port: Option<u16>,

    /// Serve MCP only; don't answer mentions and DMs
    #[arg(long)]
    no_replies: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing(&[
        "dandelions_server=info",
        "dandelions_bots=info",
        "dandelions_sdk=info",
    ])?;
    let cli = Cli::parse();
    let mut settings = Settings::resolve(&cli.common)?;
    if let Some(host) = cli.mcp_host {
        settings.mcp.host = host;
    }
    if let Some(port) = cli.mcp_port {
        settings.mcp.port = port;
    }

    let llm = Arc::new(LlmManager::from_settings(&settings.llm).await);
    let store = Arc::new(EventStore::open(&settings.bot.db_path)?);
    let bot = Arc::new(NostrBot::new(&settings, llm, store)?);
    if !cli.no_replies {
        handlers::register_defaults(&bot);
    }
    bot.start()?;

    let server = McpServer::new(ToolContext::new(bot.clone()), &settings.mcp.host, settings.mcp.port);
    let addr = server.start().await?;
    tracing::info!(%addr, npub = %bot.keys().npub(), "Dandelions server running, Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    server.stop().await;
    bot.stop();
    Ok(())
}
