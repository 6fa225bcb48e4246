use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use mudgate::cli::Cli;
use mudgate::config::Config;
use mudgate::mcp::{McpConfig, McpServer};
use mudgate::memory::MemoryStore;
use mudgate::session::{MudSession, SessionTiming};
use mudgate::telemetry;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("mudgate: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    telemetry::logging::init(&cli.logging.to_config())?;
    let config = Config::from_env();

    let session = Arc::new(MudSession::new(SessionTiming {
        connect_timeout: config.connect_timeout,
        greeting_settle: config.greeting_settle,
        send_settle: config.send_settle,
    }));
    let store = match &config.memory_dir {
        Some(dir) => MemoryStore::new(dir.clone()),
        None => MemoryStore::resolve_default(),
    };

    let server = McpServer::new(
        McpConfig { socket: cli.socket },
        session,
        store,
        config.read_timeout,
    );
    server.run().await
}
