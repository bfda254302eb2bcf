use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command},
    server::Server,
    terminal,
};

fn init_tracing() {
    use std::io::IsTerminal;

    use tracing_subscriber::{EnvFilter, fmt};

    // Logs go to stderr; stdout carries the conversation.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind {}", args.listen))?;
            let server = Server::new(listener).with_outbound_capacity(args.outbound_capacity);
            let addr = server.local_addr()?;
            info!("chat relay listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("chat relay exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Connect(args) => terminal::run(args).await?,
    }

    Ok(())
}
