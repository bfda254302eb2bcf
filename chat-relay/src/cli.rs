use std::{net::SocketAddr, num::NonZeroUsize};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::protocol::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a relay server and chat from the terminal.
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, env = "CHAT_RELAY_LISTEN", default_value = "0.0.0.0:12345")]
    pub listen: SocketAddr,

    /// Lines a client may have queued before further lines to it are dropped.
    #[arg(long, env = "CHAT_RELAY_OUTBOUND_CAPACITY", default_value = "128")]
    pub outbound_capacity: NonZeroUsize,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Name to register with. Whitespace becomes `_`; the server may add a suffix.
    #[arg(long, env = "CHAT_RELAY_USERNAME")]
    pub username: String,

    /// Host running the relay server.
    #[arg(long, env = "CHAT_RELAY_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "CHAT_RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// How conversation updates are printed on stdout.
    #[arg(long, env = "CHAT_RELAY_FORMAT", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per view update.
    Json,
}
