use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server. The operator console reads commands from stdin.
    Serve(ServeArgs),
    /// Connect to a relay, forwarding stdin lines and printing what arrives.
    Client(ClientArgs),
}

/// Raw server settings. Values are kept as text so that out-of-range input
/// falls back to a default instead of failing; see `RelayConfig::from_args`.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "SERV_IP")]
    pub address: Option<String>,

    /// TCP port to bind.
    #[arg(long, env = "SERV_PORT")]
    pub port: Option<String>,

    /// Number of broadcast lines kept for replay.
    #[arg(long, env = "MAX_HIST")]
    pub history: Option<String>,

    /// Maximum number of simultaneously registered connections.
    #[arg(long, env = "MAX_CONN")]
    pub max_connections: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Identity announced to the relay (1..=9999). Random when omitted or out of range.
    #[arg(allow_negative_numbers = true)]
    pub id: Option<i64>,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:18800")]
    pub server: SocketAddr,
}
