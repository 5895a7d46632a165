use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::message::ClientId;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server (HTTP account endpoints plus the websocket room).
    Serve(ServeArgs),
    /// Create an account on a running server and print its websocket token.
    Register(RegisterArgs),
    /// Join the chat room from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// SQLite file holding accounts. Accounts are kept in memory when omitted.
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// bcrypt work factor for stored passwords (4..=31).
    #[arg(
        long,
        default_value_t = bcrypt::DEFAULT_COST,
        value_parser = clap::value_parser!(u32).range(4..=31)
    )]
    pub bcrypt_cost: u32,
}

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    /// Address of the chat server.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub server: SocketAddr,

    #[arg(long)]
    pub email: String,

    #[arg(long)]
    pub password: String,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the chat server.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub server: SocketAddr,

    /// Number shown to other members as `Client #<id>`.
    #[arg(long, allow_negative_numbers = true)]
    pub client_id: ClientId,

    /// Websocket token returned by `register` or `POST /token`.
    #[arg(long)]
    pub token: String,
}
