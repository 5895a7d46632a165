use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use websocket_chat::{
    accounts::Accounts,
    cli::{Cli, Command, ServeArgs},
    client,
    server::ChatServer,
    sqlite::SqliteCredentialStore,
    store::{CredentialStore, MemoryCredentialStore},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Register(args) => {
            let token = client::register(args).await?;
            println!("{token}");
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let store: Arc<dyn CredentialStore> = match &args.database {
        Some(path) => Arc::new(
            SqliteCredentialStore::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Arc::new(MemoryCredentialStore::new()),
    };

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = ChatServer::new(listener, Accounts::new(store, args.bcrypt_cost));
    let addr = server.local_addr()?;
    info!("chat server listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("chat server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
