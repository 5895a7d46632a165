use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    accounts::Accounts,
    registry::ConnectionRegistry,
    routes::{self, AppState},
};

/// The chat service: an HTTP listener plus the connection registry it feeds.
pub struct ChatServer {
    listener: TcpListener,
    state: AppState,
}

impl ChatServer {
    pub fn new(listener: TcpListener, accounts: Accounts) -> Self {
        Self {
            listener,
            state: AppState {
                registry: Arc::new(ConnectionRegistry::new()),
                accounts,
            },
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Serves until `shutdown` resolves. Open chat connections are drained
    /// from the registry at that point, which closes their sockets.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ChatServer { listener, state } = self;
        let registry = Arc::clone(&state.registry);

        let signal = async move {
            shutdown.await;
            let drained = registry.drain().await;
            info!(drained, "chat server shutting down");
        };

        axum::serve(listener, routes::router(state))
            .with_graceful_shutdown(signal)
            .await?;

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}
