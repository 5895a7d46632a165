use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message, protocol::frame::coding::CloseCode},
};
use websocket_chat::{
    accounts::Accounts,
    registry::ConnectionRegistry,
    server::ChatServer,
    store::MemoryCredentialStore,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    accounts: Accounts,
    registry: Arc<ConnectionRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let accounts = Accounts::new(Arc::new(MemoryCredentialStore::new()), 4);
        let server = ChatServer::new(listener, accounts.clone());
        let addr = server.local_addr()?;
        let registry = server.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = server.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            accounts,
            registry,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    async fn token_for(&self, email: &str) -> Result<String> {
        Ok(self.accounts.register(email, "password").await?)
    }

    async fn join(&self, client_id: i64, token: &str) -> Result<Socket> {
        let url = format!("ws://{}/ws/{client_id}?token={token}", self.addr);
        let (socket, _) = connect_async(url).await?;
        Ok(socket)
    }

    /// The upgrade callback registers asynchronously; wait until it has.
    async fn wait_for_members(&self, count: usize) -> Result<()> {
        let deadline = Instant::now() + READ_TIMEOUT;
        while self.registry.len().await != count {
            if Instant::now() > deadline {
                return Err(anyhow!(
                    "expected {count} members, have {}",
                    self.registry.len().await
                ));
            }
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = timeout(READ_TIMEOUT, self.task).await;
    }
}

async fn next_text(socket: &mut Socket) -> Result<String> {
    loop {
        let frame = timeout(READ_TIMEOUT, socket.next())
            .await?
            .ok_or_else(|| anyhow!("stream ended"))??;
        match frame {
            Message::Text(text) => return Ok(text),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Err(anyhow!("unexpected frame: {other:?}")),
        }
    }
}

async fn assert_silent(socket: &mut Socket) {
    let result = timeout(Duration::from_millis(150), socket.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

#[tokio::test]
async fn two_clients_chat_and_leave() -> Result<()> {
    let server = TestServer::start().await?;
    let token_one = server.token_for("one@example.com").await?;
    let token_two = server.token_for("two@example.com").await?;

    let mut one = server.join(1, &token_one).await?;
    let mut two = server.join(2, &token_two).await?;
    server.wait_for_members(2).await?;

    one.send(Message::Text("hi".into())).await?;
    assert_eq!(next_text(&mut two).await?, "Client #1 wrote: hi");
    assert_eq!(next_text(&mut one).await?, "Client #1 wrote: hi");

    two.close(None).await?;
    assert_eq!(next_text(&mut one).await?, "Client #2 left the chat");
    server.wait_for_members(1).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn broadcast_reaches_each_member_exactly_once() -> Result<()> {
    let server = TestServer::start().await?;
    let mut sockets = Vec::new();
    for client_id in [5, 6, 7] {
        let token = server.token_for(&format!("c{client_id}@example.com")).await?;
        sockets.push(server.join(client_id, &token).await?);
    }
    server.wait_for_members(3).await?;

    sockets[2].send(Message::Text("M".into())).await?;

    for socket in &mut sockets {
        assert_eq!(next_text(socket).await?, "Client #7 wrote: M");
        assert_silent(socket).await;
    }

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn departed_client_receives_nothing_more() -> Result<()> {
    let server = TestServer::start().await?;
    let token_a = server.token_for("a@example.com").await?;
    let token_b = server.token_for("b@example.com").await?;
    let token_c = server.token_for("c@example.com").await?;

    let mut a = server.join(1, &token_a).await?;
    let mut b = server.join(2, &token_b).await?;
    server.wait_for_members(2).await?;

    b.close(None).await?;
    assert_eq!(next_text(&mut a).await?, "Client #2 left the chat");
    server.wait_for_members(1).await?;

    let mut c = server.join(3, &token_c).await?;
    server.wait_for_members(2).await?;
    c.send(Message::Text("after".into())).await?;

    assert_eq!(next_text(&mut a).await?, "Client #3 wrote: after");
    assert_eq!(next_text(&mut c).await?, "Client #3 wrote: after");
    // b only ever sees the end of its own close handshake.
    let tail = timeout(READ_TIMEOUT, b.next()).await?;
    assert!(!matches!(tail, Some(Ok(Message::Text(_)))), "got {tail:?}");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn abrupt_disconnect_is_announced() -> Result<()> {
    let server = TestServer::start().await?;
    let token_a = server.token_for("a@example.com").await?;
    let token_b = server.token_for("b@example.com").await?;

    let mut a = server.join(1, &token_a).await?;
    let b = server.join(2, &token_b).await?;
    server.wait_for_members(2).await?;

    // No close handshake, just the TCP connection going away.
    drop(b);
    assert_eq!(next_text(&mut a).await?, "Client #2 left the chat");
    server.wait_for_members(1).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn missing_token_is_closed_with_policy_violation() -> Result<()> {
    let server = TestServer::start().await?;
    let url = format!("ws://{}/ws/1", server.addr);
    let (mut socket, _) = connect_async(url).await?;

    let frame = timeout(READ_TIMEOUT, socket.next())
        .await?
        .ok_or_else(|| anyhow!("stream ended before close frame"))??;
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(close.code, CloseCode::Policy);
            assert_eq!(close.reason, "Missing token");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(server.registry.is_empty().await);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn unknown_token_is_rejected_before_upgrade() -> Result<()> {
    let server = TestServer::start().await?;
    let url = format!("ws://{}/ws/1?token=not-a-token", server.addr);

    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("unknown token must not be admitted"),
    }
    assert!(server.registry.is_empty().await);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_open_connections() -> Result<()> {
    let server = TestServer::start().await?;
    let token = server.token_for("a@example.com").await?;
    let mut socket = server.join(1, &token).await?;
    server.wait_for_members(1).await?;
    let registry = Arc::clone(&server.registry);

    server.stop().await;

    let tail = timeout(READ_TIMEOUT, socket.next()).await?;
    assert!(
        matches!(tail, None | Some(Ok(Message::Close(_))) | Some(Err(_))),
        "got {tail:?}"
    );
    assert!(registry.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn http_account_flow_admits_websocket() -> Result<()> {
    let server = TestServer::start().await?;
    let http = reqwest::Client::new();
    let base = format!("http://{}", server.addr);

    let created: serde_json::Value = http
        .post(format!("{base}/create_user"))
        .json(&serde_json::json!({ "email": "web@example.com", "password": "hunter22" }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let issued = created["websocket_token"]
        .as_str()
        .ok_or_else(|| anyhow!("missing token in {created}"))?
        .to_string();

    let login: serde_json::Value = http
        .post(format!("{base}/token"))
        .form(&[("username", "web@example.com"), ("password", "hunter22")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(login["access_token"], issued.as_str());
    assert_eq!(login["token_type"], "bearer");

    let mut socket = server.join(9, &issued).await?;
    server.wait_for_members(1).await?;
    socket.send(Message::Text("from the browser".into())).await?;
    assert_eq!(
        next_text(&mut socket).await?,
        "Client #9 wrote: from the browser"
    );

    let health: serde_json::Value = http
        .get(format!("{base}/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health["connections"], 1);

    server.stop().await;
    Ok(())
}
