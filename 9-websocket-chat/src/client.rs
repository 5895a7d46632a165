use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{Value, json};
use tokio::{
    io::{
        self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
        Lines,
    },
    net::TcpStream,
    select,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{info, warn};

use crate::{
    cli::{ClientArgs, RegisterArgs},
    message::ClientId,
    routes::UserCreated,
};

type ChatSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut socket = establish_connection(&args).await?;
    write_stdout(&format!("*** connected as client #{}", args.client_id)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&mut socket, &mut stdin).await?;
    shutdown_connection(&mut socket).await;

    Ok(())
}

/// Creates an account through `POST /create_user` and returns the issued token.
pub async fn register(args: RegisterArgs) -> Result<String> {
    let url = format!("http://{}/create_user", args.server);
    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "email": args.email, "password": args.password }))
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let detail = body["detail"].as_str().unwrap_or("no detail");
        bail!("registration failed with {status}: {detail}");
    }

    let created: UserCreated = response
        .json()
        .await
        .context("malformed registration response")?;
    Ok(created.websocket_token)
}

pub fn chat_url(server: SocketAddr, client_id: ClientId, token: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("ws://{server}/ws/{client_id}"))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

async fn establish_connection(args: &ClientArgs) -> Result<ChatSocket> {
    let url = chat_url(args.server, args.client_id, &args.token)?;
    let (socket, _response) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to join chat at {}", args.server))?;

    info!("connected to {}", args.server);
    Ok(socket)
}

/// `Lines::next_line` is cancel safe, so a half-typed line stays buffered
/// when a server frame wins the `select!`.
async fn run_client_loop<S, R>(
    socket: &mut WebSocketStream<S>,
    stdin: &mut Lines<R>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    loop {
        select! {
            frame = socket.next() => {
                if !handle_server_frame(frame).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_input(line, socket).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_frame(
    frame: Option<Result<Message, tungstenite::Error>>,
) -> Result<bool> {
    match frame {
        Some(Ok(Message::Text(text))) => {
            write_stdout(&text).await?;
            Ok(true)
        }
        Some(Ok(Message::Close(Some(close)))) if !close.reason.is_empty() => {
            write_stdout(&format!(
                "*** server closed the connection: {}",
                close.reason
            ))
            .await?;
            Ok(false)
        }
        Some(Ok(Message::Close(_))) | None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
        Some(Ok(_)) => Ok(true),
        Some(Err(err)) => Err(err).context("chat connection failed"),
    }
}

async fn handle_stdin_input<S>(
    line: io::Result<Option<String>>,
    socket: &mut WebSocketStream<S>,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(line) = line? else {
        return Ok(false);
    };

    let text = line.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    socket.send(Message::Text(text.to_string())).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(socket: &mut ChatSocket) {
    if let Err(error) = socket.close(None).await {
        warn!(?error, "failed to close chat connection cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
