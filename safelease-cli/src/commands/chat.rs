//! Terminal chat client.
//!
//! Drives a [`ChatController`] over a WebSocket: lines typed on stdin are
//! sent to the conversation with `--peer`, and every message the server
//! broadcasts back is printed once.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use futures_util::{SinkExt, StreamExt};
use shared::client::{ChatController, ClientCommand, ClientPhase, CloseOrigin, Notice, SendBlocked};
use shared::models::{ChatMessage, ClientFrame, ErrorCode, MessageId, ServerFrame};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REJOIN_DELAY: Duration = Duration::from_secs(2);
const QUIT: &str = "/quit";

#[derive(Debug, Clone, Args)]
pub struct ChatArgs {
    /// User id of the other participant
    #[arg(long)]
    pub peer: String,

    /// Bearer token identifying you
    #[arg(long, env = "SAFELEASE_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Your user id; taken from the server's session when omitted
    #[arg(long)]
    pub user: Option<String>,

    /// WebSocket endpoint of the chat server
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    pub server: Url,
}

enum SocketEvent {
    Frame(ServerFrame),
    Undecodable(String),
    Closed(CloseOrigin),
}

/// Runs an interactive session on stdin/stdout until `/quit`, end of input,
/// or the connection is lost for good.
///
/// # Errors
/// Returns an error when the session ends because the server refused the
/// credential or the connection could not be kept.
pub async fn start_chat(args: ChatArgs) -> Result<()> {
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    run_session(args, input, &mut std::io::stdout()).await
}

/// Session loop with injectable input and output.
///
/// Input lines are only consumed while the conversation is live, so text
/// typed during a (re)connect waits in the buffer instead of being dropped.
///
/// # Errors
/// See [`start_chat`].
pub async fn run_session<R, W>(args: ChatArgs, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    if !matches!(args.server.scheme(), "ws" | "wss") {
        bail!("server URL must use ws:// or wss://, got {}", args.server);
    }

    let mut controller = ChatController::new();
    let mut pending = VecDeque::new();
    pending.extend(controller.set_local_user(args.user.clone()));
    pending.extend(controller.set_peer(Some(args.peer.clone())));
    pending.extend(controller.set_credential(Some(args.token.clone())));
    pending.extend(controller.mount());

    let mut lines = input.lines();
    let mut socket: Option<Socket> = None;
    let mut printed: Option<MessageId> = None;
    let mut rejoin_at: Option<Instant> = None;
    let mut quitting = false;

    loop {
        while let Some(command) = pending.pop_front() {
            match command {
                ClientCommand::Open { credential } => {
                    match open_socket(&args.server, &credential).await {
                        Ok(ws) => {
                            socket = Some(ws);
                            pending.extend(controller.on_open());
                        }
                        Err(err) => {
                            debug!(error = %err, "connect failed");
                            writeln!(out, "! could not connect: {err:#}")?;
                            pending.extend(controller.on_closed(CloseOrigin::Transport));
                        }
                    }
                }
                ClientCommand::Close => {
                    if let Some(mut ws) = socket.take() {
                        let _ = ws.close(None).await;
                    }
                }
                ClientCommand::Transmit(frame) => {
                    if let Some(ws) = socket.as_mut()
                        && let Err(err) = transmit(ws, &frame).await
                    {
                        debug!(error = %err, "socket write failed");
                        socket = None;
                        pending.extend(controller.on_closed(CloseOrigin::Transport));
                    }
                }
                ClientCommand::Notify(notice) => {
                    if matches!(
                        notice,
                        Notice::OperationFailed {
                            code: ErrorCode::HistoryUnavailable,
                            ..
                        }
                    ) {
                        rejoin_at = Some(Instant::now() + REJOIN_DELAY);
                    }
                    writeln!(out, "! {}", format_notice(&notice))?;
                }
            }
        }

        printed = print_new_messages(controller.messages(), printed, out)?;
        out.flush()?;

        if quitting {
            return Ok(());
        }
        if controller.phase() == ClientPhase::Closed && socket.is_none() {
            bail!("chat session closed");
        }

        let live = controller.phase() == ClientPhase::Live;
        tokio::select! {
            line = lines.next_line(), if live => {
                match line.context("failed to read input")? {
                    Some(line) if line.trim() == QUIT => {
                        pending.extend(controller.unmount());
                        quitting = true;
                    }
                    Some(line) => match controller.compose(&line) {
                        Ok(command) => pending.push_back(command),
                        Err(SendBlocked::EmptyInput) => {}
                        Err(blocked) => writeln!(out, "! cannot send: {blocked}")?,
                    },
                    None => {
                        pending.extend(controller.unmount());
                        quitting = true;
                    }
                }
            }
            event = next_event(&mut socket) => match event {
                SocketEvent::Frame(frame) => pending.extend(controller.on_frame(frame)),
                SocketEvent::Undecodable(reason) => {
                    debug!(%reason, "ignoring undecodable frame");
                }
                SocketEvent::Closed(origin) => {
                    socket = None;
                    pending.extend(controller.on_closed(origin));
                }
            },
            () = wait_until(rejoin_at) => {
                rejoin_at = None;
                pending.extend(controller.rejoin());
            }
        }
    }
}

async fn open_socket(server: &Url, credential: &str) -> Result<Socket> {
    let mut url = server.clone();
    url.query_pairs_mut().append_pair("token", credential);
    let (socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {server}"))?;
    Ok(socket)
}

async fn transmit(socket: &mut Socket, frame: &ClientFrame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    socket.send(Message::text(text)).await?;
    Ok(())
}

async fn next_event(socket: &mut Option<Socket>) -> SocketEvent {
    let Some(ws) = socket.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return match serde_json::from_str(text.as_str()) {
                    Ok(frame) => SocketEvent::Frame(frame),
                    Err(err) => SocketEvent::Undecodable(err.to_string()),
                };
            }
            Some(Ok(Message::Close(_))) | None => return SocketEvent::Closed(CloseOrigin::Server),
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                debug!(error = %err, "socket read failed");
                return SocketEvent::Closed(CloseOrigin::Transport);
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Prints messages newer than `printed` and returns the newest id seen.
/// History replays after a reconnect therefore only show what was missed.
fn print_new_messages<W: Write>(
    messages: &[ChatMessage],
    printed: Option<MessageId>,
    out: &mut W,
) -> std::io::Result<Option<MessageId>> {
    let mut newest = printed;
    for message in messages {
        if printed.is_some_and(|last| message.id <= last) {
            continue;
        }
        writeln!(out, "{}", format_message(message))?;
        newest = newest.max(Some(message.id));
    }
    Ok(newest)
}

fn format_message(message: &ChatMessage) -> String {
    format!(
        "[{}] {}: {}",
        message.timestamp.clock(),
        message.sender.display_name,
        message.content
    )
}

fn format_notice(notice: &Notice) -> String {
    match notice {
        Notice::AuthenticationFailed(reason) => format!("authentication failed: {reason}"),
        Notice::OperationFailed { code, reason } => format!("{}: {reason}", code.as_str()),
        Notice::InvalidConversation(reason) => format!("invalid conversation: {reason}"),
        Notice::Reconnecting => "connection lost, reconnecting...".to_string(),
        Notice::ConnectionLost => "connection lost".to_string(),
    }
}
