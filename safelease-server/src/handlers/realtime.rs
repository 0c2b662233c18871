//! WebSocket endpoint for realtime chat.
//!
//! The credential travels as `?token=` or `Authorization: Bearer`. It is
//! checked once, right after the upgrade; on failure the socket receives
//! `authentication_failed` and is closed. Otherwise a writer task drains the
//! connection's queue while this task reads client frames in order. Both
//! halves stop as soon as the session's closed signal fires, whichever side
//! raised it.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::{HeaderMap, header},
    response::Response,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use shared::models::ServerFrame;

use crate::{app_state::AppState, auth::bearer_token, realtime::RealtimeHub};

/// Upper bound on the closing handshake with a peer that stopped reading.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Deserialize)]
pub struct RealtimeQuery {
    pub token: Option<String>,
}

pub async fn realtime_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
) -> Response {
    let credential = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_owned)
    });
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| serve_connection(hub, socket, credential))
}

async fn serve_connection(hub: Arc<RealtimeHub>, socket: WebSocket, credential: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    let (mut session, outbound) = match hub.connect(credential.as_deref()).await {
        Ok(pair) => pair,
        Err(err) => {
            let frame = ServerFrame::AuthenticationFailed {
                reason: err.to_string(),
            };
            let _ = write_frame(&mut sink, &frame).await;
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: err.code().into(),
                })))
                .await;
            return;
        }
    };

    let connection_id = session.id();
    let closed = session.closed_signal();
    let writer = tokio::spawn(forward_frames(sink, outbound, closed.clone()));

    loop {
        let message = tokio::select! {
            () = closed.cancelled() => break,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                debug!(connection_id, error = %err, "socket read failed");
                break;
            }
        }
    }

    drop(session);
    if let Err(err) = writer.await {
        warn!(connection_id, error = %err, "socket writer ended abnormally");
    }
}

/// Writes queued frames until the queue ends, a write fails, or `closed`
/// fires. A failed write cancels `closed` so the reader stops too.
async fn forward_frames<S>(mut sink: S, mut outbound: Receiver<ServerFrame>, closed: CancellationToken)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let written = tokio::select! {
            () = closed.cancelled() => break,
            written = write_frame(&mut sink, &frame) => written,
        };
        if let Err(err) = written {
            debug!(error = %err, "socket write failed");
            closed.cancel();
            break;
        }
    }
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
}

async fn write_frame<S>(sink: &mut S, frame: &ServerFrame) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame).map_err(|err| err.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|err| err.to_string())
}
