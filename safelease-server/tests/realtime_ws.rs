//! End-to-end WebSocket sessions against a live listener.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use chrono::Duration as TokenTtl;
use futures_util::{SinkExt, StreamExt};
use server::{
    auth::issue_token,
    server::{create_app_router, create_app_state, metrics_handle},
};
use shared::{
    config::server::{Config, Profile},
    models::{ClientFrame, ConversationKey, ErrorCode, ServerFrame},
};
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::header::AUTHORIZATION},
};

const SECRET: &str = "integration-secret";

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let mut config = Config::default_for_profile(Profile::Test);
    config.auth.jwt_secret = SECRET.to_string();
    let config = Arc::new(config);
    let app = create_app_router(create_app_state(&config, None), config, metrics_handle());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn token(user: &str) -> String {
    issue_token(SECRET, user, TokenTtl::minutes(5)).unwrap()
}

async fn open(addr: SocketAddr, user: &str) -> Socket {
    let url = format!("ws://{addr}/ws?token={}", token(user));
    let (mut socket, _) = connect_async(url).await.expect("websocket handshake");
    assert!(matches!(
        next_frame(&mut socket).await,
        ServerFrame::SessionReady { user: ready } if ready.id == user
    ));
    socket
}

async fn next_frame(socket: &mut Socket) -> ServerFrame {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame before timeout")
            .expect("socket still open")
            .expect("valid websocket message");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("server frame json");
        }
    }
}

async fn send(socket: &mut Socket, frame: &ClientFrame) {
    let text = serde_json::to_string(frame).unwrap();
    socket.send(Message::Text(text.into())).await.unwrap();
}

fn join(conversation: &ConversationKey) -> ClientFrame {
    ClientFrame::Join {
        conversation: conversation.clone(),
    }
}

fn say(conversation: &ConversationKey, content: &str) -> ClientFrame {
    ClientFrame::Send {
        conversation: conversation.clone(),
        content: content.to_string(),
    }
}

fn appended_content(frame: ServerFrame) -> (String, String) {
    match frame {
        ServerFrame::MessageAppended { message } => (message.sender.id, message.content),
        other => panic!("expected message_appended, got {other:?}"),
    }
}

#[tokio::test]
async fn two_users_exchange_messages_and_history_replays() {
    let addr = spawn_server().await;
    let room = ConversationKey::derive("tenant1", "lessor1").unwrap();

    let mut u1 = open(addr, "lessor1").await;
    let mut u2 = open(addr, "tenant1").await;
    send(&mut u1, &join(&room)).await;
    assert!(matches!(next_frame(&mut u1).await, ServerFrame::History { messages, .. } if messages.is_empty()));
    send(&mut u2, &join(&room)).await;
    assert!(matches!(next_frame(&mut u2).await, ServerFrame::History { .. }));

    send(&mut u1, &say(&room, "hello")).await;
    assert_eq!(appended_content(next_frame(&mut u1).await), ("lessor1".into(), "hello".into()));
    assert_eq!(appended_content(next_frame(&mut u2).await), ("lessor1".into(), "hello".into()));

    send(&mut u2, &say(&room, "hi back")).await;
    assert_eq!(appended_content(next_frame(&mut u1).await), ("tenant1".into(), "hi back".into()));
    assert_eq!(appended_content(next_frame(&mut u2).await), ("tenant1".into(), "hi back".into()));

    let mut late = open(addr, "lessor1").await;
    send(&mut late, &join(&room)).await;
    match next_frame(&mut late).await {
        ServerFrame::History { conversation, messages } => {
            assert_eq!(conversation, room);
            let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, ["hello", "hi back"]);
        }
        other => panic!("expected history, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_credential_fails_and_closes() {
    let addr = spawn_server().await;
    let expired = issue_token(SECRET, "lessor1", TokenTtl::minutes(-10)).unwrap();
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws?token={expired}"))
        .await
        .unwrap();

    assert!(matches!(
        next_frame(&mut socket).await,
        ServerFrame::AuthenticationFailed { reason } if reason.contains("expired")
    ));

    let closing = timeout(Duration::from_secs(5), socket.next()).await.unwrap();
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
}

#[tokio::test]
async fn missing_credential_fails() {
    let addr = spawn_server().await;
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    assert!(matches!(
        next_frame(&mut socket).await,
        ServerFrame::AuthenticationFailed { .. }
    ));
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let addr = spawn_server().await;
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request.headers_mut().insert(
        AUTHORIZATION,
        format!("Bearer {}", token("tenant1")).parse().unwrap(),
    );

    let (mut socket, _) = connect_async(request).await.unwrap();
    assert!(matches!(
        next_frame(&mut socket).await,
        ServerFrame::SessionReady { user } if user.id == "tenant1"
    ));
}

#[tokio::test]
async fn failures_stay_on_the_originating_socket() {
    let addr = spawn_server().await;
    let room = ConversationKey::derive("a1", "b1").unwrap();
    let mut a = open(addr, "a1").await;
    let mut b = open(addr, "b1").await;
    send(&mut a, &join(&room)).await;
    next_frame(&mut a).await;
    send(&mut b, &join(&room)).await;
    next_frame(&mut b).await;

    send(&mut a, &say(&room, "   ")).await;
    a.send(Message::Text("{\"type\":\"dance\"}".into())).await.unwrap();
    send(&mut a, &say(&room, "real")).await;

    let codes: Vec<_> = [next_frame(&mut a).await, next_frame(&mut a).await]
        .into_iter()
        .map(|frame| match frame {
            ServerFrame::OperationFailed { code, .. } => code,
            other => panic!("expected failure, got {other:?}"),
        })
        .collect();
    assert_eq!(codes, [ErrorCode::EmptyContent, ErrorCode::MalformedFrame]);

    assert_eq!(appended_content(next_frame(&mut a).await).1, "real");
    assert_eq!(appended_content(next_frame(&mut b).await).1, "real", "b saw no failures");
}

#[tokio::test]
async fn closed_socket_stops_receiving_broadcasts() {
    let addr = spawn_server().await;
    let room = ConversationKey::derive("c1", "d1").unwrap();
    let mut c = open(addr, "c1").await;
    let mut d = open(addr, "d1").await;
    send(&mut c, &join(&room)).await;
    next_frame(&mut c).await;
    send(&mut d, &join(&room)).await;
    next_frame(&mut d).await;

    d.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    send(&mut c, &say(&room, "still here?")).await;
    assert_eq!(appended_content(next_frame(&mut c).await).1, "still here?");
}
