//! Session behaviour against a real WebSocket server.

use async_trait::async_trait;
use beacon_core::Notification;
use beacon_protocol::{codec, NotificationData, WireMessage};
use beacon_subscriber::{Presenter, Session, SessionState, SubscriberConfig, NOTIFICATION_BACKLOG};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

struct ChannelPresenter {
    tx: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl Presenter for ChannelPresenter {
    async fn on_notification(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

fn presenter() -> (Arc<dyn Presenter>, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelPresenter { tx }), rx)
}

/// Holds every notification until permits are added.
struct GatedPresenter {
    gate: Semaphore,
    tx: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl Presenter for GatedPresenter {
    async fn on_notification(&self, notification: Notification) {
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        let _ = self.tx.send(notification);
    }
}

fn config(addr: SocketAddr) -> SubscriberConfig {
    let mut config = SubscriberConfig::new(format!("ws://{addr}"));
    config.reconnect_delay_ms = 200;
    config.connect_timeout_ms = 2_000;
    config
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (socket, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    tokio_tungstenite::accept_async(socket).await.unwrap()
}

async fn send(ws: &mut WebSocketStream<TcpStream>, message: &WireMessage) {
    ws.send(Message::Text(codec::encode(message).unwrap())).await.unwrap();
}

async fn recv(ws: &mut WebSocketStream<TcpStream>) -> WireMessage {
    loop {
        match timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap() {
            Message::Text(text) => return codec::decode(&text).unwrap(),
            Message::Close(_) => panic!("connection closed"),
            _ => {}
        }
    }
}

async fn wait_for(state: &mut watch::Receiver<SessionState>, expected: SessionState) {
    timeout(WAIT, state.wait_for(|s| *s == expected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_announces_identity_and_answers_ping() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (presenter, _rx) = presenter();
    let session = Session::spawn(
        config(listener.local_addr().unwrap()).with_user_id("alice"),
        presenter,
    );

    let mut ws = accept(&listener).await;
    send(&mut ws, &WireMessage::connected("1")).await;
    assert_eq!(recv(&mut ws).await, WireMessage::auth("alice"));

    send(&mut ws, &WireMessage::Ping).await;
    assert_eq!(recv(&mut ws).await, WireMessage::Pong);

    let mut state = session.watch();
    wait_for(&mut state, SessionState::Connected).await;
    session.shutdown().await;
}

#[tokio::test]
async fn test_no_auth_without_identity() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (presenter, _rx) = presenter();
    let session = Session::spawn(config(listener.local_addr().unwrap()), presenter);

    let mut ws = accept(&listener).await;
    send(&mut ws, &WireMessage::Ping).await;
    // The first frame from the subscriber is the pong, not an auth.
    assert_eq!(recv(&mut ws).await, WireMessage::Pong);

    session.shutdown().await;
}

#[tokio::test]
async fn test_notifications_reach_presenter() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (presenter, mut rx) = presenter();
    let session = Session::spawn(config(listener.local_addr().unwrap()), presenter);

    let mut ws = accept(&listener).await;
    let bytes: Vec<u8> = (0..=255).rev().collect();
    let data = NotificationData::new("bob", "look", 3_000).with_media("image/png", "cat.png", &bytes);
    send(&mut ws, &WireMessage::notification(data)).await;
    // Unknown and malformed frames do not end the session.
    ws.send(Message::Text(r#"{"type":"typing"}"#.into())).await.unwrap();
    ws.send(Message::Text("not json".into())).await.unwrap();
    let mut no_duration = NotificationData::new("carol", "hi", 0);
    no_duration.duration = None;
    send(&mut ws, &WireMessage::notification(no_duration)).await;

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.sender(), "bob");
    assert_eq!(first.duration(), Duration::from_secs(3));
    assert_eq!(first.media().unwrap().bytes.to_vec(), bytes);

    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.sender(), "carol");
    assert_eq!(second.duration(), Duration::from_secs(5));

    assert_eq!(session.state(), SessionState::Connected);
    session.shutdown().await;
}

#[tokio::test]
async fn test_server_shutdown_message_keeps_session_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (presenter, _rx) = presenter();
    let session = Session::spawn(config(listener.local_addr().unwrap()), presenter);
    let mut state = session.watch();

    let mut ws = accept(&listener).await;
    wait_for(&mut state, SessionState::Connected).await;
    send(&mut ws, &WireMessage::server_shutdown()).await;
    send(&mut ws, &WireMessage::Ping).await;

    assert_eq!(recv(&mut ws).await, WireMessage::Pong);
    assert_eq!(session.state(), SessionState::Connected);
    session.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (presenter, _rx) = presenter();
    let session = Session::spawn(
        config(listener.local_addr().unwrap()).with_user_id("alice"),
        presenter,
    );
    let mut state = session.watch();

    let mut ws = accept(&listener).await;
    assert_eq!(recv(&mut ws).await, WireMessage::auth("alice"));
    ws.close(None).await.unwrap();
    drop(ws);

    wait_for(&mut state, SessionState::Disconnected).await;

    // Announces again on the new socket.
    let mut ws = accept(&listener).await;
    assert_eq!(recv(&mut ws).await, WireMessage::auth("alice"));
    wait_for(&mut state, SessionState::Connected).await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_repeated_disconnect_schedules_one_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (presenter, _rx) = presenter();
    let session = Session::spawn(config(listener.local_addr().unwrap()), presenter);
    let mut state = session.watch();

    let _first = accept(&listener).await;
    wait_for(&mut state, SessionState::Connected).await;

    for _ in 0..5 {
        session.disconnect().await;
    }
    wait_for(&mut state, SessionState::Disconnected).await;

    let _second = accept(&listener).await;
    wait_for(&mut state, SessionState::Connected).await;

    // Several reconnect delays later, no further dial arrives.
    let extra = timeout(Duration::from_millis(1_000), listener.accept()).await;
    assert!(extra.is_err());
    assert_eq!(session.state(), SessionState::Connected);

    session.shutdown().await;
}

#[tokio::test]
async fn test_retries_until_server_appears() {
    // Reserve a port, then release it so the first dials are refused.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let (presenter, _rx) = presenter();
    let session = Session::spawn(config(addr), presenter);
    let mut state = session.watch();

    wait_for(&mut state, SessionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let listener = TcpListener::bind(addr).await.unwrap();
    let _ws = accept(&listener).await;
    wait_for(&mut state, SessionState::Connected).await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_manual_reconnect_connects_immediately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (presenter, _rx) = presenter();
    let mut config = config(listener.local_addr().unwrap());
    config.reconnect_delay_ms = 60_000;
    let session = Session::spawn(config, presenter);
    let mut state = session.watch();

    let _first = accept(&listener).await;
    wait_for(&mut state, SessionState::Connected).await;

    session.disconnect().await;
    wait_for(&mut state, SessionState::Disconnected).await;

    // Without the manual reconnect the next dial would be a minute away.
    session.reconnect().await;
    let _second = accept(&listener).await;
    wait_for(&mut state, SessionState::Connected).await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_pending_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (presenter, _rx) = presenter();
    let session = Session::spawn(config(listener.local_addr().unwrap()), presenter);
    let mut state = session.watch();

    let mut ws = accept(&listener).await;
    wait_for(&mut state, SessionState::Connected).await;
    ws.close(None).await.unwrap();
    wait_for(&mut state, SessionState::Disconnected).await;

    session.shutdown().await;

    let dial = timeout(Duration::from_millis(800), listener.accept()).await;
    assert!(dial.is_err());
}

#[tokio::test]
async fn test_slow_presenter_drops_excess_notifications() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let presenter = Arc::new(GatedPresenter {
        gate: Semaphore::new(0),
        tx,
    });
    let session = Session::spawn(config(listener.local_addr().unwrap()), presenter.clone());

    let mut ws = accept(&listener).await;
    let sent = NOTIFICATION_BACKLOG + 20;
    for i in 0..sent {
        let data = NotificationData::new("bob", format!("#{i}"), 1_000);
        send(&mut ws, &WireMessage::notification(data)).await;
    }

    // The read loop is not held up by the presenter.
    send(&mut ws, &WireMessage::Ping).await;
    assert_eq!(recv(&mut ws).await, WireMessage::Pong);

    presenter.gate.add_permits(sent);
    let mut received = 0;
    while let Ok(Some(_)) = timeout(Duration::from_millis(500), rx.recv()).await {
        received += 1;
    }

    assert!(received >= NOTIFICATION_BACKLOG);
    assert!(received <= NOTIFICATION_BACKLOG + 1);
    assert_eq!(session.state(), SessionState::Connected);
    session.shutdown().await;
}
