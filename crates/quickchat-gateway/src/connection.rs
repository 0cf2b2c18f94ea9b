use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quickchat_types::events::GatewayEvent;

use crate::presence::{Presence, PresenceChannel, PresenceTracker};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Run one realtime session for an already authenticated user.
///
/// The session is tracked as the user's presence channel for its whole
/// lifetime. Pushes to it and presence broadcasts are forwarded to the socket.
pub async fn handle_connection(
    socket: WebSocket,
    tracker: PresenceTracker,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Subscribe before going online so our own presence broadcast is not missed
    let mut broadcast_rx = tracker.subscribe();
    let (channel, mut user_rx) = PresenceChannel::open();
    let conn_id = channel.id();
    tracker.mark_online(user_id, channel);

    // The set may not have changed (reconnect), so always send it once
    let current = GatewayEvent::OnlineUsers {
        user_ids: tracker.snapshot(),
    };
    if send_event(&mut sender, &current).await.is_err() {
        tracker.mark_offline(user_id, conn_id);
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let username_send = username.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else {
                        info!("{} ({}) superseded by a newer session", username_send, user_id);
                        break;
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Text(text) => {
                    // The gateway is push-only; clients act through the REST API
                    debug!(
                        "{} ({}) sent unexpected text frame: {}",
                        username_recv,
                        user_id,
                        text.chars().take(200).collect::<String>()
                    );
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracker.mark_offline(user_id, conn_id);
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::SocketAddr;

    use axum::Router;
    use axum::extract::{Path, State, WebSocketUpgrade};
    use axum::response::Response;
    use axum::routing::get;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn upgrade(
        State(tracker): State<PresenceTracker>,
        Path(user_id): Path<Uuid>,
        ws: WebSocketUpgrade,
    ) -> Response {
        ws.on_upgrade(move |socket| handle_connection(socket, tracker, user_id, "tester".into()))
    }

    async fn serve(tracker: PresenceTracker) -> SocketAddr {
        let app = Router::new()
            .route("/ws/{user_id}", get(upgrade))
            .with_state(tracker);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    async fn connect(addr: SocketAddr, user_id: Uuid) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws/{}", addr, user_id))
            .await
            .unwrap();
        client
    }

    /// Next gateway event, or None once the server has closed the socket.
    async fn next_event(client: &mut Client) -> Option<GatewayEvent> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a frame");
            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap());
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Read past presence broadcasts until an `OnlineUsers` set containing `marker` shows up.
    async fn expect_marker(client: &mut Client, marker: Uuid) {
        loop {
            match next_event(client).await {
                Some(GatewayEvent::OnlineUsers { user_ids }) if user_ids.contains(&marker) => return,
                Some(_) => continue,
                None => panic!("session closed before the pushed event arrived"),
            }
        }
    }

    async fn expect_handshake(client: &mut Client, user: Uuid) {
        match next_event(client).await {
            Some(GatewayEvent::Ready { user_id, username }) => {
                assert_eq!(user_id, user);
                assert_eq!(username, "tester");
            }
            other => panic!("expected ready, got {:?}", other),
        }
        match next_event(client).await {
            Some(GatewayEvent::OnlineUsers { user_ids }) => assert!(user_ids.contains(&user)),
            other => panic!("expected online snapshot, got {:?}", other),
        }
    }

    fn push_marker(tracker: &PresenceTracker, user: Uuid) -> Uuid {
        let marker = Uuid::new_v4();
        let channel = tracker.is_online(user).expect("user should be online");
        assert!(channel.push(GatewayEvent::OnlineUsers {
            user_ids: HashSet::from([marker]),
        }));
        marker
    }

    #[tokio::test]
    async fn connect_sends_ready_then_snapshot_and_forwards_pushes() {
        let tracker = PresenceTracker::new();
        let addr = serve(tracker.clone()).await;
        let user = Uuid::new_v4();

        let mut client = connect(addr, user).await;
        expect_handshake(&mut client, user).await;
        assert!(tracker.snapshot().contains(&user));

        let marker = push_marker(&tracker, user);
        expect_marker(&mut client, marker).await;
    }

    #[tokio::test]
    async fn newer_session_closes_the_superseded_one() {
        let tracker = PresenceTracker::new();
        let addr = serve(tracker.clone()).await;
        let user = Uuid::new_v4();

        let mut first = connect(addr, user).await;
        expect_handshake(&mut first, user).await;
        let mut second = connect(addr, user).await;
        expect_handshake(&mut second, user).await;

        while next_event(&mut first).await.is_some() {}

        // Give the first session's teardown time to run its mark_offline
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(tracker.snapshot().contains(&user));

        let marker = push_marker(&tracker, user);
        expect_marker(&mut second, marker).await;
    }

    #[tokio::test]
    async fn closing_the_socket_marks_the_user_offline() {
        let tracker = PresenceTracker::new();
        let addr = serve(tracker.clone()).await;
        let user = Uuid::new_v4();

        let mut client = connect(addr, user).await;
        expect_handshake(&mut client, user).await;
        client.close(None).await.unwrap();

        for _ in 0..100 {
            if tracker.snapshot().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("user still online after closing the socket");
    }
}
