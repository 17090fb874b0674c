#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_api::{ClientEvent, ConnId, RoomId, ServerEvent, UserProfile};
use huddle_runtime_config::RelayConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay running in-process on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_config(RelayConfig::default()).await
    }

    pub async fn with_config(config: RelayConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(async move {
            huddle_server::run(listener, config, async move {
                let _ = stopped.await;
            })
            .await
            .expect("relay server");
        });
        Self {
            addr,
            stop: Some(stop),
        }
    }

    /// Build a full API URL from a path like `/health`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/api{}", self.addr, path)
    }

    pub async fn connect(&self) -> TestClient {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("websocket handshake");
        let mut client = TestClient {
            conn_id: ConnId::new(0),
            ws,
        };
        client.conn_id = match client.next_event().await {
            ServerEvent::Welcome { conn_id } => conn_id,
            other => panic!("expected welcome, got {other:?}"),
        };
        client
    }

    pub fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

pub struct TestClient {
    pub conn_id: ConnId,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn send(&mut self, event: &ClientEvent) {
        let text = serde_json::to_string(event).expect("encode client event");
        self.send_raw(Message::text(text)).await;
    }

    pub async fn send_raw(&mut self, msg: Message) {
        self.ws.send(msg).await.expect("send frame");
    }

    /// Next relay event, skipping heartbeat frames.
    pub async fn next_event(&mut self) -> ServerEvent {
        loop {
            let msg = tokio::time::timeout(EVENT_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .expect("websocket error");
            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("decode server event");
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    /// Next event that is not an `active-users` presence update.
    pub async fn next_non_presence(&mut self) -> ServerEvent {
        loop {
            match self.next_event().await {
                ServerEvent::ActiveUsers { .. } => continue,
                other => return other,
            }
        }
    }

    /// Skip events until `pick` accepts one.
    pub async fn expect<T>(&mut self, mut pick: impl FnMut(ServerEvent) -> Option<T>) -> T {
        loop {
            if let Some(found) = pick(self.next_event().await) {
                return found;
            }
        }
    }

    pub async fn identify(&mut self, user_id: &str) {
        self.send(&ClientEvent::Identify(UserProfile::new(user_id)))
            .await;
        let me = self.conn_id;
        self.expect(|event| match event {
            ServerEvent::ActiveUsers { users } if users.iter().any(|p| p.conn_id == me) => {
                Some(())
            }
            _ => None,
        })
        .await;
    }

    pub async fn join_room(&mut self, room_id: &RoomId) {
        self.send(&ClientEvent::JoinRoom {
            room_id: room_id.clone(),
        })
        .await;
        self.expect(|event| matches!(event, ServerEvent::RoomMembers { .. }).then_some(()))
            .await;
    }

    pub async fn join_video(&mut self, room_id: &RoomId) {
        self.send(&ClientEvent::JoinVideo {
            room_id: room_id.clone(),
        })
        .await;
        self.expect(|event| matches!(event, ServerEvent::VideoParticipants { .. }).then_some(()))
            .await;
    }

    /// True when the relay closes the socket within the timeout.
    pub async fn wait_closed(&mut self) -> bool {
        let closed = async {
            loop {
                match self.ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    Some(Ok(_)) => continue,
                }
            }
        };
        tokio::time::timeout(EVENT_TIMEOUT, closed).await.is_ok()
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub fn room(name: &str) -> RoomId {
    RoomId::parse(name).expect("valid room id")
}
