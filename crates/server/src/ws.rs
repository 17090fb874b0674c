//! `/ws` endpoint: one task per browser connection.
//!
//! The task owns the socket and multiplexes five sources with
//! `tokio::select!`: inbound frames, the connection's outbound queue, the
//! ping ticker, the idle deadline and the server shutdown flag.

use std::ops::ControlFlow;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use huddle_core::{ClientEvent, ConnId, ErrorCode};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::relay::Relay;
use crate::AppState;

/// GET /ws: upgrade to a relay session.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max = state.config.limits.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(mut socket: WebSocket, state: AppState) {
    let relay = state.relay.clone();
    let (conn, mut outbox) = relay.register();
    info!("conn {conn}: connected");

    let heartbeat = state.config.heartbeat.clone();
    let mut ping = tokio::time::interval(heartbeat.ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ping.tick().await;

    // Any inbound frame pushes the deadline back.
    let idle = tokio::time::sleep(heartbeat.idle_timeout());
    tokio::pin!(idle);

    let mut shutdown = state.shutdown.clone();

    let reason = loop {
        tokio::select! {
            frame = socket.recv() => match frame {
                Some(Ok(msg)) => {
                    idle.as_mut().reset(Instant::now() + heartbeat.idle_timeout());
                    if handle_frame(&relay, conn, msg).is_break() {
                        break "closed by client";
                    }
                }
                Some(Err(e)) => {
                    warn!("conn {conn}: websocket error: {e}");
                    break "transport error";
                }
                None => break "stream ended",
            },
            event = outbox.recv() => {
                let Some(event) = event else {
                    break "outbox closed";
                };
                match event.encode() {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break "send failed";
                        }
                    }
                    Err(e) => warn!("conn {conn}: failed to encode event: {e}"),
                }
            },
            () = &mut idle => {
                let _ = socket.send(Message::Close(None)).await;
                break "idle timeout";
            },
            _ = ping.tick() => {
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break "send failed";
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = socket.send(Message::Close(None)).await;
                    break "server shutdown";
                }
            },
        }
    };

    relay.unregister(conn);
    info!("conn {conn}: disconnected ({reason})");
}

fn handle_frame(relay: &Relay, conn: ConnId, msg: Message) -> ControlFlow<()> {
    match msg {
        Message::Text(text) => match ClientEvent::decode(text.as_str()) {
            Ok(event) => relay.dispatch(conn, event),
            Err(e) => {
                warn!("conn {conn}: rejected frame: {e}");
                relay.reject(conn, ErrorCode::BadRequest, e.to_string());
            }
        },
        Message::Binary(_) => {
            warn!("conn {conn}: rejected binary frame");
            relay.reject(
                conn,
                ErrorCode::BadRequest,
                "binary frames are not supported",
            );
        }
        // axum answers pings itself; both still count as liveness.
        Message::Ping(_) | Message::Pong(_) => debug!("conn {conn}: heartbeat"),
        Message::Close(_) => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}
