//! Realtime WebSocket endpoint.
//!
//! Each connection gets a bounded outbound queue in the dispatcher, one
//! writer task draining it alongside a heartbeat, and a read loop handling
//! subscribe/unsubscribe. Malformed input earns an error message, not a
//! disconnect; a queue overflow earns a disconnect.

use crate::state::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Query};
use axum::response::Response;
use fluxbase_realtime::{Channel, ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Opaque identity reference established by the auth layer upstream.
    #[serde(default)]
    token: Option<String>,
}

pub async fn realtime_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(shutdown): Extension<watch::Receiver<bool>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token, shutdown))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    user: Option<String>,
    shutdown: watch::Receiver<bool>,
) {
    let dispatcher = state.dispatcher.clone();
    let mut handle = dispatcher.register(user);
    let connection = handle.id;
    tracing::debug!(connection, "realtime connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: outbound queue plus heartbeat.
    let heartbeat = state.config.realtime.heartbeat();
    let mut writer_shutdown = shutdown.clone();
    let mut writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so heartbeats start one
        // interval in.
        ticker.tick().await;

        loop {
            tokio::select! {
                message = handle.receiver.recv() => {
                    match message {
                        Some(message) => {
                            let Ok(text) = serde_json::to_string(&message) else {
                                continue;
                            };
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            // Queue closed: unregistered, shut down, or
                            // dropped for overflow.
                            let frame = if handle.overflowed() {
                                CloseFrame {
                                    code: 1013,
                                    reason: "send queue overflow".into(),
                                }
                            } else {
                                CloseFrame {
                                    code: 1000,
                                    reason: "closing".into(),
                                }
                            };
                            let _ = ws_tx.send(Message::Close(Some(frame))).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let Ok(text) = serde_json::to_string(&ServerMessage::Heartbeat) else {
                        continue;
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                _ = writer_shutdown.changed() => {
                    if *writer_shutdown.borrow() {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: 1000,
                                reason: "server shutting down".into(),
                            })))
                            .await;
                        return;
                    }
                }
            }
        }
    });

    // Reader: client subscribe/unsubscribe, newline-delimited JSON. Stops
    // on client close or server shutdown.
    let mut reader_shutdown = shutdown;
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = reader_shutdown.changed() => {
                if *reader_shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let Some(Ok(frame)) = frame else { break };
        match frame {
            Message::Text(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    handle_client_line(&dispatcher, connection, line);
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            _ => {}
        }
    }

    // Dropping the subscriber closes the writer's queue; give it a moment
    // to flush the close frame before the socket is torn down.
    dispatcher.unregister(connection);
    if tokio::time::timeout(std::time::Duration::from_secs(1), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    tracing::debug!(connection, "realtime connection closed");
}

fn handle_client_line(
    dispatcher: &fluxbase_realtime::Dispatcher,
    connection: u64,
    line: &str,
) {
    let message: ClientMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => {
            dispatcher.send_to(
                connection,
                ServerMessage::Error {
                    error: format!("malformed message: {err}"),
                },
            );
            return;
        }
    };

    match message {
        ClientMessage::Subscribe { channel } => match Channel::parse(&channel) {
            Ok(parsed) => {
                dispatcher.subscribe(connection, parsed);
                dispatcher.send_to(connection, ServerMessage::Ack { channel });
            }
            Err(err) => {
                dispatcher.send_to(
                    connection,
                    ServerMessage::Error {
                        error: err.to_string(),
                    },
                );
            }
        },
        ClientMessage::Unsubscribe { channel } => match Channel::parse(&channel) {
            Ok(parsed) => {
                dispatcher.unsubscribe(connection, &parsed);
                dispatcher.send_to(connection, ServerMessage::Ack { channel });
            }
            Err(err) => {
                dispatcher.send_to(
                    connection,
                    ServerMessage::Error {
                        error: err.to_string(),
                    },
                );
            }
        },
    }
}
