// src/server/ws.rs
//
// Per-socket WebSocket session.
// Each socket gets its own bus subscription for broadcasts, a ping
// heartbeat, and a dispatch loop for inbound commands. Status queries
// reply only to the requesting socket; everything else the client
// observes arrives as bus broadcasts.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::protocol::{parse_client_message, ClientMessage, ServerMessage};
use super::AppState;
use crate::channel::manager::DEFAULT_CHANNEL_ID;
use crate::channel::ChannelStatus;

fn default_channel(id: Option<String>) -> String {
    id.filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_CHANNEL_ID.to_string())
}

/// Server ping cadence; a client that misses a whole interval without
/// ponging is terminated.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subscription = state.bus.subscribe();

    tlog!("[ws] Client connected ({} total subscriber(s))", state.bus.subscriber_count());

    // Greet with the decoder list so the UI can label frames immediately
    let plugins = ServerMessage::Plugins {
        plugins: state.decoders.plugin_infos(),
    };
    if send_message(&mut ws_tx, &plugins).await.is_err() {
        return;
    }

    let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping_interval.tick().await; // immediate first tick
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if handle_text(&state, &text, &mut ws_tx).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // The websocket layer answers pings itself
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::error("Invalid message format");
                        if send_message(&mut ws_tx, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tlog!("[ws] Client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        tlog!("[ws] Socket error: {}", e);
                        break;
                    }
                }
            }

            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        let message = ServerMessage::from_event(event);
                        if send_message(&mut ws_tx, &message).await.is_err() {
                            break;
                        }
                    }
                    // Detached by the bus (overflow); the client reconnects
                    None => {
                        tlog!("[ws] Bus subscription ended, closing socket");
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if awaiting_pong {
                    tlog!("[ws] Client missed heartbeat, terminating");
                    break;
                }
                awaiting_pong = true;
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
    drop(ws_rx);
    tlog!("[ws] Client disconnected");
}

async fn send_message(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => ws_tx.send(Message::Text(json)).await,
        Err(e) => {
            tlog!("[ws] Failed to serialise message: {}", e);
            Ok(())
        }
    }
}

/// Parse and dispatch one inbound text frame. Replies (status, errors) go
/// only to this socket; state changes broadcast through the bus.
async fn handle_text(
    state: &Arc<AppState>,
    text: &str,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    let message = match parse_client_message(text) {
        Ok(message) => message,
        Err(error) => {
            return send_message(ws_tx, &ServerMessage::error(error)).await;
        }
    };

    match message {
        ClientMessage::Connect { channel_id, config } => {
            let channel_id = default_channel(channel_id);
            let config = crate::channel::config::PortConfigBuilder::from_input(config).build();
            let result = match config {
                Ok(config) => state.manager.connect(&channel_id, config).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                let reply = ServerMessage::ChannelError {
                    channel_id,
                    error: e.to_string(),
                };
                return send_message(ws_tx, &reply).await;
            }
        }
        ClientMessage::Disconnect { channel_id } => {
            let channel_id = default_channel(channel_id);
            state.manager.disconnect(&channel_id).await;
        }
        ClientMessage::Send {
            channel_id,
            data,
            mode,
        } => {
            let channel_id = default_channel(channel_id);
            if let Err(e) = state.manager.send(&channel_id, &data, mode).await {
                let reply = ServerMessage::ChannelError {
                    channel_id,
                    error: e.to_string(),
                };
                return send_message(ws_tx, &reply).await;
            }
        }
        ClientMessage::Clear { channel_id } => {
            let channel_id = default_channel(channel_id);
            state.manager.clear_buffer(&channel_id);
        }
        ClientMessage::GetStatus { channel_id } => {
            let channels: HashMap<String, ChannelStatus> = match channel_id {
                Some(id) => {
                    let mut map = HashMap::new();
                    map.insert(id.clone(), state.manager.status(&id));
                    map
                }
                None => state.manager.status_all(),
            };
            return send_message(ws_tx, &ServerMessage::StatusReply { channels }).await;
        }
        ClientMessage::RemoveChannel { channel_id } => {
            let channel_id = default_channel(channel_id);
            state.manager.remove_channel(&channel_id).await;
        }
    }

    Ok(())
}
