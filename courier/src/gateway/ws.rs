//! WebSocket session loop.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::auth::Identity;
use super::protocol::ServerEvent;
use super::service::PushGateway;

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> bool {
    match event.to_text() {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.event, e);
            true
        }
    }
}

/// Drive one authenticated socket until the client leaves, misses a
/// heartbeat, or the connection is force-closed.
pub async fn run_connection(socket: WebSocket, gateway: Arc<PushGateway>, identity: Identity) {
    let (handle, mut events) = gateway.connect(&identity);
    let cancelled = handle.cancelled();
    let (mut sender, mut receiver) = socket.split();

    let mut heartbeat_interval = tokio::time::interval(gateway.config().heartbeat_interval());
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = cancelled.cancelled() => {
                // Flush what was queued before the close, e.g. a maintenance notice.
                while let Ok(event) = events.try_recv() {
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                if let Err(e) = sender.send(Message::Close(None)).await {
                    debug!(connection_id = %handle.id, "Failed to send Close frame: {}", e);
                }
                debug!(connection_id = %handle.id, "Connection force-closed");
                break;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        gateway.handle_client_message(&handle, text.as_str());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        handle.send(ServerEvent::error("Binary frames are not supported"));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(connection_id = %handle.id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Some(event) => {
                        if !send_event(&mut sender, &event).await {
                            debug!(connection_id = %handle.id, "Failed to send event, closing");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = heartbeat_interval.tick() => {
                if awaiting_pong {
                    debug!(connection_id = %handle.id, "Client failed to respond to Ping, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_ok() {
                    awaiting_pong = true;
                } else {
                    debug!(connection_id = %handle.id, "Failed to send Ping, closing connection");
                    break;
                }
            }
        }
    }

    gateway.disconnect(handle.id);
}
