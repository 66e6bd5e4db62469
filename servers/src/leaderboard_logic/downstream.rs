//! WebSocket downstream: the push channel carrying version updates.
//!
//! Each connection runs a read pump and a write pump. The protocol has no
//! client-to-server messages, so the read pump only watches for errors and
//! close frames; its exit unregisters the subscriber. The write pump owns
//! the socket sender and drains the hub-fed outbound queue, coalescing
//! whatever else is already queued into the same frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::state::AppState;

// Time allowed per socket write.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let subscription = match state.hub.subscribe().await {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(%err, "rejecting socket, hub unavailable");
            return;
        }
    };
    let id = subscription.id;

    let (sender, receiver) = socket.split();
    let writer = tokio::spawn(write_pump(sender, subscription.outbound));

    // The read pump runs on this task and decides the connection's fate.
    read_pump(receiver).await;

    state.hub.unsubscribe(id).await;
    let _ = writer.await;
    debug!(subscriber = id, "socket closed");
}

/// Discards inbound frames; any read error or close frame ends the session.
async fn read_pump(mut receiver: SplitStream<WebSocket>) {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Forwards queued frames to the socket under a write deadline, folding any
/// backlog into one frame separated by line feeds. A closed queue is the
/// hub's close sentinel.
async fn write_pump(mut sender: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<String>) {
    while let Some(first) = outbound.recv().await {
        let mut frame = first;
        // Bounded by what is queued right now; try_recv never waits.
        while let Ok(next) = outbound.try_recv() {
            frame.push('\n');
            frame.push_str(&next);
        }

        match tokio::time::timeout(WRITE_WAIT, sender.send(Message::Text(frame.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return,
            Err(_) => {
                warn!("socket write exceeded deadline");
                return;
            }
        }
    }

    // Queue closed: the hub unregistered this subscriber.
    let _ = sender.send(Message::Close(None)).await;
}
