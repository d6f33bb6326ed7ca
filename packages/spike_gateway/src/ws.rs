//! WebSocket status feed.
//!
//! Every subscriber receives each selected-engine snapshot as one JSON text
//! message. Delivery is fire-and-forget: there are no acks and a subscriber
//! that falls behind the broadcast buffer skips the missed snapshots.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::AppState;
use crate::metrics::GatewayMetrics;

pub async fn status_feed_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let feed = state.sink.subscribe();
    let metrics = state.metrics.clone();
    ws.on_upgrade(move |socket| handle_status_feed(socket, feed, metrics))
}

async fn handle_status_feed(
    socket: WebSocket,
    mut feed: broadcast::Receiver<Arc<Value>>,
    metrics: Arc<GatewayMetrics>,
) {
    metrics.subscriber_connected();
    debug!("status feed subscriber connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            snapshot = feed.recv() => match snapshot {
                Ok(snapshot) => {
                    if sender
                        .send(Message::Text(snapshot.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    metrics.snapshot_pushed();
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status feed subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                // Subscribers have nothing to say; drop anything else.
                Some(Ok(_)) => {}
            },
        }
    }

    metrics.subscriber_disconnected();
    debug!("status feed subscriber disconnected");
}
