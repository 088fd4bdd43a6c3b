//! Live dashboard WebSocket.
//!
//! The socket is split: the sink becomes a [`SubscriberConnection`] owned by
//! the broadcast hub, the stream is drained here only to notice the close.
//! Whichever side fails first ends the subscription.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broadcast::{DeliveryError, HubMessage, SubscriberConnection, SubscriptionScope};
use crate::engine::TelemetryEngine;

pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink: Mutex::new(sink) }
    }
}

#[async_trait]
impl SubscriberConnection for WsConnection {
    async fn send(&self, message: &HubMessage) -> Result<(), DeliveryError> {
        let text = message
            .to_json()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

pub(crate) async fn handle_socket(socket: WebSocket, engine: Arc<TelemetryEngine>, scope: SubscriptionScope) {
    let (sender, mut receiver) = socket.split();
    let connection = Arc::new(WsConnection::new(sender));

    let handle = match engine.subscribe(connection, scope).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "failed to send initial snapshot, dropping socket");
            return;
        }
    };
    info!(subscriber = %handle, "🔌 Live dashboard connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(_)) => {
                debug!(subscriber = %handle, "client sent close frame");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!(subscriber = %handle, len = text.len(), "ignoring client text message");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(subscriber = %handle, error = %e, "websocket receive error");
                break;
            }
        }
    }

    engine.unsubscribe(handle);
    info!(subscriber = %handle, "Live dashboard disconnected");
}
