//! # Broadcast Hub
//!
//! Fans hub messages out to live subscribers (dashboard WebSockets in
//! production, in-memory connections in tests).
//!
//! Delivery policy:
//!
//! - No buffering and no replay. A reconnecting client asks for a fresh
//!   snapshot instead.
//! - Sends to one subscriber are serialized through that subscriber's own lock;
//!   different subscribers are served concurrently.
//! - Each send is bounded by the configured delivery timeout. A send that
//!   fails or times out removes the subscriber during the same publish call.

mod message;
mod scope;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, TelemetryError};

pub use message::{HubMessage, HubPayload};
pub use scope::{Role, SubscriptionScope};

/// Why a single delivery failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    Closed,
    TimedOut,
    Transport(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Closed => f.write_str("connection closed"),
            DeliveryError::TimedOut => f.write_str("delivery timed out"),
            DeliveryError::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// A live connection the hub can push messages to
#[async_trait]
pub trait SubscriberConnection: Send + Sync + 'static {
    async fn send(&self, message: &HubMessage) -> std::result::Result<(), DeliveryError>;
}

/// Opaque id returned by [`BroadcastHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Subscriber {
    scope: SubscriptionScope,
    connection: Arc<dyn SubscriberConnection>,
    /// Serializes sends to this connection
    send_lock: Mutex<()>,
}

/// Result of one publish call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Subscribers whose scope admitted the message
    pub matched: usize,
    pub delivered: usize,
    /// Subscribers skipped by their scope
    pub filtered: usize,
    /// Subscribers removed because delivery failed
    pub pruned: Vec<SubscriptionHandle>,
}

pub struct BroadcastHub {
    subscribers: DashMap<SubscriptionHandle, Arc<Subscriber>>,
    delivery_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            subscribers: DashMap::new(),
            delivery_timeout,
        }
    }

    pub fn subscribe(
        &self,
        connection: Arc<dyn SubscriberConnection>,
        scope: SubscriptionScope,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle(Uuid::new_v4());
        debug!(subscriber = %handle, ?scope, "subscriber registered");
        self.subscribers.insert(
            handle,
            Arc::new(Subscriber {
                scope,
                connection,
                send_lock: Mutex::new(()),
            }),
        );
        info!("📡 Subscriber {} connected ({} total)", handle, self.subscribers.len());
        handle
    }

    /// Returns false when the handle was not registered (already pruned)
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.subscribers.remove(&handle).is_some();
        if removed {
            info!("📴 Subscriber {} disconnected ({} remaining)", handle, self.subscribers.len());
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_subscribed(&self, handle: SubscriptionHandle) -> bool {
        self.subscribers.contains_key(&handle)
    }

    /// Deliver `message` to every subscriber whose scope admits it
    pub async fn publish(&self, message: &HubMessage) -> PublishReport {
        // collect first so no map guard is held across an await
        let mut report = PublishReport::default();
        let mut targets = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().scope.admits(message) {
                targets.push((*entry.key(), entry.value().clone()));
            } else {
                report.filtered += 1;
            }
        }
        report.matched = targets.len();

        let results = join_all(
            targets
                .into_iter()
                .map(|(handle, subscriber)| async move { (handle, self.deliver(&subscriber, message).await) }),
        )
        .await;

        for (handle, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(subscriber = %handle, message_type = message.message_type(), error = %e, "delivery failed, removing subscriber");
                    if self.subscribers.remove(&handle).is_some() {
                        report.pruned.push(handle);
                    }
                }
            }
        }

        debug!(
            message_type = message.message_type(),
            matched = report.matched,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            "published"
        );
        report
    }

    /// Deliver to one subscriber regardless of scope, pruning it on failure
    pub async fn send_to(&self, handle: SubscriptionHandle, message: &HubMessage) -> Result<()> {
        let subscriber = self
            .subscribers
            .get(&handle)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TelemetryError::not_found(format!("subscriber {} not registered", handle)))?;

        if let Err(e) = self.deliver(&subscriber, message).await {
            warn!(subscriber = %handle, error = %e, "delivery failed, removing subscriber");
            self.subscribers.remove(&handle);
            return Err(TelemetryError::internal(format!("delivery to {} failed: {}", handle, e)));
        }
        Ok(())
    }

    async fn deliver(&self, subscriber: &Subscriber, message: &HubMessage) -> std::result::Result<(), DeliveryError> {
        let send = async {
            let _serialized = subscriber.send_lock.lock().await;
            subscriber.connection.send(message).await
        };
        match tokio::time::timeout(self.delivery_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::TimedOut),
        }
    }
}
