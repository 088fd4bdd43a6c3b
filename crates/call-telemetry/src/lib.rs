//! # Call Telemetry
//!
//! Real-time call-center telemetry for a multi-site practice: ingests call
//! lifecycle and agent presence events from a telephony provider, keeps live
//! per-location operational metrics, raises threshold alerts and pushes all of
//! it to connected dashboards.
//!
//! ## Components
//!
//! | module | role |
//! |---|---|
//! | [`normalizer`] | validate provider payloads, map locations and agent identities, dedup, record |
//! | [`metrics`] | per-location snapshot cache rebuilt from the relational store, periodic recompute task |
//! | [`alerts`] | static threshold rules evaluated against snapshots |
//! | [`broadcast`] | scoped fan-out to live subscribers |
//! | [`sync`] | paged historical CDR and agent-status pulls from the provider |
//! | [`engine`] | wires the above and runs the event-driven update path |
//! | [`server`] | axum HTTP + WebSocket surface and lifecycle |
//! | [`database`] | sqlx/SQLite store behind the [`database::TelemetryStore`] trait |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use callwatch_call_telemetry::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> callwatch_call_telemetry::Result<()> {
//! let store = DatabaseManager::new_in_memory().await?;
//! let engine = TelemetryEngine::new(TelemetryConfig::for_testing(), Arc::new(store), None);
//!
//! let receipt = engine
//!     .handle_event(&json!({
//!         "event_type": "call_started",
//!         "timestamp": "2024-06-01T14:00:00Z",
//!         "data": {
//!             "CallId": "c-1",
//!             "StartTime": "2024-06-01T14:00:00Z",
//!             "CallerNumber": "7345550100",
//!             "CalledNumber": "100",
//!             "QueueName": "wixom"
//!         }
//!     }))
//!     .await?;
//! assert_eq!(receipt.outcome.as_str(), "recorded");
//! assert_eq!(engine.snapshot(Location::Wixom).active_calls, 1);
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod broadcast;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod normalizer;
pub mod provider;
pub mod server;
pub mod sync;
pub mod types;

pub use error::{FieldError, Result, TelemetryError};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use crate::alerts::{AlertEngine, AlertEvent, AlertRule, Comparison};
    pub use crate::broadcast::{
        BroadcastHub, DeliveryError, HubMessage, HubPayload, Role, SubscriberConnection,
        SubscriptionHandle, SubscriptionScope,
    };
    pub use crate::config::TelemetryConfig;
    pub use crate::database::{DatabaseManager, TelemetryStore};
    pub use crate::engine::{TelemetryEngine, WebhookReceipt};
    pub use crate::error::{Result, TelemetryError};
    pub use crate::metrics::{MetricsStore, PeriodicTask, RINGING_CUTOFF};
    pub use crate::normalizer::{EventNormalizer, IngestOutcome};
    pub use crate::provider::{HttpProviderClient, TelephonyProvider};
    pub use crate::server::{TelemetryServer, TelemetryServerBuilder};
    pub use crate::sync::{SyncOrchestrator, SyncRequest};
    pub use crate::types::*;
}
