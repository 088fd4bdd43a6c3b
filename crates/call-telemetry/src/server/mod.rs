//! # Telemetry Server
//!
//! Owns the lifecycle of a running deployment: the [`TelemetryEngine`], the
//! periodic recompute task and the axum HTTP listener.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               TelemetryServer                │
//! ├──────────────────────────────────────────────┤
//! │  axum router  │  PeriodicTask (recompute)    │
//! ├──────────────────────────────────────────────┤
//! │               TelemetryEngine                │
//! ├──────────────────────────────────────────────┤
//! │ Normalizer │ Metrics │ Alerts │ Hub │ Sync   │
//! ├──────────────────────────────────────────────┤
//! │          sqlx SQLite  │  provider HTTP       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use callwatch_call_telemetry::config::TelemetryConfig;
//! use callwatch_call_telemetry::server::TelemetryServerBuilder;
//!
//! # async fn example() -> callwatch_call_telemetry::Result<()> {
//! let mut server = TelemetryServerBuilder::new()
//!     .with_config(TelemetryConfig::for_testing())
//!     .with_in_memory_database()
//!     .build()
//!     .await?;
//!
//! server.start().await?;
//! println!("listening on {:?}", server.local_addr());
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod response;
pub mod routes;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::TelemetryConfig;
use crate::database::DatabaseManager;
use crate::engine::TelemetryEngine;
use crate::error::{Result, TelemetryError};
use crate::metrics::{PeriodicTask, SchedulerHandle};
use crate::provider::{HttpProviderClient, TelephonyProvider};

pub use response::{ApiError, ApiResponse, ApiResult, ApiSuccess};
pub use routes::{router, AppState, MAX_BODY_BYTES};
pub use ws::WsConnection;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct TelemetryServer {
    engine: Arc<TelemetryEngine>,
    config: TelemetryConfig,
    scheduler: Option<SchedulerHandle>,
    http_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: Option<SocketAddr>,
}

impl TelemetryServer {
    pub async fn new(config: TelemetryConfig) -> Result<Self> {
        let engine = TelemetryEngine::from_config(config.clone()).await?;
        info!("✅ Telemetry engine initialized");
        Ok(Self::with_engine(Arc::new(engine), config))
    }

    pub async fn new_in_memory(mut config: TelemetryConfig) -> Result<Self> {
        config.database.url = "sqlite::memory:".to_string();
        Self::new(config).await
    }

    /// Wrap an engine that was built elsewhere (custom store or provider)
    pub fn with_engine(engine: Arc<TelemetryEngine>, config: TelemetryConfig) -> Self {
        Self {
            engine,
            config,
            scheduler: None,
            http_handle: None,
            shutdown_tx: None,
            local_addr: None,
        }
    }

    /// Warm the cache, start the recompute task and bind the HTTP listener
    pub async fn start(&mut self) -> Result<()> {
        if self.http_handle.is_some() {
            return Err(TelemetryError::internal("server already started"));
        }

        self.engine.warm_up().await;

        let scheduler = PeriodicTask::start(self.config.metrics.recompute_interval(), self.engine.clone());
        let state = AppState::new(self.engine.clone()).with_ticker(scheduler.shared_stats());
        self.scheduler = Some(scheduler);

        let listener = TcpListener::bind(&self.config.server.bind_address)
            .await
            .map_err(|e| {
                TelemetryError::configuration(format!(
                    "failed to bind {}: {}",
                    self.config.server.bind_address, e
                ))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TelemetryError::internal(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!("HTTP server error: {}", e);
            }
        });

        self.http_handle = Some(handle);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);
        info!("✅ Telemetry server listening on {}", local_addr);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 Stopping telemetry server...");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.http_handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                error!("HTTP server did not drain within {:?}", SHUTDOWN_GRACE);
            }
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop(SHUTDOWN_GRACE).await;
        }
        self.local_addr = None;

        info!("✅ Telemetry server stopped");
        Ok(())
    }

    /// Start, then serve until Ctrl-C
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        info!("📞 Call telemetry is running, press Ctrl+C to stop");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| TelemetryError::internal(format!("failed to listen for Ctrl-C: {}", e)))?;

        self.stop().await
    }

    /// Router without a running listener, for in-process use
    pub fn router(&self) -> Router {
        let mut state = AppState::new(self.engine.clone());
        if let Some(scheduler) = &self.scheduler {
            state = state.with_ticker(scheduler.shared_stats());
        }
        router(state)
    }

    pub fn engine(&self) -> &Arc<TelemetryEngine> {
        &self.engine
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// Builder for [`TelemetryServer`]
pub struct TelemetryServerBuilder {
    config: Option<TelemetryConfig>,
    database_url: Option<String>,
    provider: Option<Arc<dyn TelephonyProvider>>,
}

impl TelemetryServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            database_url: None,
            provider: None,
        }
    }

    pub fn with_config(mut self, config: TelemetryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_in_memory_database(mut self) -> Self {
        self.database_url = Some("sqlite::memory:".to_string());
        self
    }

    /// Use this provider instead of the configured HTTP client
    pub fn with_provider(mut self, provider: Arc<dyn TelephonyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub async fn build(self) -> Result<TelemetryServer> {
        let mut config = self
            .config
            .ok_or_else(|| TelemetryError::configuration("configuration not provided"))?;
        if let Some(url) = self.database_url {
            config.database.url = url;
        }
        config.validate()?;

        let store = DatabaseManager::connect(&config.database).await?;
        let provider = match self.provider {
            Some(provider) => Some(provider),
            None if config.provider.enabled => {
                Some(Arc::new(HttpProviderClient::new(&config.provider)?) as Arc<dyn TelephonyProvider>)
            }
            None => None,
        };

        let engine = TelemetryEngine::new(config.clone(), Arc::new(store), provider);
        Ok(TelemetryServer::with_engine(Arc::new(engine), config))
    }
}

impl Default for TelemetryServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
