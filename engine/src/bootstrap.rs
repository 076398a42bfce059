//! Wiring of the engine against `PostgreSQL`.
//!
//! ```rust,ignore
//! let config = Config::from_env();
//! let engine = EngineResources::from_config(&config, Arc::new(TracingEventPublisher)).await?;
//! engine.orchestrator.allocate(request).await?;
//! ```

use crate::admin::InstantWinAdmin;
use crate::config::{Config, ConfigError};
use crate::orchestrator::AllocationOrchestrator;
use crate::wallet::WalletLedger;
use prizedraw_core::{Clock, EventPublisher, StoreError, SystemClock};
use prizedraw_postgres::PgStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while starting the engine.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database unreachable or migrations failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Everything a host process needs to serve allocations.
pub struct EngineResources {
    /// Shared store
    pub store: Arc<PgStore>,
    /// Allocation use cases
    pub orchestrator: AllocationOrchestrator<PgStore>,
    /// Instant-win administration
    pub admin: InstantWinAdmin<PgStore>,
    /// Wallet ledger, for top-ups performed by the host
    pub ledger: WalletLedger,
    /// Clock shared by every component
    pub clock: Arc<dyn Clock>,
}

impl EngineResources {
    /// Validate configuration, connect, migrate and warm the settings cache.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::Config`] if the configuration is invalid
    /// - [`BootstrapError::Store`] if the database cannot be reached or
    ///   migrated
    pub async fn from_config(
        config: &Config,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, BootstrapError> {
        config.validate()?;

        info!(
            max_connections = config.postgres.max_connections,
            "Connecting to allocation database..."
        );
        let store = Arc::new(PgStore::connect(&config.postgres).await?);

        info!("Running allocation migrations...");
        store.migrate().await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let orchestrator = AllocationOrchestrator::builder(store.clone())
            .clock(clock.clone())
            .publisher(publisher)
            .settings_ttl(config.allocation.settings_cache_ttl())
            .max_quantity_per_request(config.allocation.max_quantity_per_request)
            .free_ticket_expiry(config.allocation.free_ticket_expiry())
            .build();
        let settings = orchestrator.settings().init().await?;
        info!(
            purchases_enabled = settings.purchases_enabled,
            max_quantity_per_request = settings.max_quantity_per_request,
            "Platform settings loaded"
        );

        Ok(Self {
            admin: InstantWinAdmin::new(store.clone(), clock.clone()),
            ledger: WalletLedger::new(clock.clone()),
            orchestrator,
            store,
            clock,
        })
    }
}
