//! Platform settings cache.
//!
//! The cache is an injected capability rather than process-wide state:
//! `init()` populates it at startup, `get()` re-fetches once the TTL has
//! elapsed, and `invalidate()` drops the cached value after a settings write.

use prizedraw_core::model::PlatformSettings;
use prizedraw_core::{SettingsStore, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct CachedSettings {
    settings: PlatformSettings,
    fetched_at: Instant,
}

impl CachedSettings {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// TTL cache over a [`SettingsStore`].
pub struct SettingsCache<S> {
    store: Arc<S>,
    ttl: Duration,
    cached: RwLock<Option<CachedSettings>>,
}

impl<S: SettingsStore> SettingsCache<S> {
    /// Create an empty cache that keeps settings for `ttl`.
    #[must_use]
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Load settings eagerly.
    ///
    /// # Errors
    ///
    /// Returns a store error if the settings cannot be read.
    pub async fn init(&self) -> StoreResult<PlatformSettings> {
        self.refresh().await
    }

    /// Current settings, re-fetched when the cached copy is older than the TTL.
    ///
    /// # Errors
    ///
    /// Returns a store error if a re-fetch fails.
    pub async fn get(&self) -> StoreResult<PlatformSettings> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref().filter(|entry| !entry.is_expired(self.ttl)) {
                return Ok(entry.settings.clone());
            }
        }
        self.refresh().await
    }

    /// Drop the cached settings so the next `get()` reads the store.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::debug!("Settings cache invalidated");
    }

    async fn refresh(&self) -> StoreResult<PlatformSettings> {
        let mut cached = self.cached.write().await;
        // Another task may have refreshed while this one waited for the lock.
        if let Some(entry) = cached.as_ref().filter(|entry| !entry.is_expired(self.ttl)) {
            return Ok(entry.settings.clone());
        }

        let settings = self.store.load_settings().await?;
        tracing::debug!(
            purchases_enabled = settings.purchases_enabled,
            max_quantity_per_request = settings.max_quantity_per_request,
            "Settings loaded"
        );
        *cached = Some(CachedSettings {
            settings: settings.clone(),
            fetched_at: Instant::now(),
        });
        Ok(settings)
    }
}
