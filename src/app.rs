use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tracing::info;

use crate::cache::{CacheClient, InMemoryCache, ResilientCache};
use crate::config::{Config, ConfigError};
use crate::engine::*;
use crate::store::{run_compactor, Repository, WalStore};
use crate::timezone::{InstructorTimezones, TimezoneProvider};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] BuildError),
}

/// Composition root: owns the store, cache and clock, and wires every
/// service to the same instances.
pub struct App {
    pub config: Config,
    pub store: Arc<WalStore>,
    pub timezones: Arc<InstructorTimezones>,
    pub cache: Arc<ResilientCache>,
    pub conflicts: ConflictChecker,
    pub slots: SlotManager,
    pub availability: AvailabilityService,
    pub bulk: BulkOperationService,
    pub weeks: WeekOperationService,
}

impl App {
    /// Open the WAL under `config.data_dir`, start the compactor and the
    /// metrics listener. Must run inside a tokio runtime.
    pub fn open(config: Config) -> Result<Self, AppError> {
        crate::observability::init(config.metrics_port)?;
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(WalStore::open(config.wal_path())?);

        let compactor_store = store.clone();
        let threshold = config.compact_threshold;
        tokio::spawn(async move {
            run_compactor(compactor_store, threshold).await;
        });

        let timezones = Arc::new(InstructorTimezones::new(config.default_timezone));
        info!("slotwise opened {}", config.wal_path().display());
        info!("  default timezone: {}", config.default_timezone);
        info!("  compact threshold: {threshold}");
        Ok(Self::with_parts(config, store, Arc::new(InMemoryCache::new()), timezones))
    }

    /// Wire services over explicitly supplied parts. No background tasks are started.
    pub fn with_parts(
        config: Config,
        store: Arc<WalStore>,
        cache_client: Arc<dyn CacheClient>,
        timezones: Arc<InstructorTimezones>,
    ) -> Self {
        let repo: Arc<dyn Repository> = store.clone();
        let clock: Arc<dyn TimezoneProvider> = timezones.clone();
        let cache = Arc::new(ResilientCache::new(
            cache_client,
            config.cache_failure_threshold,
            Duration::from_secs(config.cache_cooldown_secs),
        ));

        let reader = ReadThroughCache::new(repo.clone(), cache.clone(), clock.clone());
        let warmer = CacheWarmer::new(reader.clone());
        let slots = SlotManager::new(repo.clone());
        let conflicts = ConflictChecker::new(repo.clone(), clock.clone(), BookingRules::from_config(&config));
        let availability = AvailabilityService::new(repo.clone(), clock.clone(), slots.clone(), reader, warmer.clone());
        let bulk = BulkOperationService::new(repo.clone(), clock);
        let weeks = WeekOperationService::new(repo, warmer);

        Self {
            config,
            store,
            timezones,
            cache,
            conflicts,
            slots,
            availability,
            bulk,
            weeks,
        }
    }
}
