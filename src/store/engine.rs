//! Metric identity store
//!
//! The store orchestrates all components:
//! - Write path: resolve/delete → log lock → IdentityResolver → log → caches
//! - Read path: lookup → read path (primary or shadow caches)
//! - Maintenance: defragment → Compactor
//!
//! Lookups never take the log lock, so they keep working during compaction.

use crate::index::{CacheSet, CacheSizing};
use crate::store::codec;
use crate::store::compactor::{self, CompactionPhase, CompactionReport, Compactor, ReadPath};
use crate::store::error::{StoreError, StoreResult};
use crate::store::log::{IdentityLog, LogAccess, LogOptions, SyncMode};
use crate::store::resolver::IdentityResolver;
use crate::store::types::{MetricIdentity, StoreStats};
use crate::sync::SpinLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// When a store should be defragmented
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefragPolicy {
    /// Fraction of log records that are tombstones
    pub tombstone_ratio: f64,
    /// Tombstones required before the ratio is considered
    pub min_tombstones: u64,
    /// How often the server checks, in seconds (0 disables the check)
    pub interval_secs: u64,
}

impl Default for DefragPolicy {
    fn default() -> Self {
        Self {
            tombstone_ratio: 0.3,
            min_tombstones: 1000,
            interval_secs: 300,
        }
    }
}

impl DefragPolicy {
    pub fn should_defragment(&self, stats: &StoreStats) -> bool {
        stats.deleted_count > 0
            && stats.deleted_count >= self.min_tombstones
            && stats.tombstone_ratio() >= self.tombstone_ratio
    }
}

/// Configuration for the identity store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the identity log
    pub data_dir: PathBuf,
    /// Memory-mapped or positioned file access
    pub log_access: LogAccess,
    /// Log sync strategy
    pub sync_mode: SyncMode,
    /// Pending bytes before a batched sync (default: 64KB)
    pub sync_threshold: usize,
    pub name_cache: CacheSizing,
    pub opaque_cache: CacheSizing,
    pub location_cache: CacheSizing,
    pub defrag: DefragPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("gidstore_data"),
            log_access: LogAccess::Mapped,
            sync_mode: SyncMode::Batched,
            sync_threshold: 64 * 1024,
            name_cache: CacheSizing::default(),
            opaque_cache: CacheSizing::default(),
            location_cache: CacheSizing::default(),
            defrag: DefragPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            access: self.log_access,
            sync_mode: self.sync_mode,
            sync_threshold: self.sync_threshold,
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        let ratio = self.defrag.tombstone_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(StoreError::Config(format!(
                "defrag tombstone_ratio must be within [0, 1], got {}",
                ratio
            )));
        }
        for (name, sizing) in [
            ("name", self.name_cache),
            ("opaque", self.opaque_cache),
            ("location", self.location_cache),
        ] {
            if !(sizing.load_factor > 0.0 && sizing.load_factor < 1.0) {
                return Err(StoreError::Config(format!(
                    "{} cache load_factor must be within (0, 1), got {}",
                    name, sizing.load_factor
                )));
            }
        }
        Ok(())
    }
}

/// What a log replay found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records indexed into the caches
    pub live: u64,
    /// Tombstoned, undersized or undecodable records
    pub skipped: u64,
    /// Largest global ID seen in any record with a complete header
    pub max_global_id: Option<i64>,
}

/// Populate `caches` from every live record of `log`
pub(crate) fn replay(log: &IdentityLog, caches: &CacheSet) -> StoreResult<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (index, bytes) in log.iter() {
        if let Some(global_id) = codec::global_id(&bytes) {
            summary.max_global_id = summary.max_global_id.max(Some(global_id));
        }
        if codec::is_tombstoned(&bytes) {
            summary.skipped += 1;
            continue;
        }

        let record = match codec::decode(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping corrupt identity record {}: {}", index, e);
                summary.skipped += 1;
                continue;
            }
        };

        caches.locations.put(record.global_id, index as i64)?;
        if let Some(name) = record.name.as_deref() {
            caches.names.put(name, record.global_id)?;
        }
        if let Some(key) = record.opaque_key.as_deref() {
            caches.opaque.put(key, record.global_id)?;
        }
        summary.live += 1;
    }

    Ok(summary)
}

/// The metric identity store
pub struct MetricStore {
    config: StoreConfig,
    /// Held by every writer and for the whole of a compaction
    log: SpinLock<IdentityLog>,
    /// Primary caches; replaced, never modified, once compaction has rebuilt them
    caches: SpinLock<Arc<CacheSet>>,
    read_path: SpinLock<ReadPath>,
    phase: SpinLock<CompactionPhase>,
    /// Records appended since open
    inserts: AtomicU64,
}

impl MetricStore {
    /// Open the store, replaying the log into fresh caches
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        compactor::recover_interrupted(&config.data_dir, config.log_options())?;

        let mut log = IdentityLog::open(&config.data_dir, config.log_options())?;
        let caches = CacheSet::new(config.name_cache, config.opaque_cache, config.location_cache)?;

        let summary = replay(&log, &caches)?;
        if let Some(max) = summary.max_global_id {
            log.raise_next_id(max.saturating_add(1))?;
        }

        tracing::info!(
            "Recovered {} identities ({} records skipped), next ID {}",
            summary.live,
            summary.skipped,
            log.next_id()
        );

        Ok(Self {
            config,
            log: SpinLock::new(log),
            caches: SpinLock::new(Arc::new(caches)),
            read_path: SpinLock::default(),
            phase: SpinLock::default(),
            inserts: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Primary caches; stable while the caller holds the log lock
    fn primary(&self) -> Arc<CacheSet> {
        Arc::clone(&*self.caches.acquire())
    }

    /// Caches currently serving lookups
    fn read_caches(&self) -> Arc<CacheSet> {
        match &*self.read_path.acquire() {
            ReadPath::Primary => self.primary(),
            ReadPath::Shadow(shadow) => Arc::clone(shadow),
        }
    }

    /// Resolve a name and/or opaque key to its global ID
    pub fn resolve(&self, name: Option<&str>, opaque_key: Option<&[u8]>) -> StoreResult<i64> {
        let mut log = self.log.acquire();
        let caches = self.primary();
        let resolution =
            IdentityResolver::new(&mut log, &caches).create_or_update(name, opaque_key)?;
        drop(log);

        if resolution.appended() {
            self.inserts.fetch_add(1, Ordering::Relaxed);
        }
        Ok(resolution.global_id())
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<i64> {
        if name.is_empty() {
            return None;
        }
        self.read_caches().names.get(name)
    }

    pub fn lookup_by_opaque(&self, opaque_key: &[u8]) -> Option<i64> {
        if opaque_key.is_empty() {
            return None;
        }
        self.read_caches().opaque.get(opaque_key)
    }

    /// Record index of the current record for `global_id`
    pub fn location_of(&self, global_id: i64) -> Option<u64> {
        self.read_caches()
            .locations
            .get(global_id)
            .map(|index| index as u64)
    }

    /// Consistent copy of the primary caches; waits for a running compaction
    pub fn cache_snapshot(&self) -> CacheSet {
        let _log = self.log.acquire();
        self.primary().snapshot()
    }

    /// Fetch the live record for `global_id`
    ///
    /// Takes the log lock, so it waits for a running compaction.
    pub fn get(&self, global_id: i64) -> StoreResult<Option<MetricIdentity>> {
        let log = self.log.acquire();
        let Some(index) = self.primary().locations.get(global_id) else {
            return Ok(None);
        };

        let record = codec::decode(&log.read_at(index as u64)?)?;
        if record.tombstoned || record.global_id != global_id {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Tombstone `global_id` and remove it from every cache; false if unknown
    pub fn delete(&self, global_id: i64) -> StoreResult<bool> {
        let mut log = self.log.acquire();
        IdentityResolver::new(&mut log, &self.primary()).delete(global_id)
    }

    /// Rewrite the log without tombstones; blocks writers until done
    pub fn defragment(&self) -> StoreResult<CompactionReport> {
        Compactor::new(&self.log, &self.caches, &self.read_path, &self.phase).run()
    }

    pub fn compaction_phase(&self) -> CompactionPhase {
        *self.phase.acquire()
    }

    pub fn stats(&self) -> StoreStats {
        let log = self.log.acquire();
        let caches = self.primary();
        StoreStats {
            name_cache_size: caches.names.size(),
            opaque_cache_size: caches.opaque.size(),
            id_cache_size: caches.locations.size(),
            log_size: log.size(),
            deleted_count: log.tombstone_count(),
            insert_count: self.inserts.load(Ordering::Relaxed),
        }
    }

    /// Whether the configured defrag policy calls for a compaction
    pub fn needs_defragment(&self) -> bool {
        self.config.defrag.should_defragment(&self.stats())
    }

    /// Spawn a task that defragments whenever the policy calls for it
    ///
    /// Returns `None` when the policy's interval is zero.
    pub fn start_background_defrag(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.defrag.interval_secs == 0 {
            return None;
        }

        let store = Arc::clone(self);
        let period = Duration::from_secs(store.config.defrag.interval_secs);

        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let worker = Arc::clone(&store);
                let outcome = tokio::task::spawn_blocking(move || {
                    if worker.needs_defragment() {
                        worker.defragment().map(Some)
                    } else {
                        Ok(None)
                    }
                })
                .await;

                match outcome {
                    Ok(Ok(Some(report))) => tracing::info!(
                        dropped = report.dropped(),
                        duration_ms = report.duration_ms,
                        "Background defragment finished"
                    ),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => tracing::error!("Background defragment failed: {}", e),
                    Err(e) => {
                        tracing::error!("Background defragment task panicked: {}", e);
                        break;
                    }
                }
            }
        }))
    }

    /// Force pending log writes to disk
    pub fn flush(&self) -> StoreResult<()> {
        self.log.acquire().sync()
    }

    /// Flush and close the store
    pub fn close(self) -> StoreResult<()> {
        self.flush()?;
        tracing::info!("Closed identity store at {:?}", self.config.data_dir);
        Ok(())
    }
}

impl std::fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricStore")
            .field("data_dir", &self.config.data_dir)
            .field("phase", &self.compaction_phase())
            .finish_non_exhaustive()
    }
}
