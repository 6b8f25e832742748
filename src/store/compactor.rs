//! Log compaction (defragmentation)
//!
//! Writers are stopped for the whole run by holding the log lock; readers are
//! redirected to a deep copy of the caches until the rebuilt caches are ready.
//! The caches are rebuilt into a new set that replaces the primary one; a set
//! a reader may still hold is never modified.
//!
//! ```text
//! IDLE → SNAPSHOTTING → REWRITING_LIVE → SWAPPING → RELOADING → IDLE
//! ```
//!
//! Live records are first rewritten into a temporary log under
//! `<data_dir>/compact`. A `SWAPPING` marker is written there before the main
//! log is deleted and removed once the records are copied back, so a restart
//! after a crash in between restores the main log from the temporary one.
//!
//! A failure before the main log is deleted leaves the store untouched and is
//! returned to the caller. Any failure after that aborts the process.

use crate::index::CacheSet;
use crate::store::codec;
use crate::store::engine::replay;
use crate::store::error::{StoreError, StoreResult};
use crate::store::log::{IdentityLog, LogOptions, SyncMode};
use crate::sync::SpinLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Subdirectory of the data directory holding the temporary log
pub const COMPACT_DIR: &str = "compact";
const SWAP_MARKER: &str = "SWAPPING";

/// Where a compaction run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionPhase {
    #[default]
    Idle,
    Snapshotting,
    RewritingLive,
    Swapping,
    Reloading,
}

impl std::fmt::Display for CompactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompactionPhase::Idle => "idle",
            CompactionPhase::Snapshotting => "snapshotting",
            CompactionPhase::RewritingLive => "rewriting_live",
            CompactionPhase::Swapping => "swapping",
            CompactionPhase::Reloading => "reloading",
        };
        f.write_str(name)
    }
}

/// Which caches serve lookups
#[derive(Debug, Clone, Default)]
pub enum ReadPath {
    #[default]
    Primary,
    /// Point-in-time copy taken when a compaction started
    Shadow(Arc<CacheSet>),
}

/// Outcome of one compaction run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub records_before: u64,
    pub records_after: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub duration_ms: u64,
}

impl CompactionReport {
    /// Records dropped by the run
    pub fn dropped(&self) -> u64 {
        self.records_before.saturating_sub(self.records_after)
    }
}

/// One compaction run over a store's shared parts
pub struct Compactor<'a> {
    log: &'a SpinLock<IdentityLog>,
    caches: &'a SpinLock<Arc<CacheSet>>,
    read_path: &'a SpinLock<ReadPath>,
    phase: &'a SpinLock<CompactionPhase>,
}

impl<'a> Compactor<'a> {
    pub fn new(
        log: &'a SpinLock<IdentityLog>,
        caches: &'a SpinLock<Arc<CacheSet>>,
        read_path: &'a SpinLock<ReadPath>,
        phase: &'a SpinLock<CompactionPhase>,
    ) -> Self {
        Self {
            log,
            caches,
            read_path,
            phase,
        }
    }

    /// Rewrite the log without its tombstones and rebuild the caches
    pub fn run(&self) -> StoreResult<CompactionReport> {
        let started = Instant::now();
        let mut log = self.log.acquire();
        let records_before = log.size();
        let bytes_before = log.data_len();

        self.enter(CompactionPhase::Snapshotting);
        let primary = Arc::clone(&*self.caches.acquire());
        let shadow = Arc::new(primary.snapshot());
        *self.read_path.acquire() = ReadPath::Shadow(shadow);

        self.enter(CompactionPhase::RewritingLive);
        let temp_dir = log.dir().join(COMPACT_DIR);
        let temp = match rewrite_live(&log, &temp_dir) {
            Ok(temp) => temp,
            Err(e) => {
                tracing::warn!("Compaction abandoned, main log untouched: {}", e);
                if let Err(cleanup) = std::fs::remove_dir_all(&temp_dir) {
                    tracing::debug!("Could not remove {:?}: {}", temp_dir, cleanup);
                }
                self.finish();
                return Err(e);
            }
        };

        self.enter(CompactionPhase::Swapping);
        if let Err(e) = log.recreate() {
            halt(CompactionPhase::Swapping, &e);
        }
        if let Err(e) = copy_back(&temp, &mut log) {
            halt(CompactionPhase::Swapping, &e);
        }
        discard_temp(temp, &temp_dir);

        self.enter(CompactionPhase::Reloading);
        let rebuilt = match reload(&log, &primary) {
            Ok(rebuilt) => rebuilt,
            Err(e) => halt(CompactionPhase::Reloading, &e),
        };
        *self.caches.acquire() = Arc::new(rebuilt);

        let report = CompactionReport {
            records_before,
            records_after: log.size(),
            bytes_before,
            bytes_after: log.data_len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.finish();

        tracing::info!(
            "Compacted identity log: {} -> {} records, {} -> {} bytes in {}ms",
            report.records_before,
            report.records_after,
            report.bytes_before,
            report.bytes_after,
            report.duration_ms
        );
        Ok(report)
    }

    fn enter(&self, phase: CompactionPhase) {
        *self.phase.acquire() = phase;
        tracing::debug!("Compaction phase: {}", phase);
    }

    /// Route reads back to the primary caches and go idle
    fn finish(&self) {
        *self.read_path.acquire() = ReadPath::Primary;
        self.enter(CompactionPhase::Idle);
    }
}

/// Replay `log` into empty caches sized like `current`
fn reload(log: &IdentityLog, current: &CacheSet) -> StoreResult<CacheSet> {
    let rebuilt = current.fresh()?;
    let summary = replay(log, &rebuilt)?;
    tracing::debug!("Reloaded {} live identities", summary.live);
    Ok(rebuilt)
}

/// Copy every live record of `log` into a fresh log in `dir`, then mark the
/// directory as ready to swap
fn rewrite_live(log: &IdentityLog, dir: &Path) -> StoreResult<IdentityLog> {
    let options = LogOptions {
        sync_mode: SyncMode::None,
        ..log.options()
    };
    let mut temp = IdentityLog::create(dir, options)?;

    for (index, bytes) in log.iter() {
        if codec::is_tombstoned(&bytes) {
            continue;
        }
        match codec::decode(&bytes) {
            Ok(record) => {
                temp.append(&codec::encode(&record)?)?;
            }
            Err(e) => tracing::warn!("Dropping corrupt identity record {}: {}", index, e),
        }
    }

    temp.raise_next_id(log.next_id())?;
    temp.sync()?;
    std::fs::write(dir.join(SWAP_MARKER), b"")?;

    Ok(temp)
}

/// Append every record of `temp` to `log` in order and make it durable
fn copy_back(temp: &IdentityLog, log: &mut IdentityLog) -> StoreResult<()> {
    for (_, bytes) in temp.iter() {
        log.append(&bytes)?;
    }
    log.raise_next_id(temp.next_id())?;
    log.sync()
}

fn discard_temp(temp: IdentityLog, dir: &Path) {
    if let Err(e) = std::fs::remove_file(dir.join(SWAP_MARKER)) {
        tracing::warn!("Failed to remove compaction marker in {:?}: {}", dir, e);
        return;
    }
    if let Err(e) = temp.destroy() {
        tracing::warn!("Failed to remove temporary log {:?}: {}", dir, e);
    }
}

/// The main log can't be trusted past this point; stop the process
fn halt(phase: CompactionPhase, err: &StoreError) -> ! {
    tracing::error!(
        "Compaction failed while {}: {}; aborting to protect the identity log",
        phase,
        err
    );
    std::process::abort()
}

/// Finish or discard a compaction that was interrupted by a crash
///
/// With the swap marker present the main log may be partial, so it is rebuilt
/// from the temporary log. Without it the main log is intact and the temporary
/// files are simply removed.
pub fn recover_interrupted(data_dir: &Path, options: LogOptions) -> StoreResult<()> {
    let dir = data_dir.join(COMPACT_DIR);
    if !dir.exists() {
        return Ok(());
    }

    if !dir.join(SWAP_MARKER).exists() {
        tracing::info!("Removing leftover compaction files in {:?}", dir);
        std::fs::remove_dir_all(&dir)?;
        return Ok(());
    }

    tracing::warn!(
        "Compaction was interrupted while swapping, restoring the identity log from {:?}",
        dir
    );
    let temp = IdentityLog::open(&dir, options)?;
    let mut log = IdentityLog::create(data_dir, options)?;
    copy_back(&temp, &mut log)?;
    drop(log);

    std::fs::remove_file(dir.join(SWAP_MARKER))?;
    temp.destroy()
}
