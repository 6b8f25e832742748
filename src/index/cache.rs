//! Index caches - lock-guarded open hash tables
//!
//! Three specializations back the identity store:
//!
//! - [`NameIndex`]: metric name → global ID
//! - [`OpaqueIndex`]: opaque key bytes → global ID
//! - [`LocationIndex`]: global ID → record index in the identity log
//!
//! Every operation takes the cache's spin lock for its whole duration. The
//! tables are caches, not sources of truth: the identity log is replayed to
//! rebuild them on startup and after compaction.

use crate::index::open_hash::{BytesKey, IdKey, OpenHash, SlotKey, TextKey, DEFAULT_LOAD_FACTOR};
use crate::store::error::StoreResult;
use crate::sync::SpinLock;

/// Initial sizing for one cache
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSizing {
    /// Entries the table should hold before its first growth
    pub initial_capacity: usize,
    /// Fraction of slots that may be occupied (0, 1)
    pub load_factor: f64,
}

impl Default for CacheSizing {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            load_factor: DEFAULT_LOAD_FACTOR,
        }
    }
}

/// One open hash table behind one spin lock
#[derive(Debug)]
pub struct IndexCache<K: SlotKey> {
    table: SpinLock<OpenHash<K>>,
    sizing: CacheSizing,
}

pub type NameIndex = IndexCache<TextKey>;
pub type OpaqueIndex = IndexCache<BytesKey>;
pub type LocationIndex = IndexCache<IdKey>;

impl<K: SlotKey> IndexCache<K> {
    pub fn new(sizing: CacheSizing) -> StoreResult<Self> {
        Ok(Self {
            table: SpinLock::new(OpenHash::new(sizing.initial_capacity, sizing.load_factor)?),
            sizing,
        })
    }

    /// Sizing the cache was created with
    pub fn sizing(&self) -> CacheSizing {
        self.sizing
    }

    pub fn size(&self) -> usize {
        self.table.acquire().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Empty the cache, keeping its capacity
    pub fn clear(&self) {
        self.table.acquire().clear();
    }

    /// Empty the cache and shrink it to its initial capacity
    pub fn purge(&self) {
        self.table.acquire().purge();
    }

    pub fn contains(&self, key: K::Ref<'_>) -> bool {
        self.table.acquire().contains(key)
    }

    pub fn get(&self, key: K::Ref<'_>) -> Option<i64> {
        self.table.acquire().get(key)
    }

    /// Insert or overwrite; returns the previous value
    pub fn put(&self, key: K::Ref<'_>, value: i64) -> StoreResult<Option<i64>> {
        self.table.acquire().insert(key, value)
    }

    /// Insert unless present; returns the existing value when present
    pub fn put_if_absent(&self, key: K::Ref<'_>, value: i64) -> StoreResult<Option<i64>> {
        self.table.acquire().insert_if_absent(key, value)
    }

    pub fn remove(&self, key: K::Ref<'_>) -> Option<i64> {
        self.table.acquire().remove(key)
    }

    /// Remove `key` only while it still maps to `expected`
    pub fn remove_if(&self, key: K::Ref<'_>, expected: i64) -> bool {
        let mut table = self.table.acquire();
        if table.get(key) == Some(expected) {
            table.remove(key);
            true
        } else {
            false
        }
    }

    /// Insert every entry under a single lock acquisition
    pub fn put_all<'k, I>(&self, entries: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K::Ref<'k>, i64)>,
    {
        let mut table = self.table.acquire();
        for (key, value) in entries {
            table.insert(key, value)?;
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.table.acquire().capacity()
    }

    /// Deep, independent copy of the current contents
    pub fn snapshot(&self) -> Self {
        let table = self.table.acquire().clone();
        Self {
            table: SpinLock::new(table),
            sizing: self.sizing,
        }
    }
}

impl NameIndex {
    /// Owned copy of every (name, id) pair
    pub fn entries(&self) -> Vec<(String, i64)> {
        let table = self.table.acquire();
        let entries = table.iter().map(|(name, id)| (name.to_string(), id)).collect();
        entries
    }
}

impl OpaqueIndex {
    /// Owned copy of every (key, id) pair
    pub fn entries(&self) -> Vec<(Vec<u8>, i64)> {
        let table = self.table.acquire();
        let entries = table.iter().map(|(key, id)| (key.to_vec(), id)).collect();
        entries
    }
}

impl LocationIndex {
    /// Owned copy of every (global ID, record index) pair
    pub fn entries(&self) -> Vec<(i64, i64)> {
        let table = self.table.acquire();
        let entries = table.iter().collect();
        entries
    }
}

/// The three caches of one identity store
#[derive(Debug)]
pub struct CacheSet {
    pub names: NameIndex,
    pub opaque: OpaqueIndex,
    pub locations: LocationIndex,
}

impl CacheSet {
    pub fn new(names: CacheSizing, opaque: CacheSizing, locations: CacheSizing) -> StoreResult<Self> {
        Ok(Self {
            names: NameIndex::new(names)?,
            opaque: OpaqueIndex::new(opaque)?,
            locations: LocationIndex::new(locations)?,
        })
    }

    /// Point-in-time deep copy of all three caches
    ///
    /// Each cache is copied under its own lock; there is no cross-cache
    /// atomicity, so callers that need a consistent snapshot must hold off
    /// writers first.
    pub fn snapshot(&self) -> Self {
        Self {
            names: self.names.snapshot(),
            opaque: self.opaque.snapshot(),
            locations: self.locations.snapshot(),
        }
    }

    /// Empty caches sized like these ones
    pub fn fresh(&self) -> StoreResult<Self> {
        Self::new(
            self.names.sizing(),
            self.opaque.sizing(),
            self.locations.sizing(),
        )
    }

    pub fn clear(&self) {
        self.names.clear();
        self.opaque.clear();
        self.locations.clear();
    }
}
