//! Identity resolution - create-or-update over the log and the caches
//!
//! The resolver borrows the log mutably, so callers hold the log lock for the
//! whole operation. Every change is written to the log before any cache is
//! touched.

use crate::index::CacheSet;
use crate::store::codec;
use crate::store::error::{StoreError, StoreResult};
use crate::store::log::IdentityLog;
use crate::store::types::MetricIdentity;

/// Outcome of one `create_or_update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keys already resolved; nothing was written
    Existing(i64),
    /// A new identity was assigned
    Created(i64),
    /// Name and opaque key pointed at different identities; both were
    /// replaced by one new identity
    Merged { global_id: i64, replaced: [i64; 2] },
}

impl Resolution {
    pub fn global_id(&self) -> i64 {
        match *self {
            Resolution::Existing(id) | Resolution::Created(id) => id,
            Resolution::Merged { global_id, .. } => global_id,
        }
    }

    /// Whether a record was appended to the log
    pub fn appended(&self) -> bool {
        !matches!(self, Resolution::Existing(_))
    }
}

pub struct IdentityResolver<'a> {
    log: &'a mut IdentityLog,
    caches: &'a CacheSet,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(log: &'a mut IdentityLog, caches: &'a CacheSet) -> Self {
        Self { log, caches }
    }

    /// Resolve a name and/or opaque key to a global ID, creating or merging
    /// identities as needed
    ///
    /// Empty names and keys count as absent. When only one of two supplied
    /// keys is known, its identity is returned and the other key is not
    /// attached to it.
    pub fn create_or_update(
        &mut self,
        name: Option<&str>,
        opaque_key: Option<&[u8]>,
    ) -> StoreResult<Resolution> {
        let name = name.filter(|n| !n.is_empty());
        let opaque_key = opaque_key.filter(|k| !k.is_empty());
        if name.is_none() && opaque_key.is_none() {
            return Err(StoreError::InvalidIdentity);
        }

        let name_gid = name.and_then(|n| self.caches.names.get(n));
        let opaque_gid = opaque_key.and_then(|k| self.caches.opaque.get(k));

        match (name_gid, opaque_gid) {
            (None, None) => {
                let global_id = self.append_identity(name, opaque_key)?;
                tracing::debug!("Assigned global ID {}", global_id);
                Ok(Resolution::Created(global_id))
            }
            (Some(a), Some(b)) if a == b => Ok(Resolution::Existing(a)),
            (Some(by_name), Some(by_opaque)) => {
                let global_id = self.merge(name, opaque_key, by_name, by_opaque)?;
                Ok(Resolution::Merged {
                    global_id,
                    replaced: [by_name, by_opaque],
                })
            }
            (Some(id), None) | (None, Some(id)) => Ok(Resolution::Existing(id)),
        }
    }

    /// Tombstone `global_id` and drop it from every cache; false if unknown
    pub fn delete(&mut self, global_id: i64) -> StoreResult<bool> {
        let retired = self.retire(global_id)?;
        if retired {
            tracing::debug!("Deleted global ID {}", global_id);
        }
        Ok(retired)
    }

    fn merge(
        &mut self,
        name: Option<&str>,
        opaque_key: Option<&[u8]>,
        by_name: i64,
        by_opaque: i64,
    ) -> StoreResult<i64> {
        let global_id = self.write_record(name, opaque_key)?;

        self.retire(by_name)?;
        self.retire(by_opaque)?;
        self.index_identity(global_id, name, opaque_key)?;

        tracing::debug!(
            "Identity conflict: merged {} (name) and {} (opaque key) into {}",
            by_name,
            by_opaque,
            global_id
        );
        Ok(global_id)
    }

    fn append_identity(&mut self, name: Option<&str>, opaque_key: Option<&[u8]>) -> StoreResult<i64> {
        let global_id = self.write_record(name, opaque_key)?;
        self.index_identity(global_id, name, opaque_key)?;
        Ok(global_id)
    }

    /// Append a new record and register its location
    fn write_record(&mut self, name: Option<&str>, opaque_key: Option<&[u8]>) -> StoreResult<i64> {
        let global_id = self.log.next_id();
        let record = MetricIdentity::new(global_id, name, opaque_key);

        let index = self.log.append(&codec::encode(&record)?)?;
        self.caches.locations.put(global_id, index as i64)?;

        Ok(global_id)
    }

    fn index_identity(
        &mut self,
        global_id: i64,
        name: Option<&str>,
        opaque_key: Option<&[u8]>,
    ) -> StoreResult<()> {
        if let Some(name) = name {
            self.caches.names.put(name, global_id)?;
        }
        if let Some(key) = opaque_key {
            self.caches.opaque.put(key, global_id)?;
        }
        Ok(())
    }

    /// Tombstone the current record of `global_id`, then remove its keys
    fn retire(&mut self, global_id: i64) -> StoreResult<bool> {
        let Some(index) = self.caches.locations.get(global_id) else {
            return Ok(false);
        };
        let index = index as u64;

        let bytes = self.log.read_at(index)?;
        self.log.tombstone(index)?;
        self.caches.locations.remove_if(global_id, index as i64);

        match codec::decode(&bytes) {
            Ok(record) => {
                if let Some(name) = record.name.as_deref() {
                    self.caches.names.remove_if(name, global_id);
                }
                if let Some(key) = record.opaque_key.as_deref() {
                    self.caches.opaque.remove_if(key, global_id);
                }
            }
            Err(e) => {
                tracing::warn!("Retired unreadable record {} for ID {}: {}", index, global_id, e);
            }
        }

        Ok(true)
    }
}
