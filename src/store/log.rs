//! Identity log - append-only, indexed record storage
//!
//! Two files live in the log directory:
//!
//! - `identity.data`: encoded records back to back (see [`codec`])
//! - `identity.index`: a fixed header followed by one u64 byte offset per record
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ INDEX HEADER (64 bytes)                  │
//! │   magic: [u8; 4] = "GIDX"                │
//! │   version: u16                           │
//! │   endian marker: u16 = 0x0102            │
//! │   record_count: u64                      │
//! │   data_end: u64                          │
//! │   next_id: i64   (ID high-water mark)    │
//! │   reserved: [u8; 28]                     │
//! │   checksum: u32  (CRC32 of bytes 0..60)  │
//! ├──────────────────────────────────────────┤
//! │ OFFSETS: [u64; record_count]             │
//! └──────────────────────────────────────────┘
//! ```
//!
//! A record's bytes span from its offset to the next record's offset (or
//! `data_end` for the last one). Appends write the record, then its offset,
//! then the header; the header is the commit point.
//!
//! [`codec`]: crate::store::codec

use crate::store::codec::{self, FLAG_DELETED, FLAG_LIVE, HEADER_SIZE, OFFSET_FLAG};
use crate::store::error::{StoreError, StoreResult};
use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const DATA_FILE: &str = "identity.data";
pub const INDEX_FILE: &str = "identity.index";

const LOG_MAGIC: [u8; 4] = *b"GIDX";
const LOG_VERSION: u16 = 1;
const ENDIAN_MARKER: u16 = 0x0102;

/// Index file header size in bytes
pub const LOG_HEADER_SIZE: usize = 64;
const CHECKSUM_OFFSET: usize = 60;

/// Bytes reserved up front for a mapped data file
const DATA_RESERVE: u64 = 64 * 1024;
/// Bytes reserved up front for a mapped index file (1024 offsets)
const INDEX_RESERVE: u64 = LOG_HEADER_SIZE as u64 + 1024 * 8;

/// How the log reaches its files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAccess {
    /// Memory-mapped files, grown by remapping
    #[default]
    Mapped,
    /// Positioned reads and writes through the file handle
    File,
}

impl std::str::FromStr for LogAccess {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mapped" | "mmap" => Ok(LogAccess::Mapped),
            "file" => Ok(LogAccess::File),
            other => Err(StoreError::Config(format!("Unknown log access: {}", other))),
        }
    }
}

/// Sync strategy for log writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Sync after every write (safest, slowest)
    EveryWrite,
    /// Sync once enough bytes are pending (balanced)
    #[default]
    Batched,
    /// Never sync explicitly, rely on the OS
    None,
}

/// Options for opening an identity log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogOptions {
    pub access: LogAccess,
    pub sync_mode: SyncMode,
    /// Pending bytes that trigger a sync in `Batched` mode
    pub sync_threshold: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            access: LogAccess::Mapped,
            sync_mode: SyncMode::Batched,
            sync_threshold: 64 * 1024, // 64KB default batch
        }
    }
}

/// Index file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub version: u16,
    pub record_count: u64,
    /// End of the last committed record in the data file
    pub data_end: u64,
    /// Smallest global ID that has never been assigned
    pub next_id: i64,
}

impl LogHeader {
    fn new() -> Self {
        Self {
            version: LOG_VERSION,
            record_count: 0,
            data_end: 0,
            next_id: 1,
        }
    }

    fn to_bytes(self) -> [u8; LOG_HEADER_SIZE] {
        let mut buf = [0u8; LOG_HEADER_SIZE];

        buf[0..4].copy_from_slice(&LOG_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_ne_bytes());
        buf[6..8].copy_from_slice(&ENDIAN_MARKER.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.record_count.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.data_end.to_ne_bytes());
        buf[24..32].copy_from_slice(&self.next_id.to_ne_bytes());
        // bytes 32-59 reserved

        let checksum = crc32fast::hash(&buf[0..CHECKSUM_OFFSET]);
        buf[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_ne_bytes());

        buf
    }

    fn from_bytes(buf: &[u8; LOG_HEADER_SIZE]) -> StoreResult<Self> {
        if buf[0..4] != LOG_MAGIC {
            return Err(StoreError::InvalidLog(format!(
                "Invalid magic: {:?}",
                &buf[0..4]
            )));
        }

        let marker = u16::from_ne_bytes([buf[6], buf[7]]);
        if marker != ENDIAN_MARKER {
            return Err(StoreError::InvalidLog(format!(
                "Log was written with a different byte order (marker {:#06x})",
                marker
            )));
        }

        let stored_checksum = u32::from_ne_bytes([buf[60], buf[61], buf[62], buf[63]]);
        let computed_checksum = crc32fast::hash(&buf[0..CHECKSUM_OFFSET]);
        if stored_checksum != computed_checksum {
            return Err(StoreError::InvalidLog(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        let version = u16::from_ne_bytes([buf[4], buf[5]]);
        if version > LOG_VERSION {
            return Err(StoreError::InvalidLog(format!(
                "Unsupported version: {}",
                version
            )));
        }

        Ok(Self {
            version,
            record_count: read_u64(&buf[8..16]),
            data_end: read_u64(&buf[16..24]),
            next_id: read_u64(&buf[24..32]) as i64,
        })
    }
}

/// One backing file, mapped or accessed by position
#[derive(Debug)]
enum Region {
    Mapped { file: File, map: MmapMut },
    Positioned { file: File },
    Closed,
}

impl Region {
    fn open(path: &Path, access: LogAccess, truncate: bool, reserve: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)?;

        match access {
            LogAccess::File => Ok(Region::Positioned { file }),
            LogAccess::Mapped => {
                if file.metadata()?.len() < reserve {
                    file.set_len(reserve)?;
                }
                // Safety: the file is owned by this region and only modified through it.
                let map = unsafe { MmapOptions::new().map_mut(&file)? };
                Ok(Region::Mapped { file, map })
            }
        }
    }

    fn len(&self) -> io::Result<u64> {
        match self {
            Region::Mapped { map, .. } => Ok(map.len() as u64),
            Region::Positioned { file } => Ok(file.metadata()?.len()),
            Region::Closed => Err(closed()),
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Region::Mapped { map, .. } => {
                let range = map_range(offset, buf.len(), map.len())?;
                buf.copy_from_slice(&map[range]);
                Ok(())
            }
            Region::Positioned { file } => {
                let mut file = file;
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)
            }
            Region::Closed => Err(closed()),
        }
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        match self {
            Region::Mapped { file, map } => {
                let end = offset + bytes.len() as u64;
                if end > map.len() as u64 {
                    map.flush()?;
                    let new_len = end.max(map.len() as u64 * 2);
                    file.set_len(new_len)?;
                    // Safety: as in `open`; the old mapping is dropped on assignment.
                    *map = unsafe { MmapOptions::new().map_mut(&*file)? };
                    tracing::trace!("Remapped log file to {} bytes", new_len);
                }
                let range = map_range(offset, bytes.len(), map.len())?;
                map[range].copy_from_slice(bytes);
                Ok(())
            }
            Region::Positioned { file } => {
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(bytes)
            }
            Region::Closed => Err(closed()),
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        match self {
            Region::Mapped { map, .. } => map.flush(),
            Region::Positioned { file } => file.sync_data(),
            Region::Closed => Ok(()),
        }
    }
}

fn map_range(offset: u64, len: usize, map_len: usize) -> io::Result<std::ops::Range<usize>> {
    let start = usize::try_from(offset).map_err(|_| short_read())?;
    let end = start.checked_add(len).ok_or_else(short_read)?;
    if end > map_len {
        return Err(short_read());
    }
    Ok(start..end)
}

fn short_read() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of log file")
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "log file is closed")
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_ne_bytes(buf)
}

/// Append-only identity log
#[derive(Debug)]
pub struct IdentityLog {
    dir: PathBuf,
    options: LogOptions,
    data: Region,
    index: Region,
    header: LogHeader,
    /// Byte offset of every record, by record index
    offsets: Vec<u64>,
    /// Records whose flag reads as deleted, undersized ones included
    tombstones: u64,
    bytes_since_sync: usize,
}

impl IdentityLog {
    /// Open the log in `dir`, creating it if it doesn't exist
    pub fn open(dir: impl AsRef<Path>, options: LogOptions) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let data_path = dir.join(DATA_FILE);
        let index_len = file_len(&index_path)?;

        if index_len == 0 {
            if file_len(&data_path)? > 0 {
                return Err(StoreError::InvalidLog(format!(
                    "{} has data but {} is missing",
                    data_path.display(),
                    INDEX_FILE
                )));
            }
            return Self::create(dir, options);
        }

        if index_len < LOG_HEADER_SIZE as u64 {
            return Err(StoreError::InvalidLog(format!(
                "{} is {} bytes, shorter than its header",
                index_path.display(),
                index_len
            )));
        }

        let index = Region::open(&index_path, options.access, false, INDEX_RESERVE)?;
        let data = Region::open(&data_path, options.access, false, DATA_RESERVE)?;

        let mut raw = [0u8; LOG_HEADER_SIZE];
        index.read_at(0, &mut raw)?;
        let header = LogHeader::from_bytes(&raw)?;

        let mut log = Self {
            dir,
            options,
            data,
            index,
            header,
            offsets: Vec::new(),
            tombstones: 0,
            bytes_since_sync: 0,
        };
        log.load_offsets()?;
        log.count_tombstones();

        tracing::info!(
            "Opened identity log at {:?} ({} records, {} tombstoned, next ID {})",
            log.dir,
            log.offsets.len(),
            log.tombstones,
            log.header.next_id
        );

        Ok(log)
    }

    /// Create an empty log in `dir`, discarding any existing files
    pub fn create(dir: impl AsRef<Path>, options: LogOptions) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let index = Region::open(&dir.join(INDEX_FILE), options.access, true, INDEX_RESERVE)?;
        let data = Region::open(&dir.join(DATA_FILE), options.access, true, DATA_RESERVE)?;

        let mut log = Self {
            dir,
            options,
            data,
            index,
            header: LogHeader::new(),
            offsets: Vec::new(),
            tombstones: 0,
            bytes_since_sync: 0,
        };
        log.write_header()?;
        log.sync()?;

        tracing::debug!("Created identity log at {:?}", log.dir);
        Ok(log)
    }

    /// Read committed offsets, dropping any that point outside the data file
    fn load_offsets(&mut self) -> StoreResult<()> {
        let index_len = self.index.len()?;
        let data_len = self.data.len()?;

        let available = index_len.saturating_sub(LOG_HEADER_SIZE as u64) / 8;
        let count = self.header.record_count.min(available);
        if count < self.header.record_count {
            tracing::warn!(
                "Identity index holds {} of {} offsets, truncating",
                count,
                self.header.record_count
            );
        }

        let data_end = self.header.data_end.min(data_len);
        if data_end < self.header.data_end {
            tracing::warn!(
                "Identity data ends at {} but header says {}, truncating",
                data_end,
                self.header.data_end
            );
        }

        let mut raw = vec![0u8; count as usize * 8];
        self.index.read_at(LOG_HEADER_SIZE as u64, &mut raw)?;

        let mut offsets = Vec::with_capacity(count as usize);
        for chunk in raw.chunks_exact(8) {
            let offset = read_u64(chunk);
            let valid = match offsets.last() {
                None => offset == 0,
                Some(&prev) => offset > prev,
            };
            if !valid || offset >= data_end {
                tracing::warn!(
                    "Identity index entry {} has bad offset {}, truncating",
                    offsets.len(),
                    offset
                );
                break;
            }
            offsets.push(offset);
        }

        let repaired = offsets.len() as u64 != self.header.record_count
            || data_end != self.header.data_end;
        self.offsets = offsets;
        self.header.record_count = self.offsets.len() as u64;
        self.header.data_end = data_end;

        if repaired {
            self.write_header()?;
        }
        Ok(())
    }

    fn count_tombstones(&mut self) {
        self.tombstones = (0..self.offsets.len())
            .filter(|&index| self.is_tombstoned(index as u64))
            .count() as u64;
    }

    /// Append one encoded record; returns its record index
    pub fn append(&mut self, bytes: &[u8]) -> StoreResult<u64> {
        if bytes.is_empty() {
            return Err(StoreError::CorruptRecord("empty record".to_string()));
        }

        let index = self.offsets.len() as u64;
        let offset = self.header.data_end;

        self.data.write_at(offset, bytes)?;
        self.index
            .write_at(offset_slot(index), &offset.to_ne_bytes())?;

        let mut header = self.header;
        header.record_count += 1;
        header.data_end += bytes.len() as u64;
        if let Some(global_id) = codec::global_id(bytes) {
            header.next_id = header.next_id.max(global_id.saturating_add(1));
        }
        self.index.write_at(0, &header.to_bytes())?;

        self.header = header;
        self.offsets.push(offset);
        if codec::is_tombstoned(bytes) {
            self.tombstones += 1;
        }

        self.bytes_since_sync += bytes.len() + 8 + LOG_HEADER_SIZE;
        self.maybe_sync()?;

        Ok(index)
    }

    /// Copy of the bytes of record `index`
    pub fn read_at(&self, index: u64) -> StoreResult<Vec<u8>> {
        let (start, end) = self.record_range(index)?;
        let mut buf = vec![0u8; (end - start) as usize];
        self.data.read_at(start, &mut buf)?;
        Ok(buf)
    }

    /// Mark record `index` deleted in place; false if it already was
    pub fn tombstone(&mut self, index: u64) -> StoreResult<bool> {
        let (start, end) = self.record_range(index)?;
        if end - start < HEADER_SIZE as u64 {
            return Ok(false);
        }

        let mut flag = [0u8; 1];
        self.data.read_at(start + OFFSET_FLAG as u64, &mut flag)?;
        if flag[0] != FLAG_LIVE {
            return Ok(false);
        }

        self.data
            .write_at(start + OFFSET_FLAG as u64, &[FLAG_DELETED])?;
        self.tombstones += 1;
        self.bytes_since_sync += 1;
        self.maybe_sync()?;

        Ok(true)
    }

    fn is_tombstoned(&self, index: u64) -> bool {
        let Ok((start, end)) = self.record_range(index) else {
            return true;
        };
        if end - start < HEADER_SIZE as u64 {
            return true;
        }
        let mut flag = [0u8; 1];
        match self.data.read_at(start + OFFSET_FLAG as u64, &mut flag) {
            Ok(()) => flag[0] != FLAG_LIVE,
            Err(_) => true,
        }
    }

    fn record_range(&self, index: u64) -> StoreResult<(u64, u64)> {
        let i = usize::try_from(index).unwrap_or(usize::MAX);
        let start = *self.offsets.get(i).ok_or_else(|| {
            StoreError::InvalidLog(format!(
                "Record index {} out of range ({} records)",
                index,
                self.offsets.len()
            ))
        })?;
        let end = self
            .offsets
            .get(i + 1)
            .copied()
            .unwrap_or(self.header.data_end);
        Ok((start, end))
    }

    /// Iterate every record from the start, tombstones included
    pub fn iter(&self) -> LogIter<'_> {
        LogIter { log: self, next: 0 }
    }

    /// Number of records, live and tombstoned
    pub fn size(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn tombstone_count(&self) -> u64 {
        self.tombstones
    }

    /// Bytes of committed record data
    pub fn data_len(&self) -> u64 {
        self.header.data_end
    }

    /// Smallest global ID never handed out by this log
    pub fn next_id(&self) -> i64 {
        self.header.next_id
    }

    /// Raise the ID high-water mark to at least `floor`
    pub fn raise_next_id(&mut self, floor: i64) -> StoreResult<()> {
        if floor > self.header.next_id {
            self.header.next_id = floor;
            self.write_header()?;
            self.maybe_sync()?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> LogOptions {
        self.options
    }

    fn write_header(&mut self) -> StoreResult<()> {
        self.index.write_at(0, &self.header.to_bytes())?;
        self.bytes_since_sync += LOG_HEADER_SIZE;
        Ok(())
    }

    fn maybe_sync(&mut self) -> StoreResult<()> {
        match self.options.sync_mode {
            SyncMode::EveryWrite => self.sync()?,
            SyncMode::Batched => {
                if self.bytes_since_sync >= self.options.sync_threshold {
                    self.sync()?;
                }
            }
            SyncMode::None => {}
        }
        Ok(())
    }

    /// Force pending writes to disk
    pub fn sync(&mut self) -> StoreResult<()> {
        self.data.sync()?;
        self.index.sync()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Close and delete the backing files, then start over with an empty log
    ///
    /// The ID high-water mark is carried over.
    pub fn recreate(&mut self) -> StoreResult<()> {
        let next_id = self.header.next_id;

        self.close();
        remove_if_exists(&self.dir.join(DATA_FILE))?;
        remove_if_exists(&self.dir.join(INDEX_FILE))?;

        *self = Self::create(&self.dir, self.options)?;
        self.raise_next_id(next_id)?;
        self.sync()?;

        Ok(())
    }

    /// Delete the backing files and, when it is left empty, the directory
    pub fn destroy(mut self) -> StoreResult<()> {
        self.close();
        remove_if_exists(&self.dir.join(DATA_FILE))?;
        remove_if_exists(&self.dir.join(INDEX_FILE))?;
        if let Err(e) = std::fs::remove_dir(&self.dir) {
            tracing::debug!("Left log directory {:?} in place: {}", self.dir, e);
        }
        Ok(())
    }

    /// Drop the file handles and mappings; the log is unusable afterwards
    fn close(&mut self) {
        if let Err(e) = self.sync() {
            tracing::warn!("Failed to sync identity log on close: {}", e);
        }
        self.data = Region::Closed;
        self.index = Region::Closed;
        self.offsets.clear();
    }
}

impl Drop for IdentityLog {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            tracing::warn!("Failed to sync identity log {:?}: {}", self.dir, e);
        }
    }
}

fn offset_slot(index: u64) -> u64 {
    LOG_HEADER_SIZE as u64 + index * 8
}

fn file_len(path: &Path) -> StoreResult<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Record iterator; yields `(record index, bytes)`
///
/// Records that can't be read come back empty, which reads as tombstoned.
pub struct LogIter<'a> {
    log: &'a IdentityLog,
    next: u64,
}

impl Iterator for LogIter<'_> {
    type Item = (u64, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.log.size() {
            return None;
        }
        let index = self.next;
        self.next += 1;

        match self.log.read_at(index) {
            Ok(bytes) => Some((index, bytes)),
            Err(e) => {
                tracing::warn!("Skipping unreadable identity record {}: {}", index, e);
                Some((index, Vec::new()))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.log.size().saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::MetricIdentity;
    use tempfile::tempdir;

    fn record(gid: i64, name: &str) -> Vec<u8> {
        codec::encode(&MetricIdentity::new(gid, Some(name), None).created_at(1000)).unwrap()
    }

    fn options(access: LogAccess) -> LogOptions {
        LogOptions {
            access,
            sync_mode: SyncMode::EveryWrite,
            ..Default::default()
        }
    }

    #[test]
    fn test_log_basic_operations() {
        for access in [LogAccess::Mapped, LogAccess::File] {
            let dir = tempdir().unwrap();

            {
                let mut log = IdentityLog::open(dir.path(), options(access)).unwrap();
                assert!(log.is_empty());
                assert_eq!(log.next_id(), 1);

                assert_eq!(log.append(&record(1, "cpu.load")).unwrap(), 0);
                assert_eq!(log.append(&record(2, "mem.free")).unwrap(), 1);
                assert_eq!(log.size(), 2);
                assert_eq!(log.next_id(), 3);
            }

            let log = IdentityLog::open(dir.path(), options(access)).unwrap();
            assert_eq!(log.size(), 2);
            assert_eq!(log.next_id(), 3);

            let second = codec::decode(&log.read_at(1).unwrap()).unwrap();
            assert_eq!(second.global_id, 2);
            assert_eq!(second.name.as_deref(), Some("mem.free"));
        }
    }

    #[test]
    fn test_tombstone_persists() {
        let dir = tempdir().unwrap();

        {
            let mut log = IdentityLog::open(dir.path(), options(LogAccess::Mapped)).unwrap();
            log.append(&record(1, "a")).unwrap();
            log.append(&record(2, "b")).unwrap();

            assert!(log.tombstone(0).unwrap());
            assert!(!log.tombstone(0).unwrap());
            assert_eq!(log.tombstone_count(), 1);
        }

        let log = IdentityLog::open(dir.path(), options(LogAccess::Mapped)).unwrap();
        assert_eq!(log.tombstone_count(), 1);
        assert!(codec::is_tombstoned(&log.read_at(0).unwrap()));
        assert!(!codec::is_tombstoned(&log.read_at(1).unwrap()));
    }

    #[test]
    fn test_iterate_includes_tombstones() {
        let dir = tempdir().unwrap();
        let mut log = IdentityLog::open(dir.path(), options(LogAccess::File)).unwrap();
        for gid in 1..=5 {
            log.append(&record(gid, &format!("m{}", gid))).unwrap();
        }
        log.tombstone(2).unwrap();

        let records: Vec<_> = log.iter().collect();
        assert_eq!(records.len(), 5);
        assert_eq!(records[3].0, 3);

        let live: Vec<i64> = records
            .iter()
            .filter(|(_, bytes)| !codec::is_tombstoned(bytes))
            .filter_map(|(_, bytes)| codec::global_id(bytes))
            .collect();
        assert_eq!(live, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_undersized_record_reads_as_tombstoned() {
        let dir = tempdir().unwrap();
        let mut log = IdentityLog::open(dir.path(), options(LogAccess::Mapped)).unwrap();
        log.append(&[codec::FLAG_LIVE, 2, 3]).unwrap();
        log.append(&record(1, "ok")).unwrap();

        assert_eq!(log.tombstone_count(), 1);
        assert!(!log.tombstone(0).unwrap());

        let (index, bytes) = log.iter().next().unwrap();
        assert_eq!(index, 0);
        assert!(codec::is_tombstoned(&bytes));
    }

    #[test]
    fn test_mapped_log_grows() {
        let dir = tempdir().unwrap();
        let name = "x".repeat(200);

        {
            let mut log = IdentityLog::open(
                dir.path(),
                LogOptions {
                    sync_mode: SyncMode::None,
                    ..Default::default()
                },
            )
            .unwrap();
            for gid in 1..=2000 {
                log.append(&record(gid, &name)).unwrap();
            }
            assert!(log.data_len() > DATA_RESERVE);
        }

        let log = IdentityLog::open(dir.path(), LogOptions::default()).unwrap();
        assert_eq!(log.size(), 2000);
        let last = codec::decode(&log.read_at(1999).unwrap()).unwrap();
        assert_eq!(last.global_id, 2000);
    }

    #[test]
    fn test_mapped_log_reopens_with_file_access() {
        let dir = tempdir().unwrap();
        {
            let mut log = IdentityLog::open(dir.path(), options(LogAccess::Mapped)).unwrap();
            log.append(&record(7, "swap")).unwrap();
        }

        let mut log = IdentityLog::open(dir.path(), options(LogAccess::File)).unwrap();
        assert_eq!(log.size(), 1);
        assert_eq!(log.append(&record(8, "next")).unwrap(), 1);
        assert_eq!(codec::global_id(&log.read_at(1).unwrap()), Some(8));
    }

    #[test]
    fn test_recreate_keeps_id_high_water() {
        let dir = tempdir().unwrap();
        let mut log = IdentityLog::open(dir.path(), options(LogAccess::Mapped)).unwrap();
        log.append(&record(41, "old")).unwrap();

        log.recreate().unwrap();
        assert!(log.is_empty());
        assert_eq!(log.tombstone_count(), 0);
        assert_eq!(log.next_id(), 42);

        log.append(&record(42, "new")).unwrap();
        drop(log);

        let log = IdentityLog::open(dir.path(), options(LogAccess::Mapped)).unwrap();
        assert_eq!(log.size(), 1);
        assert_eq!(log.next_id(), 43);
    }

    #[test]
    fn test_destroy_removes_files() {
        let root = tempdir().unwrap();
        let dir = root.path().join("compact");
        let mut log = IdentityLog::create(&dir, options(LogAccess::File)).unwrap();
        log.append(&record(1, "tmp")).unwrap();

        log.destroy().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_header_checksum_detects_corruption() {
        let dir = tempdir().unwrap();
        {
            let mut log = IdentityLog::open(dir.path(), options(LogAccess::File)).unwrap();
            log.append(&record(1, "a")).unwrap();
        }

        let path = dir.path().join(INDEX_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let result = IdentityLog::open(dir.path(), options(LogAccess::File));
        assert!(matches!(result, Err(StoreError::InvalidLog(_))));
    }

    #[test]
    fn test_foreign_byte_order_is_rejected() {
        let mut raw = LogHeader::new().to_bytes();
        raw[6..8].copy_from_slice(&ENDIAN_MARKER.swap_bytes().to_ne_bytes());

        let result = LogHeader::from_bytes(&raw);
        assert!(matches!(result, Err(StoreError::InvalidLog(msg)) if msg.contains("byte order")));
    }

    #[test]
    fn test_truncated_data_file_drops_tail_records() {
        let dir = tempdir().unwrap();
        {
            let mut log = IdentityLog::open(dir.path(), options(LogAccess::File)).unwrap();
            log.append(&record(1, "keep")).unwrap();
            log.append(&record(2, "lost")).unwrap();
        }

        let data = dir.path().join(DATA_FILE);
        let keep = record(1, "keep").len() as u64;
        OpenOptions::new()
            .write(true)
            .open(&data)
            .unwrap()
            .set_len(keep + 3)
            .unwrap();

        let log = IdentityLog::open(dir.path(), options(LogAccess::File)).unwrap();
        assert_eq!(log.size(), 2);
        assert_eq!(log.data_len(), keep + 3);
        assert!(codec::is_tombstoned(&log.read_at(1).unwrap()));
        assert_eq!(log.next_id(), 3);
    }
}
