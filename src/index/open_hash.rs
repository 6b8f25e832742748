//! Open-addressing hash table over flat byte regions
//!
//! The table keeps no per-entry heap objects. Slots live in one contiguous
//! `Vec<u8>`; variable-width keys are copied once, on insert, into a key arena
//! and the slot stores a packed `(offset, len)` word pointing at them. Lookups
//! borrow the caller's key and never allocate.
//!
//! Slot layout (17 bytes, native endian):
//!
//! ```text
//! ┌───────┬──────────────┬──────────────┐
//! │ state │ key word     │ value        │
//! │ u8    │ u64          │ i64          │
//! └───────┴──────────────┴──────────────┘
//! ```
//!
//! Probing uses double hashing: the home slot is `h % capacity` and collisions
//! step by `1 + h % (capacity - 2)`. Capacity is always prime, so every stride
//! is co-prime with it and a probe sequence visits every slot.
//!
//! Removal marks a slot REMOVED rather than FREE so probe chains passing through
//! it stay intact. Insertion remembers the first REMOVED slot it passes and
//! reuses it, but keeps probing until it reaches FREE or the key itself.

use crate::store::error::{StoreError, StoreResult};
use rustc_hash::FxHasher;
use std::hash::Hasher;

/// Slot has never held a key
pub const FREE: u8 = 0;
/// Slot holds a live key
pub const FULL: u8 = 1;
/// Slot held a key that has since been removed
pub const REMOVED: u8 = 2;

const SLOT_STATE: usize = 0;
const SLOT_KEY: usize = 1;
const SLOT_VALUE: usize = 9;
const SLOT_SIZE: usize = 17;

/// Smallest capacity handed out; keeps `capacity - 2` a usable stride range
pub const MIN_CAPACITY: usize = 7;

/// Default fraction of slots that may be FULL or REMOVED before a rehash
pub const DEFAULT_LOAD_FACTOR: f64 = 0.5;

/// Dead arena bytes tolerated before they can trigger a rehash on their own
pub const DEAD_BYTES_FLOOR: usize = 4096;

/// Append-only storage for inserted key bytes
///
/// Removed keys leave dead bytes behind; they are dropped when the table
/// rehashes into a fresh arena.
#[derive(Debug, Clone, Default)]
pub struct KeyArena {
    bytes: Vec<u8>,
    dead: usize,
}

impl KeyArena {
    fn push(&mut self, key: &[u8]) -> StoreResult<u64> {
        let offset = u32::try_from(self.bytes.len())
            .map_err(|_| StoreError::CapacityExceeded("key arena exceeds 4 GiB".into()))?;
        let len = u32::try_from(key.len())
            .map_err(|_| StoreError::CapacityExceeded(format!("key of {} bytes", key.len())))?;
        if (offset as u64) + (len as u64) > u32::MAX as u64 {
            return Err(StoreError::CapacityExceeded("key arena exceeds 4 GiB".into()));
        }

        self.bytes.extend_from_slice(key);
        Ok(((offset as u64) << 32) | len as u64)
    }

    fn get(&self, word: u64) -> &[u8] {
        let offset = (word >> 32) as usize;
        let len = (word & 0xFFFF_FFFF) as usize;
        &self.bytes[offset..offset + len]
    }

    fn release(&mut self, word: u64) {
        self.dead += (word & 0xFFFF_FFFF) as usize;
    }

    /// Bytes currently held, live and dead
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes belonging to removed keys
    pub fn dead_bytes(&self) -> usize {
        self.dead
    }

    /// Bytes belonging to keys still in the table
    pub fn live_bytes(&self) -> usize {
        self.bytes.len() - self.dead
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.dead = 0;
    }
}

/// How a key type is hashed, compared and stored in a slot's key word
pub trait SlotKey {
    /// Borrowed form used for lookups; never copied into the table
    type Ref<'a>: Copy;

    fn hash(key: Self::Ref<'_>) -> u64;

    /// Hash of a key already held by the table
    fn hash_stored(word: u64, arena: &KeyArena) -> u64;

    fn matches(word: u64, arena: &KeyArena, key: Self::Ref<'_>) -> bool;

    /// Make the durable copy of an inserted key
    fn store(key: Self::Ref<'_>, arena: &mut KeyArena) -> StoreResult<u64>;

    /// Move a stored key into another arena (rehash)
    fn transfer(word: u64, from: &KeyArena, to: &mut KeyArena) -> StoreResult<u64>;

    fn load<'a>(word: u64, arena: &'a KeyArena) -> Self::Ref<'a>;

    fn release(_word: u64, _arena: &mut KeyArena) {}
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.write_usize(bytes.len());
    hasher.finish()
}

/// Raw byte-string keys (opaque metric keys)
#[derive(Debug, Clone, Copy)]
pub enum BytesKey {}

impl SlotKey for BytesKey {
    type Ref<'a> = &'a [u8];

    fn hash(key: &[u8]) -> u64 {
        hash_bytes(key)
    }

    fn hash_stored(word: u64, arena: &KeyArena) -> u64 {
        hash_bytes(arena.get(word))
    }

    fn matches(word: u64, arena: &KeyArena, key: &[u8]) -> bool {
        arena.get(word) == key
    }

    fn store(key: &[u8], arena: &mut KeyArena) -> StoreResult<u64> {
        arena.push(key)
    }

    fn transfer(word: u64, from: &KeyArena, to: &mut KeyArena) -> StoreResult<u64> {
        to.push(from.get(word))
    }

    fn load<'a>(word: u64, arena: &'a KeyArena) -> &'a [u8] {
        arena.get(word)
    }

    fn release(word: u64, arena: &mut KeyArena) {
        arena.release(word);
    }
}

/// UTF-8 text keys (metric names), hashed and compared by content
#[derive(Debug, Clone, Copy)]
pub enum TextKey {}

impl SlotKey for TextKey {
    type Ref<'a> = &'a str;

    fn hash(key: &str) -> u64 {
        hash_bytes(key.as_bytes())
    }

    fn hash_stored(word: u64, arena: &KeyArena) -> u64 {
        hash_bytes(arena.get(word))
    }

    fn matches(word: u64, arena: &KeyArena, key: &str) -> bool {
        arena.get(word) == key.as_bytes()
    }

    fn store(key: &str, arena: &mut KeyArena) -> StoreResult<u64> {
        arena.push(key.as_bytes())
    }

    fn transfer(word: u64, from: &KeyArena, to: &mut KeyArena) -> StoreResult<u64> {
        to.push(from.get(word))
    }

    fn load<'a>(word: u64, arena: &'a KeyArena) -> &'a str {
        // Only ever populated from &str
        std::str::from_utf8(arena.get(word)).unwrap_or_default()
    }

    fn release(word: u64, arena: &mut KeyArena) {
        arena.release(word);
    }
}

/// Fixed-width integer keys (global IDs), stored inline in the key word
#[derive(Debug, Clone, Copy)]
pub enum IdKey {}

impl SlotKey for IdKey {
    type Ref<'a> = i64;

    fn hash(key: i64) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write_i64(key);
        hasher.finish()
    }

    fn hash_stored(word: u64, _arena: &KeyArena) -> u64 {
        Self::hash(word as i64)
    }

    fn matches(word: u64, _arena: &KeyArena, key: i64) -> bool {
        word as i64 == key
    }

    fn store(key: i64, _arena: &mut KeyArena) -> StoreResult<u64> {
        Ok(key as u64)
    }

    fn transfer(word: u64, _from: &KeyArena, _to: &mut KeyArena) -> StoreResult<u64> {
        Ok(word)
    }

    fn load(word: u64, _arena: &KeyArena) -> i64 {
        word as i64
    }
}

enum Probe {
    Found(usize),
    Vacant(usize),
}

/// Open-addressing map from `K` to `i64`
#[derive(Debug)]
pub struct OpenHash<K: SlotKey> {
    slots: Vec<u8>,
    arena: KeyArena,
    capacity: usize,
    initial_capacity: usize,
    load_factor: f64,
    max_fill: usize,
    len: usize,
    removed: usize,
    _key: std::marker::PhantomData<K>,
}

// `K` is a marker type; cloning the table never needs `K: Clone`
impl<K: SlotKey> Clone for OpenHash<K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            arena: self.arena.clone(),
            capacity: self.capacity,
            initial_capacity: self.initial_capacity,
            load_factor: self.load_factor,
            max_fill: self.max_fill,
            len: self.len,
            removed: self.removed,
            _key: std::marker::PhantomData,
        }
    }
}

impl<K: SlotKey> OpenHash<K> {
    /// Create a table sized to hold `expected` entries at `load_factor`
    pub fn new(expected: usize, load_factor: f64) -> StoreResult<Self> {
        if !(load_factor > 0.0 && load_factor < 1.0) {
            return Err(StoreError::Config(format!(
                "load factor must be in (0, 1), got {}",
                load_factor
            )));
        }

        let capacity = capacity_for(expected, load_factor);
        let slots = allocate_slots(capacity)?;

        Ok(Self {
            slots,
            arena: KeyArena::default(),
            capacity,
            initial_capacity: capacity,
            load_factor,
            max_fill: max_fill(capacity, load_factor),
            len: 0,
            removed: 0,
            _key: std::marker::PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently marked REMOVED
    pub fn removed_count(&self) -> usize {
        self.removed
    }

    pub fn arena(&self) -> &KeyArena {
        &self.arena
    }

    /// Slot index holding `key`, stopping at the first FREE slot
    pub fn find(&self, key: K::Ref<'_>) -> Option<usize> {
        let hash = K::hash(key);
        let mut index = (hash % self.capacity as u64) as usize;
        let stride = self.stride(hash);

        for _ in 0..self.capacity {
            match self.state(index) {
                FREE => return None,
                FULL if K::matches(self.key_word(index), &self.arena, key) => {
                    return Some(index)
                }
                _ => {}
            }
            index = (index + stride) % self.capacity;
        }

        None
    }

    pub fn contains(&self, key: K::Ref<'_>) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&self, key: K::Ref<'_>) -> Option<i64> {
        self.find(key).map(|slot| self.value(slot))
    }

    /// Insert or overwrite, returning the previous value
    pub fn insert(&mut self, key: K::Ref<'_>, value: i64) -> StoreResult<Option<i64>> {
        match self.probe(key)? {
            Probe::Found(slot) => {
                let previous = self.value(slot);
                self.write_value(slot, value);
                Ok(Some(previous))
            }
            Probe::Vacant(slot) => {
                self.occupy(slot, key, value)?;
                Ok(None)
            }
        }
    }

    /// Insert only if absent; returns the existing value otherwise
    pub fn insert_if_absent(&mut self, key: K::Ref<'_>, value: i64) -> StoreResult<Option<i64>> {
        match self.probe(key)? {
            Probe::Found(slot) => Ok(Some(self.value(slot))),
            Probe::Vacant(slot) => {
                self.occupy(slot, key, value)?;
                Ok(None)
            }
        }
    }

    pub fn remove(&mut self, key: K::Ref<'_>) -> Option<i64> {
        let slot = self.find(key)?;
        let previous = self.value(slot);
        let word = self.key_word(slot);

        K::release(word, &mut self.arena);
        self.slots[slot * SLOT_SIZE + SLOT_STATE] = REMOVED;
        self.len -= 1;
        self.removed += 1;

        Some(previous)
    }

    /// Drop every entry, keeping the current capacity
    pub fn clear(&mut self) {
        self.slots.fill(FREE);
        self.arena.clear();
        self.len = 0;
        self.removed = 0;
    }

    /// Drop every entry and shrink back to the initial capacity
    pub fn purge(&mut self) {
        self.capacity = self.initial_capacity;
        self.max_fill = max_fill(self.capacity, self.load_factor);
        self.slots = vec![FREE; self.capacity * SLOT_SIZE];
        self.slots.shrink_to_fit();
        self.arena = KeyArena::default();
        self.len = 0;
        self.removed = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (K::Ref<'_>, i64)> + '_ {
        (0..self.capacity)
            .filter(move |&slot| self.state(slot) == FULL)
            .map(move |slot| (K::load(self.key_word(slot), &self.arena), self.value(slot)))
    }

    fn probe(&self, key: K::Ref<'_>) -> StoreResult<Probe> {
        let hash = K::hash(key);
        let mut index = (hash % self.capacity as u64) as usize;
        let stride = self.stride(hash);
        let mut first_removed = None;

        for _ in 0..self.capacity {
            match self.state(index) {
                FREE => return Ok(Probe::Vacant(first_removed.unwrap_or(index))),
                FULL => {
                    if K::matches(self.key_word(index), &self.arena, key) {
                        return Ok(Probe::Found(index));
                    }
                }
                _ => {
                    first_removed.get_or_insert(index);
                }
            }
            index = (index + stride) % self.capacity;
        }

        // No FREE slot anywhere; only reachable when every slot is FULL or REMOVED
        first_removed
            .map(Probe::Vacant)
            .ok_or_else(|| StoreError::CapacityExceeded("hash table has no vacant slot".into()))
    }

    fn occupy(&mut self, slot: usize, key: K::Ref<'_>, value: i64) -> StoreResult<()> {
        let word = K::store(key, &mut self.arena)?;
        let was_free = self.state(slot) == FREE;

        self.write_slot(slot, word, value);
        self.len += 1;
        if !was_free {
            self.removed -= 1;
        }

        if self.len + self.removed > self.max_fill {
            // Mostly tombstones: rebuild in place rather than growing
            let target = if self.removed * 2 >= self.len + self.removed {
                capacity_for(self.len + 1, self.load_factor)
            } else {
                capacity_for(self.len * 2, self.load_factor)
            };
            self.rehash(target)?;
        } else if self.arena.dead_bytes() > DEAD_BYTES_FLOOR
            && self.arena.dead_bytes() > self.arena.live_bytes()
        {
            // Removed keys whose slots were reused still hold arena bytes
            self.rehash(self.capacity)?;
        }

        Ok(())
    }

    fn rehash(&mut self, new_capacity: usize) -> StoreResult<()> {
        let mut slots = allocate_slots(new_capacity)?;
        let mut arena = KeyArena::default();

        for slot in 0..self.capacity {
            if self.state(slot) != FULL {
                continue;
            }

            let old_word = self.key_word(slot);
            let hash = K::hash_stored(old_word, &self.arena);
            let word = K::transfer(old_word, &self.arena, &mut arena)?;
            let value = self.value(slot);

            let mut index = (hash % new_capacity as u64) as usize;
            let stride = 1 + (hash % (new_capacity as u64 - 2)) as usize;
            while slots[index * SLOT_SIZE + SLOT_STATE] != FREE {
                index = (index + stride) % new_capacity;
            }

            write_slot_into(&mut slots, index, word, value);
        }

        tracing::trace!(
            old_capacity = self.capacity,
            new_capacity,
            entries = self.len,
            "Rehashed open hash table"
        );

        self.slots = slots;
        self.arena = arena;
        self.capacity = new_capacity;
        self.max_fill = max_fill(new_capacity, self.load_factor);
        self.removed = 0;
        Ok(())
    }

    fn stride(&self, hash: u64) -> usize {
        1 + (hash % (self.capacity as u64 - 2)) as usize
    }

    fn state(&self, slot: usize) -> u8 {
        self.slots[slot * SLOT_SIZE + SLOT_STATE]
    }

    fn key_word(&self, slot: usize) -> u64 {
        read_u64(&self.slots, slot * SLOT_SIZE + SLOT_KEY)
    }

    fn value(&self, slot: usize) -> i64 {
        read_u64(&self.slots, slot * SLOT_SIZE + SLOT_VALUE) as i64
    }

    fn write_value(&mut self, slot: usize, value: i64) {
        let offset = slot * SLOT_SIZE + SLOT_VALUE;
        self.slots[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
    }

    fn write_slot(&mut self, slot: usize, word: u64, value: i64) {
        write_slot_into(&mut self.slots, slot, word, value);
    }
}

fn write_slot_into(slots: &mut [u8], slot: usize, word: u64, value: i64) {
    let base = slot * SLOT_SIZE;
    slots[base + SLOT_STATE] = FULL;
    slots[base + SLOT_KEY..base + SLOT_KEY + 8].copy_from_slice(&word.to_ne_bytes());
    slots[base + SLOT_VALUE..base + SLOT_VALUE + 8].copy_from_slice(&value.to_ne_bytes());
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_ne_bytes(bytes)
}

fn allocate_slots(capacity: usize) -> StoreResult<Vec<u8>> {
    let size = capacity.checked_mul(SLOT_SIZE).ok_or_else(|| {
        StoreError::CapacityExceeded(format!("hash table capacity {}", capacity))
    })?;
    Ok(vec![FREE; size])
}

/// Occupied slots allowed before a rehash; always leaves at least one FREE slot
fn max_fill(capacity: usize, load_factor: f64) -> usize {
    ((capacity as f64 * load_factor) as usize).clamp(1, capacity - 1)
}

/// Smallest prime capacity holding `entries` under `load_factor`
pub fn capacity_for(entries: usize, load_factor: f64) -> usize {
    let needed = (entries as f64 / load_factor).ceil() as usize + 1;
    next_prime(needed.max(MIN_CAPACITY))
}

fn next_prime(mut n: usize) -> usize {
    if n <= 2 {
        return 2;
    }
    if n % 2 == 0 {
        n += 1;
    }
    while !is_prime(n) {
        n += 2;
    }
    n
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut divisor = 3;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_insert_and_get() {
        let mut table = OpenHash::<TextKey>::new(16, 0.5).unwrap();

        assert_eq!(table.insert("cpu.load", 1).unwrap(), None);
        assert_eq!(table.insert("mem.free", 2).unwrap(), None);

        assert_eq!(table.get("cpu.load"), Some(1));
        assert_eq!(table.get("mem.free"), Some(2));
        assert_eq!(table.get("disk.io"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_overwrite_returns_previous() {
        let mut table = OpenHash::<BytesKey>::new(16, 0.5).unwrap();
        let key: &[u8] = &[0xAA, 0xBB];
        table.insert(key, 1).unwrap();

        assert_eq!(table.insert(key, 7).unwrap(), Some(1));
        assert_eq!(table.get(key), Some(7));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_if_absent() {
        let mut table = OpenHash::<IdKey>::new(16, 0.5).unwrap();

        assert_eq!(table.insert_if_absent(10, 100).unwrap(), None);
        assert_eq!(table.insert_if_absent(10, 200).unwrap(), Some(100));
        assert_eq!(table.get(10), Some(100));
    }

    #[test]
    fn test_remove_marks_slot_removed() {
        let mut table = OpenHash::<IdKey>::new(16, 0.5).unwrap();
        table.insert(1, 10).unwrap();
        table.insert(2, 20).unwrap();

        assert_eq!(table.remove(1), Some(10));
        assert_eq!(table.remove(1), None);
        assert_eq!(table.removed_count(), 1);
        assert_eq!(table.get(2), Some(20));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_probe_chain_survives_removal() {
        // Seven slots at 0.9 keeps everything in one table so keys must collide
        let mut table = OpenHash::<IdKey>::new(1, 0.9).unwrap();
        assert_eq!(table.capacity(), MIN_CAPACITY);

        for key in 0..5 {
            table.insert(key, key * 10).unwrap();
        }
        let capacity = table.capacity();

        table.remove(0).unwrap();
        table.remove(2).unwrap();

        for key in [1, 3, 4] {
            assert_eq!(table.get(key), Some(key * 10));
        }

        // Re-inserting reuses a REMOVED slot without duplicating a live key
        table.insert(0, 99).unwrap();
        table.insert(4, 44).unwrap();
        assert_eq!(table.get(0), Some(99));
        assert_eq!(table.get(4), Some(44));
        assert_eq!(table.len(), 4);
        assert_eq!(table.capacity(), capacity);
    }

    #[test]
    fn test_growth_preserves_entries() {
        let mut table = OpenHash::<TextKey>::new(4, 0.5).unwrap();
        let initial = table.capacity();

        let names: Vec<String> = (0..1000).map(|i| format!("metric.{}", i)).collect();
        for (i, name) in names.iter().enumerate() {
            table.insert(name.as_str(), i as i64).unwrap();
        }

        assert!(table.capacity() > initial);
        assert!(is_prime(table.capacity()));
        for (i, name) in names.iter().enumerate() {
            assert_eq!(table.get(name.as_str()), Some(i as i64));
        }
    }

    #[test]
    fn test_churn_does_not_grow_unbounded() {
        let mut table = OpenHash::<IdKey>::new(32, 0.5).unwrap();

        for round in 0..100i64 {
            for key in 0..20 {
                table.insert(round * 100 + key, key).unwrap();
            }
            for key in 0..20 {
                table.remove(round * 100 + key);
            }
        }

        assert!(table.is_empty());
        assert!(table.capacity() < 200);
    }

    #[test]
    fn test_rehash_drops_dead_key_bytes() {
        let mut table = OpenHash::<BytesKey>::new(8, 0.5).unwrap();
        for i in 0u32..8 {
            table.insert(&i.to_le_bytes()[..], i as i64).unwrap();
        }
        for i in 0u32..8 {
            table.remove(&i.to_le_bytes()[..]);
        }
        assert_eq!(table.arena().dead_bytes(), 32);

        for i in 100u32..200 {
            table.insert(&i.to_le_bytes()[..], i as i64).unwrap();
        }
        assert_eq!(table.arena().dead_bytes(), 0);
        assert_eq!(table.arena().len(), 400);
    }

    #[test]
    fn test_reinsert_churn_reclaims_arena() {
        let mut table = OpenHash::<TextKey>::new(16, 0.5).unwrap();
        let key = "service.frontend.requests.latency";
        let capacity = table.capacity();

        for i in 0..100_000i64 {
            table.insert(key, i).unwrap();
            table.remove(key);
        }
        table.insert(key, 1).unwrap();

        assert_eq!(table.get(key), Some(1));
        assert_eq!(table.len(), 1);
        assert_eq!(table.capacity(), capacity);
        assert!(table.arena().dead_bytes() <= DEAD_BYTES_FLOOR + key.len());
        assert!(table.arena().len() <= DEAD_BYTES_FLOOR + 2 * key.len());
    }

    #[test]
    fn test_clone_of_generic_table() {
        fn copy<K: SlotKey>(table: &OpenHash<K>) -> OpenHash<K> {
            table.clone()
        }

        let mut table = OpenHash::<BytesKey>::new(8, 0.5).unwrap();
        table.insert(&[1u8, 2][..], 12).unwrap();

        let copied = copy(&table);
        table.remove(&[1u8, 2][..]);
        assert_eq!(copied.get(&[1u8, 2][..]), Some(12));
        assert_eq!(copied.len(), 1);
    }

    #[test]
    fn test_clear_keeps_capacity_purge_shrinks() {
        let mut table = OpenHash::<IdKey>::new(4, 0.5).unwrap();
        let initial = table.capacity();
        for key in 0..500 {
            table.insert(key, key).unwrap();
        }
        let grown = table.capacity();

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.capacity(), grown);
        assert_eq!(table.get(10), None);

        table.insert(1, 1).unwrap();
        table.purge();
        assert!(table.is_empty());
        assert_eq!(table.capacity(), initial);
    }

    #[test]
    fn test_iter_yields_live_entries() {
        let mut table = OpenHash::<TextKey>::new(8, 0.5).unwrap();
        table.insert("a", 1).unwrap();
        table.insert("b", 2).unwrap();
        table.insert("c", 3).unwrap();
        table.remove("b");

        let mut entries: Vec<(String, i64)> =
            table.iter().map(|(k, v)| (k.to_string(), v)).collect();
        entries.sort();
        assert_eq!(entries, vec![("a".to_string(), 1), ("c".to_string(), 3)]);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut table = OpenHash::<TextKey>::new(8, 0.5).unwrap();
        table.insert("a", 1).unwrap();

        let snapshot = table.clone();
        table.insert("a", 2).unwrap();
        table.insert("b", 3).unwrap();

        assert_eq!(snapshot.get("a"), Some(1));
        assert_eq!(snapshot.get("b"), None);
    }

    #[test]
    fn test_empty_key() {
        let mut table = OpenHash::<BytesKey>::new(8, 0.5).unwrap();
        table.insert(&[][..], 5).unwrap();
        assert_eq!(table.get(&[][..]), Some(5));
        assert_eq!(table.get(&[0u8][..]), None);
    }

    #[test]
    fn test_rejects_bad_load_factor() {
        assert!(OpenHash::<IdKey>::new(8, 0.0).is_err());
        assert!(OpenHash::<IdKey>::new(8, 1.0).is_err());
    }

    #[test]
    fn test_capacity_for_is_prime_and_large_enough() {
        for entries in [0, 1, 7, 100, 1024, 5000] {
            let capacity = capacity_for(entries, 0.5);
            assert!(is_prime(capacity));
            assert!(capacity >= MIN_CAPACITY);
            assert!(capacity as f64 * 0.5 >= entries as f64);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, i64),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), any::<i64>()).prop_map(|(k, v)| Op::Insert(k, v)),
            any::<u8>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_hashmap(ops in prop::collection::vec(op_strategy(), 1..400)) {
            let mut table = OpenHash::<BytesKey>::new(1, 0.75).unwrap();
            let mut model: HashMap<Vec<u8>, i64> = HashMap::new();

            for op in ops {
                match op {
                    Op::Insert(k, v) => {
                        let key = vec![k; (k % 5) as usize];
                        let prev = table.insert(key.as_slice(), v).unwrap();
                        prop_assert_eq!(prev, model.insert(key, v));
                    }
                    Op::Remove(k) => {
                        let key = vec![k; (k % 5) as usize];
                        prop_assert_eq!(table.remove(key.as_slice()), model.remove(&key));
                    }
                }
                prop_assert_eq!(table.len(), model.len());
            }

            for (key, value) in &model {
                prop_assert_eq!(table.get(key.as_slice()), Some(*value));
            }
        }
    }
}
