//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - All writes are WAL-first and stamped with a [`Hlc`] from the caller.
//! - The memtable keeps exactly one current version per key: the entry with
//!   the greatest HLC. An incoming write with an HLC no greater than the
//!   key's current entry is a silent no-op (last-writer-wins idempotence).
//! - Deletes are represented via tombstones, not physical removal.
//! - Range tombstones logically delete all keys in `[start, end)` stamped
//!   with a lower HLC.
//! - Reads (`get`, `scan`) always resolve point entries against
//!   range tombstones.
//!
//! ## Flush Semantics
//!
//! - `iter_for_flush` returns a *logical snapshot* of the memtable state.
//! - Returned records are sufficient to reconstruct the same memtable
//!   state via WAL replay.
//! - Flush iteration does **not** mutate or clear in-memory state.
//!
//! ## Frozen Memtable
//!
//! - A `FrozenMemtable` is read-only.
//! - It retains ownership of the WAL to guarantee durability until
//!   data is persisted to SSTables.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

pub mod skiplist;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::encoding::{self, EncodingError};
use crate::hlc::Hlc;
use crate::wal::{Wal, WalError};
use skiplist::KVSkipList;
use thiserror::Error;
use tracing::{error, info, trace};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    WAL(#[from] WalError),

    /// Write buffer limit reached; a flush is required before further writes.
    #[error("Flush required")]
    FlushRequired,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// The mutable, in-memory write buffer of the storage engine.
///
/// The memtable:
/// - Accepts writes (`put`, `delete`, `delete_range`)
/// - Persists all mutations to a WAL
/// - Serves reads (`get`, `scan`)
/// - Can be logically flushed via `iter_for_flush`
///
/// Internally, the memtable keeps a single current-value-wins entry per
/// key: the caller supplies the [`Hlc`] for every write, and an older HLC
/// arriving after a newer one is a silent no-op rather than a new version.
///
/// # Concurrency
/// - The key map (`tree`) is a [`KVSkipList`] striped across independent
///   locks, so writers to different keys rarely contend.
/// - Range tombstones are rare and share one lock.
///
/// # Durability
/// - Every mutation is appended to the WAL *before* being applied in memory
pub struct Memtable {
    /// Point entries, one current version per key.
    tree: KVSkipList<Vec<u8>, MemtableSingleEntry>,

    /// Range tombstones indexed by start key and ordered by descending HLC.
    range_tombstones: RwLock<BTreeMap<Vec<u8>, BTreeMap<std::cmp::Reverse<Hlc>, MemtableRangeTombstone>>>,

    /// Approximate in-memory footprint.
    approximate_size: AtomicUsize,

    /// Configured maximum buffer size before flush is required.
    write_buffer_size: usize,

    /// Associated write-ahead log for durability.
    pub wal: Wal<MemtableRecord>,

    /// Highest HLC observed so far, across both replay and live writes.
    max_hlc: RwLock<Hlc>,
}

/// A single point entry stored in the memtable.
///
/// Only the current (greatest-HLC) version of a key is retained; deletions
/// are represented by tombstones (`is_delete = true`) rather than removal.
#[derive(Debug, PartialEq, Clone)]
pub struct MemtableSingleEntry {
    /// The stored value. `None` indicates a deletion (tombstone).
    pub value: Option<Vec<u8>>,

    /// Whether this entry represents a deletion.
    pub is_delete: bool,

    /// Hybrid logical clock stamp of this mutation.
    pub hlc: Hlc,
}

impl encoding::Encode for MemtableSingleEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.value.encode_to(buf)?;
        self.is_delete.encode_to(buf)?;
        self.hlc.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for MemtableSingleEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (value, n) = Option::<Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (is_delete, n) = bool::decode_from(&buf[off..])?;
        off += n;
        let (hlc, n) = Hlc::decode_from(&buf[off..])?;
        off += n;
        Ok((
            MemtableSingleEntry {
                value,
                is_delete,
                hlc,
            },
            off,
        ))
    }
}

/// A range tombstone that logically deletes keys in `[start, end)`.
///
/// Range tombstones are versioned via HLC and may overlap.
/// During reads, the greatest-HLC tombstone covering a key
/// takes precedence.
#[derive(Clone, Debug)]
pub struct MemtableRangeTombstone {
    /// Inclusive start key of the deleted range.
    pub start: Vec<u8>,

    /// Exclusive end key of the deleted range.
    pub end: Vec<u8>,

    /// Hybrid logical clock stamp of this tombstone.
    pub hlc: Hlc,
}

impl encoding::Encode for MemtableRangeTombstone {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.start.encode_to(buf)?;
        self.end.encode_to(buf)?;
        self.hlc.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for MemtableRangeTombstone {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (start, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (end, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (hlc, n) = Hlc::decode_from(&buf[off..])?;
        off += n;
        Ok((MemtableRangeTombstone { start, end, hlc }, off))
    }
}

/// A logical WAL record representing a memtable mutation.
///
/// These records:
/// - Are appended to the WAL
/// - Are replayed during recovery
/// - Are emitted during memtable flush
///
/// Together, they form a complete, replayable history.
#[derive(Debug, PartialEq)]
pub enum MemtableRecord {
    /// Insert or update a single key.
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        hlc: Hlc,
    },

    /// Delete a single key.
    Delete { key: Vec<u8>, hlc: Hlc },

    /// Delete all keys in `[start, end)`.
    RangeDelete { start: Vec<u8>, end: Vec<u8>, hlc: Hlc },
}

impl encoding::Encode for MemtableRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            MemtableRecord::Put { key, value, hlc } => {
                0u8.encode_to(buf)?;
                key.encode_to(buf)?;
                value.encode_to(buf)?;
                hlc.encode_to(buf)?;
            }
            MemtableRecord::Delete { key, hlc } => {
                1u8.encode_to(buf)?;
                key.encode_to(buf)?;
                hlc.encode_to(buf)?;
            }
            MemtableRecord::RangeDelete { start, end, hlc } => {
                2u8.encode_to(buf)?;
                start.encode_to(buf)?;
                end.encode_to(buf)?;
                hlc.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl encoding::Decode for MemtableRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (tag, n) = u8::decode_from(&buf[off..])?;
        off += n;
        match tag {
            0 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (value, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (hlc, n) = Hlc::decode_from(&buf[off..])?;
                off += n;
                Ok((MemtableRecord::Put { key, value, hlc }, off))
            }
            1 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (hlc, n) = Hlc::decode_from(&buf[off..])?;
                off += n;
                Ok((MemtableRecord::Delete { key, hlc }, off))
            }
            2 => {
                let (start, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (end, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (hlc, n) = Hlc::decode_from(&buf[off..])?;
                off += n;
                Ok((MemtableRecord::RangeDelete { start, end, hlc }, off))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "MemtableRecord",
            }),
        }
    }
}

impl MemtableRecord {
    fn hlc(&self) -> Hlc {
        match self {
            MemtableRecord::Put { hlc, .. } => *hlc,
            MemtableRecord::Delete { hlc, .. } => *hlc,
            MemtableRecord::RangeDelete { hlc, .. } => *hlc,
        }
    }
}

/// Result of a `get` operation on the memtable.
#[derive(Debug, PartialEq)]
pub enum MemtableGetResult {
    /// Value found for the key, with the HLC it was written at.
    Put(Vec<u8>, Hlc),

    /// Key is tombstoned (by a point or range delete), with the HLC of the
    /// tombstone responsible.
    Delete(Hlc),

    /// Key not found in the memtable.
    NotFound,
}

impl Memtable {
    /// Creates a new mutable [`Memtable`] backed by a write-ahead log (WAL).
    ///
    /// # Arguments
    /// - `wal_path` — Path to the WAL file used for durability.
    /// - `max_record_size` — Optional maximum size of a single WAL record.
    /// - `write_buffer_size` — Maximum in-memory size before a flush is required.
    ///
    /// # Behavior
    /// - Replays the WAL (if present) to reconstruct the in-memory state.
    /// - Restores the highest observed HLC for no-op detection on replayed keys.
    ///
    /// # Crash Safety
    /// WAL replay guarantees recovery to the last durable state after a crash.
    pub fn new<P: AsRef<Path>>(
        wal_path: P,
        max_record_size: Option<u32>,
        write_buffer_size: usize,
    ) -> Result<Self, MemtableError> {
        info!("Initializing Memtable with WAL replay");

        let wal = Wal::open(&wal_path, max_record_size)?;

        let tree: KVSkipList<Vec<u8>, MemtableSingleEntry> = KVSkipList::new();
        let range_tombstones = RwLock::new(BTreeMap::new());
        let approximate_size = AtomicUsize::new(0);
        let mut max_hlc_seen = Hlc::MIN;

        let records = wal.replay_iter()?;
        for record in records {
            let record: MemtableRecord = record?;
            max_hlc_seen = max_hlc_seen.max(record.hlc());

            match record {
                MemtableRecord::Put { key, value, hlc } => {
                    let record_size =
                        std::mem::size_of::<MemtableSingleEntry>() + key.len() + value.len();
                    approximate_size.fetch_add(record_size, Ordering::Relaxed);

                    let entry = MemtableSingleEntry {
                        value: Some(value),
                        is_delete: false,
                        hlc,
                    };
                    tree.upsert_if(key, entry, |existing| {
                        existing.map(|e| e.hlc < hlc).unwrap_or(true)
                    });
                }

                MemtableRecord::Delete { key, hlc } => {
                    let record_size = std::mem::size_of::<MemtableSingleEntry>() + key.len();
                    approximate_size.fetch_add(record_size, Ordering::Relaxed);

                    let entry = MemtableSingleEntry {
                        value: None,
                        is_delete: true,
                        hlc,
                    };
                    tree.upsert_if(key, entry, |existing| {
                        existing.map(|e| e.hlc < hlc).unwrap_or(true)
                    });
                }

                MemtableRecord::RangeDelete { start, end, hlc } => {
                    let record_size =
                        std::mem::size_of::<MemtableRangeTombstone>() + start.len() + end.len();
                    approximate_size.fetch_add(record_size, Ordering::Relaxed);

                    let tombstone = MemtableRangeTombstone {
                        start: start.clone(),
                        end,
                        hlc,
                    };

                    let mut guard = range_tombstones.write().map_err(|_| {
                        MemtableError::Internal("Read-write lock poisoned".into())
                    })?;
                    guard
                        .entry(start)
                        .or_insert_with(BTreeMap::new)
                        .insert(std::cmp::Reverse(hlc), tombstone);
                }
            }
        }

        info!(
            "Memtable initialized successfully, max HLC observed: {:?}",
            max_hlc_seen
        );

        Ok(Self {
            tree,
            range_tombstones,
            approximate_size,
            write_buffer_size,
            wal,
            max_hlc: RwLock::new(max_hlc_seen),
        })
    }

    fn bump_max_hlc(&self, hlc: Hlc) {
        let mut guard = self.max_hlc.write().unwrap_or_else(|e| e.into_inner());
        if hlc > *guard {
            *guard = hlc;
        }
    }

    /// Inserts or updates a key with a new value stamped at `hlc`.
    ///
    /// # Behavior
    /// - The mutation is first appended to the WAL (write-ahead).
    /// - The entry is applied in memory only if `hlc` is strictly greater
    ///   than the key's current HLC (last-writer-wins idempotence); older
    ///   writes silently no-op rather than erroring.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, hlc: Hlc) -> Result<(), MemtableError> {
        trace!("put() started, key: {}", HexKey(&key));

        if key.is_empty() || value.is_empty() {
            return Err(MemtableError::Internal("Key or value is empty".to_string()));
        }

        let record_size = std::mem::size_of::<MemtableSingleEntry>() + key.len() + value.len();
        let record = MemtableRecord::Put {
            key: key.clone(),
            value: value.clone(),
            hlc,
        };

        if self.approximate_size.load(Ordering::Relaxed) + record_size > self.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        // 1. Wal first (crash safety)
        self.wal.append(&record)?;

        // 2. In-memory update, guarded by LWW idempotence
        let entry = MemtableSingleEntry {
            value: Some(value),
            is_delete: false,
            hlc,
        };
        self.tree.upsert_if(key.clone(), entry, |existing| {
            existing.map(|e| e.hlc < hlc).unwrap_or(true)
        });

        self.approximate_size.fetch_add(record_size, Ordering::Relaxed);
        self.bump_max_hlc(hlc);

        trace!("Put operation completed, key: {}", HexKey(&key));

        Ok(())
    }

    /// Deletes a key by inserting a tombstone entry stamped at `hlc`.
    ///
    /// # Behavior
    /// - Writes a delete record to the WAL.
    /// - Installs a tombstone only if `hlc` is strictly greater than the
    ///   key's current HLC.
    pub fn delete(&self, key: Vec<u8>, hlc: Hlc) -> Result<(), MemtableError> {
        trace!("delete() started, key: {}", HexKey(&key));

        if key.is_empty() {
            return Err(MemtableError::Internal("Key is empty".to_string()));
        }

        let record_size = std::mem::size_of::<MemtableSingleEntry>() + key.len();
        let record = MemtableRecord::Delete {
            key: key.clone(),
            hlc,
        };

        if self.approximate_size.load(Ordering::Relaxed) + record_size > self.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        // 1. Wal first (crash safety)
        self.wal.append(&record)?;

        // 2. In-memory update, guarded by LWW idempotence
        let entry = MemtableSingleEntry {
            value: None,
            is_delete: true,
            hlc,
        };
        self.tree.upsert_if(key.clone(), entry, |existing| {
            existing.map(|e| e.hlc < hlc).unwrap_or(true)
        });

        self.approximate_size.fetch_add(record_size, Ordering::Relaxed);
        self.bump_max_hlc(hlc);

        trace!("Delete operation completed, key: {}", HexKey(&key));

        Ok(())
    }

    /// Deletes all keys in the range `[start, end)`, stamped at `hlc`.
    ///
    /// # Range Semantics
    /// - Inclusive `start`
    /// - Exclusive `end`
    ///
    /// # Behavior
    /// - Writes a range tombstone to the WAL.
    /// - The tombstone shadows point entries with a lower HLC.
    pub fn delete_range(&self, start: Vec<u8>, end: Vec<u8>, hlc: Hlc) -> Result<(), MemtableError> {
        trace!(
            "delete_range() started, start key: {}, end key: {}",
            HexKey(&start),
            HexKey(&end)
        );

        if start.is_empty() || end.is_empty() {
            return Err(MemtableError::Internal(
                "Start or end key is empty".to_string(),
            ));
        }

        let record_size = std::mem::size_of::<MemtableRangeTombstone>() + start.len() + end.len();
        let record = MemtableRecord::RangeDelete {
            start: start.clone(),
            end: end.clone(),
            hlc,
        };

        if self.approximate_size.load(Ordering::Relaxed) + record_size > self.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        // 1. Wal first (crash safety)
        self.wal.append(&record)?;

        // 2. In-memory update
        let tombstone = MemtableRangeTombstone {
            start: start.clone(),
            end,
            hlc,
        };

        let mut guard = self.range_tombstones.write().map_err(|_| {
            error!("Read-write lock poisoned during delete_range");
            MemtableError::Internal("Read-write lock poisoned".into())
        })?;
        guard
            .entry(start.clone())
            .or_insert_with(BTreeMap::new)
            .insert(std::cmp::Reverse(hlc), tombstone);
        drop(guard);

        self.approximate_size.fetch_add(record_size, Ordering::Relaxed);
        self.bump_max_hlc(hlc);

        trace!(
            "Delete operation completed, start key: {}, end key: {}",
            HexKey(&start),
            HexKey(&end),
        );

        Ok(())
    }

    /// Finds the greatest-HLC tombstone covering `key`, if any.
    fn covering_tombstone_hlc(&self, key: &[u8]) -> Result<Option<Hlc>, MemtableError> {
        let guard = self.range_tombstones.read().map_err(|_| {
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let mut covering: Option<Hlc> = None;
        for (_start, versions) in guard.range(..=key.to_vec()) {
            if let Some(tombstone) = versions.values().next() {
                if tombstone.start.as_slice() <= key && key < tombstone.end.as_slice() {
                    covering = Some(covering.map(|h| h.max(tombstone.hlc)).unwrap_or(tombstone.hlc));
                }
            }
        }
        Ok(covering)
    }

    /// Retrieves the latest visible value for a key.
    ///
    /// Resolution rules:
    /// 1. Look up the key's current point entry, if any.
    /// 2. Check all covering range tombstones.
    /// 3. The side with the greater HLC wins.
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        trace!("get() started, key: {}", HexKey(key));

        let point_opt = self.tree.find(&key.to_vec());
        let covering_tombstone_hlc = self.covering_tombstone_hlc(key)?;

        match (point_opt, covering_tombstone_hlc) {
            (None, None) => Ok(MemtableGetResult::NotFound),
            (None, Some(hlc)) => Ok(MemtableGetResult::Delete(hlc)),
            (Some(point), None) => {
                if point.is_delete {
                    Ok(MemtableGetResult::Delete(point.hlc))
                } else {
                    Ok(MemtableGetResult::Put(
                        point.value.expect("Non-delete point entry must have a value"),
                        point.hlc,
                    ))
                }
            }
            (Some(point), Some(tombstone_hlc)) => {
                if tombstone_hlc > point.hlc {
                    Ok(MemtableGetResult::Delete(tombstone_hlc))
                } else if point.is_delete {
                    Ok(MemtableGetResult::Delete(point.hlc))
                } else {
                    Ok(MemtableGetResult::Put(
                        point.value.expect("Non-delete point entry must have a value"),
                        point.hlc,
                    ))
                }
            }
        }
    }

    /// Performs an ordered range scan over `[start, end)`.
    ///
    /// Each key is resolved against:
    /// - its current point entry
    /// - all applicable range tombstones
    ///
    /// Deleted keys are omitted from the result.
    ///
    /// # Complexity
    /// O(N log N) over the keys currently in the memtable, plus O(N * R)
    /// where R is the number of overlapping range tombstones.
    pub(crate) fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, MemtableSingleEntry)>, MemtableError> {
        trace!(
            "scan() started with range. Start key: {} end key: {}",
            HexKey(start),
            HexKey(end)
        );

        if start >= end {
            return Ok(Vec::new().into_iter());
        }

        let guard = self.range_tombstones.read().map_err(|_| {
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let mut records = Vec::new();
        for (key, point) in self.tree.iterate_sorted() {
            if key.as_slice() < start || key.as_slice() >= end {
                continue;
            }
            if point.is_delete {
                continue;
            }

            let mut tombstone_hlc = Hlc::MIN;
            for (_start, t_versions) in guard.range(..=key.clone()) {
                if let Some(t) = t_versions.values().next() {
                    if t.start.as_slice() <= key.as_slice() && key.as_slice() < t.end.as_slice() {
                        tombstone_hlc = tombstone_hlc.max(t.hlc);
                    }
                }
            }

            if tombstone_hlc > point.hlc {
                continue; // deleted by tombstone
            }

            records.push((key, point));
        }

        Ok(records.into_iter())
    }

    /// Returns a logical snapshot of the memtable suitable for flushing.
    ///
    /// The iterator emits:
    /// - The current version of every point key (put or delete)
    /// - **All** range tombstones
    ///
    /// # Guarantees
    /// - No filtering based on tombstone interaction
    /// - Returned records are sufficient to rebuild the same state
    /// - Does not mutate in-memory state
    ///
    /// # Intended Use
    /// This iterator is consumed by the SSTable writer.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = MemtableRecord>, MemtableError> {
        let mut records = Vec::new();

        for (key, entry) in self.tree.iterate_sorted() {
            let record = if entry.is_delete {
                MemtableRecord::Delete { key, hlc: entry.hlc }
            } else {
                MemtableRecord::Put {
                    key,
                    value: entry.value.unwrap(),
                    hlc: entry.hlc,
                }
            };
            records.push(record);
        }

        let guard = self.range_tombstones.read().map_err(|_| {
            MemtableError::Internal("Read-write lock poisoned".into())
        })?;
        for (start, versions) in guard.iter() {
            for entry in versions.values() {
                records.push(MemtableRecord::RangeDelete {
                    start: start.clone(),
                    end: entry.end.clone(),
                    hlc: entry.hlc,
                });
            }
        }

        Ok(records.into_iter())
    }

    /// Converts this mutable memtable into an immutable [`FrozenMemtable`].
    ///
    /// # Behavior
    /// - Consumes `self`, preventing any further writes.
    /// - Preserves ownership of the WAL to keep it alive during flushing.
    /// - Exposes only read-only operations.
    pub fn frozen(self) -> Result<FrozenMemtable, MemtableError> {
        Ok(FrozenMemtable::new(self))
    }

    /// Returns the highest HLC observed so far (via replay or live writes).
    pub fn max_hlc(&self) -> Hlc {
        *self.max_hlc.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live point entries currently held.
    pub fn size(&self) -> usize {
        self.tree.size()
    }
}

// ------------------------------------------------------------------------------------------------
// Frozen Memtable
// ------------------------------------------------------------------------------------------------

/// An immutable, read-only view of a memtable.
///
/// A frozen memtable:
/// - Exposes only read APIs
/// - Retains ownership of the WAL
/// - Prevents further mutation by construction
///
/// This type represents a memtable that is in the process of being flushed
/// to an on-disk SSTable.
pub struct FrozenMemtable {
    pub memtable: Memtable,
}

impl FrozenMemtable {
    /// Wraps an already-built memtable as frozen.
    pub fn new(memtable: Memtable) -> Self {
        Self { memtable }
    }

    /// Retrieves the latest visible value for a key.
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        self.memtable.get(key)
    }

    /// Performs a range scan over the frozen memtable.
    pub(crate) fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, MemtableSingleEntry)>, MemtableError> {
        self.memtable.scan(start, end)
    }

    /// Returns all records required to materialize this memtable into an SSTable.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = MemtableRecord>, MemtableError> {
        self.memtable.iter_for_flush()
    }

    /// Returns the highest HLC observed in this memtable.
    pub fn max_hlc(&self) -> Hlc {
        self.memtable.max_hlc()
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing Helper
// ------------------------------------------------------------------------------------------------

struct HexKey<'a>(&'a [u8]);

impl<'a> std::fmt::Display for HexKey<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{:02x}", byte)?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{:02x}", byte)?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
