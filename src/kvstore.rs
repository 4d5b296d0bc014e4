//! Opaque-pointer key/value records over a [`ConcurrentArena`].
//!
//! Each record is encoded once, in the spec's varint record format
//! (`varint(key_len) ∥ key ∥ varint(value_len) ∥ value`), and copied into
//! arena memory. Callers never see a raw pointer: [`KVPtr`] is a newtype
//! around the allocation's address, opaque outside this module, and every
//! accessor takes the owning arena explicitly so a stray pointer can never
//! be read back against the wrong arena.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::arena::ConcurrentArena;
use crate::varint;

/// An opaque handle to a key/value record stored in a [`ConcurrentArena`].
///
/// Packs a 32-bit arena region id (identifying the slab the record was
/// written into) and a 32-bit offset within that slab — never a raw
/// pointer. Resolving a `KVPtr` back to bytes always goes through the
/// arena's region registry ([`ConcurrentArena::resolve`]), so the token
/// carries no address that could be dereferenced directly even if a caller
/// mishandled it. Carries no lifetime of its own — the caller is
/// responsible for not outliving the arena that produced it, exactly as
/// with any other arena-allocated handle in this codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KVPtr(u64);

impl KVPtr {
    fn from_parts(region_id: u32, offset: u32) -> Self {
        Self(((region_id as u64) << 32) | offset as u64)
    }

    fn region_id(self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn offset(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

/// Static helpers over [`KVPtr`] records, mirroring a conventional
/// comparator/accessor vtable for a key-ordered structure built on top of
/// raw arena storage.
pub struct KVStore;

impl KVStore {
    /// Encodes `key`/`value` in the varint record format and copies the
    /// result into `arena`, returning an opaque handle to it.
    pub fn insert(key: &[u8], value: &[u8], arena: &ConcurrentArena) -> KVPtr {
        let mut buf = Vec::with_capacity(key.len() + value.len() + 10);
        varint::encode_len(key.len(), &mut buf);
        buf.extend_from_slice(key);
        varint::encode_len(value.len(), &mut buf);
        buf.extend_from_slice(value);

        let (region_id, offset, ptr) = arena.alloc(buf.len(), 1);
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), ptr.as_ptr(), buf.len());
        }
        KVPtr::from_parts(region_id, offset)
    }

    /// Returns zero-copy `(key, value)` spans for a record.
    ///
    /// # Safety
    /// `ptr` must have been produced by [`KVStore::insert`] against the
    /// same `arena` (or an arena whose memory is still live at the same
    /// address, which in practice means: the same arena, not yet dropped).
    pub unsafe fn get<'a>(ptr: KVPtr, arena: &'a ConcurrentArena) -> (&'a [u8], &'a [u8]) {
        let raw = arena.resolve(ptr.region_id(), ptr.offset());
        // We don't know the total record length up front; read headers
        // progressively from the raw pointer. This is sound because every
        // record was written by `insert` in exactly this shape — but a
        // varint header can legally sit within a few bytes of the end of
        // the arena's region (a record may end at the very last byte of a
        // slab), so every probe window is capped by how much is actually
        // left in the region rather than a blind fixed width: reading past
        // it would be an out-of-bounds heap read even if nothing inspects
        // the extra bytes.
        let available = arena.region_remaining(ptr.region_id(), ptr.offset());

        let header_probe_len = available.min(10);
        let header_probe = unsafe { std::slice::from_raw_parts(raw.as_ptr(), header_probe_len) };
        let (key_len, n1) = varint::decode_len(header_probe).expect("valid varint header");

        let after_key_off = n1 + key_len;
        let after_key_probe_len = available.saturating_sub(after_key_off).min(10);
        let after_key_len_probe = unsafe {
            std::slice::from_raw_parts(raw.as_ptr().add(after_key_off), after_key_probe_len)
        };
        let (value_len, n2) = varint::decode_len(after_key_len_probe).expect("valid varint header");

        let key_start = n1;
        let value_start = n1 + key_len + n2;

        let key = unsafe { std::slice::from_raw_parts(raw.as_ptr().add(key_start), key_len) };
        let value =
            unsafe { std::slice::from_raw_parts(raw.as_ptr().add(value_start), value_len) };
        (key, value)
    }

    /// Returns the total encoded length, in bytes, of the record at `ptr`.
    ///
    /// # Safety
    /// Same contract as [`KVStore::get`].
    pub unsafe fn get_size(ptr: KVPtr, arena: &ConcurrentArena) -> usize {
        let (key, value) = unsafe { Self::get(ptr, arena) };
        let mut len_buf = Vec::new();
        varint::encode_len(key.len(), &mut len_buf);
        let key_header = len_buf.len();
        len_buf.clear();
        varint::encode_len(value.len(), &mut len_buf);
        let value_header = len_buf.len();
        key_header + key.len() + value_header + value.len()
    }

    /// Lexicographically compares the key spans of two records.
    ///
    /// # Safety
    /// Same contract as [`KVStore::get`], applied to both pointers.
    pub unsafe fn compare(a: KVPtr, b: KVPtr, arena: &ConcurrentArena) -> Ordering {
        let (ka, _) = unsafe { Self::get(a, arena) };
        let (kb, _) = unsafe { Self::get(b, arena) };
        ka.cmp(kb)
    }

    /// A stable hash of the record's key span.
    ///
    /// # Safety
    /// Same contract as [`KVStore::get`].
    pub unsafe fn hash(ptr: KVPtr, arena: &ConcurrentArena) -> u64 {
        let (key, _) = unsafe { Self::get(ptr, arena) };
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let arena = ConcurrentArena::with_shard_count(2, crate::arena::MIN_SLAB_SIZE);
        let ptr = KVStore::insert(b"hello", b"world", &arena);
        let (key, value) = unsafe { KVStore::get(ptr, &arena) };
        assert_eq!(key, b"hello");
        assert_eq!(value, b"world");
    }

    #[test]
    fn empty_key_and_value_round_trip() {
        let arena = ConcurrentArena::with_shard_count(2, crate::arena::MIN_SLAB_SIZE);
        let ptr = KVStore::insert(b"", b"", &arena);
        let (key, value) = unsafe { KVStore::get(ptr, &arena) };
        assert!(key.is_empty());
        assert!(value.is_empty());
    }

    #[test]
    fn compare_orders_by_key() {
        let arena = ConcurrentArena::with_shard_count(2, crate::arena::MIN_SLAB_SIZE);
        let a = KVStore::insert(b"aaa", b"1", &arena);
        let b = KVStore::insert(b"bbb", b"2", &arena);
        assert_eq!(unsafe { KVStore::compare(a, b, &arena) }, Ordering::Less);
    }

    #[test]
    fn records_round_trip_across_many_slab_boundaries() {
        // A single, small-slab arena forces frequent slab growth, so some
        // of these records necessarily land with their header (or tail)
        // within a few bytes of a slab's end — the case the bounded probe
        // in `get` exists to handle safely.
        let arena = ConcurrentArena::with_shard_count(1, crate::arena::MIN_SLAB_SIZE);
        let mut ptrs = Vec::new();
        for i in 0..5000usize {
            let key = format!("key-{i}").into_bytes();
            let value = vec![(i % 251) as u8; i % 37];
            let ptr = KVStore::insert(&key, &value, &arena);
            ptrs.push((ptr, key, value));
        }
        for (ptr, key, value) in &ptrs {
            let (k, v) = unsafe { KVStore::get(*ptr, &arena) };
            assert_eq!(k, key.as_slice());
            assert_eq!(v, value.as_slice());
        }
    }

    #[test]
    fn get_size_matches_encoded_length() {
        let arena = ConcurrentArena::with_shard_count(2, crate::arena::MIN_SLAB_SIZE);
        let ptr = KVStore::insert(b"k", b"value-bytes", &arena);
        let size = unsafe { KVStore::get_size(ptr, &arena) };
        // 1 (key len varint) + 1 (key) + 1 (value len varint) + 11 (value)
        assert_eq!(size, 1 + 1 + 1 + 11);
    }
}
