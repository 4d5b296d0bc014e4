//! # AeternusDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast writes and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Engine                           │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │  Active     │  │   Frozen     │  │  SSTables   │  │
//! │  │  Memtable   │  │  Memtables   │  │  (on disk)  │  │
//! │  │  + WAL      │  │  + WALs      │  │             │  │
//! │  └─────┬───────┘  └──────┬───────┘  └──────┬──────┘  │
//! │        │   freeze        │   flush         │         │
//! │        └─────────►       └────────►        │         │
//! │                                            │         │
//! │  ┌──────────────────────────────────────────┘         │
//! │  │  Compaction (minor / tombstone / major)           │
//! │  └───────────────────────────────────────────────────┘│
//! │                                                      │
//! │  ┌──────────────────────────────────────────────────┐ │
//! │  │              Manifest (WAL + snapshot)           │ │
//! │  └──────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`arena`] | Single-threaded bump allocator and its per-CPU sharded fan-out |
//! | [`kvstore`] | Opaque-pointer key/value records over a [`arena::ConcurrentArena`] |
//! | [`hlc`] | Hybrid logical clock for cross-node last-writer-wins ordering |
//! | [`varint`] | Unsigned LEB128 varint encoding used by the wire and arena record formats |
//! | [`engine`] | Core storage engine — open, read, write, scan, flush, compact |
//! | [`memtable`] | Concurrent skip-list write buffer with multi-version entries |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters and block indices |
//! | [`manifest`] | Persistent metadata manager (WAL + snapshot model) |
//! | [`compaction`] | Leveled flush/merge compaction built on size-tiered triggers |
//! | [`net`] | TCP wire framing and the PUT/GET server loop |
//! | [`encoding`] | Deterministic, zero-panic binary encoding for on-disk containers |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Multi-version concurrency** — multiple versions per key, ordered by
//!   hybrid logical clock. Reads always see the greatest-HLC committed version.
//! - **Point and range tombstones** — efficient delete semantics for both
//!   individual keys and key ranges.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Block-level CRC32 integrity** — every on-disk block (WAL records,
//!   SSTable data blocks, headers, footers) is checksummed.
//! - **Leveled compaction** — Level 0 flushes overlap freely; Level ≥ 1 merges
//!   keep disjoint key ranges.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aeternusdb::engine::{Database, DbConfig};
//!
//! let db = Database::open("/tmp/my_db", DbConfig::default()).unwrap();
//!
//! db.insert(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! assert_eq!(db.find(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! db.erase(b"hello").unwrap();
//! assert_eq!(db.find(b"hello").unwrap(), None);
//!
//! db.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod arena;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod hlc;
pub mod kvstore;
pub mod manifest;
pub mod memtable;
pub mod net;
pub mod sstable;
pub mod varint;
pub mod wal;

pub use compaction::CompactionStrategyType;
