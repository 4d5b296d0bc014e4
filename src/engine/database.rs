//! The public `Database` facade.
//!
//! `Database` is the crate's front door: a thin wrapper over [`Engine`] that
//! (a) stamps every mutation with a [`Hlc`] the way spec.md's `insert/erase/
//! find` surface describes, (b) narrows the wider `Engine` surface down to
//! just `insert`/`erase`/`find` (range scans/deletes are an explicit
//! Non-goal of the public API — `Engine::scan`/`delete_range` stay reachable
//! internally for compaction but are not re-exposed here), and (c) takes an
//! exclusive advisory lock on the data directory so two `Database` instances
//! can never open the same directory concurrently.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::hlc::Hlc;
use crate::manifest::ManifestError;
use crate::memtable::MemtableError;
use crate::sstable::SSTableError;
use crate::wal::WalError;

use super::{Engine, EngineConfig, EngineError, EngineStats};

/// Name of the advisory lock file placed directly under the data directory.
const LOCK_FILENAME: &str = "MANIFEST.lock";

/// Configuration for a [`Database`] instance.
///
/// Presently just wraps [`EngineConfig`] — every tunable spec.md names for
/// the arena, skip-list, memtable, SSTable, and compactor lives there.
/// Server-only tunables (`--host`/`--port`/`--join`) are not part of this
/// struct: they configure the TCP front end (see [`crate::net`]), not the
/// embedded engine, and an embedder linking this crate as a library never
/// needs them.
#[derive(Debug, Clone, Copy)]
pub struct DbConfig {
    pub engine: EngineConfig,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
        }
    }
}

/// Errors surfaced by the public [`Database`] facade.
///
/// Every variant maps to one of spec.md §7's error kinds and, at the wire
/// layer, to a single transport status byte (see
/// [`crate::net::server::WireStatus`]) — callers never see more detail than
/// this enum carries.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying filesystem I/O failure, surfaced either directly (opening
    /// the data directory) or via the engine's own I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A checksum mismatch was detected reading back a WAL record, SSTable,
    /// or manifest snapshot — on-disk state does not match what was
    /// written.
    #[error("data corruption detected: {0}")]
    Corruption(String),

    /// A concurrent write conflicted with this one.
    ///
    /// Not yet reachable from any path in this engine: writes are resolved
    /// by HLC-based last-writer-wins rather than rejected, so there is
    /// presently nothing that constructs this variant. Kept so a future
    /// compare-and-swap-style write API has somewhere to report a conflict
    /// without widening the wire status taxonomy.
    #[error("conflicting concurrent write")]
    Conflict,

    /// The operation was abandoned before it completed — for example, a
    /// client disconnected mid-request. Never returned from a `Database`
    /// method directly; constructed by the network front end when it needs
    /// to log a disconnect in these terms.
    #[error("operation cancelled")]
    Cancelled,

    /// A request violated the wire protocol (malformed frame, bad payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Too many sealed memtables are already waiting on a flush. The engine
    /// presently applies this as backpressure by blocking the caller (see
    /// `Engine`'s worker pool) rather than failing the write; this variant
    /// exists for a caller that prefers a fast failure over blocking.
    #[error("too many writes pending, try again later")]
    Backpressure,

    /// Any other engine error that doesn't warrant its own wire status.
    #[error(transparent)]
    Engine(EngineError),

    /// Another `Database` instance already holds the exclusive lock on this
    /// data directory.
    #[error("database directory already open by another instance: {0}")]
    AlreadyOpen(PathBuf),

    /// Failed to acquire or release the instance lock file.
    #[error("instance lock error: {0}")]
    Lock(std::io::Error),
}

impl From<EngineError> for DbError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(e) => DbError::Io(e),
            EngineError::SSTable(SSTableError::ChecksumMismatch) => {
                DbError::Corruption("SSTable checksum mismatch".into())
            }
            EngineError::Manifest(ManifestError::SnapshotChecksumMismatch) => {
                DbError::Corruption("manifest snapshot checksum mismatch".into())
            }
            EngineError::Manifest(ManifestError::Wal(WalError::ChecksumMismatch)) => {
                DbError::Corruption("WAL checksum mismatch".into())
            }
            EngineError::Memtable(MemtableError::WAL(WalError::ChecksumMismatch)) => {
                DbError::Corruption("WAL checksum mismatch".into())
            }
            other => DbError::Engine(other),
        }
    }
}

/// Advisory single-writer lock on a data directory.
///
/// Implemented as a sibling `MANIFEST.lock` file created with
/// `create_new(true)` (atomic create-if-absent) and stamped with this
/// process's PID for diagnostics. Released by deleting the file on `Drop`.
/// This is not a kernel `flock` — the inherited dependency stack carries no
/// `fs2`/`fslock` crate, and a single extra file-existence check is
/// unnecessary machinery to pull one in for (see DESIGN.md).
struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    fn acquire(data_dir: &Path) -> Result<Self, DbError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOCK_FILENAME);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                let _ = file.sync_all();
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(DbError::AlreadyOpen(data_dir.to_path_buf()))
            }
            Err(e) => Err(DbError::Lock(e)),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The embeddable MouseDB storage engine handle.
///
/// `Database` is cheaply `Clone`-able (it shares the underlying `Engine`'s
/// `Arc`) so it can be handed to a TCP server's per-connection threads
/// without any extra synchronization. Only one `Database` chain of clones
/// may have a given data directory open at a time across the whole process
/// tree — enforced by [`InstanceLock`] at `open` time.
#[derive(Clone)]
pub struct Database {
    engine: Engine,
    // Held only for its `Drop` impl; never read.
    #[allow(dead_code)]
    lock: std::sync::Arc<InstanceLock>,
}

impl Database {
    /// Opens (or creates) a database rooted at `path`.
    ///
    /// Takes the exclusive instance lock first so a corrupt or half-written
    /// directory is never touched by two processes racing to recover it,
    /// then delegates to [`Engine::open`] to replay the manifest and every
    /// WAL, reconstructing the in-memory state.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        let path = path.as_ref();
        let lock = InstanceLock::acquire(path)?;
        let engine = Engine::open(path, config.engine)?;
        Ok(Self {
            engine,
            lock: std::sync::Arc::new(lock),
        })
    }

    /// Inserts or overwrites `key` with `value`, stamped with a fresh HLC
    /// reading drawn from this database's clock.
    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), DbError> {
        self.engine.put(key, value)?;
        Ok(())
    }

    /// Inserts `key`/`value` at a caller-supplied HLC.
    ///
    /// Used by the TCP front end to apply a `WRITE_REQ` carrying a remote
    /// HLC: the server merges that remote stamp into its own clock via
    /// [`Database::merge_remote_hlc`] before calling this, so the applied
    /// stamp is causally consistent with everything this node has seen.
    pub fn insert_at(&self, key: Vec<u8>, value: Vec<u8>, hlc: Hlc) -> Result<(), DbError> {
        self.engine.put_at(key, value, Some(hlc))?;
        Ok(())
    }

    /// Deletes `key` (writes a point tombstone), stamped with a fresh HLC.
    pub fn erase(&self, key: Vec<u8>) -> Result<(), DbError> {
        self.engine.delete(key)?;
        Ok(())
    }

    /// Deletes `key` at a caller-supplied HLC — the delete counterpart of
    /// [`Database::insert_at`].
    pub fn erase_at(&self, key: Vec<u8>, hlc: Hlc) -> Result<(), DbError> {
        self.engine.delete_at(key, Some(hlc))?;
        Ok(())
    }

    /// Looks up `key`.
    ///
    /// Traverses active memtable → frozen memtables (newest first) →
    /// SSTables (newest `max_hlc` first), returning the value of the
    /// non-tombstone entry with the greatest HLC, or `None` if the key was
    /// never written or the dominant entry is a tombstone.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self.engine.get(key.to_vec())?)
    }

    /// Merges a remote HLC reading into this database's clock. See
    /// [`Database::insert_at`].
    pub fn merge_remote_hlc(&self, remote: Hlc) -> Result<Hlc, DbError> {
        Ok(self.engine.merge_remote_hlc(remote)?)
    }

    /// Returns a snapshot of engine statistics (frozen memtable count,
    /// SSTable count and sizes).
    pub fn stats(&self) -> Result<EngineStats, DbError> {
        Ok(self.engine.stats()?)
    }

    /// Gracefully shuts down the database: flushes every remaining frozen
    /// memtable, checkpoints the manifest, and fsyncs every directory.
    ///
    /// The instance lock is released separately, when the last clone of
    /// this `Database` is dropped — `close` only flushes durable state, it
    /// does not consume `self`, since a server holding several clones may
    /// call it from a signal handler while connection threads still hold
    /// their own clones.
    pub fn close(&self) -> Result<(), DbError> {
        self.engine.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn basic_put_get_erase() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), DbConfig::default()).unwrap();

        db.insert(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(db.find(b"k").unwrap(), Some(b"v".to_vec()));

        db.erase(b"k".to_vec()).unwrap();
        assert_eq!(db.find(b"k").unwrap(), None);

        db.close().unwrap();
    }

    #[test]
    fn checksum_mismatches_map_to_corruption_regardless_of_which_layer_caught_them() {
        let from_sstable: DbError = EngineError::SSTable(SSTableError::ChecksumMismatch).into();
        assert!(matches!(from_sstable, DbError::Corruption(_)));

        let from_manifest_snapshot: DbError =
            EngineError::Manifest(ManifestError::SnapshotChecksumMismatch).into();
        assert!(matches!(from_manifest_snapshot, DbError::Corruption(_)));

        let from_manifest_wal: DbError =
            EngineError::Manifest(ManifestError::Wal(WalError::ChecksumMismatch)).into();
        assert!(matches!(from_manifest_wal, DbError::Corruption(_)));

        let from_memtable_wal: DbError =
            EngineError::Memtable(MemtableError::WAL(WalError::ChecksumMismatch)).into();
        assert!(matches!(from_memtable_wal, DbError::Corruption(_)));
    }

    #[test]
    fn engine_io_error_maps_to_db_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: DbError = EngineError::Io(io).into();
        assert!(matches!(err, DbError::Io(_)));
    }

    #[test]
    fn other_engine_errors_fall_back_to_the_engine_catch_all() {
        let err: DbError = EngineError::Internal("poisoned lock".into()).into();
        assert!(matches!(err, DbError::Engine(_)));
    }

    #[test]
    fn second_open_on_same_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), DbConfig::default()).unwrap();

        let err = Database::open(dir.path(), DbConfig::default()).unwrap_err();
        assert!(matches!(err, DbError::AlreadyOpen(_)));

        db.close().unwrap();
    }

    #[test]
    fn lock_is_released_after_drop_allowing_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(dir.path(), DbConfig::default()).unwrap();
            db.insert(b"a".to_vec(), b"1".to_vec()).unwrap();
            db.close().unwrap();
        }

        let db2 = Database::open(dir.path(), DbConfig::default()).unwrap();
        assert_eq!(db2.find(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn older_write_loses_by_hlc() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), DbConfig::default()).unwrap();

        let newer = Hlc {
            physical_us: 2,
            logical: 0,
            node_id: 7,
        };
        let older = Hlc {
            physical_us: 1,
            logical: 0,
            node_id: 7,
        };

        db.insert_at(b"k".to_vec(), b"v2".to_vec(), newer).unwrap();
        db.insert_at(b"k".to_vec(), b"v1".to_vec(), older).unwrap();

        assert_eq!(db.find(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn tombstone_with_greater_hlc_wins_over_value() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), DbConfig::default()).unwrap();

        let t0 = Hlc {
            physical_us: 1,
            logical: 0,
            node_id: 7,
        };
        let t1 = Hlc {
            physical_us: 2,
            logical: 0,
            node_id: 7,
        };

        db.insert_at(b"k".to_vec(), b"v".to_vec(), t0).unwrap();
        db.erase_at(b"k".to_vec(), t1).unwrap();

        assert_eq!(db.find(b"k").unwrap(), None);
    }
}
