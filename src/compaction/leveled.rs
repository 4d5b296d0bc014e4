//! Leveled compaction — merge job for level *k* → *k + 1*.
//!
//! Level 0 holds freshly flushed SSTables with overlapping key ranges, in
//! flush order. Level 1 is the bottom level in this two-level model: its
//! SSTables are disjoint by key range, built exclusively by this job. Each
//! round picks the oldest level-0 table, finds every level-1 table whose
//! `[first_key, last_key]` overlaps it, and merges them into one or more
//! new level-1 tables.
//!
//! Point entries are deduplicated (highest HLC wins, same as minor
//! compaction) and, because level 1 is the bottom of this model, tombstones
//! that aren't needed to suppress anything below them are dropped — the
//! same "nothing left to resurrect" reasoning major compaction uses.

use std::sync::Arc;

use crate::compaction::{
    CompactionError, CompactionResult, CompactionStrategy, MergeIterator, full_range_scan_iters,
};
use crate::engine::utils::Record;
use crate::engine::{EngineConfig, RangeTombstone, SSTABLE_DIR};
use crate::manifest::{Manifest, ManifestSstEntry};
use crate::sstable::{self, PointEntry, SSTable};
use tracing::{debug, info};

/// Level 0 → level 1 merge job.
pub struct LevelCompaction;

impl CompactionStrategy for LevelCompaction {
    fn compact(
        &self,
        sstables: &[Arc<SSTable>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        maybe_compact(sstables, manifest, data_dir, config)
    }
}

/// Checks whether a level-0 table is waiting to be pushed into level 1
/// and, if so, merges it with every overlapping level-1 table.
///
/// Returns `Ok(None)` if there is no level-0 SSTable to push down.
pub fn maybe_compact(
    sstables: &[Arc<SSTable>],
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
) -> Result<Option<CompactionResult>, CompactionError> {
    let entries = manifest.get_sstables()?;

    // Oldest level-0 entry (lowest ID == flushed first) is pushed down first,
    // preserving the flush-order priority level 0 depends on for correctness.
    let oldest_l0 = entries
        .iter()
        .filter(|e| e.level == 0)
        .min_by_key(|e| e.id);

    let target_entry = match oldest_l0 {
        Some(e) => e.clone(),
        None => {
            debug!("level merge: no level-0 SSTable pending");
            return Ok(None);
        }
    };

    let overlapping: Vec<ManifestSstEntry> = entries
        .iter()
        .filter(|e| e.level == 1 && ranges_overlap(&target_entry, e))
        .cloned()
        .collect();

    let target_sst = sstables
        .iter()
        .find(|s| s.id() == target_entry.id)
        .cloned();
    let target_sst = match target_sst {
        Some(s) => s,
        None => {
            // Manifest and in-memory SSTable list are momentarily out of
            // sync (e.g. concurrent flush); try again on the next pass.
            debug!(id = target_entry.id, "level merge: target SSTable not loaded yet");
            return Ok(None);
        }
    };

    let mut merge_set: Vec<Arc<SSTable>> = vec![target_sst];
    for e in &overlapping {
        if let Some(s) = sstables.iter().find(|s| s.id() == e.id) {
            merge_set.push(s.clone());
        }
    }

    let removed_ids: Vec<u64> = merge_set.iter().map(|s| s.id()).collect();
    info!(
        target_id = target_entry.id,
        overlapping_count = overlapping.len(),
        ?removed_ids,
        "level merge: pushing level-0 table into level 1"
    );

    let result = execute(&merge_set, manifest, data_dir, config)?;

    let output_count = result.additional_ssts.len() + if result.new_sst_id.is_some() { 1 } else { 0 };
    info!(
        output_count,
        removed_count = result.removed_ids.len(),
        "level merge: complete"
    );

    Ok(Some(result))
}

/// `true` if the two entries' `[first_key, last_key]` ranges intersect.
fn ranges_overlap(a: &ManifestSstEntry, b: &ManifestSstEntry) -> bool {
    a.first_key <= b.last_key && b.first_key <= a.last_key
}

fn execute(
    merge_set: &[Arc<SSTable>],
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
) -> Result<CompactionResult, CompactionError> {
    let sst_refs: Vec<&SSTable> = merge_set.iter().map(|s| s.as_ref()).collect();
    let removed_ids: Vec<u64> = merge_set.iter().map(|s| s.id()).collect();

    let iters = full_range_scan_iters(&sst_refs)?;
    let merge_iter = MergeIterator::new(iters);

    // Level 1 is the bottom level here, so once a key's newest version is a
    // tombstone there is nothing below it left to shadow — drop it, the
    // same reasoning major compaction uses for a full merge.
    let mut point_entries: Vec<PointEntry> = Vec::new();
    let mut last_key: Option<Vec<u8>> = None;

    for record in merge_iter {
        match record {
            Record::RangeDelete { .. } => {}
            Record::Delete { key, .. } => {
                if last_key.as_ref() == Some(&key) {
                    continue;
                }
                last_key = Some(key);
            }
            Record::Put { key, value, hlc } => {
                if last_key.as_ref() == Some(&key) {
                    continue;
                }
                last_key = Some(key.clone());
                point_entries.push(PointEntry {
                    key,
                    value: Some(value),
                    hlc,
                });
            }
        }
    }

    finalize_level_merge(manifest, data_dir, removed_ids, point_entries, config)
}

/// Like [`super::finalize_compaction`], but splits the merged entries across
/// several level-1 output files once the running size crosses
/// `config.min_sstable_size`, and atomically registers all of them (plus the
/// removed inputs) with the manifest in one `apply_compaction` call.
fn finalize_level_merge(
    manifest: &mut Manifest,
    data_dir: &str,
    removed_ids: Vec<u64>,
    point_entries: Vec<PointEntry>,
    config: &EngineConfig,
) -> Result<CompactionResult, CompactionError> {
    if point_entries.is_empty() {
        info!(
            removed_count = removed_ids.len(),
            ?removed_ids,
            "level merge: all entries eliminated, removing old SSTables"
        );
        manifest.apply_compaction(Vec::new(), removed_ids.clone())?;
        manifest.checkpoint()?;
        remove_old_files(data_dir, &removed_ids);

        return Ok(CompactionResult {
            removed_ids,
            new_sst_path: None,
            new_sst_id: None,
            additional_ssts: Vec::new(),
        });
    }

    let chunks = split_by_size(point_entries, config.min_sstable_size);
    let mut new_entries: Vec<ManifestSstEntry> = Vec::with_capacity(chunks.len());
    let mut outputs: Vec<(u64, String)> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let sst_id = manifest.allocate_sst_id()?;
        let sst_path = format!("{}/{}/{:06}.sst", data_dir, SSTABLE_DIR, sst_id);
        let point_count = chunk.len();
        let first_key = chunk.first().map(|e| e.key.clone()).unwrap_or_default();
        let last_key = chunk.last().map(|e| e.key.clone()).unwrap_or_default();

        debug!(
            sst_id,
            point_count,
            path = %sst_path,
            "level merge: writing level-1 output"
        );

        sstable::SstWriter::new(&sst_path).build(
            chunk.into_iter(),
            point_count,
            std::iter::empty::<RangeTombstone>(),
            0,
        )?;

        outputs.push((sst_id, sst_path.clone()));
        new_entries.push(ManifestSstEntry {
            id: sst_id,
            path: sst_path.into(),
            level: 1,
            first_key,
            last_key,
        });
    }

    manifest.apply_compaction(new_entries, removed_ids.clone())?;
    manifest.checkpoint()?;
    remove_old_files(data_dir, &removed_ids);

    // The first output becomes `new_sst_id`/`new_sst_path` (matching the
    // STCS result shape); anything beyond that rides in `additional_ssts`.
    let mut outputs = outputs.into_iter();
    let (first_id, first_path) = outputs.next().expect("chunks is non-empty");
    let additional_ssts: Vec<(u64, String)> = outputs.collect();

    Ok(CompactionResult {
        removed_ids,
        new_sst_path: Some(first_path),
        new_sst_id: Some(first_id),
        additional_ssts,
    })
}

fn remove_old_files(data_dir: &str, removed_ids: &[u64]) {
    use std::fs;

    for id in removed_ids {
        let path = format!("{}/{}/{:06}.sst", data_dir, SSTABLE_DIR, id);
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!(id, %e, "failed to remove old SSTable file during level merge");
        }
    }
}

/// Splits entries into size-budgeted chunks, each roughly `max_bytes` of
/// key+value payload. Always yields at least one chunk when `entries` is
/// non-empty, even if a single entry exceeds `max_bytes`.
fn split_by_size(entries: Vec<PointEntry>, max_bytes: usize) -> Vec<Vec<PointEntry>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;

    for entry in entries {
        let entry_size = entry.key.len() + entry.value.as_ref().map_or(0, Vec::len);
        if !current.is_empty() && current_size + entry_size > max_bytes {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += entry_size;
        current.push(entry);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
