//! Bump allocators: a single-threaded [`Arena`] and its per-CPU sharded
//! fan-out, [`ConcurrentArena`].
//!
//! # Design overview
//!
//! [`Arena`] owns a chain of slabs and bumps a cursor forward on every
//! allocation; nothing is ever freed individually, only the whole chain on
//! `Drop`. [`ConcurrentArena`] hands out allocations from one of several
//! per-shard arenas so that unrelated threads rarely contend on the same
//! lock, falling back to a global arena for oversized requests and for
//! refilling a shard once it runs dry.
//!
//! Out-of-memory from the underlying allocator is treated as fatal — this
//! is the one place in the crate where aborting is the correct response,
//! since a bump allocator has no way to recover a partially grown slab.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::utils::CachePadded;

/// Minimum slab size: 4 KiB.
pub const MIN_SLAB_SIZE: usize = 4096;
/// Maximum slab size: 2 GiB.
pub const MAX_SLAB_SIZE: usize = 2 * 1024 * 1024 * 1024;
/// Every slab's size is a multiple of this (the widest alignment this
/// engine ever allocates for).
const MAX_ALIGN: usize = align_of::<u128>();

fn round_slab_size(requested: usize) -> usize {
    let clamped = requested.clamp(MIN_SLAB_SIZE, MAX_SLAB_SIZE);
    clamped.next_multiple_of(MAX_ALIGN)
}

/// Header prefixed to every slab, forming an intrusive linked list so the
/// arena can walk and free every slab it ever grew on `Drop`.
struct SlabHeader {
    prev: Option<NonNull<SlabHeader>>,
    size: usize,
}

fn slab_layout(size: usize) -> Layout {
    Layout::from_size_align(size, MAX_ALIGN).expect("slab size/align must form a valid layout")
}

/// Size of a [`SlabHeader`], rounded up to [`MAX_ALIGN`] so the usable
/// region immediately following it starts at a maximally-aligned address.
fn header_size() -> usize {
    size_of::<SlabHeader>().next_multiple_of(MAX_ALIGN)
}

/// Allocates a new slab of `size` bytes (including the header) and returns
/// a pointer to the header. Aborts the process on allocation failure —
/// there is no sane recovery from OOM inside a bump allocator.
unsafe fn alloc_slab(size: usize) -> NonNull<SlabHeader> {
    let layout = slab_layout(size);
    let raw = unsafe { alloc::alloc(layout) };
    let Some(ptr) = NonNull::new(raw) else {
        alloc::handle_alloc_error(layout);
    };
    ptr.cast()
}

/// A single-threaded bump allocator.
///
/// Allocations bump a cursor forward within the current slab; when the
/// slab runs out of room a new, larger slab is grown and linked behind the
/// old one. `Drop` walks the chain and frees each slab with the layout it
/// was allocated with.
pub struct Arena {
    /// Next free byte in the current slab.
    cursor: Cell<Option<NonNull<u8>>>,
    /// One-past-the-end of the current slab's usable region.
    end: Cell<Option<NonNull<u8>>>,
    /// Header of the current slab (None before the first allocation).
    current: Cell<Option<NonNull<SlabHeader>>>,
    /// Base address of an externally-owned region installed via
    /// [`Arena::install_borrowed_region`], if the arena's current bump
    /// window points into memory this arena does not own. Cleared the
    /// moment the arena grows a slab of its own again.
    borrowed_base: Cell<Option<usize>>,
}

// The arena is only ever accessed through `&self` + `Cell`, so it is not
// `Sync`; it is `Send` because ownership of the whole slab chain can move
// to another thread as long as only one thread touches it at a time.
unsafe impl Send for Arena {}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    /// Creates an empty arena. No slab is allocated until the first
    /// allocation request.
    pub fn new() -> Self {
        Self {
            cursor: Cell::new(None),
            end: Cell::new(None),
            current: Cell::new(None),
            borrowed_base: Cell::new(None),
        }
    }

    /// Number of bytes remaining in the current slab (0 if no slab has been
    /// allocated yet). Best-effort — intended for shard refill accounting,
    /// not for correctness.
    pub fn remaining(&self) -> usize {
        match (self.cursor.get(), self.end.get()) {
            (Some(cur), Some(end)) => end.as_ptr() as usize - cur.as_ptr() as usize,
            _ => 0,
        }
    }

    /// Allocates `size` bytes aligned to `align`. `align` must be a power
    /// of two not exceeding [`MAX_ALIGN`].
    pub fn alloc(&self, size: usize, align: usize) -> NonNull<u8> {
        debug_assert!(align.is_power_of_two());
        debug_assert!(align <= MAX_ALIGN);

        if let (Some(cursor), Some(end)) = (self.cursor.get(), self.end.get()) {
            let addr = cursor.as_ptr() as usize;
            let aligned = addr.next_multiple_of(align);
            if let Some(new_cursor) = aligned.checked_add(size) {
                if new_cursor <= end.as_ptr() as usize {
                    let ptr = unsafe { NonNull::new_unchecked(aligned as *mut u8) };
                    self.cursor
                        .set(Some(unsafe { NonNull::new_unchecked(new_cursor as *mut u8) }));
                    return ptr;
                }
            }
        }

        self.grow_and_alloc(size, align)
    }

    fn current_slab_size(&self) -> usize {
        self.current
            .get()
            .map(|header| unsafe { header.as_ref().size })
            .unwrap_or(0)
    }

    #[cold]
    /// Base address of the arena's current bump window: either the start of
    /// an externally-owned region installed via
    /// [`Arena::install_borrowed_region`], or (absent one) the usable region
    /// of the current owned slab, just past its header. 0 if no slab has
    /// been allocated yet. Used by [`ConcurrentArena`] to register each
    /// distinct window as an addressable region for its offset-based
    /// [`crate::kvstore::KVPtr`] tokens.
    fn current_slab_base(&self) -> usize {
        if let Some(base) = self.borrowed_base.get() {
            return base;
        }
        match self.current.get() {
            Some(header) => header.as_ptr() as usize + header_size(),
            None => 0,
        }
    }

    /// Returns the address one past the end of the arena's current bump
    /// window (owned slab or borrowed region), or 0 if none is active yet.
    fn current_slab_end(&self) -> usize {
        self.end.get().map(|e| e.as_ptr() as usize).unwrap_or(0)
    }

    /// Installs `size` bytes of externally-owned memory, starting at `base`,
    /// as this arena's active bump window. Used by
    /// [`ConcurrentArena::refill_shard`] to hand a shard a sub-region
    /// reserved from the global arena: the shard then bumps within that
    /// region exactly as it would within a slab of its own, but the region
    /// is never linked into this arena's own slab chain, so `Drop` never
    /// frees it — the arena that actually allocated it (the global arena)
    /// retains ownership and frees it once, on its own `Drop`.
    pub(crate) fn install_borrowed_region(&self, base: NonNull<u8>, size: usize) {
        self.cursor.set(Some(base));
        self.end.set(Some(unsafe {
            NonNull::new_unchecked((base.as_ptr() as usize + size) as *mut u8)
        }));
        self.borrowed_base.set(Some(base.as_ptr() as usize));
    }

    fn grow_and_alloc(&self, size: usize, align: usize) -> NonNull<u8> {
        let header_size = header_size();
        let needed = header_size + size + align; // generous upper bound
        let doubled = self.current_slab_size().saturating_mul(2);
        let slab_size = round_slab_size(doubled.max(needed).max(MIN_SLAB_SIZE));

        let header_ptr = unsafe { alloc_slab(slab_size) };
        unsafe {
            header_ptr.as_ptr().write(SlabHeader {
                prev: self.current.get(),
                size: slab_size,
            });
        }

        let slab_start = header_ptr.as_ptr() as usize + header_size;
        let slab_end = header_ptr.as_ptr() as usize + slab_size;

        self.current.set(Some(header_ptr));
        self.borrowed_base.set(None);
        self.cursor
            .set(Some(unsafe { NonNull::new_unchecked(slab_start as *mut u8) }));
        self.end
            .set(Some(unsafe { NonNull::new_unchecked(slab_end as *mut u8) }));

        let aligned = slab_start.next_multiple_of(align);
        let new_cursor = aligned + size;
        debug_assert!(new_cursor <= slab_end, "freshly grown slab too small");
        self.cursor
            .set(Some(unsafe { NonNull::new_unchecked(new_cursor as *mut u8) }));

        unsafe { NonNull::new_unchecked(aligned as *mut u8) }
    }

    /// Copies `bytes` into a fresh allocation and returns it.
    pub fn alloc_copy(&self, bytes: &[u8]) -> NonNull<u8> {
        let ptr = self.alloc(bytes.len().max(1), 1);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }
        ptr
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let mut current = self.current.get();
        while let Some(header_ptr) = current {
            let header = unsafe { header_ptr.as_ptr().read() };
            let layout = slab_layout(header.size);
            unsafe {
                alloc::dealloc(header_ptr.as_ptr().cast(), layout);
            }
            current = header.prev;
        }
    }
}

// --------------------------------------------------------------------------
// ConcurrentArena
// --------------------------------------------------------------------------

/// `slab_slice_size` used by the sharding/refill policy: `min(128 KiB,
/// slab_size / 8)`.
fn slab_slice_size(slab_size: usize) -> usize {
    (128 * 1024).min(slab_size / 8).max(1)
}

/// An `Arena` plus the bookkeeping [`ConcurrentArena`] needs to register
/// each distinct slab it grows as an addressable region: the base address
/// of the slab that served the most recent allocation, and the region id
/// it was assigned in the shared registry (`u32::MAX` before the first
/// allocation).
struct TrackedArena {
    arena: Arena,
    last_slab_base: usize,
    last_region_id: u32,
}

impl TrackedArena {
    fn new() -> Self {
        Self {
            arena: Arena::new(),
            last_slab_base: 0,
            last_region_id: u32::MAX,
        }
    }
}

struct Shard {
    arena: Mutex<TrackedArena>,
}

/// A per-CPU sharded bump allocator.
///
/// Small allocations try the calling thread's home shard first; on
/// contention they reseed to another shard rather than blocking. Requests
/// larger than a quarter of the shard slice size, and shard refills, go
/// through one global arena guarded by its own lock.
pub struct ConcurrentArena {
    shards: Box<[CachePadded<Shard>]>,
    global: Mutex<TrackedArena>,
    slab_size: usize,
    /// Best-effort, monotone-decreasing accounting of remaining capacity.
    /// Never load-bearing for correctness.
    unused: AtomicUsize,
    /// Registry of every bump window (owned slab or borrowed sub-region)
    /// ever installed by any shard or the global arena, indexed by region
    /// id, as `(base, end)` address pairs. Backs [`crate::kvstore::KVPtr`]'s
    /// offset+region-id token: a pointer returned by [`ConcurrentArena::alloc`]
    /// is reconstructed as `slab_regions[region_id].0 + offset`, never by
    /// casting the token straight back to an address. `end` lets a caller
    /// that only has a `(region_id, offset)` pair (never a live pointer)
    /// bound how many bytes it may safely read starting there — see
    /// [`ConcurrentArena::region_remaining`].
    slab_regions: Mutex<Vec<(usize, usize)>>,
}

thread_local! {
    static THREAD_SHARD_SEED: Cell<usize> = Cell::new(0);
}

fn cpu_id_hash() -> usize {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as usize
}

impl ConcurrentArena {
    /// Creates a new concurrent arena with shard count rounded up to the
    /// next power of two `>=` the detected CPU count, and a default slab
    /// size of [`MIN_SLAB_SIZE`].
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_shard_count(cpus.next_power_of_two(), MIN_SLAB_SIZE)
    }

    /// Creates a concurrent arena with an explicit shard count (rounded up
    /// to a power of two) and slab size.
    pub fn with_shard_count(shard_count: usize, slab_size: usize) -> Self {
        let shard_count = shard_count.max(1).next_power_of_two();
        let slab_size = round_slab_size(slab_size);
        let shards = (0..shard_count)
            .map(|_| {
                CachePadded::new(Shard {
                    arena: Mutex::new(TrackedArena::new()),
                })
            })
            .collect();
        Self {
            shards,
            global: Mutex::new(TrackedArena::new()),
            slab_size,
            unused: AtomicUsize::new(0),
            slab_regions: Mutex::new(Vec::new()),
        }
    }

    fn home_shard_index(&self) -> usize {
        THREAD_SHARD_SEED.with(|seed| {
            if seed.get() == 0 {
                seed.set(cpu_id_hash() | 1);
            }
            seed.get() % self.shards.len()
        })
    }

    /// Allocates `size` bytes aligned to `align`, routed through the shard
    /// policy described in the module docs.
    ///
    /// Returns `(region_id, offset, ptr)`: `ptr` is the live pointer to
    /// write through immediately, while `(region_id, offset)` is the
    /// durable, arena-independent token a caller should actually retain —
    /// see [`crate::kvstore::KVPtr`], which packs the pair into a `u64`.
    /// `region_id` identifies the slab the allocation landed in (shared
    /// across shards and the global arena); `offset` is the byte offset of
    /// `ptr` from that slab's base.
    pub fn alloc(&self, size: usize, align: usize) -> (u32, u32, NonNull<u8>) {
        let slice = slab_slice_size(self.slab_size);

        if size > slice / 4 {
            let mut tracked = self.global.lock().unwrap_or_else(|e| e.into_inner());
            let ptr = tracked.arena.alloc(size, align);
            return self.tag(&mut tracked, ptr);
        }

        let start = self.home_shard_index();
        let shard_count = self.shards.len();

        for attempt in 0..shard_count {
            let idx = (start + attempt) % shard_count;
            if let Ok(mut tracked) = self.shards[idx].arena.try_lock() {
                if tracked.arena.remaining() < size {
                    self.refill_shard(&mut tracked, slice);
                }
                let ptr = tracked.arena.alloc(size, align);
                return self.tag(&mut tracked, ptr);
            }
        }

        // Every shard was contended; fall back to the global arena rather
        // than spin indefinitely.
        let mut tracked = self.global.lock().unwrap_or_else(|e| e.into_inner());
        let ptr = tracked.arena.alloc(size, align);
        self.tag(&mut tracked, ptr)
    }

    /// Resolves `ptr` to `(region_id, offset)` against the slab registry,
    /// registering the current bump window under a fresh id the first time
    /// it is seen.
    fn tag(&self, tracked: &mut TrackedArena, ptr: NonNull<u8>) -> (u32, u32, NonNull<u8>) {
        let base = tracked.arena.current_slab_base();
        if base != tracked.last_slab_base || tracked.last_region_id == u32::MAX {
            let mut regions = self.slab_regions.lock().unwrap_or_else(|e| e.into_inner());
            let id = u32::try_from(regions.len()).expect("fewer than u32::MAX slabs ever grown");
            regions.push((base, tracked.arena.current_slab_end()));
            tracked.last_slab_base = base;
            tracked.last_region_id = id;
        }
        let offset = u32::try_from(ptr.as_ptr() as usize - base).expect("offset fits a slab (<= MAX_SLAB_SIZE)");
        (tracked.last_region_id, offset, ptr)
    }

    /// Reconstructs the pointer for `(region_id, offset)` as previously
    /// returned by [`ConcurrentArena::alloc`]. Never call with a pair
    /// produced by a different `ConcurrentArena`.
    pub(crate) fn resolve(&self, region_id: u32, offset: u32) -> NonNull<u8> {
        let regions = self.slab_regions.lock().unwrap_or_else(|e| e.into_inner());
        let (base, _end) = regions[region_id as usize];
        unsafe { NonNull::new_unchecked((base + offset as usize) as *mut u8) }
    }

    /// Returns how many bytes remain between `(region_id, offset)` and the
    /// end of the window it was allocated from — the most a caller may ever
    /// safely read starting at that offset, regardless of how large the
    /// record it backs claims to be.
    pub(crate) fn region_remaining(&self, region_id: u32, offset: u32) -> usize {
        let regions = self.slab_regions.lock().unwrap_or_else(|e| e.into_inner());
        let (base, end) = regions[region_id as usize];
        end.saturating_sub(base + offset as usize)
    }

    /// Reserves a `size`-byte sub-region from the global arena and installs
    /// it as `shard`'s active bump window, per spec.md §4.A's refill policy:
    /// "briefly acquire the global lock, reserve a new sub-region ...
    /// install it in the shard, and release." The reserved bytes are
    /// actually carved out of the global arena's own slab (via
    /// `Arena::alloc`, so they can never be handed out twice) and the shard
    /// only ever borrows them — see [`Arena::install_borrowed_region`].
    fn refill_shard(&self, shard: &mut TrackedArena, slice: usize) {
        let global = self.global.lock().unwrap_or_else(|e| e.into_inner());
        let global_unused = global.arena.remaining();
        let take = global_unused.min(2 * slice).max(slice);
        let region = global.arena.alloc(take, 1);
        shard.arena.install_borrowed_region(region, take);
    }

    /// Best-effort remaining-capacity estimate across all shards, exposed
    /// for metrics only.
    pub fn approx_unused(&self) -> usize {
        self.unused.load(Ordering::Relaxed)
    }
}

impl Default for ConcurrentArena {
    fn default() -> Self {
        Self::new()
    }
}
