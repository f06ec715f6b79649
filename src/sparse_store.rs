//! Sparse, chunked item storage with LRU + distance eviction (§4.2,
//! component B).
//!
//! Follows the `lru::LruCache` usage already established in
//! `stores/profiles.rs` and `utils/thread_tree.rs` for the eviction
//! primitive, and `components/virtual_list.rs`'s `HashMap<usize, ItemHeight>`
//! for the sparse-by-index storage shape. Chunk last-access timestamps use
//! `instant::Instant`, the same wasm-friendly clock already depended on
//! (`instant = { features = ["wasm-bindgen"] }`).

use instant::Instant;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::item::{ItemSlot, ListItem, Range};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreTuning {
    /// Fixed slot-array width per chunk.
    pub chunk_width: usize,
    /// `evictDistant` only runs once cached items exceed this.
    pub cache_cap: usize,
    /// `evictDistant` keeps chunks within `[visStart - buffer, visEnd + buffer]`.
    pub evict_buffer: usize,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            chunk_width: 100,
            cache_cap: 5000,
            evict_buffer: 200,
        }
    }
}

struct Chunk<T: ListItem> {
    slots: Vec<Option<ItemSlot<T>>>,
    count: usize,
    last_access: Instant,
}

impl<T: ListItem> Chunk<T> {
    fn new(width: usize) -> Self {
        Self {
            slots: vec![None; width],
            count: 0,
            last_access: Instant::now(),
        }
    }
}

pub struct SparseStore<T: ListItem> {
    /// Keyed by chunk index (`i / chunk_width`). Unbounded — item-count
    /// eviction (`cache_cap`) is enforced explicitly in [`Self::evict_to_limit`]
    /// rather than by the map's own capacity, since the cap is on total
    /// cached *items*, not chunk count.
    chunks: LruCache<usize, Chunk<T>>,
    total: usize,
    cached_count: usize,
    tuning: StoreTuning,
}

impl<T: ListItem> SparseStore<T> {
    pub fn new(tuning: StoreTuning) -> Self {
        Self {
            chunks: LruCache::unbounded(),
            total: 0,
            cached_count: 0,
            tuning,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn cached_count(&self) -> usize {
        self.cached_count
    }

    pub fn chunk_width(&self) -> usize {
        self.tuning.chunk_width
    }

    pub fn tuning(&self) -> StoreTuning {
        self.tuning
    }

    /// Declares the virtual length; does not allocate chunks.
    pub fn set_total(&mut self, n: usize) {
        self.total = n;
    }

    fn chunk_index(&self, i: usize) -> usize {
        i / self.tuning.chunk_width
    }

    fn slot_index(&self, i: usize) -> usize {
        i % self.tuning.chunk_width
    }

    pub fn set(&mut self, i: usize, slot: ItemSlot<T>) {
        self.total = self.total.max(i + 1);
        let width = self.tuning.chunk_width;
        let ci = self.chunk_index(i);
        let si = self.slot_index(i);
        if !self.chunks.contains(&ci) {
            self.chunks.put(ci, Chunk::new(width));
        }
        let chunk = self.chunks.get_mut(&ci).expect("just inserted");
        if chunk.slots[si].is_none() {
            chunk.count += 1;
            self.cached_count += 1;
        }
        chunk.slots[si] = Some(slot);
        chunk.last_access = Instant::now();
    }

    pub fn set_range(&mut self, offset: usize, items: impl IntoIterator<Item = ItemSlot<T>>) {
        for (k, item) in items.into_iter().enumerate() {
            self.set(offset + k, item);
        }
    }

    pub fn get(&mut self, i: usize) -> Option<&ItemSlot<T>> {
        let ci = self.chunk_index(i);
        let si = self.slot_index(i);
        let chunk = self.chunks.get_mut(&ci)?;
        chunk.last_access = Instant::now();
        chunk.slots[si].as_ref()
    }

    pub fn peek(&self, i: usize) -> Option<&ItemSlot<T>> {
        let ci = self.chunk_index(i);
        let si = self.slot_index(i);
        self.chunks.peek(&ci)?.slots[si].as_ref()
    }

    pub fn delete(&mut self, i: usize) -> bool {
        let ci = self.chunk_index(i);
        let si = self.slot_index(i);
        let Some(chunk) = self.chunks.get_mut(&ci) else {
            return false;
        };
        if chunk.slots[si].take().is_none() {
            return false;
        }
        chunk.count -= 1;
        self.cached_count -= 1;
        if chunk.count == 0 {
            self.chunks.pop(&ci);
        }
        true
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.cached_count = 0;
    }

    pub fn is_range_loaded(&self, a: usize, b: usize) -> bool {
        if b < a {
            return true;
        }
        (a..=b).all(|i| self.peek(i).is_some())
    }

    /// The maximal ordered set of maximal contiguous loaded ranges, §3.
    pub fn loaded_ranges(&self) -> Vec<Range> {
        let mut indices: Vec<usize> = self
            .chunks
            .iter()
            .flat_map(|(ci, chunk)| {
                let base = ci * self.tuning.chunk_width;
                chunk
                    .slots
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.is_some())
                    .map(move |(si, _)| base + si)
            })
            .collect();
        indices.sort_unstable();

        let mut ranges = Vec::new();
        let mut iter = indices.into_iter();
        if let Some(first) = iter.next() {
            let mut start = first;
            let mut end = first;
            for i in iter {
                if i == end + 1 {
                    end = i;
                } else {
                    ranges.push(Range::new(start, end));
                    start = i;
                    end = i;
                }
            }
            ranges.push(Range::new(start, end));
        }
        ranges
    }

    /// Missing ranges within `[a, b]`, aligned to chunk boundaries so
    /// resulting fetches come in chunk-sized units (§4.2).
    pub fn find_unloaded_ranges(&self, a: usize, b: usize) -> Vec<Range> {
        if b < a {
            return Vec::new();
        }
        let width = self.tuning.chunk_width;
        let aligned_start = (a / width) * width;
        let aligned_end_excl = ((b + 1) + width - 1) / width * width;
        let aligned_end = aligned_end_excl - 1;

        let loaded = self.loaded_ranges();
        let mut missing = Vec::new();
        let mut cursor = aligned_start;
        for r in &loaded {
            if r.end < cursor || r.start > aligned_end {
                continue;
            }
            if r.start > cursor {
                missing.push(Range::new(cursor, (r.start - 1).min(aligned_end)));
            }
            cursor = cursor.max(r.end + 1);
            if cursor > aligned_end {
                break;
            }
        }
        if cursor <= aligned_end {
            missing.push(Range::new(cursor, aligned_end));
        }
        missing
    }

    /// Drops chunks entirely outside `[visStart - buffer, visEnd + buffer]`,
    /// provided the cache is over `cache_cap`. Returns items evicted.
    pub fn evict_distant(&mut self, vis_start: usize, vis_end: usize) -> usize {
        if self.cached_count <= self.tuning.cache_cap {
            return 0;
        }
        let buffer = self.tuning.evict_buffer;
        let keep_start = vis_start.saturating_sub(buffer);
        let keep_end = vis_end + buffer;
        let width = self.tuning.chunk_width;

        let doomed: Vec<usize> = self
            .chunks
            .iter()
            .filter_map(|(ci, _)| {
                let base = ci * width;
                let last = base + width - 1;
                if last < keep_start || base > keep_end {
                    Some(*ci)
                } else {
                    None
                }
            })
            .collect();

        let mut evicted = 0;
        for ci in doomed {
            if let Some(chunk) = self.chunks.pop(&ci) {
                evicted += chunk.count;
                self.cached_count -= chunk.count;
            }
        }
        evicted
    }

    /// Drop least-recently-used chunks until `cached_count <= cache_cap`.
    pub fn evict_to_limit(&mut self) -> usize {
        let mut evicted = 0;
        while self.cached_count > self.tuning.cache_cap {
            let Some((_, chunk)) = self.chunks.pop_lru() else {
                break;
            };
            evicted += chunk.count;
            self.cached_count -= chunk.count;
        }
        evicted
    }
}
