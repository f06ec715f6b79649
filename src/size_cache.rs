//! Size cache: prefix sums of item sizes (§4.1, component A).
//!
//! Follows `VirtualState::calculate_total_height` / `calculate_item_offset`
//! (`components/virtual_list.rs`), which compute offsets by summing on every
//! call; this module replaces that O(n) per-call walk with a materialized
//! prefix sum `P`, the same shape as `PrefixSumExtentModel`'s prefix vector
//! rebuilt on length/extent change with binary search for the
//! offset-to-index query.

use crate::config::ItemSize;

/// `rebuild(n)` recomputes `P` from scratch; `index_at_offset` binary
/// searches it. Both are the only two non-trivial operations — `offset_of`
/// and `total_size` are O(1) vector indexing.
pub struct SizeCache {
    size: ItemSize,
    /// `prefix[i] = sum of size_of(0..i)`; `prefix.len() == n + 1`.
    prefix: Vec<f64>,
}

impl SizeCache {
    pub fn new(size: ItemSize) -> Self {
        Self {
            size,
            prefix: vec![0.0],
        }
    }

    pub fn len(&self) -> usize {
        self.prefix.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute `P` for a total of `n` items. Called on total-count change
    /// and whenever the declared size function itself changes (the caller
    /// swaps `self.size` first via [`SizeCache::set_size`]).
    pub fn rebuild(&mut self, n: usize) {
        let mut prefix = Vec::with_capacity(n + 1);
        prefix.push(0.0);
        let mut acc = 0.0;
        for i in 0..n {
            acc += self.size.size_of(i).max(0.0);
            prefix.push(acc);
        }
        self.prefix = prefix;
    }

    pub fn set_size(&mut self, size: ItemSize, n: usize) {
        self.size = size;
        self.rebuild(n);
    }

    /// `P[i]`. Panics if `i > len()` — callers are expected to clamp to
    /// `[0, n]` first (all internal call sites do).
    pub fn offset_of(&self, i: usize) -> f64 {
        self.prefix[i.min(self.len())]
    }

    pub fn size_of(&self, i: usize) -> f64 {
        if i >= self.len() {
            return 0.0;
        }
        self.prefix[i + 1] - self.prefix[i]
    }

    pub fn total_size(&self) -> f64 {
        *self.prefix.last().unwrap_or(&0.0)
    }

    /// Largest `i` such that `P[i] <= y < P[i+1]`. Returns 0 for `y <= 0`
    /// and `n - 1` for `y >= P[n]`, per §4.1.
    pub fn index_at_offset(&self, y: f64) -> usize {
        let n = self.len();
        if n == 0 {
            return 0;
        }
        if y <= 0.0 {
            return 0;
        }
        if y >= self.total_size() {
            return n - 1;
        }
        // Binary search over P for the largest index i with P[i] <= y.
        let mut lo = 0usize;
        let mut hi = n; // P has n+1 entries, indices 0..=n
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if self.prefix[mid] <= y {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo.min(n - 1)
    }
}
