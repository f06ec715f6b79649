//! Viewport state: pure computation of visible/render ranges (§4.4,
//! component D).
//!
//! Follows `VirtualState::calculate_visible_range`, kept as a pure function
//! here (it previously lived as a method on the mutable `VirtualState` a
//! Dioxus signal owned) and rewritten against
//! [`crate::size_cache::SizeCache`] instead of summing a `HashMap` on every
//! call.

use crate::item::Range;
use crate::size_cache::SizeCache;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    pub scroll_pos: f64,
    pub container_size: f64,
    pub total_size: f64,
    pub visible_range: Range,
    pub render_range: Range,
    pub is_compressed: bool,
}

impl ViewportState {
    pub fn empty() -> Self {
        Self {
            scroll_pos: 0.0,
            container_size: 0.0,
            total_size: 0.0,
            visible_range: Range::empty(),
            render_range: Range::empty(),
            is_compressed: false,
        }
    }
}

/// `visibleRange.start = indexAtOffset(scrollTop)`
/// `visibleRange.end = indexAtOffset(scrollTop + containerSize)` (spec
/// §4.4). Because [`SizeCache::index_at_offset`] resolves `P[i] <= y` to
/// `i` (not `i - 1`), the index straddling the viewport's bottom edge is
/// already inclusive — no further `+1` is needed to reach §8's
/// worked examples (e.g. `indexAtOffset(512)` with 64px rows lands on
/// index 8, which is exactly scenario 1's expected `visibleRange.end`).
pub fn visible_range(sizes: &SizeCache, scroll_pos: f64, container_size: f64) -> Range {
    let n = sizes.len();
    if n == 0 {
        return Range::empty();
    }
    let start = sizes.index_at_offset(scroll_pos);
    let end = sizes.index_at_offset(scroll_pos + container_size);
    Range::new(start, end).clamp(n - 1)
}

/// `renderRange = clamp(widen(visibleRange, overscan), [0, n-1])`.
pub fn render_range(visible: Range, overscan: usize, total: usize) -> Range {
    if total == 0 {
        return Range::empty();
    }
    visible.widen(overscan).clamp(total - 1)
}

/// Overwrites `state` in place to avoid allocation on every scroll tick
/// (§4.4's "one mutable viewport state").
pub fn recompute(
    state: &mut ViewportState,
    sizes: &SizeCache,
    scroll_pos: f64,
    container_size: f64,
    overscan: usize,
) {
    let total = sizes.len();
    state.scroll_pos = scroll_pos;
    state.container_size = container_size;
    state.total_size = sizes.total_size();
    state.visible_range = visible_range(sizes, scroll_pos, container_size);
    state.render_range = render_range(state.visible_range, overscan, total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ItemSize;

    fn sizes(n: usize, size: f64) -> SizeCache {
        let mut cache = SizeCache::new(ItemSize::Constant(size));
        cache.rebuild(n);
        cache
    }

    #[test]
    fn scenario_static_list_exact_bounds_at_top() {
        // Spec §8 scenario 1: n=10000, height=64, container=512, overscan=3.
        let sizes = sizes(10_000, 64.0);
        let visible = visible_range(&sizes, 0.0, 512.0);
        assert_eq!(visible, Range::new(0, 8));
        let render = render_range(visible, 3, 10_000);
        assert_eq!(render, Range::new(0, 11));
    }

    #[test]
    fn scenario_static_list_exact_bounds_scrolled() {
        let sizes = sizes(10_000, 64.0);
        let visible = visible_range(&sizes, 640.0, 512.0);
        assert_eq!(visible, Range::new(10, 18));
        let render = render_range(visible, 3, 10_000);
        assert_eq!(render, Range::new(7, 21));
    }

    #[test]
    fn render_range_clamps_to_bounds_at_edges() {
        let sizes = sizes(10, 64.0);
        let visible = visible_range(&sizes, 0.0, 64.0 * 3.0);
        let render = render_range(visible, 5, 10);
        assert_eq!(render, Range::new(0, 9));
    }

    #[test]
    fn empty_total_yields_empty_ranges() {
        let sizes = sizes(0, 64.0);
        assert!(visible_range(&sizes, 0.0, 500.0).is_empty());
        assert!(render_range(Range::empty(), 3, 0).is_empty());
    }

    #[test]
    fn every_scroll_position_covers_viewport_with_no_gap() {
        // Property test (§8): union of rendered item boxes covers the
        // viewport with no gap, for arbitrary scroll positions.
        let sizes = sizes(5_000, 23.0);
        let container = 400.0;
        let max_scroll = (sizes.total_size() - container).max(0.0);
        let mut pos = 0.0;
        while pos <= max_scroll {
            let visible = visible_range(&sizes, pos, container);
            assert!(sizes.offset_of(visible.start) <= pos);
            let covered_end = sizes.offset_of(visible.end + 1).min(sizes.total_size());
            assert!(covered_end >= (pos + container).min(sizes.total_size()));
            pos += 37.0;
        }
    }
}
