//! Scale (compression) engine: maps a virtual space larger than the
//! browser's renderable element-height ceiling into an actual, renderable
//! space (§4.6, component E).
//!
//! Follows `components/virtual_list.rs`'s `VirtualState` pattern of an
//! explicit struct recomputed in place — here the state is
//! `CompressionState`, derived purely from [`crate::size_cache::SizeCache`]
//! rather than owned mutable fields, since `active`/`virtualSize`/`ratio`
//! are all pure functions of `totalSize` and `hardLimit` (§3).

use crate::item::Range;
use crate::size_cache::SizeCache;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompressionState {
    pub active: bool,
    pub virtual_size: f64,
    pub actual_size: f64,
    pub ratio: f64,
}

impl CompressionState {
    /// Recompute from `A.totalSize()` and the configured `hard_limit`.
    pub fn compute(actual_size: f64, hard_limit: f64) -> Self {
        if actual_size <= hard_limit {
            Self {
                active: false,
                virtual_size: actual_size,
                actual_size,
                ratio: 1.0,
            }
        } else {
            Self {
                active: true,
                virtual_size: hard_limit,
                actual_size,
                ratio: hard_limit / actual_size,
            }
        }
    }
}

/// First-item-anchor position mapping (§4.6). `scroll_pos` is the
/// user-visible (compressed) scroll position; returns `(anchor_index,
/// anchor_offset)` where `anchor_offset` is where the anchor item's top
/// should be drawn, relative to the viewport top (usually `<= 0`).
pub fn anchor_position(sizes: &SizeCache, compression: &CompressionState, scroll_pos: f64) -> (usize, f64) {
    if !compression.active || compression.ratio == 0.0 {
        return (sizes.index_at_offset(scroll_pos), -(scroll_pos - sizes.offset_of(sizes.index_at_offset(scroll_pos))));
    }
    let actual_scroll = scroll_pos / compression.ratio;
    let anchor_index = sizes.index_at_offset(actual_scroll);
    let anchor_offset = (sizes.offset_of(anchor_index) - actual_scroll).round();
    (anchor_index, anchor_offset)
}

/// Position every index in `range` relative to the anchor: fixed offsets
/// from the anchor eliminate float drift between siblings regardless of
/// compression ratio (§4.6 step 3).
pub fn positions_for_range(
    sizes: &SizeCache,
    anchor_index: usize,
    anchor_offset: f64,
    range: Range,
) -> Vec<(usize, f64)> {
    if range.is_empty() {
        return Vec::new();
    }
    let anchor_base = sizes.offset_of(anchor_index);
    (range.start..=range.end)
        .map(|i| (i, anchor_offset + (sizes.offset_of(i) - anchor_base)))
        .collect()
}

/// Maps a target item index to the compressed scroll position that puts it
/// at the viewport top, the inverse of [`anchor_position`]. Used by
/// `scrollToIndex` when compression is active.
pub fn scroll_pos_for_index(sizes: &SizeCache, compression: &CompressionState, index: usize) -> f64 {
    if !compression.active {
        return sizes.offset_of(index);
    }
    sizes.offset_of(index) * compression.ratio
}

/// Tuning for the wheel lerp, touch momentum, and custom scrollbar the scale
/// engine installs once compression is active (§4.6) — native scroll
/// input no longer maps meaningfully onto the compressed space, so E takes
/// over reading and writing the scroll position entirely.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompressedScrollTuning {
    /// Per-frame interpolation factor toward `targetScrollPos`.
    pub lerp_factor: f64,
    /// Below this distance-to-target, snap instead of continuing to lerp.
    pub snap_threshold_px: f64,
    /// Per-frame multiplicative decay applied to touch-flick momentum.
    pub momentum_deceleration: f64,
    /// Momentum stops once speed drops below this.
    pub momentum_stop_velocity: f64,
    pub scrollbar_min_thumb_px: f64,
    pub scrollbar_autohide_ms: u64,
}

impl Default for CompressedScrollTuning {
    fn default() -> Self {
        Self {
            lerp_factor: 0.65,
            snap_threshold_px: 0.5,
            momentum_deceleration: 0.95,
            momentum_stop_velocity: 0.1,
            scrollbar_min_thumb_px: 30.0,
            scrollbar_autohide_ms: 1000,
        }
    }
}

/// Drives `virtualScrollPos` toward `targetScrollPos` across frames (spec
/// §4.6 "Rationale for interpolation"): a single wheel tick at typical
/// compression ratios (~0.2-0.3) can map to one whole item's height, so a
/// direct 1:1 write would look like scroll position is stalled. Interpolating
/// over ~2 frames restores the perception of motion.
pub struct WheelLerpDriver {
    tuning: CompressedScrollTuning,
    target: f64,
}

impl WheelLerpDriver {
    pub fn new(tuning: CompressedScrollTuning, initial: f64) -> Self {
        Self {
            tuning,
            target: initial,
        }
    }

    /// Accumulates a wheel tick's `deltaY`/`deltaX` into the target,
    /// clamped to `[0, max_scroll]`.
    pub fn accumulate(&mut self, delta: f64, max_scroll: f64) {
        self.target = (self.target + delta).clamp(0.0, max_scroll.max(0.0));
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// One RAF tick: moves `current` toward `self.target`. Returns the new
    /// position, snapping to the target once within `snap_threshold_px`.
    pub fn tick(&self, current: f64) -> f64 {
        let remaining = self.target - current;
        if remaining.abs() <= self.tuning.snap_threshold_px {
            return self.target;
        }
        current + remaining * self.tuning.lerp_factor
    }
}

/// `touchmove` applies `delta = startY - currentY` directly (1:1 with the
/// finger, §4.6 "Touch"); `touchend` computes flick velocity from
/// samples within the last 100ms and starts momentum decay.
pub struct TouchDriver {
    tuning: CompressedScrollTuning,
    start_pos: f64,
    baseline_scroll: f64,
}

impl TouchDriver {
    pub fn start(tuning: CompressedScrollTuning, finger_pos: f64, current_scroll: f64) -> Self {
        Self {
            tuning,
            start_pos: finger_pos,
            baseline_scroll: current_scroll,
        }
    }

    /// 1:1 drag: `delta = startY - currentY` applied directly to the
    /// baseline scroll position recorded at `touchstart`.
    pub fn moved(&self, finger_pos: f64, max_scroll: f64) -> f64 {
        let delta = self.start_pos - finger_pos;
        (self.baseline_scroll + delta).clamp(0.0, max_scroll.max(0.0))
    }

    /// Starts a momentum animation from a flick velocity (px/ms, signed:
    /// positive continues in the drag's forward direction). Requires the
    /// caller to have computed velocity from >= 2 samples in the last 100ms
    /// (enforced by the scroll controller's `VelocityTracker`, §4.6).
    pub fn momentum(&self, initial_velocity: f64) -> Momentum {
        Momentum {
            tuning: self.tuning,
            velocity: initial_velocity,
        }
    }
}

/// Per-frame deceleration `0.95` until `|velocity| < 0.1 px/ms` or an edge is
/// hit (§4.6).
pub struct Momentum {
    tuning: CompressedScrollTuning,
    velocity: f64,
}

impl Momentum {
    /// One frame of momentum scroll: returns `(new_pos, finished)`.
    /// `finished` is true once velocity has decayed below the stop
    /// threshold or `new_pos` hit an edge of `[0, max_scroll]`.
    pub fn tick(&mut self, current: f64, frame_ms: f64, max_scroll: f64) -> (f64, bool) {
        let mut next = current + self.velocity * frame_ms;
        self.velocity *= self.tuning.momentum_deceleration;
        let hit_edge = next <= 0.0 || next >= max_scroll;
        next = next.clamp(0.0, max_scroll.max(0.0));
        let finished = hit_edge || self.velocity.abs() < self.tuning.momentum_stop_velocity;
        (next, finished)
    }
}

/// Sizing/geometry for the custom scrollbar the scale engine installs in
/// place of the native one, which cannot represent compressed space (spec
/// §4.6 "Compressed scrollbar"): the rendered element is smaller than the
/// logical content it stands for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScrollbarGeometry {
    pub thumb_size_px: f64,
    pub thumb_offset_px: f64,
}

/// `thumb_size = max(min_thumb_px, container_size * container_size /
/// virtual_size)` — proportional to `containerSize / virtualSize`, floored
/// at the configured minimum so the thumb never shrinks to an unusably thin
/// sliver at extreme compression ratios.
pub fn scrollbar_geometry(
    tuning: &CompressedScrollTuning,
    container_size: f64,
    virtual_size: f64,
    scroll_pos: f64,
) -> ScrollbarGeometry {
    if virtual_size <= 0.0 {
        return ScrollbarGeometry {
            thumb_size_px: container_size,
            thumb_offset_px: 0.0,
        };
    }
    let proportional = container_size * (container_size / virtual_size);
    let thumb_size_px = proportional.max(tuning.scrollbar_min_thumb_px).min(container_size);
    let max_scroll = (virtual_size - container_size).max(0.0);
    let max_thumb_travel = (container_size - thumb_size_px).max(0.0);
    let thumb_offset_px = if max_scroll <= 0.0 {
        0.0
    } else {
        (scroll_pos / max_scroll) * max_thumb_travel
    };
    ScrollbarGeometry {
        thumb_size_px,
        thumb_offset_px,
    }
}

/// Maps a scrollbar drag back to `virtualScrollPos` (§4.6 (b)).
pub fn scroll_pos_for_thumb_offset(
    tuning: &CompressedScrollTuning,
    container_size: f64,
    virtual_size: f64,
    thumb_offset_px: f64,
) -> f64 {
    let geometry = scrollbar_geometry(tuning, container_size, virtual_size, 0.0);
    let max_thumb_travel = (container_size - geometry.thumb_size_px).max(0.0);
    let max_scroll = (virtual_size - container_size).max(0.0);
    if max_thumb_travel <= 0.0 {
        return 0.0;
    }
    (thumb_offset_px / max_thumb_travel * max_scroll).clamp(0.0, max_scroll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ItemSize;

    #[test]
    fn inactive_below_hard_limit() {
        let state = CompressionState::compute(1_000_000.0, 1.67e7);
        assert!(!state.active);
        assert_eq!(state.virtual_size, 1_000_000.0);
        assert_eq!(state.ratio, 1.0);
    }

    #[test]
    fn scenario_compression_round_trip() {
        // Spec §8 scenario 3: n=1e6, size=64 -> totalSize=6.4e7.
        let mut sizes = SizeCache::new(ItemSize::Constant(64.0));
        sizes.rebuild(1_000_000);
        let state = CompressionState::compute(sizes.total_size(), 1.67e7);
        assert!(state.active);
        assert_eq!(state.virtual_size, 1.67e7);
        assert!((state.ratio - 0.261).abs() < 0.001);

        let target_scroll = scroll_pos_for_index(&sizes, &state, 500_000);
        let (anchor_index, anchor_offset) = anchor_position(&sizes, &state, target_scroll);
        assert_eq!(anchor_index, 500_000);
        assert!(anchor_offset.abs() <= 1.0);
    }

    #[test]
    fn siblings_keep_consistent_gaps_regardless_of_ratio() {
        let mut sizes = SizeCache::new(ItemSize::Constant(40.0));
        sizes.rebuild(1_000_000);
        let state = CompressionState::compute(sizes.total_size(), 1.67e7);
        let positions = positions_for_range(&sizes, 100_000, 0.0, Range::new(100_000, 100_010));
        for w in positions.windows(2) {
            let (_, a) = w[0];
            let (_, b) = w[1];
            assert_eq!(b - a, 40.0);
        }
    }

    #[test]
    fn inactive_mode_positions_match_raw_offsets() {
        let mut sizes = SizeCache::new(ItemSize::Constant(50.0));
        sizes.rebuild(100);
        let state = CompressionState::compute(sizes.total_size(), 1.67e7);
        assert!(!state.active);
        let (anchor_index, anchor_offset) = anchor_position(&sizes, &state, 250.0);
        assert_eq!(anchor_index, 5);
        assert_eq!(anchor_offset, 0.0);
    }

    #[test]
    fn wheel_lerp_converges_toward_target_and_snaps() {
        let mut driver = WheelLerpDriver::new(CompressedScrollTuning::default(), 0.0);
        driver.accumulate(1000.0, 10_000.0);
        assert_eq!(driver.target(), 1000.0);
        let mut pos = 0.0;
        for _ in 0..50 {
            pos = driver.tick(pos);
        }
        assert_eq!(pos, 1000.0);
    }

    #[test]
    fn wheel_lerp_clamps_target_to_max_scroll() {
        let mut driver = WheelLerpDriver::new(CompressedScrollTuning::default(), 0.0);
        driver.accumulate(-500.0, 10_000.0);
        assert_eq!(driver.target(), 0.0);
        driver.accumulate(50_000.0, 10_000.0);
        assert_eq!(driver.target(), 10_000.0);
    }

    #[test]
    fn touch_drag_is_one_to_one_with_finger() {
        let touch = TouchDriver::start(CompressedScrollTuning::default(), 500.0, 200.0);
        // Finger moved up (toward smaller y) by 50px -> scroll forward by 50px.
        assert_eq!(touch.moved(450.0, 10_000.0), 250.0);
    }

    #[test]
    fn momentum_decays_and_eventually_finishes() {
        let touch = TouchDriver::start(CompressedScrollTuning::default(), 0.0, 0.0);
        let mut momentum = touch.momentum(5.0);
        let mut pos = 0.0;
        let mut finished = false;
        for _ in 0..500 {
            let (next, done) = momentum.tick(pos, 16.0, 1_000_000.0);
            pos = next;
            if done {
                finished = true;
                break;
            }
        }
        assert!(finished);
    }

    #[test]
    fn scrollbar_thumb_floors_at_minimum_size() {
        let tuning = CompressedScrollTuning::default();
        let geometry = scrollbar_geometry(&tuning, 800.0, 1.67e7, 0.0);
        assert_eq!(geometry.thumb_size_px, tuning.scrollbar_min_thumb_px);
    }

    #[test]
    fn scrollbar_drag_round_trips_scroll_position() {
        let tuning = CompressedScrollTuning::default();
        let container = 800.0;
        let virtual_size = 1.67e7;
        let max_scroll = virtual_size - container;
        let target = max_scroll * 0.4;
        let geometry = scrollbar_geometry(&tuning, container, virtual_size, target);
        let recovered = scroll_pos_for_thumb_offset(&tuning, container, virtual_size, geometry.thumb_offset_px);
        assert!((recovered - target).abs() < 1.0);
    }
}
