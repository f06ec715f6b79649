//! Scroll controller: event normalization, velocity tracking, idle
//! detection, and the scroll state machine (§4.7, component F).
//!
//! Grounded on `components/virtual_list.rs`'s RAF-throttled `onscroll`
//! handler (the `SCROLL_UPDATE_PENDING` thread-local / `request_animation_frame`
//! pattern this crate's [`crate::raf`] module generalizes) and on
//! `hooks/use_infinite_scroll.rs`'s timer-driven polling idiom. Unlike the
//! teacher, idle detection here is a pure function of timestamps
//! ([`ScrollController::check_idle`]) rather than a real timer owned by
//! this module — the `wasm32` host side drives it with a `gloo_timers`
//! interval, keeping the state machine itself unit-testable off-target.

use instant::Instant;
use serde::{Deserialize, Serialize};

use crate::scheduler::Direction;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Vertical,
    Horizontal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollMode {
    /// Listens to `scroll` on the viewport element; position from
    /// `scrollTop`/`scrollLeft`.
    Element,
    /// Listens to the window; position derived from the viewport element's
    /// rect relative to the window.
    Window,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollState {
    Idle,
    Scrolling,
    /// Smooth-scroll/lerp animation in flight; any user input returns to
    /// `Scrolling` with the current interpolated position (§4.7).
    Animating,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScrollTuning {
    pub idle_timeout_ms: u64,
    /// Ring buffer capacity for velocity samples.
    pub velocity_samples: usize,
    /// Gap above which the sample buffer resets (stale samples discarded).
    pub sample_gap_ms: u64,
    /// Window within which at least 2 samples must fall for velocity to be
    /// considered reliable (§4.3's gate).
    pub reliability_window_ms: u64,
}

impl Default for ScrollTuning {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 150,
            velocity_samples: 5,
            sample_gap_ms: 100,
            reliability_window_ms: 100,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    pos: f64,
    at: Instant,
}

/// Ring buffer of `(position, time)` samples reporting average speed in
/// px/ms (§3, §4.7).
pub struct VelocityTracker {
    samples: Vec<Sample>,
    capacity: usize,
    sample_gap_ms: u64,
    reliability_window_ms: u64,
}

impl VelocityTracker {
    pub fn new(tuning: &ScrollTuning) -> Self {
        Self {
            samples: Vec::with_capacity(tuning.velocity_samples),
            capacity: tuning.velocity_samples,
            sample_gap_ms: tuning.sample_gap_ms,
            reliability_window_ms: tuning.reliability_window_ms,
        }
    }

    pub fn record(&mut self, pos: f64, at: Instant) {
        if let Some(last) = self.samples.last() {
            if at.saturating_duration_since(last.at).as_millis() as u64 > self.sample_gap_ms {
                self.samples.clear();
            }
        }
        self.samples.push(Sample { pos, at });
        if self.samples.len() > self.capacity {
            self.samples.remove(0);
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Average `|delta_pos| / delta_t` across the buffer once >= 2 samples
    /// exist; 0 otherwise.
    pub fn velocity(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let first = self.samples.first().unwrap();
        let last = self.samples.last().unwrap();
        let dt = last.at.saturating_duration_since(first.at).as_millis() as f64;
        if dt <= 0.0 {
            return 0.0;
        }
        (last.pos - first.pos).abs() / dt
    }

    /// Reliable once >= 2 samples exist within the reliability window.
    pub fn is_reliable(&self) -> bool {
        if self.samples.len() < 2 {
            return false;
        }
        let last = self.samples.last().unwrap();
        let within = self
            .samples
            .iter()
            .filter(|s| last.at.saturating_duration_since(s.at).as_millis() as u64 <= self.reliability_window_ms)
            .count();
        within >= 2
    }

    pub fn direction(&self) -> Option<Direction> {
        if self.samples.len() < 2 {
            return None;
        }
        let first = self.samples.first().unwrap();
        let last = self.samples.last().unwrap();
        if (last.pos - first.pos) >= 0.0 {
            Some(Direction::Forward)
        } else {
            Some(Direction::Backward)
        }
    }
}

/// An in-flight smooth-scroll or momentum animation: a target position and
/// an easing/deceleration step function, ticked once per RAF.
pub struct ScrollAnimation {
    pub target: f64,
    pub started_at: Instant,
    pub duration_ms: u64,
}

pub struct ScrollController {
    pub axis: Axis,
    pub mode: ScrollMode,
    tuning: ScrollTuning,
    pub position: f64,
    pub state: ScrollState,
    pub velocity: VelocityTracker,
    last_event_at: Option<Instant>,
    animation: Option<ScrollAnimation>,
}

impl ScrollController {
    pub fn new(axis: Axis, mode: ScrollMode, tuning: ScrollTuning) -> Self {
        Self {
            axis,
            mode,
            velocity: VelocityTracker::new(&tuning),
            tuning,
            position: 0.0,
            state: ScrollState::Idle,
            last_event_at: None,
            animation: None,
        }
    }

    /// A native/user scroll event arrived at `pos` at time `now`. Updates
    /// velocity, transitions `Idle`/`Animating` -> `Scrolling`, and resets
    /// the idle deadline.
    pub fn on_scroll_event(&mut self, pos: f64, now: Instant) {
        self.position = pos;
        self.velocity.record(pos, now);
        self.last_event_at = Some(now);
        self.state = ScrollState::Scrolling;
        // Any user input cancels an in-flight smooth animation, per §4.7.
        self.animation = None;
    }

    /// Pure check, driven by the host's idle poll (real timer on wasm32,
    /// direct call in tests): has `idle_timeout_ms` elapsed with no events?
    /// Transitions `Scrolling` -> `Idle` and returns `true` exactly once
    /// per idle period (edge-triggered).
    pub fn check_idle(&mut self, now: Instant) -> bool {
        if self.state != ScrollState::Scrolling {
            return false;
        }
        let Some(last) = self.last_event_at else {
            return false;
        };
        if now.saturating_duration_since(last).as_millis() as u64 >= self.tuning.idle_timeout_ms {
            self.state = ScrollState::Idle;
            self.velocity.reset();
            true
        } else {
            false
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == ScrollState::Idle
    }

    /// Programmatic `scrollTo(pos)`: sets position directly, no animation.
    pub fn scroll_to(&mut self, pos: f64, now: Instant) {
        self.animation = None;
        self.on_scroll_event(pos, now);
    }

    /// Starts a duration-bounded smooth scroll. Cancellable; cancels itself
    /// on any user input (handled by [`Self::on_scroll_event`]).
    pub fn scroll_to_smooth(&mut self, target: f64, duration_ms: u64, now: Instant) {
        self.state = ScrollState::Animating;
        self.animation = Some(ScrollAnimation {
            target,
            started_at: now,
            duration_ms,
        });
    }

    /// Aborts an in-flight smooth animation at its current interpolated
    /// position.
    pub fn cancel_scroll(&mut self, now: Instant) {
        if let Some(anim) = self.animation.take() {
            self.position = self.interpolated_position(&anim, now);
            self.state = ScrollState::Idle;
            self.last_event_at = Some(now);
        }
    }

    fn interpolated_position(&self, anim: &ScrollAnimation, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(anim.started_at).as_millis() as f64;
        let t = (elapsed / anim.duration_ms.max(1) as f64).clamp(0.0, 1.0);
        // ease-out cubic, a common easing shape for scroll-to-index.
        let eased = 1.0 - (1.0 - t).powi(3);
        self.position + (anim.target - self.position) * eased
    }

    /// One animation tick (called from a RAF callback on wasm32). Returns
    /// the new position if an animation is in flight and advances/ends it.
    pub fn tick_animation(&mut self, now: Instant) -> Option<f64> {
        let anim = self.animation.as_ref()?;
        let pos = self.interpolated_position(anim, now);
        let elapsed = now.saturating_duration_since(anim.started_at).as_millis() as u64;
        self.position = pos;
        if elapsed >= anim.duration_ms {
            self.animation = None;
            self.state = ScrollState::Idle;
            self.last_event_at = Some(now);
        }
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// All timestamps in a test are offsets from one shared base, so
    /// deltas are exact regardless of how long the test itself takes to run.
    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn velocity_zero_with_fewer_than_two_samples() {
        let base = Instant::now();
        let mut v = VelocityTracker::new(&ScrollTuning::default());
        v.record(0.0, at(base, 0));
        assert_eq!(v.velocity(), 0.0);
        assert!(!v.is_reliable());
    }

    #[test]
    fn velocity_is_average_speed_over_buffer() {
        let base = Instant::now();
        let mut v = VelocityTracker::new(&ScrollTuning::default());
        v.record(0.0, at(base, 0));
        v.record(100.0, at(base, 10));
        assert_eq!(v.velocity(), 10.0);
        assert!(v.is_reliable());
    }

    #[test]
    fn gap_over_threshold_resets_buffer() {
        let base = Instant::now();
        let mut v = VelocityTracker::new(&ScrollTuning::default());
        v.record(0.0, at(base, 0));
        v.record(1000.0, at(base, 500)); // gap > 100ms => buffer reset, baseline 0
        assert_eq!(v.velocity(), 0.0);
    }

    #[test]
    fn state_machine_idle_to_scrolling_to_idle() {
        let base = Instant::now();
        let mut ctl = ScrollController::new(Axis::Vertical, ScrollMode::Element, ScrollTuning::default());
        assert_eq!(ctl.state, ScrollState::Idle);
        ctl.on_scroll_event(10.0, at(base, 0));
        assert_eq!(ctl.state, ScrollState::Scrolling);
        assert!(!ctl.check_idle(at(base, 50)));
        assert!(ctl.check_idle(at(base, 200)));
        assert_eq!(ctl.state, ScrollState::Idle);
    }

    #[test]
    fn user_input_cancels_animation() {
        let base = Instant::now();
        let mut ctl = ScrollController::new(Axis::Vertical, ScrollMode::Element, ScrollTuning::default());
        ctl.scroll_to_smooth(1000.0, 300, at(base, 0));
        assert_eq!(ctl.state, ScrollState::Animating);
        ctl.on_scroll_event(42.0, at(base, 10));
        assert_eq!(ctl.state, ScrollState::Scrolling);
        assert_eq!(ctl.position, 42.0);
    }

    #[test]
    fn cancel_scroll_stops_at_current_interpolated_position() {
        let base = Instant::now();
        let mut ctl = ScrollController::new(Axis::Vertical, ScrollMode::Element, ScrollTuning::default());
        ctl.position = 0.0;
        ctl.scroll_to_smooth(100.0, 100, at(base, 0));
        ctl.cancel_scroll(at(base, 50));
        assert_eq!(ctl.state, ScrollState::Idle);
        assert!(ctl.position > 0.0 && ctl.position < 100.0);
    }

    #[test]
    fn tick_animation_reaches_target_at_duration() {
        let base = Instant::now();
        let mut ctl = ScrollController::new(Axis::Vertical, ScrollMode::Element, ScrollTuning::default());
        ctl.scroll_to_smooth(500.0, 100, at(base, 0));
        let pos = ctl.tick_animation(at(base, 100)).unwrap();
        assert_eq!(pos, 500.0);
        assert_eq!(ctl.state, ScrollState::Idle);
    }
}
