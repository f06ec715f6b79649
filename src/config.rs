//! Construction config (§6).
//!
//! The numeric/behavioral knobs are split into [`EngineOptions`], a plain
//! `serde`-derived struct with a hand-written `Default`, the same shape the
//! teacher uses for `AppSettings` in `settings_store.rs`. The remaining
//! construction inputs ([`EngineConfig`]: container element, size/template
//! closures, inline items, adapter) aren't serializable and live alongside
//! it rather than inside it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scheduler::SchedulerTuning;
use crate::selection::SelectionMode;
use crate::sparse_store::StoreTuning;

/// `HARD_LIMIT`: the platform's maximum renderable element extent, §4.6
/// and §9. Chromium/Firefox/WebKit all cap an element's height/width well
/// below `2^31`px; ~16.7M is the smallest of the three and the safe default.
/// Exposed as a config knob (not a hardcoded constant) per §9's note that it
/// is "a browser-engine detail" callers may need to override for a specific
/// target or a future engine with a different limit.
pub const DEFAULT_HARD_LIMIT: f64 = 1.67e7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    Start,
    Center,
    End,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct EngineOptions {
    /// Extra items rendered beyond the visible range, both sides.
    pub overscan: usize,
    /// Horizontal axis instead of vertical.
    pub horizontal: bool,
    /// Chat-style: start scrolled to end, auto-stick on append.
    pub reverse: bool,
    /// Whether the scale engine's own wheel handler is installed when
    /// compression is active.
    pub wheel: bool,
    /// Idle timer duration; see [`crate::scroll`].
    pub idle_timeout_ms: u64,
    /// Browser element-height ceiling that activates the scale engine.
    pub hard_limit: f64,
    pub selection_mode: SelectionMode,
    pub scheduler: SchedulerTuning,
    pub store: StoreTuning,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            overscan: 3,
            horizontal: false,
            reverse: false,
            wheel: true,
            idle_timeout_ms: 150,
            hard_limit: DEFAULT_HARD_LIMIT,
            selection_mode: SelectionMode::None,
            scheduler: SchedulerTuning::default(),
            store: StoreTuning::default(),
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.store.chunk_width == 0 {
            return Err(Error::Config(
                "store.chunk_width must be non-zero".to_string(),
            ));
        }
        if self.scheduler.preload_velocity >= self.scheduler.cancel_velocity {
            return Err(Error::Config(format!(
                "scheduler.preload_velocity ({}) must be less than scheduler.cancel_velocity ({})",
                self.scheduler.preload_velocity, self.scheduler.cancel_velocity
            )));
        }
        if matches!(self.selection_mode, SelectionMode::None) {
            // nothing further to validate for the no-selection case; initial
            // selection ids (if any) are validated by the caller against
            // this mode in `crate::selection::Selection::new`.
        }
        Ok(())
    }
}

/// Declared per-item size: a constant, or a pure function of index.
/// A boxed closure rather than a trait object over a generic, matching how
/// `components/virtual_list.rs`'s `item_content: fn(Rc<T>, usize) -> Element`
/// prop is a bare function pointer where possible — but sizes commonly close over captured
/// per-row metadata (e.g. column widths), so `Fn` rather than `fn`.
pub enum ItemSize {
    Constant(f64),
    Dynamic(Box<dyn Fn(usize) -> f64>),
}

impl ItemSize {
    pub fn size_of(&self, index: usize) -> f64 {
        match self {
            ItemSize::Constant(s) => *s,
            ItemSize::Dynamic(f) => f(index),
        }
    }
}

impl std::fmt::Debug for ItemSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemSize::Constant(s) => write!(f, "ItemSize::Constant({s})"),
            ItemSize::Dynamic(_) => write!(f, "ItemSize::Dynamic(..)"),
        }
    }
}
