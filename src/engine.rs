//! The engine loop and public API surface (§4.8, §6, component H).
//!
//! Grounded on `components/virtual_list.rs`'s top-level component: it is the
//! one place that owns every other component's state and drives them from a
//! single RAF-throttled loop. Here that loop is [`Engine::tick`], called by
//! the host once per frame; everything else in this module is the
//! synchronous public API a caller invokes between ticks. Unlike the
//! teacher's component, none of this owns a Dioxus `Signal` — state lives in
//! plain fields, and `tick`/the mutation methods decide when to re-render,
//! matching this crate's "engine as a library, not a framework binding"
//! scope (§1).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::rc::Rc;

use async_trait::async_trait;
use instant::Instant;
use serde::{Deserialize, Serialize};

use crate::compression::{
    self, CompressedScrollTuning, CompressionState, Momentum, ScrollbarGeometry, TouchDriver,
    WheelLerpDriver,
};
use crate::config::{Align, EngineOptions, ItemSize};
use crate::error::Result;
use crate::events::{Event, EventBus, EventKind, Subscription};
use crate::item::{ItemSlot, ListItem, PlaceholderKey, Range};
use crate::recycler::{Host, Recycler, TemplateCtx};
use crate::scheduler::{Adapter, Direction, ReadRequest, ReadResponse, Scheduler};
use crate::scroll::{Axis, ScrollController, ScrollMode, ScrollTuning};
use crate::selection::{Selection, SelectionMode};
use crate::size_cache::SizeCache;
use crate::sparse_store::SparseStore;
use crate::viewport;
use crate::viewport::ViewportState;

/// Adapter used when a caller supplies items inline and never configures
/// one (§4.3 names the adapter optional). Reads always return nothing
/// further, so `loadMore`/`ensureRange` are harmless no-ops rather than
/// requiring callers to write a throwaway adapter themselves.
pub struct NoAdapter<T>(PhantomData<T>);

impl<T> Default for NoAdapter<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait(?Send)]
impl<T: ListItem> Adapter<T> for NoAdapter<T> {
    async fn read(&self, _request: ReadRequest) -> std::result::Result<ReadResponse<T>, String> {
        Ok(ReadResponse {
            items: Vec::new(),
            total: None,
            has_more: Some(false),
            cursor: None,
        })
    }
}

/// `getScrollSnapshot()`/`restoreScroll()` payload (§4.7, §6): the
/// index currently at the viewport top plus the pixel offset into it, so a
/// caller can persist scroll position across a remount without depending on
/// raw pixel coordinates that a changed container size would invalidate.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScrollSnapshot {
    pub index: usize,
    pub offset_in_item: f64,
}

/// Everything [`Engine::create`] needs that doesn't belong in the
/// serializable [`EngineOptions`]: the host abstraction, the per-item
/// template/size closures, and optionally inline data or an adapter.
pub struct EngineConfig<T: ListItem, H: Host, A: Adapter<T> = NoAdapter<T>> {
    pub host: H,
    /// Viewport extent along the scrolling axis, in pixels.
    pub container_size: f64,
    pub size: ItemSize,
    #[allow(clippy::type_complexity)]
    pub template: Box<dyn Fn(&ItemSlot<T>, usize, &TemplateCtx) -> H::Node>,
    pub items: Option<Vec<T>>,
    pub adapter: Option<Rc<A>>,
    pub options: EngineOptions,
}

/// Owns every other component and drives them from one RAF-throttled loop.
/// Single-threaded by construction (§5) — every shared field is
/// `Rc<RefCell<_>>`, never `Arc<Mutex<_>>`.
pub struct Engine<T: ListItem, H: Host, A: Adapter<T> = NoAdapter<T>> {
    options: EngineOptions,
    size_cache: SizeCache,
    store: Rc<RefCell<SparseStore<T>>>,
    scheduler: Scheduler<T>,
    adapter: Option<Rc<A>>,
    scroll: ScrollController,
    compression: CompressionState,
    viewport: ViewportState,
    recycler: Recycler<H>,
    selection: Selection<T::Id>,
    events: EventBus<T>,
    #[allow(clippy::type_complexity)]
    template: Box<dyn Fn(&ItemSlot<T>, usize, &TemplateCtx) -> H::Node>,
    reverse: bool,
    container_size: f64,
    id_index: HashMap<T::Id, usize>,
    /// Bumped on every direct store mutation; folded into the recycler's
    /// `BoundKey` so a row whose data changed in place (`updateItem`)
    /// re-runs its template even though its bound index didn't move and `T`
    /// isn't required to implement `PartialEq` (§9 design note).
    data_epoch: u64,
    destroyed: bool,
    compressed_tuning: CompressedScrollTuning,
    wheel_driver: WheelLerpDriver,
    touch_driver: Option<TouchDriver>,
    momentum: Option<Momentum>,
    last_range: Range,
}

impl<T: ListItem, H: Host, A: Adapter<T> + 'static> Engine<T, H, A> {
    /// `create(config)` (§6): validates options, seeds the store from
    /// any inline `items`, kicks off `loadInitial` if an adapter was given,
    /// and renders the first frame. Fails only for genuinely invalid config
    /// (§7.1) — an empty/absent data source is not an error.
    pub fn create(config: EngineConfig<T, H, A>) -> Result<Self> {
        config.options.validate()?;

        let store = Rc::new(RefCell::new(SparseStore::new(config.options.store)));
        let initial_total = config.items.as_ref().map(Vec::len).unwrap_or(0);
        if let Some(items) = config.items {
            store.borrow_mut().set_total(initial_total);
            store
                .borrow_mut()
                .set_range(0, items.into_iter().map(ItemSlot::Loaded));
        }

        let mut size_cache = SizeCache::new(config.size);
        size_cache.rebuild(initial_total);

        let scroll_tuning = ScrollTuning {
            idle_timeout_ms: config.options.idle_timeout_ms,
            ..ScrollTuning::default()
        };
        let axis = if config.options.horizontal {
            Axis::Horizontal
        } else {
            Axis::Vertical
        };
        let scroll = ScrollController::new(axis, ScrollMode::Element, scroll_tuning);

        let id_prefix = format!("vlist-{}", uuid::Uuid::new_v4());
        let overscan = config.options.overscan;
        let row_estimate = if initial_total > 0 {
            size_cache.size_of(0).max(1.0)
        } else {
            1.0
        };
        let visible_estimate = if config.container_size > 0.0 {
            (config.container_size / row_estimate).ceil() as usize
        } else {
            10
        };
        let pool_capacity = (visible_estimate + 2 * overscan).max(1);
        let recycler = Recycler::new(config.host, id_prefix, pool_capacity);

        let scheduler = Scheduler::new(store.clone(), config.options.scheduler);

        let mut engine = Self {
            compression: CompressionState::compute(size_cache.total_size(), config.options.hard_limit),
            options: config.options,
            size_cache,
            store,
            scheduler,
            adapter: config.adapter,
            scroll,
            viewport: ViewportState::empty(),
            recycler,
            selection: Selection::new(config.options.selection_mode, []),
            events: EventBus::new(),
            template: config.template,
            reverse: config.options.reverse,
            container_size: config.container_size,
            id_index: HashMap::new(),
            data_epoch: 0,
            destroyed: false,
            compressed_tuning: CompressedScrollTuning::default(),
            wheel_driver: WheelLerpDriver::new(CompressedScrollTuning::default(), 0.0),
            touch_driver: None,
            momentum: None,
            last_range: Range::empty(),
        };

        engine.rebuild_id_index();
        if engine.reverse {
            engine.scroll.position = engine.max_scroll_pos();
        }
        if let Some(adapter) = engine.adapter.clone() {
            engine.scheduler.load_initial(&adapter);
            engine.drain_scheduler_events();
        }
        engine.refresh(false);
        Ok(engine)
    }

    // ---- data mutation (§6) ----------------------------------------

    /// `setItems(items)`: replaces the entire data source with inline data,
    /// discarding anything an adapter previously fetched.
    pub fn set_items(&mut self, items: Vec<T>) {
        if self.destroyed {
            return;
        }
        let n = items.len();
        let tuning = self.store.borrow().tuning();
        let mut store = SparseStore::new(tuning);
        store.set_total(n);
        store.set_range(0, items.into_iter().map(ItemSlot::Loaded));
        *self.store.borrow_mut() = store;
        self.size_cache.rebuild(n);
        self.rebuild_id_index();
        self.data_epoch += 1;
        self.scheduler.set_tail(n);
        self.scroll.position = if self.reverse {
            self.max_scroll_pos()
        } else {
            self.scroll.position.min(self.max_scroll_pos())
        };
        self.refresh(false);
    }

    /// `appendItems(items)`: grows the data source at the tail. In `reverse`
    /// mode, auto-sticks to the bottom if the viewport was already there
    /// before the append (§4.7's chat use case, §8 scenario 4).
    pub fn append_items(&mut self, items: Vec<T>) {
        if self.destroyed || items.is_empty() {
            return;
        }
        let was_at_bottom = self.reverse && self.is_at_bottom();
        let offset = self.store.borrow().total();
        let n_new = items.len();
        self.store
            .borrow_mut()
            .set_range(offset, items.into_iter().map(ItemSlot::Loaded));
        let new_total = offset + n_new;
        self.size_cache.rebuild(new_total);
        self.rebuild_id_index();
        self.data_epoch += 1;
        self.scheduler.set_tail(new_total);
        if was_at_bottom {
            self.scroll.position = self.max_scroll_pos();
        }
        self.refresh(false);
    }

    /// `prependItems(items)`: grows the data source at the head, shifting
    /// every existing index up. `reverse` mode compensates the scroll
    /// position by the prepended extent so visible content doesn't jump
    /// (§8 scenario 5). The sparse store has no native "shift"
    /// operation, so this rebuilds it; fine for the bounded history sizes
    /// the `reverse` chat use case implies, not meant for bulk ingestion.
    pub fn prepend_items(&mut self, items: Vec<T>) {
        if self.destroyed || items.is_empty() {
            return;
        }
        let shift = items.len();
        let old_total = self.store.borrow().total();
        let tuning = self.store.borrow().tuning();
        let mut shifted = SparseStore::new(tuning);
        shifted.set_total(old_total + shift);
        {
            let old = self.store.borrow();
            for idx in 0..old_total {
                if let Some(slot) = old.peek(idx).cloned() {
                    shifted.set(idx + shift, slot);
                }
            }
        }
        for (k, item) in items.into_iter().enumerate() {
            shifted.set(k, ItemSlot::Loaded(item));
        }
        *self.store.borrow_mut() = shifted;
        self.size_cache.rebuild(old_total + shift);
        self.rebuild_id_index();
        self.data_epoch += 1;
        self.scheduler.set_tail(old_total + shift);
        if self.reverse {
            self.scroll.position += self.size_cache.offset_of(shift);
        }
        self.refresh(false);
    }

    /// `updateItem(id, patch)`: mutates a loaded item in place. A no-op if
    /// `id` isn't currently resolvable to a loaded index (§7.4:
    /// operations on unknown ids are silently ignored rather than erroring).
    pub fn update_item(&mut self, id: &T::Id, patch: impl FnOnce(&mut T)) {
        if self.destroyed {
            return;
        }
        let Some(&idx) = self.id_index.get(id) else {
            return;
        };
        let mut store = self.store.borrow_mut();
        let current = match store.get(idx) {
            Some(ItemSlot::Loaded(item)) => item.clone(),
            _ => return,
        };
        drop(store);
        let mut updated = current;
        patch(&mut updated);
        let new_id = updated.id();
        self.store.borrow_mut().set(idx, ItemSlot::Loaded(updated));
        if &new_id != id {
            self.id_index.remove(id);
            self.id_index.insert(new_id, idx);
        }
        self.data_epoch += 1;
        self.refresh(false);
    }

    /// `removeItem(id)`: drops one item and shifts everything after it down
    /// by one. Also forgets the id from the current selection.
    pub fn remove_item(&mut self, id: &T::Id) {
        if self.destroyed {
            return;
        }
        let Some(&removed_index) = self.id_index.get(id) else {
            return;
        };
        let old_total = self.store.borrow().total();
        if old_total == 0 {
            return;
        }
        let tuning = self.store.borrow().tuning();
        let mut shifted = SparseStore::new(tuning);
        shifted.set_total(old_total - 1);
        {
            let old = self.store.borrow();
            for idx in 0..old_total {
                if idx == removed_index {
                    continue;
                }
                if let Some(slot) = old.peek(idx).cloned() {
                    let new_idx = if idx < removed_index { idx } else { idx - 1 };
                    shifted.set(new_idx, slot);
                }
            }
        }
        *self.store.borrow_mut() = shifted;
        self.size_cache.rebuild(old_total - 1);
        self.rebuild_id_index();
        self.data_epoch += 1;
        self.scheduler.set_tail(old_total - 1);
        if self.selection.forget(id) {
            self.events.emit(Event::SelectionChange {
                selected: self.selection.get_selected(),
            });
        }
        self.scroll.position = self.scroll.position.min(self.max_scroll_pos());
        self.refresh(false);
    }

    // ---- reads (§6) --------------------------------------------------

    pub fn get_item(&mut self, index: usize) -> Option<ItemSlot<T>> {
        self.store.borrow_mut().get(index).cloned()
    }

    pub fn get_item_by_id(&mut self, id: &T::Id) -> Option<ItemSlot<T>> {
        let idx = *self.id_index.get(id)?;
        self.get_item(idx)
    }

    pub fn get_index_by_id(&self, id: &T::Id) -> Option<usize> {
        self.id_index.get(id).copied()
    }

    pub fn total(&self) -> usize {
        self.size_cache.len()
    }

    // ---- selection (§6, supplemented per design note §B) ------------

    pub fn select(&mut self, ids: impl IntoIterator<Item = T::Id>) {
        if self.destroyed {
            return;
        }
        if self.selection.select(ids) {
            self.events.emit(Event::SelectionChange {
                selected: self.selection.get_selected(),
            });
            self.data_epoch += 1;
            self.refresh(false);
        }
    }

    pub fn get_selected(&self) -> Vec<T::Id> {
        self.selection.get_selected()
    }

    pub fn clear_selection(&mut self) {
        if self.destroyed {
            return;
        }
        if self.selection.clear() {
            self.events.emit(Event::SelectionChange { selected: Vec::new() });
            self.data_epoch += 1;
            self.refresh(false);
        }
    }

    // ---- scroll (§4.7, §6) --------------------------------------------

    pub fn get_scroll_position(&self) -> f64 {
        self.scroll.position
    }

    pub fn cancel_scroll(&mut self) {
        if self.destroyed {
            return;
        }
        self.scroll.cancel_scroll(Instant::now());
    }

    pub fn scroll_to_index(&mut self, index: usize, align: Align) {
        if self.destroyed || self.size_cache.len() == 0 {
            return;
        }
        let target = self.scroll_target_for(index, align);
        self.scroll.scroll_to(target, Instant::now());
        self.refresh(false);
    }

    pub fn scroll_to_index_smooth(&mut self, index: usize, align: Align, duration_ms: u64) {
        if self.destroyed || self.size_cache.len() == 0 {
            return;
        }
        let target = self.scroll_target_for(index, align);
        self.scroll.scroll_to_smooth(target, duration_ms, Instant::now());
    }

    fn scroll_target_for(&self, index: usize, align: Align) -> f64 {
        let index = index.min(self.size_cache.len().saturating_sub(1));
        let item_top = self.size_cache.offset_of(index);
        let item_size = self.size_cache.size_of(index);
        let actual_target = match align {
            Align::Start => item_top,
            Align::Center => item_top - (self.container_size - item_size) / 2.0,
            Align::End => item_top - (self.container_size - item_size),
        };
        let actual_max = (self.size_cache.total_size() - self.container_size).max(0.0);
        let actual_target = actual_target.clamp(0.0, actual_max);
        let compressed_target = if self.compression.active {
            actual_target * self.compression.ratio
        } else {
            actual_target
        };
        compressed_target.clamp(0.0, self.max_scroll_pos())
    }

    pub fn get_scroll_snapshot(&self) -> ScrollSnapshot {
        let n = self.size_cache.len();
        if n == 0 {
            return ScrollSnapshot {
                index: 0,
                offset_in_item: 0.0,
            };
        }
        let actual_scroll = self.actual_scroll_pos();
        let index = self.size_cache.index_at_offset(actual_scroll);
        let offset_in_item = (actual_scroll - self.size_cache.offset_of(index)).max(0.0);
        ScrollSnapshot { index, offset_in_item }
    }

    /// `restoreScroll(snapshot)`: per design note §B's resolution of the
    /// spec's open question, `offsetInItem` is clamped into `[0,
    /// sizeOf(index))` rather than trusted verbatim — a snapshot captured
    /// against a since-changed size function could otherwise land the
    /// viewport mid-air past an item's actual extent.
    pub fn restore_scroll(&mut self, snapshot: ScrollSnapshot) {
        if self.destroyed {
            return;
        }
        let n = self.size_cache.len();
        if n == 0 {
            return;
        }
        let index = snapshot.index.min(n - 1);
        let size = self.size_cache.size_of(index);
        let offset_in_item = snapshot.offset_in_item.clamp(0.0, size.max(0.0));
        let actual_target = self.size_cache.offset_of(index) + offset_in_item;
        let compressed_target = if self.compression.active {
            actual_target * self.compression.ratio
        } else {
            actual_target
        };
        self.scroll
            .scroll_to(compressed_target.clamp(0.0, self.max_scroll_pos()), Instant::now());
        self.refresh(false);
    }

    pub fn get_scroll_snapshot_json(&self) -> String {
        serde_json::to_string(&self.get_scroll_snapshot()).unwrap_or_default()
    }

    pub fn restore_scroll_json(&mut self, json: &str) -> bool {
        match serde_json::from_str::<ScrollSnapshot>(json) {
            Ok(snapshot) => {
                self.restore_scroll(snapshot);
                true
            }
            Err(_) => false,
        }
    }

    pub fn resize(&mut self, container_size: f64) {
        if self.destroyed {
            return;
        }
        self.container_size = container_size;
        self.events.emit(Event::Resize { container_size });
        self.refresh(false);
    }

    // ---- input surface the wasm32 mount glue wires to real DOM events -----

    /// Native `scroll` events (uncompressed mode only — once the scale
    /// engine is active, native scroll is bypassed entirely, §4.6).
    pub fn on_native_scroll(&mut self, pos: f64, now: Instant) {
        if self.destroyed || self.compression.active {
            return;
        }
        self.scroll.on_scroll_event(pos, now);
    }

    /// `wheel` events while compression is active: accumulates into the
    /// lerp target; [`Engine::tick`] advances `scroll.position` toward it
    /// every frame (§4.6 "Wheel").
    pub fn on_wheel(&mut self, delta: f64) {
        if self.destroyed || !self.compression.active || !self.options.wheel {
            return;
        }
        let max_scroll = self.max_scroll_pos();
        self.wheel_driver.accumulate(delta, max_scroll);
    }

    pub fn on_touch_start(&mut self, finger_pos: f64) {
        if self.destroyed || !self.compression.active {
            return;
        }
        self.momentum = None;
        self.touch_driver = Some(TouchDriver::start(
            self.compressed_tuning,
            finger_pos,
            self.scroll.position,
        ));
    }

    pub fn on_touch_move(&mut self, finger_pos: f64, now: Instant) {
        if self.destroyed || !self.compression.active {
            return;
        }
        let max_scroll = self.max_scroll_pos();
        if let Some(driver) = &self.touch_driver {
            let pos = driver.moved(finger_pos, max_scroll);
            self.scroll.on_scroll_event(pos, now);
        }
    }

    pub fn on_touch_end(&mut self, flick_velocity: f64) {
        if self.destroyed || !self.compression.active {
            return;
        }
        if let Some(driver) = self.touch_driver.take() {
            self.momentum = Some(driver.momentum(flick_velocity));
        }
    }

    pub fn scrollbar_geometry(&self) -> ScrollbarGeometry {
        compression::scrollbar_geometry(
            &self.compressed_tuning,
            self.container_size,
            self.compression.virtual_size,
            self.scroll.position,
        )
    }

    pub fn scroll_to_thumb_offset(&mut self, thumb_offset_px: f64) {
        if self.destroyed || !self.compression.active {
            return;
        }
        let target = compression::scroll_pos_for_thumb_offset(
            &self.compressed_tuning,
            self.container_size,
            self.compression.virtual_size,
            thumb_offset_px,
        );
        self.scroll.scroll_to(target, Instant::now());
        self.refresh(false);
    }

    // ---- engine loop (§4.8, component H) ------------------------------

    /// Called once per `requestAnimationFrame` by the host. Advances any
    /// in-flight smooth-scroll/momentum/wheel-lerp animation, runs idle
    /// detection (flushing a velocity-deferred fetch once scrolling settles,
    /// §4.3), drains the scheduler's completed-fetch events, and
    /// re-renders if the render range or data changed.
    pub fn tick(&mut self, now: Instant) {
        if self.destroyed {
            return;
        }
        self.recompute_compression();

        if self.compression.active {
            if let Some(momentum) = &mut self.momentum {
                let max_scroll = self.max_scroll_pos();
                let (pos, finished) = momentum.tick(self.scroll.position, 16.0, max_scroll);
                self.scroll.on_scroll_event(pos, now);
                if finished {
                    self.momentum = None;
                }
            } else if self.touch_driver.is_none() {
                let next = self.wheel_driver.tick(self.scroll.position);
                if next != self.scroll.position {
                    self.scroll.on_scroll_event(next, now);
                }
            }
        } else {
            self.scroll.tick_animation(now);
        }

        if self.scroll.check_idle(now) {
            if let Some(adapter) = self.adapter.clone() {
                self.scheduler.flush_pending(&adapter);
            }
        }

        self.drain_scheduler_events();
        self.refresh(true);
    }

    fn recompute_compression(&mut self) {
        self.compression = CompressionState::compute(self.size_cache.total_size(), self.options.hard_limit);
    }

    fn max_scroll_pos(&self) -> f64 {
        if self.compression.active {
            (self.compression.virtual_size - self.container_size).max(0.0)
        } else {
            (self.size_cache.total_size() - self.container_size).max(0.0)
        }
    }

    fn actual_scroll_pos(&self) -> f64 {
        if self.compression.active {
            self.scroll.position / self.compression.ratio.max(f64::MIN_POSITIVE)
        } else {
            self.scroll.position
        }
    }

    fn is_at_bottom(&self) -> bool {
        (self.scroll.position - self.max_scroll_pos()).abs() <= 1.0
    }

    fn rebuild_id_index(&mut self) {
        self.id_index.clear();
        let store = self.store.borrow();
        for range in store.loaded_ranges() {
            for idx in range.start..=range.end {
                if let Some(ItemSlot::Loaded(item)) = store.peek(idx) {
                    self.id_index.insert(item.id(), idx);
                }
            }
        }
    }

    fn rescan_id_index_range(&mut self, range: Range) {
        if range.is_empty() {
            return;
        }
        let store = self.store.borrow();
        let n = store.total();
        for idx in range.start..=range.end.min(n.saturating_sub(1)) {
            if let Some(ItemSlot::Loaded(item)) = store.peek(idx) {
                self.id_index.insert(item.id(), idx);
            }
        }
    }

    fn drain_scheduler_events(&mut self) {
        use crate::scheduler::SchedulerEvent;
        for event in self.scheduler.drain_events() {
            match event {
                SchedulerEvent::LoadStart { context, range } => {
                    self.events.emit(Event::LoadStart { context, range });
                }
                SchedulerEvent::LoadEnd { context, range } => {
                    self.size_cache.rebuild(self.store.borrow().total());
                    self.rescan_id_index_range(range);
                    self.data_epoch += 1;
                    self.events.emit(Event::LoadEnd { context, range });
                }
                SchedulerEvent::Error { context, message } => {
                    self.events.emit(Event::Error { context, message });
                }
            }
        }
    }

    /// Recomputes the viewport, asks the scheduler to ensure data for the
    /// new render range, and re-renders via the recycler. `emit_scroll`
    /// controls whether a `scroll` event is fired — only [`Engine::tick`]
    /// (an actual scroll frame) does; data-mutation methods re-render
    /// without pretending a scroll happened.
    fn refresh(&mut self, emit_scroll: bool) {
        if self.destroyed {
            return;
        }
        self.recompute_compression();

        let actual_scroll_pos = self.actual_scroll_pos();
        viewport::recompute(
            &mut self.viewport,
            &self.size_cache,
            actual_scroll_pos,
            self.container_size,
            self.options.overscan,
        );
        self.viewport.is_compressed = self.compression.active;

        if let Some(adapter) = self.adapter.clone() {
            let velocity = self.scroll.velocity.velocity();
            let reliable = self.scroll.velocity.is_reliable();
            let direction = self.scroll.velocity.direction().unwrap_or(Direction::Forward);
            self.scheduler
                .on_scroll_tick(&adapter, self.viewport.render_range, velocity, reliable, direction);
            self.drain_scheduler_events();
        }

        let range = self.viewport.render_range;
        let total = self.size_cache.len();
        let epoch = self.data_epoch;
        let horizontal = self.options.horizontal;

        let (anchor_index, anchor_offset) = if self.compression.active {
            compression::anchor_position(&self.size_cache, &self.compression, self.scroll.position)
        } else {
            (0, 0.0)
        };

        let sizes = &self.size_cache;
        let compression_active = self.compression.active;
        let anchor_base = sizes.offset_of(anchor_index);
        let position_fn = move |i: usize| {
            if compression_active {
                anchor_offset + (sizes.offset_of(i) - anchor_base)
            } else {
                sizes.offset_of(i)
            }
        };

        let store = self.store.clone();
        let get_fn = move |i: usize| {
            store
                .borrow_mut()
                .get(i)
                .cloned()
                .unwrap_or_else(|| ItemSlot::Placeholder(PlaceholderKey { index: i, known_id: None }))
        };

        let selected_indices: HashSet<usize> = self
            .selection
            .get_selected()
            .iter()
            .filter_map(|id| self.id_index.get(id).copied())
            .collect();
        let is_selected_fn = move |i: usize| selected_indices.contains(&i);

        let template = &self.template;
        let template_fn = move |item: &ItemSlot<T>, idx: usize, ctx: &TemplateCtx| template(item, idx, ctx);

        self.recycler
            .render(range, total, epoch, get_fn, template_fn, is_selected_fn, position_fn, horizontal);

        if range != self.last_range {
            self.last_range = range;
            self.events.emit(Event::RangeChange { range });
        }

        if emit_scroll {
            self.events.emit(Event::Scroll {
                scroll_pos: self.scroll.position,
                direction: self.scroll.velocity.direction(),
                velocity: self.scroll.velocity.velocity(),
            });
        }
    }

    // ---- events (§4.8, §9) --------------------------------------------

    pub fn on(&self, kind: EventKind, handler: impl FnMut(&Event<T>) + 'static) -> Subscription {
        self.events.on(kind, handler)
    }

    pub fn off(&self, subscription: Subscription) {
        self.events.off(subscription);
    }

    // ---- adapter-driven loading (§4.3, §6) ----------------------------

    pub fn load_more(&mut self) {
        if self.destroyed {
            return;
        }
        if let Some(adapter) = self.adapter.clone() {
            self.scheduler.load_more(&adapter);
            self.drain_scheduler_events();
            self.refresh(false);
        }
    }

    pub fn reload(&mut self) {
        if self.destroyed {
            return;
        }
        if let Some(adapter) = self.adapter.clone() {
            self.scheduler.reload(&adapter);
            self.size_cache.rebuild(self.store.borrow().total());
            self.rebuild_id_index();
            self.data_epoch += 1;
            self.drain_scheduler_events();
            self.refresh(false);
        }
    }

    /// `destroy()` (§5, §7.5): frees the element pool and cached data,
    /// cancels any in-flight animation, and makes every further mutating
    /// call a no-op. Event subscriptions are left intact so a caller's final
    /// `off()` calls (if any) still succeed.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.recycler.clear();
        self.store.borrow_mut().clear();
        self.id_index.clear();
        self.touch_driver = None;
        self.momentum = None;
        self.scroll.cancel_scroll(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        id: u64,
        label: String,
    }
    impl ListItem for Row {
        type Id = u64;
        fn id(&self) -> u64 {
            self.id
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct NodeId(u64);

    #[derive(Clone, Default)]
    struct TestHost {
        next: Rc<StdRefCell<u64>>,
    }

    impl Host for TestHost {
        type Node = NodeId;

        fn create_root(&self) -> NodeId {
            let mut n = self.next.borrow_mut();
            *n += 1;
            NodeId(*n)
        }
        fn set_inner(&self, _root: &NodeId, _content: NodeId) {}
        fn set_transform(&self, _root: &NodeId, _offset_px: f64, _horizontal: bool) {}
        fn set_hidden(&self, _root: &NodeId, _hidden: bool) {}
        fn set_aria(&self, _root: &NodeId, _setsize: usize, _posinset: usize) {}
        fn set_id(&self, _root: &NodeId, _id: &str) {}
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row {
                id: i as u64,
                label: format!("row-{i}"),
            })
            .collect()
    }

    fn config(items: Vec<Row>) -> EngineConfig<Row, TestHost> {
        EngineConfig {
            host: TestHost::default(),
            container_size: 512.0,
            size: ItemSize::Constant(64.0),
            template: Box::new(|_item, idx, _ctx| NodeId(idx as u64)),
            items: Some(items),
            adapter: None,
            options: EngineOptions::default(),
        }
    }

    #[test]
    fn create_renders_initial_viewport() {
        let engine = Engine::create(config(rows(10_000))).unwrap();
        assert_eq!(engine.viewport.render_range, Range::new(0, 11));
    }

    #[test]
    fn scroll_to_index_updates_position_and_range() {
        let mut engine = Engine::create(config(rows(10_000))).unwrap();
        engine.scroll_to_index(100, Align::Start);
        assert_eq!(engine.get_scroll_position(), 100.0 * 64.0);
        assert!(engine.viewport.render_range.contains(100));
    }

    #[test]
    fn get_item_by_id_resolves_through_index() {
        let mut engine = Engine::create(config(rows(50))).unwrap();
        assert_eq!(engine.get_index_by_id(&7), Some(7));
        let item = engine.get_item_by_id(&7).unwrap();
        assert_eq!(item.loaded().unwrap().label, "row-7");
    }

    #[test]
    fn update_item_bumps_epoch_and_rewrites_slot() {
        let mut engine = Engine::create(config(rows(10))).unwrap();
        let epoch_before = engine.data_epoch;
        engine.update_item(&3, |row| row.label = "patched".to_string());
        assert!(engine.data_epoch > epoch_before);
        let item = engine.get_item(3).unwrap();
        assert_eq!(item.loaded().unwrap().label, "patched");
    }

    #[test]
    fn remove_item_shifts_subsequent_indices_down() {
        let mut engine = Engine::create(config(rows(5))).unwrap();
        engine.remove_item(&1);
        assert_eq!(engine.total(), 4);
        assert_eq!(engine.get_index_by_id(&2), Some(1));
        assert_eq!(engine.get_item(1).unwrap().loaded().unwrap().id, 2);
    }

    #[test]
    fn prepend_items_shifts_existing_indices_up() {
        let mut engine = Engine::create(config(rows(5))).unwrap();
        engine.prepend_items(vec![Row { id: 100, label: "new".into() }]);
        assert_eq!(engine.total(), 6);
        assert_eq!(engine.get_index_by_id(&0), Some(1));
        assert_eq!(engine.get_index_by_id(&100), Some(0));
    }

    #[test]
    fn reverse_mode_starts_scrolled_to_bottom() {
        let mut cfg = config(rows(1000));
        cfg.options.reverse = true;
        let engine = Engine::create(cfg).unwrap();
        assert!((engine.get_scroll_position() - engine.max_scroll_pos()).abs() < 0.001);
    }

    #[test]
    fn reverse_mode_sticks_to_bottom_on_append() {
        let mut cfg = config(rows(10));
        cfg.options.reverse = true;
        let mut engine = Engine::create(cfg).unwrap();
        engine.append_items(rows(5).into_iter().map(|mut r| {
            r.id += 1000;
            r
        }).collect());
        assert!((engine.get_scroll_position() - engine.max_scroll_pos()).abs() < 0.001);
    }

    #[test]
    fn selection_emits_change_event() {
        let mut cfg = config(rows(10));
        cfg.options.selection_mode = SelectionMode::Multiple;
        let mut engine = Engine::create(cfg).unwrap();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        engine.on(EventKind::SelectionChange, move |event| {
            if let Event::SelectionChange { selected } = event {
                seen_clone.borrow_mut().push(selected.clone());
            }
        });
        engine.select([1, 2]);
        assert_eq!(seen.borrow().last().unwrap(), &vec![1, 2]);
    }

    #[test]
    fn scroll_snapshot_round_trips_through_restore() {
        let mut engine = Engine::create(config(rows(10_000))).unwrap();
        engine.scroll_to_index(500, Align::Start);
        let snapshot = engine.get_scroll_snapshot();
        assert_eq!(snapshot.index, 500);
        engine.scroll_to_index(0, Align::Start);
        engine.restore_scroll(snapshot);
        assert_eq!(engine.get_scroll_snapshot().index, 500);
    }

    #[test]
    fn restore_scroll_clamps_offset_into_item_extent() {
        let mut engine = Engine::create(config(rows(100))).unwrap();
        engine.restore_scroll(ScrollSnapshot {
            index: 10,
            offset_in_item: 10_000.0,
        });
        let snapshot = engine.get_scroll_snapshot();
        assert_eq!(snapshot.index, 10);
        assert!(snapshot.offset_in_item < 64.0);
    }

    #[test]
    fn compression_activates_past_hard_limit() {
        let mut cfg = config(rows(1_000_000));
        cfg.options.hard_limit = 1.67e7;
        let engine = Engine::create(cfg).unwrap();
        assert!(engine.compression.active);
    }

    #[test]
    fn destroy_makes_further_mutation_a_no_op() {
        let mut engine = Engine::create(config(rows(10))).unwrap();
        engine.destroy();
        engine.set_items(rows(5));
        assert_eq!(engine.store.borrow().total(), 0);
    }
}
