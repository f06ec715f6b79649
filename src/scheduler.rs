//! Adapter scheduler: velocity-gated, deduplicated fetch scheduling (spec
//! §4.3, component C).
//!
//! Grounded on `hooks/use_infinite_scroll.rs`'s fire-and-forget
//! `spawn(async move { ... })` pattern over `gloo_timers` delays, and on
//! `stores/cashu_memory_db.rs` / `stores/indexeddb_database.rs`'s
//! `#[async_trait(?Send)]` adapter traits (wasm is single-threaded, so every
//! async trait here is `?Send` just like theirs). Completed fetches are
//! drained as events rather than returned as an awaited future, matching
//! the engine's RAF-tick-driven loop (component H) rather than asking
//! callers to block on a promise mid-frame.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AdapterContext;
use crate::item::{ItemSlot, ListItem, Range};
use crate::sparse_store::SparseStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Clone, Debug)]
pub struct ReadRequest {
    pub offset: usize,
    pub limit: usize,
    pub cursor: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReadResponse<T: ListItem> {
    pub items: Vec<T>,
    pub total: Option<usize>,
    pub has_more: Option<bool>,
    pub cursor: Option<String>,
}

/// `read({offset, limit, cursor?}) -> {items, total?, hasMore?, cursor?}`,
/// §4.3. `?Send` because the engine never leaves the UI thread.
#[async_trait(?Send)]
pub trait Adapter<T: ListItem> {
    async fn read(&self, request: ReadRequest) -> Result<ReadResponse<T>, String>;
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SchedulerTuning {
    /// `V_CANCEL`: above this, no fetch is issued; it's queued as pending.
    pub cancel_velocity: f64,
    /// `V_PRELOAD`: above this (but below `cancel_velocity`), widen ahead.
    pub preload_velocity: f64,
    pub preload_ahead: usize,
    pub page_size: usize,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            cancel_velocity: 25.0,
            preload_velocity: 2.0,
            preload_ahead: 50,
            page_size: 50,
        }
    }
}

#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    LoadStart { context: AdapterContext, range: Range },
    LoadEnd { context: AdapterContext, range: Range },
    Error { context: AdapterContext, message: String },
}

/// Pagination bookkeeping for `loadMore`/`loadInitial` (§4.3, §6): the
/// cursor and `hasMore` flag the adapter last reported, plus the next
/// offset a `loadMore()` should request from. Held behind `Rc<RefCell<_>>`
/// so the fire-and-forget `dispatch` future — which cannot mutate
/// `Scheduler` itself once spawned — can still update it when the response
/// for a load-more/load-initial request lands.
struct Pagination {
    cursor: Option<String>,
    has_more: bool,
    tail: usize,
}

/// Shared, `Rc<RefCell<_>>`-backed bookkeeping so the `spawn_local` futures
/// this module fires can still reach the pending set and event queue once
/// the request returns. Single-threaded by construction (§5) — no
/// `Arc`/`Mutex` anywhere in this module.
pub struct Scheduler<T: ListItem> {
    store: Rc<RefCell<SparseStore<T>>>,
    tuning: SchedulerTuning,
    pending_chunks: Rc<RefCell<HashSet<usize>>>,
    pending_range: Option<Range>,
    events: Rc<RefCell<VecDeque<SchedulerEvent>>>,
    pagination: Rc<RefCell<Pagination>>,
    /// Woken every time a dispatched chunk settles, so
    /// [`Scheduler::ensure_range_async`] can await genuine completion of
    /// "all resulting fetches" (§4.3) instead of polling.
    inflight_notify: Rc<tokio::sync::Notify>,
}

impl<T: ListItem> Scheduler<T> {
    pub fn new(store: Rc<RefCell<SparseStore<T>>>, tuning: SchedulerTuning) -> Self {
        Self {
            store,
            tuning,
            pending_chunks: Rc::new(RefCell::new(HashSet::new())),
            pending_range: None,
            events: Rc::new(RefCell::new(VecDeque::new())),
            pagination: Rc::new(RefCell::new(Pagination {
                cursor: None,
                has_more: true,
                tail: 0,
            })),
            inflight_notify: Rc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    pub fn pending_range(&self) -> Option<Range> {
        self.pending_range
    }

    /// Re-anchors `loadMore`'s tail after the engine mutates the store
    /// directly (`setItems`/`appendItems`/`prependItems`), so a later
    /// `loadMore()` picks up after the data actually present rather than
    /// replaying pages the mutation already covered.
    pub fn set_tail(&mut self, tail: usize) {
        self.pagination.borrow_mut().tail = tail;
    }

    fn chunk_width(&self) -> usize {
        self.store.borrow().chunk_width()
    }

    /// Widen `[a, b]` by `preload_ahead` items in `direction` if `velocity`
    /// exceeds `V_PRELOAD` (§4.3 "Preload").
    fn apply_preload(&self, a: usize, b: usize, velocity: f64, direction: Direction) -> (usize, usize) {
        if velocity <= self.tuning.preload_velocity {
            return (a, b);
        }
        match direction {
            Direction::Forward => (a, b + self.tuning.preload_ahead),
            Direction::Backward => (a.saturating_sub(self.tuning.preload_ahead), b),
        }
    }

    /// The velocity gate (§4.3): dispatch immediately if slow and
    /// reliable, else remember the range as pending for a later flush.
    pub fn on_scroll_tick<A: Adapter<T> + 'static>(
        &mut self,
        adapter: &Rc<A>,
        requested: Range,
        velocity: f64,
        velocity_reliable: bool,
        direction: Direction,
    ) {
        if requested.is_empty() {
            return;
        }
        let (a, b) = self.apply_preload(requested.start, requested.end, velocity, direction);
        let widened = Range::new(a, b);

        if velocity <= self.tuning.cancel_velocity && velocity_reliable {
            self.ensure_range(adapter, widened, AdapterContext::EnsureRange);
        } else {
            self.pending_range = Some(widened);
        }
    }

    /// Called when velocity drops below `V_CANCEL` (edge-triggered) or the
    /// scroll controller's idle callback fires.
    pub fn flush_pending<A: Adapter<T> + 'static>(&mut self, adapter: &Rc<A>) {
        if let Some(range) = self.pending_range.take() {
            self.ensure_range(adapter, range, AdapterContext::EnsureRange);
        }
    }

    /// Schedules loads to cover `[range.start, range.end]`. Deduplicates:
    /// an aligned chunk already in flight is not re-requested.
    pub fn ensure_range<A: Adapter<T> + 'static>(
        &mut self,
        adapter: &Rc<A>,
        range: Range,
        context: AdapterContext,
    ) {
        if range.is_empty() {
            return;
        }
        let missing = self.store.borrow().find_unloaded_ranges(range.start, range.end);
        let width = self.chunk_width();
        let cursor = self.pagination.borrow().cursor.clone();
        for chunk_range in missing {
            let chunk_id = chunk_range.start / width.max(1);
            if !self.pending_chunks.borrow_mut().insert(chunk_id) {
                continue; // already in flight for this chunk
            }
            self.dispatch(adapter.clone(), chunk_range, chunk_id, context, cursor.clone());
        }
    }

    /// `ensureRange(range)` as the host sees it (§4.3): "returns a
    /// promise that resolves when all resulting fetches complete." The
    /// synchronous [`Scheduler::ensure_range`] only schedules work; this
    /// awaits the shared [`tokio::sync::Notify`] until every chunk this call
    /// dispatched has settled (or is already loaded, in which case it
    /// resolves immediately).
    pub async fn ensure_range_async<A: Adapter<T> + 'static>(
        &mut self,
        adapter: &Rc<A>,
        range: Range,
        context: AdapterContext,
    ) {
        self.ensure_range(adapter, range, context);
        let notify = self.inflight_notify.clone();
        let store = self.store.clone();
        while !store.borrow().is_range_loaded(range.start, range.end) {
            notify.notified().await;
        }
    }

    /// `loadMore()`: requests the next page past the current tail. Obeys
    /// `hasMore` as last reported by the adapter (§4.3).
    pub fn load_more<A: Adapter<T> + 'static>(&mut self, adapter: &Rc<A>) {
        let (tail, has_more, cursor) = {
            let p = self.pagination.borrow();
            (p.tail, p.has_more, p.cursor.clone())
        };
        if !has_more {
            return;
        }
        let page = self.tuning.page_size;
        let range = Range::new(tail, tail + page - 1);
        let width = self.chunk_width();
        let chunk_id = tail / width.max(1);
        if self.pending_chunks.borrow_mut().insert(chunk_id) {
            self.dispatch(adapter.clone(), range, chunk_id, AdapterContext::LoadMore, cursor);
        }
    }

    /// `loadInitial()`: seeds the store with the first page.
    pub fn load_initial<A: Adapter<T> + 'static>(&mut self, adapter: &Rc<A>) {
        {
            let mut p = self.pagination.borrow_mut();
            p.tail = 0;
            p.has_more = true;
            p.cursor = None;
        }
        let page = self.tuning.page_size;
        let range = Range::new(0, page - 1);
        self.pending_chunks.borrow_mut().insert(0);
        self.dispatch(adapter.clone(), range, 0, AdapterContext::LoadInitial, None);
    }

    /// `reload()`: clears the store and any in-flight bookkeeping, then
    /// reissues the initial load. Results for fetches already in flight at
    /// the moment of reload are dropped on arrival (§5 ordering).
    pub fn reload<A: Adapter<T> + 'static>(&mut self, adapter: &Rc<A>) {
        self.store.borrow_mut().clear();
        self.pending_chunks.borrow_mut().clear();
        self.pending_range = None;
        self.load_initial(adapter);
    }

    fn dispatch<A: Adapter<T> + 'static>(
        &self,
        adapter: Rc<A>,
        range: Range,
        chunk_id: usize,
        context: AdapterContext,
        cursor: Option<String>,
    ) {
        self.events
            .borrow_mut()
            .push_back(SchedulerEvent::LoadStart { context, range });

        let store = self.store.clone();
        let pending_chunks = self.pending_chunks.clone();
        let events = self.events.clone();
        let inflight_notify = self.inflight_notify.clone();
        let pagination = self.pagination.clone();
        let request = ReadRequest {
            offset: range.start,
            limit: range.len(),
            cursor,
        };

        let fut = async move {
            let result = adapter.read(request).await;
            // If reload()/clear() ran while this was in flight, the chunk id
            // is no longer in the pending set — drop the result.
            let still_relevant = pending_chunks.borrow().contains(&chunk_id);
            if still_relevant {
                match result {
                    Ok(response) => {
                        let mut store_mut = store.borrow_mut();
                        if let Some(total) = response.total {
                            store_mut.set_total(total);
                        }
                        let item_count = response.items.len();
                        let slots = response.items.into_iter().map(ItemSlot::Loaded);
                        store_mut.set_range(range.start, slots);
                        drop(store_mut);

                        // Only the sequential loadMore/loadInitial flow
                        // advances `tail`: ensureRange's ranges come from
                        // overscan/preload windows, not "the next page".
                        if matches!(context, AdapterContext::LoadMore | AdapterContext::LoadInitial) {
                            let mut p = pagination.borrow_mut();
                            p.tail = p.tail.max(range.start + item_count);
                            if let Some(has_more) = response.has_more {
                                p.has_more = has_more;
                            }
                        }
                        if response.cursor.is_some() {
                            pagination.borrow_mut().cursor = response.cursor;
                        }

                        events
                            .borrow_mut()
                            .push_back(SchedulerEvent::LoadEnd { context, range });
                    }
                    Err(message) => {
                        events
                            .borrow_mut()
                            .push_back(SchedulerEvent::Error { context, message });
                    }
                }
            }
            pending_chunks.borrow_mut().remove(&chunk_id);
            inflight_notify.notify_waiters();
        };

        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(fut);
        #[cfg(not(target_arch = "wasm32"))]
        {
            // Off-target (unit tests, tooling): drive the future to
            // completion synchronously since there's no browser microtask
            // queue to schedule it on.
            crate::raf::block_on(fut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse_store::StoreTuning;
    use std::cell::Cell;

    #[derive(Clone, Debug, PartialEq)]
    struct Row(u64);
    impl ListItem for Row {
        type Id = u64;
        fn id(&self) -> u64 {
            self.0
        }
    }

    struct CountingAdapter {
        calls: Rc<Cell<usize>>,
    }

    #[async_trait(?Send)]
    impl Adapter<Row> for CountingAdapter {
        async fn read(&self, request: ReadRequest) -> Result<ReadResponse<Row>, String> {
            self.calls.set(self.calls.get() + 1);
            let items = (0..request.limit)
                .map(|k| Row((request.offset + k) as u64))
                .collect();
            Ok(ReadResponse {
                items,
                total: Some(10_000),
                has_more: Some(true),
                cursor: None,
            })
        }
    }

    fn scheduler() -> (Scheduler<Row>, Rc<CountingAdapter>, Rc<Cell<usize>>) {
        let store = Rc::new(RefCell::new(SparseStore::new(StoreTuning {
            chunk_width: 10,
            ..StoreTuning::default()
        })));
        let calls = Rc::new(Cell::new(0));
        let adapter = Rc::new(CountingAdapter { calls: calls.clone() });
        (Scheduler::new(store, SchedulerTuning::default()), adapter, calls)
    }

    #[test]
    fn velocity_above_cancel_defers_to_pending() {
        let (mut sched, adapter, calls) = scheduler();
        sched.on_scroll_tick(&adapter, Range::new(0, 9), 2500.0, true, Direction::Forward);
        assert_eq!(calls.get(), 0);
        assert!(sched.pending_range().is_some());
    }

    #[test]
    fn velocity_below_cancel_dispatches_immediately() {
        let (mut sched, adapter, calls) = scheduler();
        sched.on_scroll_tick(&adapter, Range::new(0, 9), 1.0, true, Direction::Forward);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn unreliable_velocity_defers_even_when_low() {
        let (mut sched, adapter, calls) = scheduler();
        sched.on_scroll_tick(&adapter, Range::new(0, 9), 1.0, false, Direction::Forward);
        assert_eq!(calls.get(), 0);
        assert!(sched.pending_range().is_some());
    }

    #[test]
    fn flush_pending_dispatches_exactly_once() {
        let (mut sched, adapter, calls) = scheduler();
        sched.on_scroll_tick(&adapter, Range::new(0, 9), 2500.0, true, Direction::Forward);
        sched.flush_pending(&adapter);
        assert_eq!(calls.get(), 1);
        assert!(sched.pending_range().is_none());
        // A second flush with nothing pending is a no-op.
        sched.flush_pending(&adapter);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn ensure_range_dedups_overlapping_chunk() {
        let (mut sched, adapter, calls) = scheduler();
        sched.ensure_range(&adapter, Range::new(0, 5), AdapterContext::EnsureRange);
        // In-flight synchronously resolves off-target, clearing the pending
        // set before the second call — both calls hit the same aligned
        // chunk, but since chunk 0 is fully loaded after the first
        // dispatch, the second call finds nothing missing to fetch.
        sched.ensure_range(&adapter, Range::new(2, 8), AdapterContext::EnsureRange);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn ensure_range_async_resolves_once_fetch_completes() {
        let (mut sched, adapter, calls) = scheduler();
        let fut = sched.ensure_range_async(&adapter, Range::new(0, 9), AdapterContext::EnsureRange);
        crate::raf::block_on(fut);
        assert_eq!(calls.get(), 1);
        assert!(sched.store.borrow().is_range_loaded(0, 9));
    }

    struct PagedAdapter {
        requests: Rc<RefCell<Vec<ReadRequest>>>,
        total: usize,
    }

    #[async_trait(?Send)]
    impl Adapter<Row> for PagedAdapter {
        async fn read(&self, request: ReadRequest) -> Result<ReadResponse<Row>, String> {
            let limit = request.limit.min(self.total.saturating_sub(request.offset));
            let items = (0..limit).map(|k| Row((request.offset + k) as u64)).collect();
            let next_offset = request.offset + limit;
            self.requests.borrow_mut().push(request);
            Ok(ReadResponse {
                items,
                total: Some(self.total),
                has_more: Some(next_offset < self.total),
                cursor: Some(format!("cursor-{next_offset}")),
            })
        }
    }

    #[test]
    fn load_more_advances_tail_and_cursor_across_calls() {
        let store = Rc::new(RefCell::new(SparseStore::new(StoreTuning {
            chunk_width: 10,
            ..StoreTuning::default()
        })));
        let requests = Rc::new(RefCell::new(Vec::new()));
        let adapter = Rc::new(PagedAdapter {
            requests: requests.clone(),
            total: 500,
        });
        let mut sched = Scheduler::new(
            store,
            SchedulerTuning {
                page_size: 50,
                ..SchedulerTuning::default()
            },
        );

        sched.load_more(&adapter);
        sched.load_more(&adapter);

        let seen = requests.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].offset, 0);
        assert_eq!(seen[0].cursor, None);
        assert_eq!(seen[1].offset, 50);
        assert_eq!(seen[1].cursor, Some("cursor-50".to_string()));
    }

    #[test]
    fn load_more_stops_once_has_more_is_false() {
        let store = Rc::new(RefCell::new(SparseStore::new(StoreTuning {
            chunk_width: 10,
            ..StoreTuning::default()
        })));
        let requests = Rc::new(RefCell::new(Vec::new()));
        let adapter = Rc::new(PagedAdapter {
            requests: requests.clone(),
            total: 40,
        });
        let mut sched = Scheduler::new(
            store,
            SchedulerTuning {
                page_size: 50,
                ..SchedulerTuning::default()
            },
        );

        sched.load_more(&adapter); // exhausts the only page, has_more -> false
        sched.load_more(&adapter); // must be a no-op now

        assert_eq!(requests.borrow().len(), 1);
    }

    #[test]
    fn preload_widens_range_in_scroll_direction() {
        let (mut sched, adapter, _calls) = scheduler();
        // velocity between preload (2.0) and cancel (25.0): preloads ahead
        // AND still dispatches immediately (it's below cancel_velocity).
        sched.on_scroll_tick(&adapter, Range::new(0, 9), 10.0, true, Direction::Forward);
        // Widened request would have asked for items up through 9+50=59;
        // confirm those are now loaded.
        assert!(sched.store.borrow().is_range_loaded(0, 59));
    }
}
