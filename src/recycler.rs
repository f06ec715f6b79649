//! DOM recycler & renderer: reuses a pool of elements across render-range
//! changes (§4.5, component G).
//!
//! Grounded on `components/virtual_list.rs`'s `onmounted` element-capture
//! idiom — storing a `web_sys::HtmlElement` per rendered node — generalized
//! from "one signal per component instance" into an explicit pool keyed by
//! index, and on the wasm32/non-wasm `#[cfg]` split already used throughout
//! [`crate::scheduler`] and [`crate::raf`], applied here to DOM mutation
//! itself: a [`Host`] trait stands in for the concrete `web_sys::Element`
//! surface so mount/unmount/position bookkeeping is exercised by ordinary
//! `#[test]`s off-target, with [`WebSysHost`] wired in only on `wasm32`.

use std::collections::HashMap;

use crate::item::{ItemSlot, ListItem, Range};

/// Minimal DOM surface the recycler needs from a rendered root element.
pub trait Host {
    type Node: Clone;

    /// Creates one pool slot's root element (an absolutely positioned
    /// container the recycler repositions via transform — §4.5's
    /// rationale for avoiding per-item reflow).
    fn create_root(&self) -> Self::Node;
    /// Replaces the root's current inner content with the template's output.
    fn set_inner(&self, root: &Self::Node, content: Self::Node);
    fn set_transform(&self, root: &Self::Node, offset_px: f64, horizontal: bool);
    /// Unmounted slots stay in the DOM, hidden, until reused (§4.5 step 1).
    fn set_hidden(&self, root: &Self::Node, hidden: bool);
    fn set_aria(&self, root: &Self::Node, setsize: usize, posinset: usize);
    fn set_id(&self, root: &Self::Node, id: &str);
}

/// Passed to the user template function alongside the item and its index
/// (§4.5 step 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemplateCtx {
    pub selected: bool,
    pub placeholder: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct BoundKey {
    selected: bool,
    placeholder: bool,
    /// The store's mutation epoch at the time this slot's template last ran.
    /// Without this, a slot whose bound index is unchanged but whose
    /// underlying item data changed (e.g. `updateItem`) would never re-run
    /// its template, since `T` isn't required to implement `PartialEq`. The
    /// engine bumps its epoch on every store mutation; this is coarser than
    /// per-item dirty tracking but correct, and keeps this module generic
    /// over arbitrary `ListItem` types.
    epoch: u64,
}

struct PoolSlot<N> {
    root: N,
    bound_index: Option<usize>,
    bound_key: Option<BoundKey>,
}

/// Owns the element pool and the currently-mounted index -> slot mapping.
pub struct Recycler<H: Host> {
    host: H,
    id_prefix: String,
    pool: Vec<PoolSlot<H::Node>>,
    free: Vec<usize>,
    mounted: HashMap<usize, usize>,
}

impl<H: Host> Recycler<H> {
    /// `initial_capacity` should be roughly visible-count + 2·overscan, per
    /// §4.5's "Element pool" note.
    pub fn new(host: H, id_prefix: impl Into<String>, initial_capacity: usize) -> Self {
        let mut pool = Vec::with_capacity(initial_capacity);
        let mut free = Vec::with_capacity(initial_capacity);
        for i in 0..initial_capacity {
            pool.push(PoolSlot {
                root: host.create_root(),
                bound_index: None,
                bound_key: None,
            });
            free.push(i);
        }
        Self {
            host,
            id_prefix: id_prefix.into(),
            pool,
            free,
            mounted: HashMap::new(),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.len()
    }

    pub fn is_mounted(&self, index: usize) -> bool {
        self.mounted.contains_key(&index)
    }

    fn acquire_slot(&mut self) -> usize {
        if let Some(i) = self.free.pop() {
            return i;
        }
        let i = self.pool.len();
        self.pool.push(PoolSlot {
            root: self.host.create_root(),
            bound_index: None,
            bound_key: None,
        });
        i
    }

    /// The render algorithm, §4.5 steps 1-4. `get` resolves an index to
    /// its current [`ItemSlot`]; `position` resolves an index to its
    /// transform offset (already compression-adjusted if the scale engine is
    /// active, §4.6).
    #[allow(clippy::too_many_arguments)]
    pub fn render<T: ListItem>(
        &mut self,
        range: Range,
        total: usize,
        epoch: u64,
        get: impl Fn(usize) -> ItemSlot<T>,
        template: impl Fn(&ItemSlot<T>, usize, &TemplateCtx) -> H::Node,
        is_selected: impl Fn(usize) -> bool,
        position: impl Fn(usize) -> f64,
        horizontal: bool,
    ) {
        let stale: Vec<usize> = self
            .mounted
            .keys()
            .copied()
            .filter(|i| !range.contains(*i))
            .collect();
        for idx in stale {
            let slot_i = self.mounted.remove(&idx).expect("key came from mounted");
            self.host.set_hidden(&self.pool[slot_i].root, true);
            self.pool[slot_i].bound_index = None;
            self.pool[slot_i].bound_key = None;
            self.free.push(slot_i);
        }

        if range.is_empty() {
            return;
        }

        for idx in range.start..=range.end {
            let slot_i = match self.mounted.get(&idx).copied() {
                Some(s) => s,
                None => {
                    let s = self.acquire_slot();
                    self.host.set_hidden(&self.pool[s].root, false);
                    self.mounted.insert(idx, s);
                    s
                }
            };

            let item = get(idx);
            let key = BoundKey {
                selected: is_selected(idx),
                placeholder: item.is_placeholder(),
                epoch,
            };
            let needs_template =
                self.pool[slot_i].bound_index != Some(idx) || self.pool[slot_i].bound_key != Some(key);

            if needs_template {
                let ctx = TemplateCtx {
                    selected: key.selected,
                    placeholder: key.placeholder,
                };
                let content = template(&item, idx, &ctx);
                self.host.set_inner(&self.pool[slot_i].root, content);
                self.host.set_aria(&self.pool[slot_i].root, total, idx + 1);
                self.host
                    .set_id(&self.pool[slot_i].root, &format!("{}-item-{idx}", self.id_prefix));
                self.pool[slot_i].bound_index = Some(idx);
                self.pool[slot_i].bound_key = Some(key);
            }

            // Position every slot in range regardless of whether its
            // template re-ran: the size cache (or compression ratio) may
            // have changed even when the bound item/selection didn't, and
            // §4.5's idempotence clause only promises no mutation
            // *besides* transforms in that case.
            self.host.set_transform(&self.pool[slot_i].root, position(idx), horizontal);
        }
    }

    /// Unmounts everything, hiding every slot and returning it to the free
    /// list. Used by engine teardown (§5's `destroy()`).
    pub fn clear(&mut self) {
        let mounted: Vec<usize> = self.mounted.keys().copied().collect();
        for idx in mounted {
            let slot_i = self.mounted.remove(&idx).expect("key came from mounted");
            self.host.set_hidden(&self.pool[slot_i].root, true);
            self.pool[slot_i].bound_index = None;
            self.pool[slot_i].bound_key = None;
            self.free.push(slot_i);
        }
    }
}

#[cfg(target_arch = "wasm32")]
mod wasm_host {
    use super::Host;
    use wasm_bindgen::JsCast;

    /// Real DOM surface, used by the engine when compiled to `wasm32`.
    pub struct WebSysHost {
        document: web_sys::Document,
    }

    impl WebSysHost {
        pub fn new(document: web_sys::Document) -> Self {
            Self { document }
        }
    }

    impl Host for WebSysHost {
        type Node = web_sys::Element;

        fn create_root(&self) -> Self::Node {
            let el = self
                .document
                .create_element("div")
                .expect("document.createElement('div') failed");
            el.set_attribute(
                "style",
                "position: absolute; top: 0; left: 0; will-change: transform;",
            )
            .ok();
            el
        }

        fn set_inner(&self, root: &Self::Node, content: Self::Node) {
            while let Some(child) = root.first_child() {
                root.remove_child(&child).ok();
            }
            root.append_child(&content).ok();
        }

        fn set_transform(&self, root: &Self::Node, offset_px: f64, horizontal: bool) {
            let transform = if horizontal {
                format!("translateX({offset_px}px)")
            } else {
                format!("translateY({offset_px}px)")
            };
            if let Some(html) = root.dyn_ref::<web_sys::HtmlElement>() {
                html.style().set_property("transform", &transform).ok();
            }
        }

        fn set_hidden(&self, root: &Self::Node, hidden: bool) {
            if let Some(html) = root.dyn_ref::<web_sys::HtmlElement>() {
                html.style()
                    .set_property("display", if hidden { "none" } else { "" })
                    .ok();
            }
        }

        fn set_aria(&self, root: &Self::Node, setsize: usize, posinset: usize) {
            root.set_attribute("aria-setsize", &setsize.to_string()).ok();
            root.set_attribute("aria-posinset", &posinset.to_string()).ok();
        }

        fn set_id(&self, root: &Self::Node, id: &str) {
            root.set_attribute("id", id).ok();
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_host::WebSysHost;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Debug, PartialEq)]
    struct Row(u64);
    impl ListItem for Row {
        type Id = u64;
        fn id(&self) -> u64 {
            self.0
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct NodeId(u64);

    #[derive(Clone, Default)]
    struct RecordingHost {
        next: Rc<RefCell<u64>>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl RecordingHost {
        fn log(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    impl Host for RecordingHost {
        type Node = NodeId;

        fn create_root(&self) -> NodeId {
            let mut n = self.next.borrow_mut();
            *n += 1;
            self.log.borrow_mut().push(format!("create:{}", *n));
            NodeId(*n)
        }

        fn set_inner(&self, root: &NodeId, content: NodeId) {
            self.log.borrow_mut().push(format!("inner:{}<-{}", root.0, content.0));
        }

        fn set_transform(&self, root: &NodeId, offset_px: f64, horizontal: bool) {
            let axis = if horizontal { "x" } else { "y" };
            self.log
                .borrow_mut()
                .push(format!("pos:{}:{axis}:{offset_px:.1}", root.0));
        }

        fn set_hidden(&self, root: &NodeId, hidden: bool) {
            self.log.borrow_mut().push(format!("hidden:{}:{hidden}", root.0));
        }

        fn set_aria(&self, root: &NodeId, setsize: usize, posinset: usize) {
            self.log
                .borrow_mut()
                .push(format!("aria:{}:{posinset}/{setsize}", root.0));
        }

        fn set_id(&self, root: &NodeId, id: &str) {
            self.log.borrow_mut().push(format!("id:{}:{id}", root.0));
        }
    }

    fn get(i: usize) -> ItemSlot<Row> {
        ItemSlot::Loaded(Row(i as u64))
    }

    #[test]
    fn initial_pool_matches_requested_capacity() {
        let recycler: Recycler<RecordingHost> = Recycler::new(RecordingHost::default(), "list", 5);
        assert_eq!(recycler.pool_size(), 5);
        assert_eq!(recycler.mounted_count(), 0);
    }

    #[test]
    fn render_mounts_every_index_in_range() {
        let host = RecordingHost::default();
        let mut recycler = Recycler::new(host.clone(), "list", 4);
        recycler.render(
            Range::new(0, 3),
            100,
            0,
            get,
            |item, idx, _ctx| NodeId(1000 + idx as u64 + if item.is_placeholder() { 1 } else { 0 }),
            |_| false,
            |i| (i as f64) * 10.0,
            false,
        );
        assert_eq!(recycler.mounted_count(), 4);
        for i in 0..4 {
            assert!(recycler.is_mounted(i));
        }
    }

    #[test]
    fn pool_grows_only_when_exhausted() {
        let host = RecordingHost::default();
        let mut recycler = Recycler::new(host.clone(), "list", 2);
        recycler.render(Range::new(0, 3), 10, 0, get, |_, idx, _| NodeId(idx as u64), |_| false, |_| 0.0, false);
        assert_eq!(recycler.pool_size(), 4);
    }

    #[test]
    fn scrolling_past_reuses_freed_slots_instead_of_growing() {
        let host = RecordingHost::default();
        let mut recycler = Recycler::new(host.clone(), "list", 4);
        recycler.render(Range::new(0, 3), 100, 0, get, |_, idx, _| NodeId(idx as u64), |_| false, |_| 0.0, false);
        let pool_after_first = recycler.pool_size();
        recycler.render(Range::new(4, 7), 100, 0, get, |_, idx, _| NodeId(idx as u64), |_| false, |_| 0.0, false);
        assert_eq!(recycler.pool_size(), pool_after_first);
        assert_eq!(recycler.mounted_count(), 4);
        assert!(!recycler.is_mounted(0));
        assert!(recycler.is_mounted(4));
    }

    #[test]
    fn idempotent_rerender_only_repositions() {
        let host = RecordingHost::default();
        let mut recycler = Recycler::new(host.clone(), "list", 4);
        let render_once = |r: &mut Recycler<RecordingHost>| {
            r.render(Range::new(0, 1), 10, 0, get, |_, idx, _| NodeId(idx as u64), |_| false, |i| i as f64 * 10.0, false);
        };
        render_once(&mut recycler);
        let log_len_after_first = host.log().len();
        render_once(&mut recycler);
        let new_entries = &host.log()[log_len_after_first..];
        // Only `pos:` entries should appear on the idempotent re-render —
        // no further create/inner/aria/id calls.
        assert!(new_entries.iter().all(|line| line.starts_with("pos:")));
        assert_eq!(new_entries.len(), 2);
    }

    #[test]
    fn epoch_bump_forces_template_rerun_for_unchanged_index() {
        let host = RecordingHost::default();
        let mut recycler = Recycler::new(host.clone(), "list", 4);
        recycler.render(Range::new(0, 0), 10, 0, get, |_, idx, _| NodeId(idx as u64), |_| false, |_| 0.0, false);
        let before = host.log().len();
        recycler.render(Range::new(0, 0), 10, 1, get, |_, idx, _| NodeId(idx as u64), |_| false, |_| 0.0, false);
        let after = &host.log()[before..];
        assert!(after.iter().any(|line| line.starts_with("inner:")));
    }

    #[test]
    fn clear_unmounts_everything() {
        let host = RecordingHost::default();
        let mut recycler = Recycler::new(host.clone(), "list", 4);
        recycler.render(Range::new(0, 3), 10, 0, get, |_, idx, _| NodeId(idx as u64), |_| false, |_| 0.0, false);
        recycler.clear();
        assert_eq!(recycler.mounted_count(), 0);
        assert_eq!(recycler.pool_size(), 4);
    }
}
