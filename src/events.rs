//! Observer/callback registry (§4.8, §9's "Observer via callback
//! registry" design note, component H's event surface).
//!
//! Grounded on the `#[async_trait(?Send)]` single-threaded-by-construction
//! style already established in [`crate::scheduler`]: handlers are stored
//! behind `Rc<RefCell<_>>` rather than `Arc<Mutex<_>>` since the engine never
//! leaves the UI thread (§5). The reentrancy rule from §9 — `off`
//! called from within a handler must not skip a subsequent handler — is
//! implemented by snapshotting the handler list before iterating, the
//! approach §9 names explicitly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::AdapterContext;
use crate::item::{ListItem, Range};
use crate::scheduler::Direction;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Scroll,
    RangeChange,
    LoadStart,
    LoadEnd,
    Error,
    Resize,
    SelectionChange,
}

#[derive(Clone, Debug)]
pub enum Event<T: ListItem> {
    Scroll {
        scroll_pos: f64,
        direction: Option<Direction>,
        velocity: f64,
    },
    RangeChange {
        range: Range,
    },
    LoadStart {
        context: AdapterContext,
        range: Range,
    },
    LoadEnd {
        context: AdapterContext,
        range: Range,
    },
    Error {
        context: AdapterContext,
        message: String,
    },
    Resize {
        container_size: f64,
    },
    SelectionChange {
        selected: Vec<T::Id>,
    },
}

impl<T: ListItem> Event<T> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Scroll { .. } => EventKind::Scroll,
            Event::RangeChange { .. } => EventKind::RangeChange,
            Event::LoadStart { .. } => EventKind::LoadStart,
            Event::LoadEnd { .. } => EventKind::LoadEnd,
            Event::Error { .. } => EventKind::Error,
            Event::Resize { .. } => EventKind::Resize,
            Event::SelectionChange { .. } => EventKind::SelectionChange,
        }
    }
}

pub type HandlerId = u64;

type BoxedHandler<T> = Box<dyn FnMut(&Event<T>)>;

struct Inner<T: ListItem> {
    handlers: HashMap<EventKind, Vec<(HandlerId, Rc<RefCell<BoxedHandler<T>>>)>>,
    next_id: HandlerId,
}

/// A subscription token. Rust has no way to compare closures for identity
/// the way the source's `off(event, handler)` does with JS function values,
/// so this token — returned by [`EventBus::on`] — is the actual handle for
/// removal; both the returned closure and an explicit [`EventBus::off`] call
/// use it, per §9's "prefer a pair-typed handle" alternative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub kind: EventKind,
    pub id: HandlerId,
}

#[derive(Clone)]
pub struct EventBus<T: ListItem> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: ListItem> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                handlers: HashMap::new(),
                next_id: 0,
            })),
        }
    }
}

impl<T: ListItem> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `kind`. Returns a [`Subscription`] token;
    /// passing it to [`EventBus::off`] removes exactly this handler.
    pub fn on(&self, kind: EventKind, handler: impl FnMut(&Event<T>) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Rc::new(RefCell::new(Box::new(handler)))));
        Subscription { kind, id }
    }

    pub fn off(&self, subscription: Subscription) {
        let mut inner = self.inner.borrow_mut();
        if let Some(list) = inner.handlers.get_mut(&subscription.kind) {
            list.retain(|(id, _)| *id != subscription.id);
        }
    }

    /// Emits `event` to every handler subscribed to its kind. Per §9, the
    /// handler list is snapshotted (cloned `Rc`s) before iterating, so an
    /// `off()` issued by one handler cannot skip a later one in this same
    /// dispatch. Per §7.3, a handler that panics is caught and logged; it
    /// does not stop later handlers or affect core state.
    pub fn emit(&self, event: Event<T>) {
        let kind = event.kind();
        let snapshot: Vec<(HandlerId, Rc<RefCell<BoxedHandler<T>>>)> = {
            let inner = self.inner.borrow();
            inner.handlers.get(&kind).cloned().unwrap_or_default()
        };
        for (_, handler) in snapshot {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (handler.borrow_mut())(&event);
            }));
            if outcome.is_err() {
                log::error!("vlist-engine: event handler for {kind:?} panicked");
            }
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .borrow()
            .handlers
            .get(&kind)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}
