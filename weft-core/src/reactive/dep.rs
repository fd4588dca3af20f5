//! Dependencies
//!
//! A `Dep` is the notification hub behind one reactive slot: a field of an
//! observed object, or the "shape" of an observed container. Watchers that
//! read the slot subscribe to it; writing the slot notifies them.
//!
//! Subscribers are held weakly. A dropped watcher never stays alive through
//! the graph, and its dead entry is pruned on the next notification.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::TrackingContext;
use super::watcher::{WatcherId, WatcherRef, Watcher};
use crate::config::{self, TickMode};

/// Unique identifier for a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dep#{}", self.0)
    }
}

struct DepInner {
    id: DepId,
    subs: RefCell<IndexMap<WatcherId, WatcherRef>>,
}

/// A set of subscribers that can be notified of a change.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Dep {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: DepId::next(),
                subs: RefCell::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Register the active watcher, if any, as a subscriber.
    pub fn depend(&self) {
        if let Some(watcher) = TrackingContext::current() {
            watcher.add_dep(self);
        }
    }

    /// Ask every subscriber to update.
    ///
    /// Iterates a snapshot, so subscribers may (un)subscribe while being
    /// notified.
    pub fn notify(&self) {
        let mut subs: SmallVec<[(WatcherId, WatcherRef); 8]> = self
            .inner
            .subs
            .borrow()
            .iter()
            .map(|(id, sub)| (*id, sub.clone()))
            .collect();

        // Without a scheduler in between, keep id order by hand.
        if config::tick_mode() == TickMode::Sync {
            subs.sort_by_key(|(id, _)| *id);
        }

        tracing::trace!(dep = %self.inner.id, subscribers = subs.len(), "notify");

        let mut dead: SmallVec<[WatcherId; 4]> = SmallVec::new();
        for (id, sub) in subs {
            match Watcher::upgrade(&sub) {
                Some(watcher) => watcher.update(),
                None => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut subs = self.inner.subs.borrow_mut();
            for id in dead {
                subs.shift_remove(&id);
            }
        }
    }

    pub(crate) fn add_sub(&self, watcher: &Watcher) {
        self.inner
            .subs
            .borrow_mut()
            .entry(watcher.id())
            .or_insert_with(|| watcher.downgrade());
    }

    pub(crate) fn remove_sub(&self, id: WatcherId) {
        self.inner.subs.borrow_mut().shift_remove(&id);
    }

    /// Number of registered subscribers, live or not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.borrow().len()
    }

    /// Ids of registered subscribers in subscription order.
    pub fn subscriber_ids(&self) -> Vec<WatcherId> {
        self.inner.subs.borrow().keys().copied().collect()
    }

    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
