//! Tracking Context
//!
//! The tracking context records which watcher is currently evaluating.
//! Reads of reactive state consult it to discover "who is listening"
//! without threading a parameter through every getter.
//!
//! # Implementation
//!
//! A thread-local stack. Entering a watcher's evaluation pushes it; the
//! returned guard pops it on drop, so the stack stays balanced even if the
//! getter panics. A `None` entry suspends tracking, which is how lifecycle
//! hooks and [`untracked`] reads run.

use std::cell::RefCell;

use super::watcher::Watcher;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the tracking target when dropped.
pub struct TrackingContext {
    depth: usize,
}

impl TrackingContext {
    /// Make `target` the active watcher until the guard drops.
    ///
    /// Passing `None` suspends tracking for nested reads.
    pub fn enter(target: Option<Watcher>) -> Self {
        let depth = TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(target);
            stack.len()
        });
        Self { depth }
    }

    /// The watcher reads are currently attributed to, if any.
    pub fn current() -> Option<Watcher> {
        TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Whether reads are currently being tracked.
    pub fn is_tracking() -> bool {
        TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// Number of entries on the stack.
    pub fn depth() -> usize {
        TARGET_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "TrackingContext dropped out of order"
            );
            stack.pop();
        });
    }
}

/// Run `f` with dependency tracking suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = TrackingContext::enter(None);
    f()
}
