//! Watcher Queue
//!
//! Watchers notified outside of `sync` mode are not run immediately. They
//! are collected in a per-thread queue, deduplicated by id, and run
//! together in one flush scheduled through [`next_tick`].
//!
//! # Flush Order
//!
//! The queue is sorted by ascending watcher id before a flush. This ensures
//! that:
//!
//! 1. Scopes are updated parent first, because parents create their
//!    watchers before their children do.
//! 2. A scope's user watches run before its render watcher, because they
//!    are created first.
//! 3. If a scope is destroyed while a parent's watcher runs, its own
//!    watchers are skipped: they were torn down and `run` is a no-op.
//!
//! # Re-entrant Enqueues
//!
//! A watcher notified while the queue is flushing is spliced in by id after
//! the cursor, so it still runs in the same flush. A watcher whose id the
//! flush has already passed runs right after the current one.
//!
//! # Update Loops
//!
//! A watcher re-enqueued after it already ran in the current flush is
//! counted, whether it re-triggered itself or was re-triggered by another
//! watcher. Past [`MAX_UPDATE_COUNT`](super::MAX_UPDATE_COUNT) re-entries
//! the flush is aborted with a diagnostic once the current watcher returns.
//! Watchers still queued at that point are dropped with the reset and run
//! again on their next notification.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use super::tick::next_tick;
use crate::config::{self, TickMode};
use crate::error::{self, ReactiveError};
use crate::reactive::{Watcher, WatcherId};
use crate::scope::{Hook, Scope};

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Watcher>,
    activated: Vec<Scope>,
    has: HashSet<WatcherId>,
    /// Watchers that already ran in the current flush.
    ran: HashSet<WatcherId>,
    circular: HashMap<WatcherId, u32>,
    /// First watcher found past the re-entry limit.
    runaway: Option<Watcher>,
    detect_loops: bool,
    max_update_count: u32,
    /// A flush has been requested and has not finished yet.
    waiting: bool,
    flushing: bool,
    /// Index of the watcher currently running.
    index: usize,
}

impl SchedulerState {
    fn reset(&mut self) -> (Vec<Scope>, Vec<Watcher>) {
        let activated = std::mem::take(&mut self.activated);
        let queue = std::mem::take(&mut self.queue);
        self.has.clear();
        self.ran.clear();
        self.circular.clear();
        self.runaway = None;
        self.waiting = false;
        self.flushing = false;
        self.index = 0;
        (activated, queue)
    }
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Add a watcher to the queue.
///
/// A watcher already queued is skipped. Requests one flush per cycle.
pub fn queue_watcher(watcher: Watcher) {
    let id = watcher.id();
    let request_flush = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if !state.has.insert(id) {
            return false;
        }
        if state.flushing && state.detect_loops && state.ran.contains(&id) {
            let limit = state.max_update_count;
            let count = state.circular.entry(id).or_insert(0);
            *count += 1;
            if *count > limit && state.runaway.is_none() {
                state.runaway = Some(watcher.clone());
            }
        }
        if !state.flushing {
            state.queue.push(watcher);
        } else {
            let mut i = state.queue.len();
            while i > state.index + 1 && state.queue[i - 1].id() > id {
                i -= 1;
            }
            state.queue.insert(i, watcher);
        }
        tracing::trace!(watcher = %id, queued = state.queue.len(), "watcher queued");
        !std::mem::replace(&mut state.waiting, true)
    });

    if request_flush {
        schedule_flush();
    }
}

fn schedule_flush() {
    if config::tick_mode() == TickMode::Sync {
        flush_scheduler_queue();
    } else {
        let _ = next_tick(flush_scheduler_queue);
    }
}

/// Run every queued watcher, then the post-flush hooks.
pub fn flush_scheduler_queue() {
    let config = config::current();
    let started = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing {
            return false;
        }
        state.flushing = true;
        state.detect_loops = config.detect_update_loops;
        state.max_update_count = config.max_update_count;
        state.queue.sort_by_key(Watcher::id);
        tracing::trace!(queued = state.queue.len(), "flush started");
        true
    });
    if !started {
        return;
    }
    let _unwind = ResetOnUnwind;

    let mut ran = 0usize;
    // The queue can grow while watchers run, so its length is re-read on
    // every step.
    loop {
        let next = STATE.with(|state| {
            let state = state.borrow();
            state.queue.get(state.index).cloned()
        });
        let Some(watcher) = next else {
            break;
        };

        watcher.run_before();
        let id = watcher.id();
        STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.has.remove(&id);
            state.ran.insert(id);
        });
        watcher.run();
        ran += 1;

        let runaway = STATE.with(|state| state.borrow_mut().runaway.take());
        if let Some(offender) = runaway {
            error::warn(ReactiveError::InfiniteUpdateLoop {
                watcher: offender.id(),
                origin: offender.loop_origin(),
            });
            break;
        }

        STATE.with(|state| state.borrow_mut().index += 1);
    }

    let (activated, updated) = STATE.with(|state| state.borrow_mut().reset());
    tracing::trace!(ran, "flush finished");

    call_activated_hooks(&activated);
    call_updated_hooks(&updated);
}

/// Resets the scheduler if a flush unwinds, so the thread can flush again.
struct ResetOnUnwind;

impl Drop for ResetOnUnwind {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        STATE.with(|state| {
            if let Ok(mut state) = state.try_borrow_mut() {
                state.reset();
            }
        });
        tracing::warn!("flush unwound, scheduler state reset");
    }
}

fn call_activated_hooks(scopes: &[Scope]) {
    for scope in scopes {
        scope.set_inactive(true);
        scope.activate();
    }
}

fn call_updated_hooks(watchers: &[Watcher]) {
    for watcher in watchers.iter().rev() {
        if let Some(scope) = watcher.scope() {
            if scope.is_render_watcher(watcher) && scope.is_mounted() && !scope.is_destroyed() {
                scope.call_hook(Hook::Updated);
            }
        }
    }
}

/// Queue a kept-alive scope activated during an update.
///
/// Its `Activated` hooks run after the current (or next) flush has
/// settled. The scope is marked active right away so renders can check
/// whether they are in an inactive tree.
pub fn queue_activated_scope(scope: &Scope) {
    scope.set_inactive(false);
    let request_flush = STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.activated.push(scope.clone());
        !std::mem::replace(&mut state.waiting, true)
    });
    if request_flush {
        schedule_flush();
    }
}

/// Whether a flush is in progress on this thread.
pub fn is_flushing() -> bool {
    STATE.with(|state| state.borrow().flushing)
}

/// Ids of watchers waiting to run, in queue order.
pub fn pending_watchers() -> Vec<WatcherId> {
    STATE.with(|state| {
        let state = state.borrow();
        let start = if state.flushing { state.index + 1 } else { 0 };
        state.queue.iter().skip(start).map(Watcher::id).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{observe, Object, Value, WatcherOptions};
    use crate::scheduler::run_until_idle;
    use std::rc::Rc;

    fn log_watcher(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str, obj: &Object) -> Watcher {
        let log = log.clone();
        let o = obj.clone();
        Watcher::new(
            move || {
                log.borrow_mut().push(name);
                o.get("n").unwrap_or_default()
            },
            None,
            WatcherOptions::default(),
        )
    }

    fn state() -> Object {
        let obj = Object::new().with("n", 0);
        observe(&obj.clone().into());
        obj
    }

    #[test]
    fn duplicate_notifications_queue_once() {
        let obj = state();
        let log = Rc::new(RefCell::new(Vec::new()));
        let w = log_watcher(&log, "w", &obj);
        log.borrow_mut().clear();

        obj.set("n", 1);
        obj.set("n", 2);
        obj.set("n", 3);
        assert_eq!(pending_watchers(), vec![w.id()]);

        run_until_idle();
        assert_eq!(*log.borrow(), vec!["w"]);
        assert!(pending_watchers().is_empty());
    }

    #[test]
    fn flush_runs_in_id_order() {
        let obj = state();
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = log_watcher(&log, "first", &obj);
        let second = log_watcher(&log, "second", &obj);
        log.borrow_mut().clear();

        queue_watcher(second.clone());
        queue_watcher(first.clone());
        run_until_idle();

        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn torn_down_watcher_is_skipped() {
        let obj = state();
        let log = Rc::new(RefCell::new(Vec::new()));
        let w = log_watcher(&log, "w", &obj);
        log.borrow_mut().clear();

        obj.set("n", 1);
        w.teardown();
        run_until_idle();

        assert!(log.borrow().is_empty());
    }

    #[test]
    fn state_resets_after_flush() {
        let obj = state();
        let log = Rc::new(RefCell::new(Vec::new()));
        let _w = log_watcher(&log, "w", &obj);

        obj.set("n", 1);
        run_until_idle();
        assert!(!is_flushing());

        obj.set("n", 2);
        assert_eq!(pending_watchers().len(), 1);
        run_until_idle();
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn unwinding_flush_leaves_scheduler_usable() {
        let obj = state();
        let log = Rc::new(RefCell::new(Vec::new()));
        let _w = log_watcher(&log, "w", &obj);
        log.borrow_mut().clear();

        STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.flushing = true;
            state.waiting = true;
        });
        let unwound = std::panic::catch_unwind(|| {
            let _unwind = ResetOnUnwind;
            panic!("flush interrupted");
        });
        assert!(unwound.is_err());
        assert!(!is_flushing());

        obj.set("n", 1);
        run_until_idle();
        assert_eq!(*log.borrow(), vec!["w"]);
    }

    #[test]
    fn sync_tick_mode_flushes_immediately() {
        let previous = config::current();
        config::configure(|c| c.tick_mode = TickMode::Sync);

        let obj = state();
        let o = obj.clone();
        let w = Watcher::new(move || o.get("n").unwrap_or_default(), None, WatcherOptions::default());
        obj.set("n", 4);
        assert_eq!(w.value(), Value::from(4));

        config::configure(|c| *c = previous);
    }
}
