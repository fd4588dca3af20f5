//! Watcher Implementation
//!
//! A Watcher is a unit of reactive work: a getter that is re-evaluated when
//! any dependency it read last time changes.
//!
//! # How Watchers Work
//!
//! 1. `get()` pushes the watcher on the tracking stack and runs the getter.
//!    Every reactive read made by the getter calls back into `add_dep`,
//!    collecting a fresh dependency set.
//!
//! 2. When the getter returns, the fresh set is committed. Dependencies read
//!    last time but not this time are unsubscribed, so a branch that stops
//!    reading a field stops listening to it.
//!
//! 3. When a dependency notifies, `update()` reacts according to the mode:
//!
//!    - `lazy`: only mark dirty. The value is recomputed when next read.
//!    - `sync`: re-run immediately, bypassing the scheduler.
//!    - otherwise: enqueue in the scheduler, which runs the watcher in the
//!      next flush.
//!
//! 4. `run()` re-evaluates and, for watchers with a callback, invokes the
//!    callback with the new and old values.
//!
//! # Ordering
//!
//! Ids are handed out in creation order and the scheduler flushes in
//! ascending id order. Parents create their watchers before their children,
//! and a scope creates its user watches before its render watcher, so a
//! flush runs parents first and user watches before renders.
//!
//! # Self-notification
//!
//! Notifications a watcher receives while its own getter is running are
//! ignored, so a getter that writes what it reads never re-queues itself.
//! A write made after the read is not seen by that evaluation: the cached
//! value stays one write behind until another dependency changes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::context::{untracked, TrackingContext};
use super::dep::{Dep, DepId};
use super::object::Object;
use super::value::Value;
use crate::config;
use crate::error::{self, ReactiveError};
use crate::scheduler;
use crate::scope::{Scope, WeakScope};

/// Unique identifier for a watcher.
///
/// Ids increase monotonically, so id order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher#{}", self.0)
    }
}

/// Callback invoked with `(new, old)` when a watched value changes.
pub type WatchCallback = Box<dyn Fn(&Value, &Value)>;

/// Construction options.
#[derive(Default)]
pub struct WatcherOptions {
    /// Compute only when read.
    pub lazy: bool,
    /// Re-run immediately on notification.
    pub sync: bool,
    /// A user watch. Errors name the expression.
    pub user: bool,
    /// Track every nested field of the value.
    pub deep: bool,
    /// Invoke the callback once with the initial value.
    pub immediate: bool,
    /// Side effect run right before each scheduled re-run.
    pub before: Option<Box<dyn Fn()>>,
    /// Label used in diagnostics.
    pub expression: Option<String>,
    /// Owning scope. The watcher is torn down with it.
    pub scope: Option<Scope>,
}

impl WatcherOptions {
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            ..Self::default()
        }
    }

    pub fn sync() -> Self {
        Self {
            sync: true,
            ..Self::default()
        }
    }

    pub fn user() -> Self {
        Self {
            user: true,
            ..Self::default()
        }
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn before(mut self, before: impl Fn() + 'static) -> Self {
        self.before = Some(Box::new(before));
        self
    }

    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn in_scope(mut self, scope: &Scope) -> Self {
        self.scope = Some(scope.clone());
        self
    }
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("lazy", &self.lazy)
            .field("sync", &self.sync)
            .field("user", &self.user)
            .field("deep", &self.deep)
            .field("immediate", &self.immediate)
            .field("before", &self.before.is_some())
            .field("expression", &self.expression)
            .finish()
    }
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    getter: Box<dyn Fn() -> Value>,
    callback: Option<WatchCallback>,
    before: Option<Box<dyn Fn()>>,
    lazy: bool,
    sync: bool,
    user: bool,
    deep: bool,
    expression: Option<String>,
    scope: Option<WeakScope>,

    value: RefCell<Value>,
    dirty: Cell<bool>,
    active: Cell<bool>,
    /// Depth of in-progress getter evaluations.
    evaluating: Cell<u32>,
    /// Depth of in-progress runs, for sync loop detection.
    running: Cell<u32>,

    deps: RefCell<IndexMap<DepId, Dep>>,
    new_deps: RefCell<IndexMap<DepId, Dep>>,
}

pub(crate) type WatcherRef = Weak<WatcherInner>;

/// A reactive computation.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher.
    ///
    /// Unless `lazy`, the getter runs immediately to collect the initial
    /// dependencies and value.
    pub fn new(
        getter: impl Fn() -> Value + 'static,
        callback: Option<WatchCallback>,
        options: WatcherOptions,
    ) -> Self {
        let WatcherOptions {
            lazy,
            sync,
            user,
            deep,
            immediate: _,
            before,
            expression,
            scope,
        } = options;

        let watcher = Self {
            inner: Rc::new(WatcherInner {
                id: WatcherId::next(),
                getter: Box::new(getter),
                callback,
                before,
                lazy,
                sync,
                user,
                deep,
                expression,
                scope: scope.as_ref().map(Scope::downgrade),
                value: RefCell::new(Value::Null),
                dirty: Cell::new(lazy),
                active: Cell::new(true),
                evaluating: Cell::new(0),
                running: Cell::new(0),
                deps: RefCell::new(IndexMap::new()),
                new_deps: RefCell::new(IndexMap::new()),
            }),
        };

        if let Some(scope) = &scope {
            scope.register(&watcher);
        }
        tracing::trace!(watcher = %watcher.id(), lazy, sync, user, "watcher created");

        if !lazy {
            let value = watcher.get();
            watcher.inner.value.replace(value);
        }
        watcher
    }

    /// Create a user watch: `callback(new, old)` runs when the getter's
    /// value changes.
    ///
    /// With `immediate`, the callback also runs once right away with `Null`
    /// as the old value.
    pub fn watch(
        getter: impl Fn() -> Value + 'static,
        callback: impl Fn(&Value, &Value) + 'static,
        mut options: WatcherOptions,
    ) -> Self {
        options.user = true;
        let immediate = options.immediate;
        let watcher = Self::new(getter, Some(Box::new(callback)), options);
        if immediate {
            let value = watcher.value();
            watcher.invoke_callback(&value, &Value::Null);
        }
        watcher
    }

    /// Watch a dot-delimited path into `root`, e.g. `"user.address.city"`.
    ///
    /// Numeric segments index into arrays. A malformed path is a usage
    /// error: it is reported as a diagnostic and the watcher reads `Null`.
    pub fn watch_path(
        root: &Object,
        path: &str,
        callback: impl Fn(&Value, &Value) + 'static,
        options: WatcherOptions,
    ) -> Self {
        let options = if options.expression.is_none() {
            options.expression(path)
        } else {
            options
        };
        match parse_path(path) {
            Some(segments) => {
                let root = root.clone();
                Self::watch(move || read_path(&root, &segments), callback, options)
            }
            None => {
                error::warn(ReactiveError::InvalidWatchPath(path.to_string()));
                Self::watch(|| Value::Null, callback, options)
            }
        }
    }

    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// Evaluate the getter and re-collect dependencies.
    fn get(&self) -> Value {
        let inner = &self.inner;
        inner.evaluating.set(inner.evaluating.get() + 1);

        let value = {
            let _ctx = TrackingContext::enter(Some(self.clone()));
            let result = error::invoke(
                || (inner.getter)(),
                || self.getter_label(),
                self.scope_name(),
            );
            // A failed evaluation keeps the previous value.
            let value = result.unwrap_or_else(|| inner.value.borrow().clone());
            if inner.deep {
                super::traverse::traverse(&value);
            }
            value
        };

        self.cleanup_deps();
        inner.evaluating.set(inner.evaluating.get() - 1);
        value
    }

    /// Record a dependency read during the current evaluation.
    pub(crate) fn add_dep(&self, dep: &Dep) {
        if !self.inner.active.get() {
            return;
        }
        let id = dep.id();
        let fresh = {
            let mut new_deps = self.inner.new_deps.borrow_mut();
            if new_deps.contains_key(&id) {
                false
            } else {
                new_deps.insert(id, dep.clone());
                true
            }
        };
        if fresh && !self.inner.deps.borrow().contains_key(&id) {
            dep.add_sub(self);
        }
    }

    /// Commit the collected dependency set, unsubscribing from stale deps.
    fn cleanup_deps(&self) {
        let inner = &self.inner;
        let new_deps = inner.new_deps.take();
        let old_deps = inner.deps.replace(new_deps);
        let deps = inner.deps.borrow();
        for (id, dep) in old_deps {
            if !deps.contains_key(&id) {
                dep.remove_sub(inner.id);
            }
        }
    }

    /// React to a dependency change.
    pub fn update(&self) {
        let inner = &self.inner;
        if inner.evaluating.get() > 0 {
            tracing::trace!(watcher = %inner.id, "ignoring notification from own evaluation");
            return;
        }
        if inner.lazy {
            inner.dirty.set(true);
        } else if inner.sync {
            let limit = config::current().max_update_count;
            if inner.running.get() > limit {
                error::warn(ReactiveError::InfiniteUpdateLoop {
                    watcher: inner.id,
                    origin: self.loop_origin(),
                });
                return;
            }
            self.run();
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Re-evaluate and invoke the callback if the value changed.
    ///
    /// No-op once torn down.
    pub fn run(&self) {
        let inner = &self.inner;
        if !inner.active.get() {
            return;
        }
        inner.running.set(inner.running.get() + 1);

        let value = self.get();
        let changed = {
            let current = inner.value.borrow();
            !value.same(&current) || value.is_container() || inner.deep
        };
        if changed {
            let old = inner.value.replace(value.clone());
            self.invoke_callback(&value, &old);
        }

        inner.running.set(inner.running.get() - 1);
    }

    fn invoke_callback(&self, value: &Value, old: &Value) {
        if let Some(callback) = &self.inner.callback {
            untracked(|| {
                error::invoke(
                    || callback(value, old),
                    || format!("callback for watcher \"{}\"", self.label()),
                    self.scope_name(),
                )
            });
        }
    }

    /// Recompute a lazy watcher's value and mark it clean.
    pub fn evaluate(&self) {
        let value = self.get();
        self.inner.value.replace(value);
        self.inner.dirty.set(false);
    }

    /// Make the active watcher depend on everything this watcher depends on.
    pub fn depend(&self) {
        let deps: Vec<Dep> = self.inner.deps.borrow().values().cloned().collect();
        for dep in deps {
            dep.depend();
        }
    }

    /// Unsubscribe from every dependency and deactivate.
    ///
    /// Safe at any time, including while queued: a torn-down watcher reached
    /// by a flush does nothing.
    pub fn teardown(&self) {
        let inner = &self.inner;
        if !inner.active.get() {
            return;
        }
        if let Some(scope) = self.scope() {
            // A scope being destroyed drops its whole list at once.
            if !scope.is_being_destroyed() {
                scope.unregister(inner.id);
            }
        }
        for dep in inner.deps.take().into_values() {
            dep.remove_sub(inner.id);
        }
        for dep in inner.new_deps.take().into_values() {
            dep.remove_sub(inner.id);
        }
        inner.active.set(false);
        tracing::trace!(watcher = %inner.id, "watcher torn down");
    }

    pub(crate) fn run_before(&self) {
        if let Some(before) = &self.inner.before {
            error::invoke(
                || before(),
                || format!("before hook for watcher \"{}\"", self.label()),
                self.scope_name(),
            );
        }
    }

    /// The cached value.
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    pub fn is_sync(&self) -> bool {
        self.inner.sync
    }

    pub fn is_user(&self) -> bool {
        self.inner.user
    }

    pub fn is_deep(&self) -> bool {
        self.inner.deep
    }

    pub fn expression(&self) -> Option<&str> {
        self.inner.expression.as_deref()
    }

    /// Number of dependencies committed by the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    pub fn dependency_ids(&self) -> Vec<DepId> {
        self.inner.deps.borrow().keys().copied().collect()
    }

    /// The owning scope, if it is still alive.
    pub fn scope(&self) -> Option<Scope> {
        self.inner.scope.as_ref().and_then(WeakScope::upgrade)
    }

    fn scope_name(&self) -> Option<String> {
        self.scope().map(|scope| scope.name().to_string())
    }

    fn label(&self) -> String {
        match &self.inner.expression {
            Some(expression) => expression.clone(),
            None => self.inner.id.to_string(),
        }
    }

    fn getter_label(&self) -> String {
        if self.inner.user || self.inner.expression.is_some() {
            format!("getter for watcher \"{}\"", self.label())
        } else {
            "render".to_string()
        }
    }

    /// How a runaway loop through this watcher is described.
    pub(crate) fn loop_origin(&self) -> String {
        if self.inner.user {
            format!("in watcher with expression \"{}\"", self.label())
        } else {
            "in a component render function".to_string()
        }
    }

    pub(crate) fn downgrade(&self) -> WatcherRef {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &WatcherRef) -> Option<Watcher> {
        weak.upgrade().map(|inner| Watcher { inner })
    }

    pub fn ptr_eq(&self, other: &Watcher) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("lazy", &self.inner.lazy)
            .field("dirty", &self.inner.dirty.get())
            .field("active", &self.inner.active.get())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Split a dot-delimited path. Segments may contain word characters and `$`.
fn parse_path(path: &str) -> Option<Vec<String>> {
    if path.is_empty() {
        return None;
    }
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return None;
    }
    Some(path.split('.').map(str::to_string).collect())
}

fn read_path(root: &Object, segments: &[String]) -> Value {
    let mut current = Value::Object(root.clone());
    for segment in segments {
        current = match &current {
            Value::Object(object) => object.get(segment).unwrap_or_default(),
            Value::Array(array) => match segment.parse::<usize>() {
                Ok(index) => array.get(index).unwrap_or_default(),
                Err(_) => Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current
}
