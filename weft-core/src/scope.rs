//! Scopes
//!
//! A [`Scope`] is the lifecycle owner the reactive core reports to. It plays
//! the part of a component instance: it owns the watchers created for it,
//! at most one render watcher, child scopes, and lifecycle hooks.
//!
//! # Lifecycle
//!
//! 1. `mount(render)` creates the render watcher and calls `Mounted` hooks.
//! 2. When the render watcher is re-run by a flush, `BeforeUpdate` hooks run
//!    right before it and `Updated` hooks after the whole flush.
//! 3. `destroy()` calls `BeforeDestroy`, tears down every owned watcher,
//!    destroys the children, then calls `Destroyed`.
//!
//! Kept-alive scopes can additionally be deactivated and re-activated,
//! which calls `Deactivated` / `Activated` on the scope and on every child
//! that was not deactivated on its own.
//!
//! Hooks run with tracking suspended, and a panicking hook is reported to
//! the error handler without affecting the others.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error;
use crate::reactive::{untracked, Computed, Object, Value, Watcher, WatcherId, WatcherOptions};

/// Lifecycle hook kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Mounted,
    BeforeUpdate,
    Updated,
    Activated,
    Deactivated,
    BeforeDestroy,
    Destroyed,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Mounted => "mounted",
            Hook::BeforeUpdate => "beforeUpdate",
            Hook::Updated => "updated",
            Hook::Activated => "activated",
            Hook::Deactivated => "deactivated",
            Hook::BeforeDestroy => "beforeDestroy",
            Hook::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Unique identifier for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type HookFn = Rc<dyn Fn()>;

struct ScopeInner {
    id: ScopeId,
    name: String,
    parent: Option<WeakScope>,
    children: RefCell<Vec<Scope>>,
    watchers: RefCell<Vec<Watcher>>,
    render_watcher: RefCell<Option<Watcher>>,
    hooks: RefCell<HashMap<Hook, Vec<HookFn>>>,

    mounted: Cell<bool>,
    being_destroyed: Cell<bool>,
    destroyed: Cell<bool>,
    /// `None` until the scope is first activated or deactivated.
    inactive: Cell<Option<bool>>,
    direct_inactive: Cell<bool>,
}

/// A lifecycle owner for watchers.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

/// Non-owning handle to a [`Scope`].
#[derive(Clone)]
pub struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(|inner| Scope { inner })
    }
}

impl Scope {
    /// Create a root scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_parent(name.into(), None)
    }

    /// Create a child scope.
    ///
    /// Create children after the parent's own watchers so that flushes run
    /// the parent first.
    pub fn child(&self, name: impl Into<String>) -> Scope {
        let child = Self::with_parent(name.into(), Some(self.downgrade()));
        self.inner.children.borrow_mut().push(child.clone());
        child
    }

    fn with_parent(name: String, parent: Option<WeakScope>) -> Self {
        let scope = Self {
            inner: Rc::new(ScopeInner {
                id: ScopeId::next(),
                name,
                parent,
                children: RefCell::new(Vec::new()),
                watchers: RefCell::new(Vec::new()),
                render_watcher: RefCell::new(None),
                hooks: RefCell::new(HashMap::new()),
                mounted: Cell::new(false),
                being_destroyed: Cell::new(false),
                destroyed: Cell::new(false),
                inactive: Cell::new(None),
                direct_inactive: Cell::new(false),
            }),
        };
        tracing::debug!(scope = %scope.inner.name, "scope created");
        scope
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.as_ref().and_then(WeakScope::upgrade)
    }

    pub fn children(&self) -> Vec<Scope> {
        self.inner.children.borrow().clone()
    }

    /// Register a lifecycle hook.
    pub fn on(&self, hook: Hook, f: impl Fn() + 'static) {
        self.inner
            .hooks
            .borrow_mut()
            .entry(hook)
            .or_default()
            .push(Rc::new(f));
    }

    pub(crate) fn call_hook(&self, hook: Hook) {
        let handlers = self.inner.hooks.borrow().get(&hook).cloned().unwrap_or_default();
        tracing::debug!(scope = %self.inner.name, %hook, handlers = handlers.len(), "calling hook");
        untracked(|| {
            for handler in handlers {
                error::invoke(
                    || handler(),
                    || format!("{} hook", hook),
                    Some(self.inner.name.clone()),
                );
            }
        });
    }

    /// Create a user watch owned by this scope.
    pub fn watch(
        &self,
        getter: impl Fn() -> Value + 'static,
        callback: impl Fn(&Value, &Value) + 'static,
        options: WatcherOptions,
    ) -> Watcher {
        Watcher::watch(getter, callback, options.in_scope(self))
    }

    /// Watch a dot-delimited path into `root`, owned by this scope.
    pub fn watch_path(
        &self,
        root: &Object,
        path: &str,
        callback: impl Fn(&Value, &Value) + 'static,
        options: WatcherOptions,
    ) -> Watcher {
        Watcher::watch_path(root, path, callback, options.in_scope(self))
    }

    /// Create a computed owned by this scope.
    pub fn computed(&self, name: &str, getter: impl Fn() -> Value + 'static) -> Computed {
        Computed::in_scope(self, name, getter, None)
    }

    /// Create a writable computed owned by this scope.
    pub fn computed_with_setter(
        &self,
        name: &str,
        getter: impl Fn() -> Value + 'static,
        setter: impl Fn(Value) + 'static,
    ) -> Computed {
        Computed::in_scope(self, name, getter, Some(Rc::new(setter)))
    }

    /// Create the render watcher and mark the scope mounted.
    ///
    /// `render` runs now and again, batched, whenever something it read
    /// changes. Mounting again replaces the previous render watcher.
    pub fn mount(&self, render: impl Fn() + 'static) -> Watcher {
        if let Some(previous) = self.inner.render_watcher.take() {
            previous.teardown();
        }

        let weak = self.downgrade();
        let options = WatcherOptions::default()
            .before(move || {
                if let Some(scope) = weak.upgrade() {
                    if scope.is_mounted() && !scope.is_destroyed() {
                        scope.call_hook(Hook::BeforeUpdate);
                    }
                }
            })
            .in_scope(self);
        let watcher = Watcher::new(
            move || {
                render();
                Value::Null
            },
            None,
            options,
        );
        self.inner.render_watcher.replace(Some(watcher.clone()));

        if !self.inner.mounted.replace(true) {
            self.call_hook(Hook::Mounted);
        }
        watcher
    }

    /// Queue the render watcher as if something it read had changed.
    pub fn force_update(&self) {
        let watcher = self.inner.render_watcher.borrow().clone();
        if let Some(watcher) = watcher {
            watcher.update();
        }
    }

    /// Tear the scope down. Idempotent.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.being_destroyed.get() {
            return;
        }
        self.call_hook(Hook::BeforeDestroy);
        inner.being_destroyed.set(true);

        if let Some(parent) = self.parent() {
            if !parent.is_being_destroyed() {
                parent
                    .inner
                    .children
                    .borrow_mut()
                    .retain(|child| !child.ptr_eq(self));
            }
        }

        let watchers = inner.watchers.take();
        for watcher in &watchers {
            watcher.teardown();
        }
        inner.destroyed.set(true);

        let children = inner.children.take();
        for child in &children {
            child.destroy();
        }

        self.call_hook(Hook::Destroyed);
        inner.hooks.borrow_mut().clear();
        inner.render_watcher.take();
        tracing::debug!(scope = %inner.name, watchers = watchers.len(), "scope destroyed");
    }

    /// Deactivate a kept-alive scope and its subtree.
    pub fn deactivate(&self) {
        self.deactivate_child(true);
    }

    /// Activate a kept-alive scope and its subtree, unless an ancestor is
    /// still inactive.
    pub fn activate(&self) {
        self.activate_child(true);
    }

    fn activate_child(&self, direct: bool) {
        let inner = &self.inner;
        if direct {
            inner.direct_inactive.set(false);
            if self.in_inactive_tree() {
                return;
            }
        } else if inner.direct_inactive.get() {
            return;
        }
        if inner.inactive.get() != Some(false) {
            inner.inactive.set(Some(false));
            for child in self.children() {
                child.activate_child(false);
            }
            self.call_hook(Hook::Activated);
        }
    }

    fn deactivate_child(&self, direct: bool) {
        let inner = &self.inner;
        if direct {
            inner.direct_inactive.set(true);
            if self.in_inactive_tree() {
                return;
            }
        }
        if inner.inactive.get() != Some(true) {
            inner.inactive.set(Some(true));
            for child in self.children() {
                child.deactivate_child(false);
            }
            self.call_hook(Hook::Deactivated);
        }
    }

    fn in_inactive_tree(&self) -> bool {
        let mut current = self.parent();
        while let Some(scope) = current {
            if scope.inner.inactive.get() == Some(true) {
                return true;
            }
            current = scope.parent();
        }
        false
    }

    pub(crate) fn set_inactive(&self, inactive: bool) {
        self.inner.inactive.set(Some(inactive));
    }

    pub fn is_inactive(&self) -> bool {
        self.inner.inactive.get() == Some(true)
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.inner.being_destroyed.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// The render watcher, once mounted.
    pub fn render_watcher(&self) -> Option<Watcher> {
        self.inner.render_watcher.borrow().clone()
    }

    /// Ids of the live watchers owned by this scope, in creation order.
    pub fn watcher_ids(&self) -> Vec<WatcherId> {
        self.inner.watchers.borrow().iter().map(Watcher::id).collect()
    }

    pub(crate) fn register(&self, watcher: &Watcher) {
        self.inner.watchers.borrow_mut().push(watcher.clone());
    }

    pub(crate) fn unregister(&self, id: WatcherId) {
        self.inner.watchers.borrow_mut().retain(|w| w.id() != id);
    }

    pub(crate) fn is_render_watcher(&self, watcher: &Watcher) -> bool {
        self.inner
            .render_watcher
            .borrow()
            .as_ref()
            .is_some_and(|render| render.ptr_eq(watcher))
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope(Rc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("mounted", &self.inner.mounted.get())
            .field("destroyed", &self.inner.destroyed.get())
            .field("watchers", &self.inner.watchers.borrow().len())
            .finish()
    }
}
