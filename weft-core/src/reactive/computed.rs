//! Computed Values
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. The backing watcher is lazy: creating a computed does not run it.
//!
//! 2. On read, a dirty computed re-runs its getter and caches the result.
//!    A clean computed returns the cache.
//!
//! 3. When a dependency changes, the watcher is only marked dirty. Nothing
//!    recomputes until someone reads the value again.
//!
//! 4. A read inside another watcher's evaluation makes that watcher depend
//!    on everything the computed depends on, so chains of computeds
//!    propagate without subscribing to the computed itself.

use std::fmt;
use std::rc::Rc;

use super::context::TrackingContext;
use super::value::Value;
use super::watcher::{Watcher, WatcherOptions};
use crate::error::{self, ReactiveError};
use crate::scope::Scope;

/// A cached derived value.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
    setter: Option<Rc<dyn Fn(Value)>>,
}

impl Computed {
    /// Create a read-only computed.
    pub fn new(getter: impl Fn() -> Value + 'static) -> Self {
        Self::build(getter, None, WatcherOptions::lazy())
    }

    /// Create a computed whose writes are forwarded to `setter`.
    pub fn with_setter(
        getter: impl Fn() -> Value + 'static,
        setter: impl Fn(Value) + 'static,
    ) -> Self {
        Self::build(getter, Some(Rc::new(setter)), WatcherOptions::lazy())
    }

    pub(crate) fn in_scope(
        scope: &Scope,
        name: &str,
        getter: impl Fn() -> Value + 'static,
        setter: Option<Rc<dyn Fn(Value)>>,
    ) -> Self {
        let options = WatcherOptions::lazy().expression(name).in_scope(scope);
        Self::build(getter, setter, options)
    }

    fn build(
        getter: impl Fn() -> Value + 'static,
        setter: Option<Rc<dyn Fn(Value)>>,
        options: WatcherOptions,
    ) -> Self {
        Self {
            watcher: Watcher::new(getter, None, options),
            setter,
        }
    }

    /// Read the value, recomputing it if a dependency changed.
    pub fn get(&self) -> Value {
        if self.watcher.is_dirty() {
            self.watcher.evaluate();
        }
        if TrackingContext::is_tracking() {
            self.watcher.depend();
        }
        self.watcher.value()
    }

    /// Write through the setter.
    ///
    /// Without a setter this is a usage error reported as a diagnostic.
    pub fn set(&self, value: impl Into<Value>) {
        match &self.setter {
            Some(setter) => setter(value.into()),
            None => {
                let name = self
                    .watcher
                    .expression()
                    .map(str::to_string)
                    .unwrap_or_else(|| self.watcher.id().to_string());
                error::warn(ReactiveError::MissingSetter(name));
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// The backing lazy watcher.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    pub fn teardown(&self) {
        self.watcher.teardown();
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("watcher", &self.watcher)
            .field("has_setter", &self.setter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::reactive::{observe, Object};
    use std::cell::{Cell, RefCell};

    fn counter() -> Object {
        let obj = Object::new().with("count", 1);
        observe(&obj.clone().into());
        obj
    }

    #[test]
    fn computed_is_lazy_and_cached() {
        let obj = counter();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let o = obj.clone();
        let doubled = Computed::new(move || {
            r.set(r.get() + 1);
            Value::from(o.get("count").and_then(|v| v.as_f64()).unwrap_or(0.0) * 2.0)
        });

        assert_eq!(runs.get(), 0);
        assert_eq!(doubled.get(), Value::from(2));
        assert_eq!(doubled.get(), Value::from(2));
        assert_eq!(runs.get(), 1);

        obj.set("count", 5);
        assert!(doubled.is_dirty());
        assert_eq!(runs.get(), 1);
        assert_eq!(doubled.get(), Value::from(10));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn chained_computed_propagates_to_reader() {
        let obj = counter();
        let o = obj.clone();
        let base = Computed::new(move || o.get("count").unwrap_or_default());
        let b = base.clone();
        let plus_one = Computed::new(move || Value::from(b.get().as_f64().unwrap_or(0.0) + 1.0));

        let p = plus_one.clone();
        let reader = Watcher::new(move || p.get(), None, WatcherOptions::sync());
        assert_eq!(reader.value(), Value::from(2));

        obj.set("count", 7);
        assert_eq!(reader.value(), Value::from(8));
    }

    #[test]
    fn setter_receives_writes() {
        let obj = counter();
        let o = obj.clone();
        let target = obj.clone();
        let computed = Computed::with_setter(
            move || o.get("count").unwrap_or_default(),
            move |v| target.set("count", v),
        );

        computed.set(42);
        assert_eq!(computed.get(), Value::from(42));
    }

    #[test]
    fn missing_setter_warns() {
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        let _guard = config::scoped_warn_handler(move |e| sink.borrow_mut().push(e.to_string()));
        config::configure(|c| c.diagnostics = true);

        let computed = Computed::new(|| Value::Null);
        computed.set(1);
        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("no setter"));
    }
}
