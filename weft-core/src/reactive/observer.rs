//! Collection Observer
//!
//! `observe` turns a plain container into a reactive one: it attaches an
//! [`Observer`] (the container's back-reference and shape dependency) and
//! installs interceptors on every field, recursing into nested containers.
//!
//! Containers marked raw, frozen, or closed to extension are left alone.
//! Wrapping is idempotent: a container that already carries an observer is
//! returned as-is.
//!
//! Fields added after the initial wrap are only reactive if they go through
//! [`set`]; removals that should notify go through [`del`].

use std::cell::{Cell, OnceCell};
use std::fmt;

use super::context::TrackingContext;
use super::dep::Dep;
use super::value::Value;
use crate::error::{self, ReactiveError};

/// Back-reference attached to an observed container.
///
/// Owns the container's shape dependency, which fires when membership or
/// order changes (keys added or removed, array mutations).
#[derive(Clone)]
pub struct Observer {
    dep: Dep,
}

impl Observer {
    fn new() -> Self {
        Self { dep: Dep::new() }
    }

    /// The shape dependency.
    pub fn dep(&self) -> &Dep {
        &self.dep
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").field("dep", &self.dep).finish()
    }
}

/// Per-container reactive state shared by [`Object`](super::Object) and
/// [`Array`](super::Array).
#[derive(Default)]
pub(crate) struct ObserverSlot {
    observer: OnceCell<Observer>,
    frozen: Cell<bool>,
    sealed: Cell<bool>,
    raw: Cell<bool>,
}

impl ObserverSlot {
    pub(crate) fn observer(&self) -> Option<Observer> {
        self.observer.get().cloned()
    }

    pub(crate) fn is_observed(&self) -> bool {
        self.observer.get().is_some()
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    pub(crate) fn freeze(&self) {
        self.frozen.set(true);
        self.sealed.set(true);
    }

    pub(crate) fn is_extensible(&self) -> bool {
        !self.sealed.get()
    }

    pub(crate) fn prevent_extensions(&self) {
        self.sealed.set(true);
    }

    pub(crate) fn is_raw(&self) -> bool {
        self.raw.get()
    }

    pub(crate) fn mark_raw(&self) {
        self.raw.set(true);
    }

    /// Register the shape dependency with the active watcher.
    pub(crate) fn depend(&self) {
        if let Some(ob) = self.observer.get() {
            if TrackingContext::is_tracking() {
                ob.dep.depend();
            }
        }
    }

    pub(crate) fn notify(&self) {
        if let Some(ob) = self.observer.get() {
            ob.dep.notify();
        }
    }
}

/// Make `value` reactive.
///
/// Returns the container's observer, or `None` for scalars and for
/// containers that are raw, frozen, or closed to extension. Observing a
/// frozen container emits a diagnostic.
pub fn observe(value: &Value) -> Option<Observer> {
    observe_value(value, true)
}

pub(crate) fn observe_value(value: &Value, warn_frozen: bool) -> Option<Observer> {
    let slot = match value {
        Value::Object(o) => o.slot(),
        Value::Array(a) => a.slot(),
        _ => return None,
    };

    if let Some(ob) = slot.observer() {
        return Some(ob);
    }
    if slot.is_raw() {
        return None;
    }
    if slot.is_frozen() {
        if warn_frozen {
            error::warn(ReactiveError::Unobservable(value.type_name()));
        }
        return None;
    }
    if !slot.is_extensible() {
        return None;
    }

    // Attach before walking so cyclic graphs terminate.
    let ob = Observer::new();
    let ob = slot.observer.get_or_init(|| ob).clone();

    match value {
        Value::Object(o) => {
            for (_, property) in o.properties() {
                property.intercept();
                observe_value(&property.peek(), false);
            }
        }
        Value::Array(a) => {
            for item in a.peek_all() {
                observe_value(&item, false);
            }
        }
        _ => {}
    }

    tracing::trace!(dep = %ob.dep.id(), kind = value.type_name(), "observed container");
    Some(ob)
}

/// Register the shape dependency of every container nested in `items`.
///
/// Array elements are not intercepted individually, so a watcher that reads
/// an array through a field must also hear about mutations of the
/// containers inside it.
pub(crate) fn depend_array(items: &[Value]) {
    for item in items {
        match item {
            Value::Object(o) => o.slot().depend(),
            Value::Array(a) => {
                a.slot().depend();
                depend_array(&a.peek_all());
            }
            _ => {}
        }
    }
}

/// Key for [`set`] and [`del`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Field(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Field(key)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// Set a property on a container, adding it reactively if it is new.
///
/// - Array index: the array is padded with `Null` up to the index and the
///   element is written through the instrumented splice, so the shape
///   dependency fires once and the new element is observed.
/// - Existing field: assigned through its interceptor.
/// - New field on an observed object: an interceptor is installed, the value
///   observed, and the shape dependency notified.
/// - New field on an unobserved object: plain insertion.
///
/// Returns `value`. Scalar targets and mismatched keys are diagnostics.
pub fn set(target: &Value, key: impl Into<Key>, value: Value) -> Value {
    match (target, key.into()) {
        (Value::Array(array), Key::Index(index)) => {
            array.assign(index, value.clone());
        }
        (Value::Object(object), Key::Field(field)) => {
            if let Some(property) = object.property(&field) {
                property.set(value.clone());
            } else if object.is_frozen() || !object.is_extensible() {
                error::warn(ReactiveError::FrozenContainer("object"));
            } else if object.is_reactive() {
                object.define_reactive(field, value.clone());
                object.slot().notify();
            } else {
                object.insert_plain(field, value.clone());
            }
        }
        (target, key) => {
            error::warn(ReactiveError::InvalidTarget {
                action: "set",
                target: format!("{} with key {:?}", target.type_name(), key),
            });
        }
    }
    value
}

/// Delete a property.
///
/// If it existed, readers of the field and of the object's shape are
/// notified. A field reader re-runs, finds the key missing and from then on
/// depends on the shape, so re-adding the key reaches it.
pub fn del(target: &Value, key: impl Into<Key>) {
    match (target, key.into()) {
        (Value::Array(array), Key::Index(index)) => {
            if index < array.peek_len() {
                array.splice(index, 1, Vec::new());
            }
        }
        (Value::Object(object), Key::Field(field)) => {
            if object.is_frozen() {
                error::warn(ReactiveError::FrozenContainer("object"));
                return;
            }
            let Some(property) = object.property(&field) else {
                return;
            };
            object.remove_plain(&field);
            if let Some(dep) = property.dep() {
                dep.notify();
            }
            object.slot().notify();
        }
        (target, key) => {
            error::warn(ReactiveError::InvalidTarget {
                action: "delete",
                target: format!("{} with key {:?}", target.type_name(), key),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::reactive::{Array, Object, Watcher, WatcherOptions};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn counting_watcher(read: impl Fn() + 'static) -> (Watcher, Rc<Cell<u32>>) {
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let w = Watcher::new(
            move || {
                r.set(r.get() + 1);
                read();
                Value::Null
            },
            None,
            WatcherOptions::sync(),
        );
        (w, runs)
    }

    #[test]
    fn observe_ignores_scalars() {
        assert!(observe(&Value::from(1)).is_none());
        assert!(observe(&Value::Null).is_none());
    }

    #[test]
    fn observe_is_idempotent() {
        let obj = Object::new().with("a", 1).with("b", Object::new().with("c", 2));
        let value = Value::from(obj.clone());

        let first = observe(&value).unwrap();
        let dep_a = obj.property("a").unwrap().dep().unwrap().id();
        let second = observe(&value).unwrap();

        assert!(first.dep().ptr_eq(second.dep()));
        assert_eq!(obj.property("a").unwrap().dep().unwrap().id(), dep_a);
    }

    #[test]
    fn observe_wraps_nested_containers_eagerly() {
        let inner = Object::new().with("c", 2);
        let list = Array::from(vec![Value::from(Object::new())]);
        let obj = Object::new().with("b", inner.clone()).with("list", list.clone());

        observe(&obj.clone().into());

        assert!(inner.is_reactive());
        assert!(list.is_reactive());
        assert!(list.peek(0).unwrap().as_object().unwrap().is_reactive());
    }

    #[test]
    fn observe_terminates_on_cycles() {
        let obj = Object::new();
        obj.set("me", obj.clone());
        assert!(observe(&obj.clone().into()).is_some());
        assert!(obj.is_reactive());
    }

    #[test]
    fn frozen_and_raw_containers_are_skipped() {
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        let _guard = config::scoped_warn_handler(move |e| sink.borrow_mut().push(e.to_string()));
        config::configure(|c| c.diagnostics = true);

        let frozen = Object::new().with("a", 1);
        frozen.freeze();
        let raw = Object::new().with("a", 1);
        raw.mark_raw();

        assert!(observe(&frozen.clone().into()).is_none());
        assert!(observe(&raw.clone().into()).is_none());
        assert!(!frozen.is_reactive());
        assert!(!raw.is_reactive());
        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("frozen"));
    }

    #[test]
    fn set_adds_reactive_field_and_notifies_shape() {
        let obj = Object::new().with("a", 1);
        observe(&obj.clone().into());

        let o = obj.clone();
        let (_w, runs) = counting_watcher(move || {
            o.get("b");
        });
        assert_eq!(runs.get(), 1);

        let nested = Object::new().with("x", 1);
        set(&obj.clone().into(), "b", nested.clone().into());

        assert_eq!(runs.get(), 2);
        assert!(obj.property("b").unwrap().is_reactive());
        assert!(nested.is_reactive());
    }

    #[test]
    fn set_existing_field_goes_through_interceptor() {
        let obj = Object::new().with("a", 1);
        observe(&obj.clone().into());
        let o = obj.clone();
        let (_w, runs) = counting_watcher(move || {
            o.get("a");
        });

        set(&obj.clone().into(), "a", Value::from(2));
        set(&obj.clone().into(), "a", Value::from(2));

        assert_eq!(runs.get(), 2);
        assert_eq!(obj.peek("a"), Some(Value::from(2)));
    }

    #[test]
    fn set_on_plain_object_is_plain_insert() {
        let obj = Object::new();
        set(&obj.clone().into(), "a", Value::from(1));
        assert_eq!(obj.peek("a"), Some(Value::from(1)));
        assert!(!obj.property("a").unwrap().is_reactive());
    }

    #[test]
    fn set_array_index_beyond_length_pads_and_notifies_once() {
        let list = Array::from(vec![Value::from(1)]);
        observe(&list.clone().into());
        let l = list.clone();
        let (_w, runs) = counting_watcher(move || {
            l.len();
        });

        set(&list.clone().into(), 3usize, Value::from(9));

        assert_eq!(runs.get(), 2);
        assert_eq!(
            list.peek_all(),
            vec![Value::from(1), Value::Null, Value::Null, Value::from(9)]
        );
    }

    #[test]
    fn del_notifies_only_when_key_existed() {
        let obj = Object::new().with("a", 1);
        observe(&obj.clone().into());
        let o = obj.clone();
        let (_w, runs) = counting_watcher(move || {
            o.keys();
        });

        del(&obj.clone().into(), "missing");
        assert_eq!(runs.get(), 1);

        del(&obj.clone().into(), "a");
        assert_eq!(runs.get(), 2);
        assert!(obj.peek("a").is_none());
    }

    #[test]
    fn del_notifies_direct_field_readers() {
        let obj = Object::new().with("a", 1);
        observe(&obj.clone().into());
        let o = obj.clone();
        let (_w, runs) = counting_watcher(move || {
            o.get("a");
        });

        del(&obj.clone().into(), "a");
        assert!(runs.get() >= 2);

        let before = runs.get();
        set(&obj.clone().into(), "a", Value::from(5));
        assert!(runs.get() > before);

        let before = runs.get();
        obj.set("a", 6);
        assert_eq!(runs.get(), before + 1);
    }

    #[test]
    fn del_array_index_splices() {
        let list = Array::from(vec![Value::from(1), Value::from(2)]);
        observe(&list.clone().into());
        del(&list.clone().into(), 0usize);
        del(&list.clone().into(), 5usize);
        assert_eq!(list.peek_all(), vec![Value::from(2)]);
    }

    #[test]
    fn set_on_scalar_warns() {
        let warnings = Rc::new(Cell::new(0));
        let sink = warnings.clone();
        let _guard = config::scoped_warn_handler(move |_| sink.set(sink.get() + 1));
        config::configure(|c| c.diagnostics = true);

        let result = set(&Value::from(1), "a", Value::from(2));
        del(&Value::Null, "a");
        set(&Array::new().into(), "a", Value::from(2));

        assert_eq!(result, Value::from(2));
        assert_eq!(warnings.get(), 3);
    }
}
