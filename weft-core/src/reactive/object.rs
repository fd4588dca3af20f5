//! Reactive Objects
//!
//! An [`Object`] is an ordered map of named fields. Each field lives in a
//! [`Property`], the accessor that performs interception once the object
//! has been observed: reads register the active watcher, writes notify.
//!
//! Before observation an object behaves like plain data. Writes to fields
//! that do not exist yet are plain insertions even on observed objects; use
//! [`set`](super::set) to add a field that should be tracked.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::context::TrackingContext;
use super::dep::Dep;
use super::observer::{observe_value, Observer, ObserverSlot};
use super::value::Value;
use crate::error::{self, ReactiveError};

/// Accessor for one field.
///
/// Holds the current value and, once intercepted, the field's dependency.
pub struct Property {
    value: RefCell<Value>,
    dep: OnceCell<Dep>,
    frozen: Cell<bool>,
}

impl Property {
    fn plain(value: Value) -> Self {
        Self {
            value: RefCell::new(value),
            dep: OnceCell::new(),
            frozen: Cell::new(false),
        }
    }

    fn reactive(value: Value) -> Self {
        let property = Self::plain(value);
        property.intercept();
        property
    }

    /// Install interception. Idempotent.
    pub(crate) fn intercept(&self) -> &Dep {
        self.dep.get_or_init(Dep::new)
    }

    /// Whether reads and writes of this field are intercepted.
    pub fn is_reactive(&self) -> bool {
        self.dep.get().is_some()
    }

    /// The field's dependency, if intercepted.
    pub fn dep(&self) -> Option<&Dep> {
        self.dep.get()
    }

    /// Read the value.
    ///
    /// When intercepted and a watcher is evaluating, registers the field
    /// dependency and the shape dependency of a container value. A plain
    /// container value is observed on first read.
    pub fn get(&self) -> Value {
        let value = self.value.borrow().clone();
        if let Some(dep) = self.dep.get() {
            let child = observe_value(&value, false);
            if TrackingContext::is_tracking() {
                dep.depend();
                if let Some(child) = child {
                    child.dep().depend();
                    if let Value::Array(items) = &value {
                        super::observer::depend_array(&items.peek_all());
                    }
                }
            }
        }
        value
    }

    /// Read the value without tracking.
    pub fn peek(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Write the value.
    ///
    /// Writing the same value is a no-op. Intercepted fields observe the new
    /// value and notify their dependency.
    pub fn set(&self, value: Value) {
        if self.frozen.get() {
            error::warn(ReactiveError::FrozenContainer("object"));
            return;
        }
        if self.value.borrow().same(&value) {
            return;
        }
        match self.dep.get() {
            Some(dep) => {
                observe_value(&value, false);
                self.value.replace(value);
                dep.notify();
            }
            None => {
                self.value.replace(value);
            }
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &self.value.borrow().type_name())
            .field("reactive", &self.is_reactive())
            .finish()
    }
}

struct ObjectInner {
    fields: RefCell<IndexMap<String, Rc<Property>>>,
    slot: ObserverSlot,
}

/// A shared, ordered, string-keyed container.
#[derive(Clone)]
pub struct Object {
    inner: Rc<ObjectInner>,
}

impl Object {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                fields: RefCell::new(IndexMap::new()),
                slot: ObserverSlot::default(),
            }),
        }
    }

    /// Builder-style plain insertion.
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Read a field.
    ///
    /// A missing field reads as `None`; on an observed object the read then
    /// depends on the object's shape, so a later [`set`](super::set) of that
    /// key re-runs the reader.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.property(key) {
            Some(property) => Some(property.get()),
            None => {
                self.inner.slot.depend();
                None
            }
        }
    }

    /// Read a field without tracking.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.property(key).map(|p| p.peek())
    }

    /// Write a field.
    ///
    /// Existing fields are written through their accessor. A missing field
    /// is inserted as plain data without notification.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.property(&key) {
            Some(property) => property.set(value),
            None => {
                if !self.is_extensible() {
                    error::warn(ReactiveError::FrozenContainer("object"));
                    return;
                }
                tracing::trace!(key = %key, "plain insertion, field is not tracked");
                self.insert_plain(key, value);
            }
        }
    }

    /// Remove a field without notification.
    pub fn remove(&self, key: &str) -> Option<Value> {
        if self.is_frozen() {
            error::warn(ReactiveError::FrozenContainer("object"));
            return None;
        }
        self.remove_plain(key)
    }

    /// Whether the field exists. Tracks the object's shape.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.slot.depend();
        self.inner.fields.borrow().contains_key(key)
    }

    /// Field names in insertion order. Tracks the object's shape.
    pub fn keys(&self) -> Vec<String> {
        self.inner.slot.depend();
        self.peek_keys()
    }

    /// Field names without tracking.
    pub fn peek_keys(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    /// Number of fields. Tracks the object's shape.
    pub fn len(&self) -> usize {
        self.inner.slot.depend();
        self.inner.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The accessor for a field.
    pub fn property(&self, key: &str) -> Option<Rc<Property>> {
        self.inner.fields.borrow().get(key).cloned()
    }

    /// Freeze the object: no writes, no new fields, never observed.
    pub fn freeze(&self) {
        self.inner.slot.freeze();
        for property in self.inner.fields.borrow().values() {
            property.frozen.set(true);
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.slot.is_frozen()
    }

    /// Forbid new fields. Such objects are never observed.
    pub fn prevent_extensions(&self) {
        self.inner.slot.prevent_extensions();
    }

    pub fn is_extensible(&self) -> bool {
        self.inner.slot.is_extensible()
    }

    /// Exclude the object from observation.
    pub fn mark_raw(&self) {
        self.inner.slot.mark_raw();
    }

    pub fn is_raw(&self) -> bool {
        self.inner.slot.is_raw()
    }

    /// The attached observer, if the object has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.inner.slot.observer()
    }

    pub fn is_reactive(&self) -> bool {
        self.inner.slot.is_observed()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) fn slot(&self) -> &ObserverSlot {
        &self.inner.slot
    }

    /// Snapshot of the accessors. No borrow is held while callers use them.
    pub(crate) fn properties(&self) -> Vec<(String, Rc<Property>)> {
        self.inner
            .fields
            .borrow()
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect()
    }

    pub(crate) fn define_reactive(&self, key: String, value: Value) {
        observe_value(&value, false);
        self.inner
            .fields
            .borrow_mut()
            .insert(key, Rc::new(Property::reactive(value)));
    }

    pub(crate) fn insert_plain(&self, key: String, value: Value) {
        self.inner
            .fields
            .borrow_mut()
            .insert(key, Rc::new(Property::plain(value)));
    }

    pub(crate) fn remove_plain(&self, key: &str) -> Option<Value> {
        let removed = self.inner.fields.borrow_mut().shift_remove(key);
        removed.map(|p| p.peek())
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        for (key, value) in iter {
            object.insert_plain(key.into(), value.into());
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("keys", &self.peek_keys())
            .field("reactive", &self.is_reactive())
            .finish()
    }
}
