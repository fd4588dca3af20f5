//! Reactive Arrays
//!
//! Elements of an [`Array`] are not intercepted one by one. Instead the
//! mutating operations (`push`, `pop`, `shift`, `unshift`, `splice`, `sort`,
//! `reverse`) are instrumented: each performs the mutation, observes any
//! inserted elements, and notifies the array's shape dependency once.
//!
//! Readers that index into an array depend on its shape, so any instrumented
//! mutation re-runs them.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::context::TrackingContext;
use super::observer::{depend_array, observe_value, Observer, ObserverSlot};
use super::value::Value;
use crate::error::{self, ReactiveError};

struct ArrayInner {
    items: RefCell<Vec<Value>>,
    slot: ObserverSlot,
}

/// A shared, ordered list of values.
#[derive(Clone)]
pub struct Array {
    inner: Rc<ArrayInner>,
}

impl Array {
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    // Instrumented mutations

    /// Append one element. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        self.extend(std::iter::once(value.into()))
    }

    /// Append several elements with one notification. Returns the new length.
    pub fn extend(&self, values: impl IntoIterator<Item = Value>) -> usize {
        if self.rejects_write() {
            return self.peek_len();
        }
        let values: Vec<Value> = values.into_iter().collect();
        self.observe_inserted(&values);
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.extend(values);
            items.len()
        };
        self.inner.slot.notify();
        len
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        if self.rejects_write() {
            return None;
        }
        let popped = self.inner.items.borrow_mut().pop();
        self.inner.slot.notify();
        popped
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        if self.rejects_write() {
            return None;
        }
        let shifted = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.inner.slot.notify();
        shifted
    }

    /// Prepend elements, keeping their order. Returns the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> usize {
        if self.rejects_write() {
            return self.peek_len();
        }
        let values: Vec<Value> = values.into_iter().collect();
        self.observe_inserted(&values);
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.splice(0..0, values);
            items.len()
        };
        self.inner.slot.notify();
        len
    }

    /// Remove `delete_count` elements at `start` and insert `items` there.
    ///
    /// `start` and `delete_count` are clamped to the array. Returns the
    /// removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        if self.rejects_write() {
            return Vec::new();
        }
        self.observe_inserted(&items);
        let removed = {
            let mut current = self.inner.items.borrow_mut();
            let start = start.min(current.len());
            let end = start.saturating_add(delete_count).min(current.len());
            current.splice(start..end, items).collect()
        };
        self.inner.slot.notify();
        removed
    }

    /// Sort with the default value ordering.
    pub fn sort(&self) {
        self.sort_by(Value::sort_cmp);
    }

    /// Sort with a comparator. The comparator runs untracked.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        if self.rejects_write() {
            return;
        }
        // Sorting a detached copy keeps the comparator free to read the array.
        let mut items = self.peek_all();
        super::untracked(|| items.sort_by(&mut compare));
        self.inner.items.replace(items);
        self.inner.slot.notify();
    }

    pub fn reverse(&self) {
        if self.rejects_write() {
            return;
        }
        self.inner.items.borrow_mut().reverse();
        self.inner.slot.notify();
    }

    /// Write `value` at `index` through [`splice`](Self::splice), padding
    /// with `Null` first as needed. Notifies once, even for the same value.
    pub(crate) fn assign(&self, index: usize, value: Value) {
        if self.rejects_write() {
            return;
        }
        {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
        }
        self.splice(index, 1, vec![value]);
    }

    fn rejects_write(&self) -> bool {
        if self.inner.slot.is_frozen() {
            error::warn(ReactiveError::FrozenContainer("array"));
            return true;
        }
        false
    }

    fn observe_inserted(&self, values: &[Value]) {
        if self.inner.slot.is_observed() {
            for value in values {
                observe_value(value, false);
            }
        }
    }

    // Tracked reads

    /// Element at `index`. Tracks the array's shape and, for a container
    /// element, that element's shape.
    pub fn get(&self, index: usize) -> Option<Value> {
        let item = self.peek(index);
        if TrackingContext::is_tracking() {
            self.inner.slot.depend();
            if let Some(item) = &item {
                depend_array(std::slice::from_ref(item));
            }
        }
        item
    }

    /// Length. Tracks the array's shape.
    pub fn len(&self) -> usize {
        self.inner.slot.depend();
        self.peek_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All elements. Tracks the array and every nested container.
    pub fn to_vec(&self) -> Vec<Value> {
        let items = self.peek_all();
        if TrackingContext::is_tracking() {
            self.inner.slot.depend();
            depend_array(&items);
        }
        items
    }

    // Untracked reads

    pub fn peek(&self, index: usize) -> Option<Value> {
        self.inner.items.borrow().get(index).cloned()
    }

    pub fn peek_all(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    pub fn peek_len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    // Observation state

    /// Freeze the array: mutations warn and do nothing, and it is never
    /// observed.
    pub fn freeze(&self) {
        self.inner.slot.freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.slot.is_frozen()
    }

    pub fn mark_raw(&self) {
        self.inner.slot.mark_raw();
    }

    pub fn observer(&self) -> Option<Observer> {
        self.inner.slot.observer()
    }

    pub fn is_reactive(&self) -> bool {
        self.inner.slot.is_observed()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) fn slot(&self) -> &ObserverSlot {
        &self.inner.slot
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                items: RefCell::new(items),
                slot: ObserverSlot::default(),
            }),
        }
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from(iter.into_iter().map(Into::into).collect::<Vec<_>>())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("len", &self.peek_len())
            .field("reactive", &self.is_reactive())
            .finish()
    }
}
