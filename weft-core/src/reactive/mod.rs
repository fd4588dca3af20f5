//! Reactive Primitives
//!
//! This module implements the core reactive system: dependencies, observed
//! containers, watchers and computeds.
//!
//! # Concepts
//!
//! ## Dependencies
//!
//! A [`Dep`] stands behind one reactive slot: a field of an observed object,
//! or the shape of an observed container. Watchers reading the slot
//! subscribe to it; writing the slot notifies them.
//!
//! ## Observed containers
//!
//! [`observe`] turns a plain [`Object`] or [`Array`] into a reactive one.
//! Object fields become intercepting [`Property`] accessors. Arrays are
//! tracked through their mutating operations. [`set`] and [`del`] add and
//! remove fields in a way watchers can see.
//!
//! ## Watchers
//!
//! A [`Watcher`] evaluates a getter with tracking enabled and re-runs when
//! something it read changes: lazily, synchronously, or batched through
//! the [`scheduler`](crate::scheduler). A [`Computed`] is a lazy watcher
//! with a cached value.
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded. Handles are `Rc` based and the
//! tracking stack is thread-local, so reads discover the active watcher
//! without a context parameter.

mod array;
mod computed;
mod context;
mod dep;
mod object;
mod observer;
mod traverse;
mod value;
mod watcher;

pub use array::Array;
pub use computed::Computed;
pub use context::{untracked, TrackingContext};
pub use dep::{Dep, DepId};
pub use object::{Object, Property};
pub use observer::{del, observe, set, Key, Observer};
pub use value::Value;
pub use watcher::{WatchCallback, Watcher, WatcherId, WatcherOptions};
