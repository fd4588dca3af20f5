//! Weft Core
//!
//! This crate provides the reactivity core of the Weft data-binding UI
//! runtime. It implements:
//!
//! - Observed state: objects and arrays whose reads are tracked and whose
//!   writes notify
//! - Watchers and computeds that re-run when what they read changes
//! - A batching scheduler that flushes pending watchers in creation order
//! - Scopes that own watchers and expose lifecycle hooks
//!
//! Template compilation, virtual-DOM diffing and DOM bindings are consumers
//! of this crate and live elsewhere.
//!
//! The crate is designed to be used both as a native Rust library and, with
//! the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! - `reactive`: values, observed containers, dependency tracking, watchers
//! - `scheduler`: the watcher queue and the deferred-callback batches
//! - `scope`: lifecycle owner for watchers
//! - `config` / `error`: runtime configuration and error routing
//! - `snapshot`: JSON and MessagePack conversion of state
//!
//! # Example
//!
//! ```rust
//! use weft_core::reactive::{observe, Object, Value, Watcher, WatcherOptions};
//! use weft_core::scheduler;
//!
//! let state = Object::new().with("count", 0);
//! observe(&state.clone().into());
//!
//! let s = state.clone();
//! let doubled = Watcher::new(
//!     move || {
//!         let count = s.get("count").and_then(|v| v.as_f64()).unwrap_or(0.0);
//!         Value::from(count * 2.0)
//!     },
//!     None,
//!     WatcherOptions::default(),
//! );
//!
//! state.set("count", 5);
//! scheduler::run_until_idle();
//! assert_eq!(doubled.value(), Value::from(10));
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod scheduler;
pub mod scope;
pub mod snapshot;

#[cfg(feature = "python")]
mod python;

pub use config::{Config, TickMode};
pub use error::ReactiveError;
pub use scope::{Hook, Scope};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module definition.
///
/// This function is called by Python when importing the module.
/// It registers all Python-exposed types and functions.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)?;

    // Add version info
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
