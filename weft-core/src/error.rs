//! Error Handling
//!
//! Failures inside user code (getters, watch callbacks, lifecycle hooks,
//! deferred callbacks) are caught where they are invoked and routed to the
//! error handler. They never stop sibling work in the same batch.
//!
//! Usage mistakes (watching a malformed path, setting a property on a
//! scalar, writing to a frozen container) and runaway update loops are
//! *diagnostics*: they are logged and passed to the warn handler, and only
//! when diagnostics are enabled.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::config;
use crate::reactive::WatcherId;

/// Errors surfaced by the reactivity core.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// User code panicked while the engine was running it.
    #[error("error in {info}{}: {message}", scope_suffix(.scope))]
    Callback {
        /// What was being run, e.g. `callback for watcher "a.b"`.
        info: String,
        /// Name of the owning scope, if any.
        scope: Option<String>,
        /// The panic message.
        message: String,
    },

    /// A watcher kept re-enqueueing itself during one flush.
    #[error("You may have an infinite update loop {origin} (watcher {watcher})")]
    InfiniteUpdateLoop { watcher: WatcherId, origin: String },

    #[error("failed watching path \"{0}\": watchers only accept simple dot-delimited paths")]
    InvalidWatchPath(String),

    #[error("cannot {action} reactive property on {target}")]
    InvalidTarget {
        action: &'static str,
        target: String,
    },

    #[error("{0} is frozen and will not be made reactive")]
    Unobservable(&'static str),

    #[error("cannot modify frozen {0}")]
    FrozenContainer(&'static str),

    #[error("computed property \"{0}\" was assigned to but it has no setter")]
    MissingSetter(String),

    #[error("cannot snapshot a cyclic value graph")]
    Cycle,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

fn scope_suffix(scope: &Option<String>) -> String {
    match scope {
        Some(name) => format!(" (in scope \"{}\")", name),
        None => String::new(),
    }
}

/// Route an error to the configured error handler.
///
/// Falls back to `tracing::error!` when no handler is installed. A handler
/// that panics is logged together with the original error.
pub fn handle_error(err: ReactiveError) {
    match config::error_handler() {
        Some(handler) => {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&err)));
            if let Err(payload) = outcome {
                tracing::error!(
                    error = %err,
                    handler_panic = %panic_message(payload.as_ref()),
                    "error handler panicked"
                );
            }
        }
        None => tracing::error!(error = %err, "unhandled reactive error"),
    }
}

/// Emit a diagnostic.
///
/// Silent unless diagnostics are enabled for the current thread. A warn
/// handler that panics is logged and otherwise ignored.
pub fn warn(err: ReactiveError) {
    if !config::current().diagnostics {
        return;
    }
    tracing::warn!("{}", err);
    if let Some(handler) = config::warn_handler() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&err)));
        if let Err(payload) = outcome {
            tracing::error!(
                warning = %err,
                handler_panic = %panic_message(payload.as_ref()),
                "warn handler panicked"
            );
        }
    }
}

/// Run user code, catching a panic and reporting it.
///
/// Returns `None` if `f` panicked. `info` is only built on failure.
pub(crate) fn invoke<T>(
    f: impl FnOnce() -> T,
    info: impl FnOnce() -> String,
    scope: Option<String>,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            handle_error(ReactiveError::Callback {
                info: info(),
                scope,
                message: panic_message(payload.as_ref()),
            });
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
