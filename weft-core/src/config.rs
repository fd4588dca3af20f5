//! Runtime Configuration
//!
//! Configuration is layered:
//!
//! 1. A process-wide default template (`set_defaults`) behind a
//!    `parking_lot::RwLock`. Each thread copies it the first time it touches
//!    the engine.
//! 2. The thread's active [`Config`] (`configure`), which is what the engine
//!    consults. The reactivity engine is single-threaded, so every thread
//!    running it owns an independent configuration.
//!
//! Error and warn handlers follow the same shape: a thread-local override
//! wins over the process-wide handler.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;
use crate::scheduler::MAX_UPDATE_COUNT;

/// How deferred callbacks are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// Batches wait until the host calls `tick::run_pending`.
    #[default]
    Manual,
    /// Batches are spawned onto the current `tokio::task::LocalSet`.
    Tokio,
    /// No batching: callbacks run immediately and watcher queues flush
    /// synchronously. Intended for deterministic server-side rendering.
    Sync,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deferred callback driver.
    pub tick_mode: TickMode,

    /// Emit diagnostics for usage errors and update loops.
    pub diagnostics: bool,

    /// Count re-entries per watcher during a flush and abort runaway loops.
    pub detect_update_loops: bool,

    /// Re-entries tolerated before a flush is aborted.
    pub max_update_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_mode: TickMode::Manual,
            diagnostics: cfg!(debug_assertions),
            detect_update_loops: cfg!(debug_assertions),
            max_update_count: MAX_UPDATE_COUNT,
        }
    }
}

impl Config {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Process-wide error handler.
pub type SharedHandler = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

/// Handler as seen by the engine on the current thread.
pub type Handler = Rc<dyn Fn(&ReactiveError)>;

#[derive(Default)]
struct Shared {
    defaults: Option<Config>,
    error_handler: Option<SharedHandler>,
    warn_handler: Option<SharedHandler>,
}

struct Local {
    config: Config,
    error_handler: Option<Handler>,
    warn_handler: Option<Handler>,
}

static SHARED: OnceLock<RwLock<Shared>> = OnceLock::new();

fn shared() -> &'static RwLock<Shared> {
    SHARED.get_or_init(|| RwLock::new(Shared::default()))
}

thread_local! {
    static LOCAL: RefCell<Option<Local>> = const { RefCell::new(None) };
}

fn with_local<R>(f: impl FnOnce(&mut Local) -> R) -> R {
    LOCAL.with(|cell| {
        let mut slot = cell.borrow_mut();
        let local = slot.get_or_insert_with(|| Local {
            config: shared().read().defaults.clone().unwrap_or_default(),
            error_handler: None,
            warn_handler: None,
        });
        f(local)
    })
}

/// Set the template copied by threads that have not yet used the engine.
pub fn set_defaults(config: Config) {
    shared().write().defaults = Some(config);
}

/// The active configuration of the current thread.
pub fn current() -> Config {
    with_local(|local| local.config.clone())
}

/// Modify the active configuration of the current thread.
pub fn configure(f: impl FnOnce(&mut Config)) {
    with_local(|local| f(&mut local.config));
}

pub(crate) fn tick_mode() -> TickMode {
    with_local(|local| local.config.tick_mode)
}

/// Install the process-wide error handler.
pub fn set_error_handler(handler: impl Fn(&ReactiveError) + Send + Sync + 'static) {
    shared().write().error_handler = Some(Arc::new(handler));
}

/// Install the process-wide warn handler.
pub fn set_warn_handler(handler: impl Fn(&ReactiveError) + Send + Sync + 'static) {
    shared().write().warn_handler = Some(Arc::new(handler));
}

/// Install an error handler for the current thread only.
///
/// The previous thread-local handler is restored when the guard drops.
pub fn scoped_error_handler(handler: impl Fn(&ReactiveError) + 'static) -> HandlerGuard {
    let previous = with_local(|local| local.error_handler.replace(Rc::new(handler)));
    HandlerGuard {
        kind: HandlerKind::Error,
        previous,
    }
}

/// Install a warn handler for the current thread only.
pub fn scoped_warn_handler(handler: impl Fn(&ReactiveError) + 'static) -> HandlerGuard {
    let previous = with_local(|local| local.warn_handler.replace(Rc::new(handler)));
    HandlerGuard {
        kind: HandlerKind::Warn,
        previous,
    }
}

pub(crate) fn error_handler() -> Option<Handler> {
    with_local(|local| local.error_handler.clone())
        .or_else(|| shared().read().error_handler.clone().map(into_local))
}

pub(crate) fn warn_handler() -> Option<Handler> {
    with_local(|local| local.warn_handler.clone())
        .or_else(|| shared().read().warn_handler.clone().map(into_local))
}

fn into_local(handler: SharedHandler) -> Handler {
    Rc::new(move |err: &ReactiveError| handler(err))
}

enum HandlerKind {
    Error,
    Warn,
}

/// Restores the previous thread-local handler on drop.
#[must_use = "the handler is removed when the guard is dropped"]
pub struct HandlerGuard {
    kind: HandlerKind,
    previous: Option<Handler>,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        with_local(|local| match self.kind {
            HandlerKind::Error => local.error_handler = previous,
            HandlerKind::Warn => local.warn_handler = previous,
        });
    }
}
