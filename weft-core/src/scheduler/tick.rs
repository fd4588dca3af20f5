//! Deferred Callbacks
//!
//! `next_tick` defers a callback until the current synchronous work has
//! finished. Callbacks requested during one turn are batched and run
//! together, in the order they were requested. The watcher queue flush is
//! itself one such callback.
//!
//! # Drivers
//!
//! What "the end of the turn" means depends on [`TickMode`]:
//!
//! - `Manual`: the host calls [`run_pending`] (or [`run_until_idle`]) at
//!   its turn boundary.
//! - `Tokio`: each batch is spawned with `tokio::task::spawn_local` and
//!   runs when the current task yields. Requires a `tokio::task::LocalSet`.
//! - `Sync`: callbacks run immediately. Only for deterministic rendering.
//!
//! A callback that panics is reported to the error handler; the rest of its
//! batch still runs. Callbacks requested while a batch runs go into the
//! next batch.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::config::{self, TickMode};
use crate::error;

type Callback = Box<dyn FnOnce()>;

#[derive(Default)]
struct TickState {
    callbacks: Vec<Callback>,
    /// A batch has been requested and has not started yet.
    pending: bool,
}

thread_local! {
    static TICK: RefCell<TickState> = RefCell::new(TickState::default());
}

/// Completion handle for a deferred callback.
///
/// Resolves once the callback has run. Awaiting it is optional.
#[must_use = "a Tick does nothing unless awaited or polled; drop it explicitly to ignore completion"]
pub struct Tick {
    rx: oneshot::Receiver<()>,
}

impl Tick {
    /// Whether the callback has run.
    pub fn is_complete(&mut self) -> bool {
        matches!(
            self.rx.try_recv(),
            Ok(()) | Err(oneshot::error::TryRecvError::Closed)
        )
    }
}

impl Future for Tick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped sender means the callback can no longer run.
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

/// Defer `callback` to the next batch.
pub fn next_tick(callback: impl FnOnce() + 'static) -> Tick {
    let (tx, rx) = oneshot::channel();
    let job: Callback = Box::new(move || {
        error::invoke(callback, || "nextTick".to_string(), None);
        let _ = tx.send(());
    });

    let mode = config::tick_mode();
    if mode == TickMode::Sync {
        job();
        return Tick { rx };
    }

    let request_batch = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.callbacks.push(job);
        !std::mem::replace(&mut tick.pending, true)
    });
    if request_batch {
        match mode {
            TickMode::Tokio => {
                tokio::task::spawn_local(async {
                    flush_callbacks();
                });
            }
            TickMode::Manual | TickMode::Sync => {
                tracing::trace!("batch pending");
            }
        }
    }
    Tick { rx }
}

/// A tick with no callback: resolves after the next batch.
pub fn tick() -> Tick {
    next_tick(|| {})
}

fn flush_callbacks() -> usize {
    let batch = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.pending = false;
        std::mem::take(&mut tick.callbacks)
    });
    let count = batch.len();
    if count > 0 {
        tracing::trace!(callbacks = count, "running tick batch");
    }
    for callback in batch {
        callback();
    }
    count
}

/// Run the current batch. Returns the number of callbacks run.
pub fn run_pending() -> usize {
    flush_callbacks()
}

/// Run batches until none are pending. Returns the number of callbacks run.
pub fn run_until_idle() -> usize {
    let mut total = 0;
    loop {
        let ran = flush_callbacks();
        if ran == 0 {
            return total;
        }
        total += ran;
    }
}

/// Whether callbacks are waiting for the next batch.
pub fn has_pending() -> bool {
    TICK.with(|tick| !tick.borrow().callbacks.is_empty())
}
