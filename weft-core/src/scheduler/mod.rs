//! Update Scheduling
//!
//! Two cooperating pieces decide *when* reactive work runs:
//!
//! - [`queue`]: the deduplicated queue of watchers waiting to re-run, flushed
//!   in ascending id order.
//! - [`tick`]: the deferred-callback runner that batches queue flushes and
//!   user callbacks into one turn.
//!
//! Both are per-thread singletons. Nothing here locks; re-entrancy is handled
//! by the flush cursor and by batching.

pub mod queue;
pub mod tick;

pub use queue::{
    flush_scheduler_queue, is_flushing, pending_watchers, queue_activated_scope, queue_watcher,
};
pub use tick::{has_pending, next_tick, run_pending, run_until_idle, tick, Tick};

/// Re-entries of one watcher tolerated within a single flush.
pub const MAX_UPDATE_COUNT: u32 = 100;
