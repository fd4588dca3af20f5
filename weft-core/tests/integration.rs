//! Integration Tests for the Reactivity Core
//!
//! These tests verify that observed state, watchers, the scheduler and
//! scopes work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use weft_core::config::{self, TickMode};
use weft_core::reactive::{
    del, observe, set, Array, Computed, Object, Value, Watcher, WatcherOptions,
};
use weft_core::scheduler::{self, next_tick, run_pending, run_until_idle};
use weft_core::{Hook, Scope};

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

fn observed(obj: Object) -> Object {
    observe(&obj.clone().into());
    obj
}

fn number(obj: &Object, key: &str) -> f64 {
    obj.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

/// Turn on loop detection and diagnostics regardless of build profile.
fn strict_config() {
    config::configure(|c| {
        c.diagnostics = true;
        c.detect_update_loops = true;
        c.max_update_count = 100;
    });
}

/// Several writes to several fields before a flush run the watcher once.
#[test]
fn writes_are_deduplicated_per_flush() {
    let state = observed(Object::new().with("a", 1).with("b", 2));
    let runs = Rc::new(Cell::new(0));

    let r = runs.clone();
    let s = state.clone();
    let _w = Watcher::new(
        move || {
            r.set(r.get() + 1);
            Value::from(number(&s, "a") + number(&s, "b"))
        },
        None,
        WatcherOptions::default(),
    );
    assert_eq!(runs.get(), 1);

    state.set("a", 10);
    state.set("a", 11);
    state.set("b", 20);
    run_until_idle();

    assert_eq!(runs.get(), 2);
}

/// A field the watcher stopped reading no longer triggers it.
#[test]
fn stale_dependencies_do_not_retrigger() {
    let state = observed(Object::new().with("use_a", true).with("a", 1).with("b", 2));
    let runs = Rc::new(Cell::new(0));

    let r = runs.clone();
    let s = state.clone();
    let _w = Watcher::new(
        move || {
            r.set(r.get() + 1);
            if s.get("use_a").and_then(|v| v.as_bool()).unwrap_or(false) {
                s.get("a").unwrap_or_default()
            } else {
                s.get("b").unwrap_or_default()
            }
        },
        None,
        WatcherOptions::default(),
    );

    state.set("use_a", false);
    run_until_idle();
    assert_eq!(runs.get(), 2);

    state.set("a", 100);
    run_until_idle();
    assert_eq!(runs.get(), 2);

    state.set("b", 100);
    run_until_idle();
    assert_eq!(runs.get(), 3);
}

/// Parents re-render before children, whatever order the writes came in.
#[test]
fn parent_runs_before_child() {
    let state = observed(Object::new().with("shared", 0).with("child_only", 0));
    let log = log();

    let parent = Scope::new("parent");
    let (s, l) = (state.clone(), log.clone());
    parent.mount(move || {
        s.get("shared");
        l.borrow_mut().push("parent".into());
    });

    let child = parent.child("child");
    let (s, l) = (state.clone(), log.clone());
    child.mount(move || {
        s.get("shared");
        s.get("child_only");
        l.borrow_mut().push("child".into());
    });
    log.borrow_mut().clear();

    state.set("child_only", 1);
    state.set("shared", 1);
    run_until_idle();

    assert_eq!(entries(&log), vec!["parent", "child"]);
}

/// A scope's user watches run before its render watcher.
#[test]
fn user_watch_runs_before_render() {
    let state = observed(Object::new().with("n", 0));
    let log = log();
    let scope = Scope::new("app");

    let l = log.clone();
    let s = state.clone();
    scope.watch(
        move || s.get("n").unwrap_or_default(),
        move |_, _| l.borrow_mut().push("watch".into()),
        WatcherOptions::default().expression("n"),
    );

    let (s, l) = (state.clone(), log.clone());
    scope.mount(move || {
        s.get("n");
        l.borrow_mut().push("render".into());
    });
    log.borrow_mut().clear();

    state.set("n", 1);
    run_until_idle();

    assert_eq!(entries(&log), vec!["watch", "render"]);
}

/// A child destroyed by its parent's re-render is skipped in the same flush.
#[test]
fn child_destroyed_mid_flush_is_skipped() {
    let state = observed(Object::new().with("show_child", true).with("n", 0));
    let log = log();

    let parent = Scope::new("parent");
    let slot: Rc<RefCell<Option<Scope>>> = Rc::new(RefCell::new(None));

    let (s, l, sl) = (state.clone(), log.clone(), slot.clone());
    parent.mount(move || {
        s.get("n");
        let show = s.get("show_child").and_then(|v| v.as_bool()).unwrap_or(false);
        l.borrow_mut().push("parent".into());
        if !show {
            if let Some(child) = sl.borrow_mut().take() {
                child.destroy();
            }
        }
    });

    let child = parent.child("child");
    let (s, l) = (state.clone(), log.clone());
    child.mount(move || {
        s.get("n");
        l.borrow_mut().push("child".into());
    });
    slot.replace(Some(child.clone()));
    log.borrow_mut().clear();

    state.set("n", 1);
    state.set("show_child", false);
    run_until_idle();

    assert_eq!(entries(&log), vec!["parent"]);
    assert!(child.is_destroyed());
}

/// A write made while a watcher runs is absorbed into the same flush: the
/// later watcher runs once, and the writer does not re-run itself.
#[test]
fn mid_flush_writes_join_the_same_flush() {
    let state = observed(Object::new().with("x", 0).with("y", 0));
    let c1_runs = Rc::new(Cell::new(0));
    let c2_runs = Rc::new(Cell::new(0));

    let (s, r) = (state.clone(), c1_runs.clone());
    let _c1 = Watcher::new(
        move || {
            r.set(r.get() + 1);
            let x = number(&s, "x");
            s.set("y", x * 10.0);
            s.set("x", x + 0.5);
            Value::from(x)
        },
        None,
        WatcherOptions::default(),
    );

    let (s, r) = (state.clone(), c2_runs.clone());
    let _c2 = Watcher::new(
        move || {
            r.set(r.get() + 1);
            s.get("y").unwrap_or_default()
        },
        None,
        WatcherOptions::default(),
    );
    c1_runs.set(0);
    c2_runs.set(0);

    state.set("x", 1);
    assert_eq!(run_pending(), 1);

    assert_eq!(c1_runs.get(), 1);
    assert_eq!(c2_runs.get(), 1);
    assert_eq!(state.peek("y"), Some(Value::from(10)));
    assert!(!scheduler::has_pending());
}

/// A watcher the flush already passed is re-run right after the writer.
#[test]
fn passed_watcher_is_spliced_after_cursor() {
    let state = observed(Object::new().with("a", 0).with("b", 0));
    let log = log();

    let (s, l) = (state.clone(), log.clone());
    let _first = Watcher::new(
        move || {
            let a = number(&s, "a");
            l.borrow_mut().push(format!("first {}", a));
            Value::from(a)
        },
        None,
        WatcherOptions::default(),
    );

    let (s, l) = (state.clone(), log.clone());
    let _second = Watcher::new(
        move || {
            let b = number(&s, "b");
            if b > 0.0 {
                s.set("a", b);
            }
            l.borrow_mut().push(format!("second {}", b));
            Value::from(b)
        },
        None,
        WatcherOptions::default(),
    );
    log.borrow_mut().clear();

    state.set("b", 1);
    assert_eq!(run_pending(), 1);

    assert_eq!(entries(&log), vec!["second 1", "first 1"]);
}

/// Array mutations notify once, observe inserted values and keep the
/// operation's return value.
#[test]
fn array_push_is_reactive() {
    let list = Array::new();
    let state = observed(Object::new().with("items", list.clone()));
    let runs = Rc::new(Cell::new(0));

    let (s, r) = (state.clone(), runs.clone());
    let _w = Watcher::new(
        move || {
            r.set(r.get() + 1);
            s.get("items").unwrap_or_default()
        },
        None,
        WatcherOptions::sync(),
    );

    let item = Object::new().with("done", false);
    assert_eq!(list.push(item.clone()), 1);
    assert_eq!(runs.get(), 2);
    assert!(item.is_reactive());

    assert_eq!(list.splice(0, 1, Vec::new()).len(), 1);
    assert_eq!(runs.get(), 3);
    assert_eq!(list.peek_len(), 0);
}

/// Observing twice keeps the first observer and the first interceptors.
#[test]
fn wrapping_is_idempotent() {
    let nested = Object::new().with("x", 1);
    let state = Object::new().with("nested", nested.clone());

    let first = observe(&state.clone().into()).expect("objects are observable");
    let dep = state.property("nested").and_then(|p| p.dep().map(|d| d.id()));
    let second = observe(&state.clone().into()).expect("objects are observable");

    assert!(first.dep().ptr_eq(second.dep()));
    assert_eq!(state.property("nested").and_then(|p| p.dep().map(|d| d.id())), dep);
    assert!(nested.is_reactive());
}

/// `set` and `del` make key additions and removals visible.
#[test]
fn set_and_del_notify_key_readers() {
    let state = observed(Object::new());
    let seen = log();

    let (s, l) = (state.clone(), seen.clone());
    let _w = Watcher::new(
        move || {
            l.borrow_mut().push(s.keys().join(","));
            Value::Null
        },
        None,
        WatcherOptions::default(),
    );

    set(&state.clone().into(), "a", Value::from(1));
    set(&state.clone().into(), "b", Value::from(2));
    run_until_idle();
    del(&state.clone().into(), "a");
    run_until_idle();

    assert_eq!(entries(&seen), vec!["", "a,b", "b"]);
}

/// Deferred callbacks run in request order, interleaved with the flush
/// exactly where the first write requested it.
#[test]
fn tick_batch_is_fifo_around_the_flush() {
    let state = observed(Object::new().with("n", 0));
    let log = log();

    let scope = Scope::new("app");
    let (s, l) = (state.clone(), log.clone());
    scope.mount(move || {
        let n = number(&s, "n");
        l.borrow_mut().push(format!("render {}", n));
    });
    log.borrow_mut().clear();

    let l = log.clone();
    let _ = next_tick(move || l.borrow_mut().push("cb1".into()));
    state.set("n", 1);
    let (l, s) = (log.clone(), state.clone());
    let _ = next_tick(move || l.borrow_mut().push(format!("cb2 sees {}", number(&s, "n"))));

    assert_eq!(run_pending(), 3);
    assert_eq!(entries(&log), vec!["cb1", "render 1", "cb2 sees 1"]);
}

/// A failing callback does not keep its batch from running.
#[test]
fn failing_tick_callback_is_isolated() {
    let errors = log();
    let sink = errors.clone();
    let _guard = config::scoped_error_handler(move |e| sink.borrow_mut().push(e.to_string()));

    let ran = Rc::new(Cell::new(0));
    let r1 = ran.clone();
    let r2 = ran.clone();
    let _ = next_tick(move || r1.set(r1.get() + 1));
    let _ = next_tick(|| panic!("callback exploded"));
    let _ = next_tick(move || r2.set(r2.get() + 1));
    run_until_idle();

    assert_eq!(ran.get(), 2);
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("callback exploded"));
}

/// A watch whose callback keeps rewriting its own source is cut off after
/// the re-entry limit, and the rest of that flush is dropped.
#[test]
fn runaway_watch_is_aborted() {
    strict_config();
    let warnings = log();
    let sink = warnings.clone();
    let _guard = config::scoped_warn_handler(move |e| sink.borrow_mut().push(e.to_string()));

    let state = observed(Object::new().with("count", 0).with("other", 0));
    let calls = Rc::new(Cell::new(0));

    let (s, target, c) = (state.clone(), state.clone(), calls.clone());
    let _looping = Watcher::watch(
        move || s.get("count").unwrap_or_default(),
        move |new, _| {
            c.set(c.get() + 1);
            target.set("count", new.as_f64().unwrap_or(0.0) + 1.0);
        },
        WatcherOptions::default().expression("count"),
    );

    let later_runs = Rc::new(Cell::new(0));
    let (s, r) = (state.clone(), later_runs.clone());
    let _later = Watcher::new(
        move || {
            r.set(r.get() + 1);
            s.get("other").unwrap_or_default()
        },
        None,
        WatcherOptions::default(),
    );
    later_runs.set(0);

    state.set("count", 1);
    state.set("other", 1);
    run_until_idle();

    assert_eq!(calls.get(), 101);
    assert_eq!(state.peek("count"), Some(Value::from(102)));
    assert_eq!(later_runs.get(), 0);
    assert_eq!(warnings.borrow().len(), 1);
    assert!(warnings.borrow()[0].contains("in watcher with expression \"count\""));
    assert!(!scheduler::is_flushing());
    assert!(scheduler::pending_watchers().is_empty());

    // The dropped watcher runs again on its next notification.
    state.set("other", 2);
    run_until_idle();
    assert_eq!(later_runs.get(), 1);
}

/// Two render watchers feeding each other are also detected.
#[test]
fn ping_pong_between_watchers_is_aborted() {
    strict_config();
    let warnings = log();
    let sink = warnings.clone();
    let _guard = config::scoped_warn_handler(move |e| sink.borrow_mut().push(e.to_string()));

    let state = observed(Object::new().with("x", 0).with("y", 0));

    let s = state.clone();
    let _a = Watcher::new(
        move || {
            let x = number(&s, "x");
            s.set("y", x + 1.0);
            Value::Null
        },
        None,
        WatcherOptions::default(),
    );
    let s = state.clone();
    let _b = Watcher::new(
        move || {
            let y = number(&s, "y");
            s.set("x", y + 1.0);
            Value::Null
        },
        None,
        WatcherOptions::default(),
    );

    run_until_idle();

    assert_eq!(warnings.borrow().len(), 1);
    assert!(warnings.borrow()[0].contains("in a component render function"));
    assert!(!scheduler::has_pending());
}

/// Computed values feed render watchers and are recomputed lazily.
#[test]
fn computed_feeds_render() {
    let state = observed(Object::new().with("first", "Ada").with("last", "Lovelace"));
    let scope = Scope::new("profile");

    let s = state.clone();
    let full = scope.computed("full_name", move || {
        let first = s.get("first").unwrap_or_default();
        let last = s.get("last").unwrap_or_default();
        Value::from(format!(
            "{} {}",
            first.as_str().unwrap_or_default(),
            last.as_str().unwrap_or_default()
        ))
    });

    let rendered = log();
    let (f, l) = (full.clone(), rendered.clone());
    scope.mount(move || {
        let name = f.get();
        l.borrow_mut().push(name.as_str().unwrap_or_default().to_string());
    });

    state.set("last", "Byron");
    run_until_idle();

    assert_eq!(entries(&rendered), vec!["Ada Lovelace", "Ada Byron"]);
}

/// Lifecycle hooks fire in order over mount, update and destroy.
#[test]
fn scope_lifecycle_hooks() {
    let state = observed(Object::new().with("n", 0));
    let log = log();
    let scope = Scope::new("app");
    for hook in [
        Hook::Mounted,
        Hook::BeforeUpdate,
        Hook::Updated,
        Hook::BeforeDestroy,
        Hook::Destroyed,
    ] {
        let l = log.clone();
        scope.on(hook, move || l.borrow_mut().push(hook.to_string()));
    }

    let s = state.clone();
    scope.mount(move || {
        s.get("n");
    });
    state.set("n", 1);
    run_until_idle();
    scope.destroy();

    state.set("n", 2);
    run_until_idle();

    assert_eq!(
        entries(&log),
        vec!["mounted", "beforeUpdate", "updated", "beforeDestroy", "destroyed"]
    );
}

/// In synchronous tick mode writes are applied before `set` returns, still
/// in creation order.
#[test]
fn sync_tick_mode_is_immediate_and_ordered() {
    let previous = config::current();
    config::configure(|c| c.tick_mode = TickMode::Sync);

    let state = observed(Object::new().with("n", 0));
    let log = log();
    let (s, l) = (state.clone(), log.clone());
    let _first = Watcher::new(
        move || {
            l.borrow_mut().push(format!("first {}", number(&s, "n")));
            Value::Null
        },
        None,
        WatcherOptions::default(),
    );
    let (s, l) = (state.clone(), log.clone());
    let _second = Watcher::new(
        move || {
            l.borrow_mut().push(format!("second {}", number(&s, "n")));
            Value::Null
        },
        None,
        WatcherOptions::default(),
    );
    log.borrow_mut().clear();

    state.set("n", 1);
    assert_eq!(entries(&log), vec!["first 1", "second 1"]);

    config::configure(|c| *c = previous);
}

/// With the tokio driver, awaiting a tick lets the batch run.
#[tokio::test(flavor = "current_thread")]
async fn tokio_driver_flushes_on_local_set() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            config::configure(|c| c.tick_mode = TickMode::Tokio);

            let state = observed(Object::new().with("n", 0));
            let s = state.clone();
            let w = Watcher::new(move || s.get("n").unwrap_or_default(), None, WatcherOptions::default());

            state.set("n", 3);
            assert_eq!(w.value(), Value::from(0));

            scheduler::tick().await;
            assert_eq!(w.value(), Value::from(3));
        })
        .await;
}

/// Writes to a computed go through its setter.
#[test]
fn writable_computed() {
    let state = observed(Object::new().with("celsius", 100));
    let (get_state, set_state) = (state.clone(), state.clone());
    let fahrenheit = Computed::with_setter(
        move || Value::from(number(&get_state, "celsius") * 9.0 / 5.0 + 32.0),
        move |f| {
            let f = f.as_f64().unwrap_or(0.0);
            set_state.set("celsius", (f - 32.0) * 5.0 / 9.0);
        },
    );

    assert_eq!(fahrenheit.get(), Value::from(212));
    fahrenheit.set(32);
    assert_eq!(state.peek("celsius"), Some(Value::from(0)));
    assert_eq!(fahrenheit.get(), Value::from(32));
}

/// A direct reader of a field follows it through deletion and re-addition.
#[test]
fn deleted_and_readded_field_still_reaches_reader() {
    let state = observed(Object::new().with("a", 1));
    let runs = Rc::new(Cell::new(0));

    let (s, r) = (state.clone(), runs.clone());
    let w = Watcher::new(
        move || {
            r.set(r.get() + 1);
            s.get("a").unwrap_or_default()
        },
        None,
        WatcherOptions::default(),
    );

    del(&state.clone().into(), "a");
    run_until_idle();
    assert_eq!(runs.get(), 2);
    assert_eq!(w.value(), Value::Null);

    set(&state.clone().into(), "a", Value::from(5));
    run_until_idle();
    assert_eq!(runs.get(), 3);
    assert_eq!(w.value(), Value::from(5));

    state.set("a", 6);
    run_until_idle();
    assert_eq!(runs.get(), 4);
    assert_eq!(w.value(), Value::from(6));
}

/// A warn handler that panics while a runaway loop is reported does not
/// leave the scheduler stuck.
#[test]
fn panicking_warn_handler_does_not_wedge_the_scheduler() {
    strict_config();
    let _guard = config::scoped_warn_handler(|_| panic!("warn handler exploded"));

    let state = observed(Object::new().with("count", 0).with("other", 0));
    let (s, target) = (state.clone(), state.clone());
    let _looping = Watcher::watch(
        move || s.get("count").unwrap_or_default(),
        move |new, _| target.set("count", new.as_f64().unwrap_or(0.0) + 1.0),
        WatcherOptions::default().expression("count"),
    );

    state.set("count", 1);
    run_until_idle();
    assert!(!scheduler::is_flushing());

    let runs = Rc::new(Cell::new(0));
    let (s, r) = (state.clone(), runs.clone());
    let _later = Watcher::new(
        move || {
            r.set(r.get() + 1);
            s.get("other").unwrap_or_default()
        },
        None,
        WatcherOptions::default(),
    );

    state.set("other", 1);
    run_until_idle();
    assert_eq!(runs.get(), 2);
}
