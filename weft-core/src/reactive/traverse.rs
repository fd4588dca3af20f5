//! Deep traversal for `deep` watchers.
//!
//! Reads every nested field of a value inside the current evaluation so that
//! a write anywhere below it notifies the watcher.

use std::collections::HashSet;

use super::value::Value;

pub(crate) fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(object) => {
            if object.is_frozen() || !seen.insert(object.addr()) {
                return;
            }
            object.slot().depend();
            for (_, property) in object.properties() {
                walk(&property.get(), seen);
            }
        }
        Value::Array(array) => {
            if array.is_frozen() || !seen.insert(array.addr()) {
                return;
            }
            array.slot().depend();
            for item in array.peek_all() {
                walk(&item, seen);
            }
        }
        _ => {}
    }
}
