//! Python Bindings
//!
//! Exposes a reactive key-value `Store` to Python. Values cross the boundary
//! as plain data: `None`, `bool`, numbers, `str`, `list` and `dict`.
//!
//! Everything is `unsendable`: a store and its watchers belong to the
//! Python thread that created them.

use pyo3::exceptions::{PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyList};

use crate::error::{self, ReactiveError};
use crate::reactive::{del, observe, set, Array, Object, Value, Watcher, WatcherOptions};
use crate::{scheduler, snapshot};

/// A reactive key-value store.
#[pyclass(unsendable, name = "Store")]
pub struct PyStore {
    state: Object,
}

#[pymethods]
impl PyStore {
    #[new]
    #[pyo3(signature = (initial = None))]
    fn new(initial: Option<&Bound<'_, PyDict>>) -> PyResult<Self> {
        let state = Object::new();
        if let Some(initial) = initial {
            for (key, value) in initial.iter() {
                state.set(key.extract::<String>()?, from_py(&value)?);
            }
        }
        observe(&state.clone().into());
        Ok(Self { state })
    }

    /// Read a key. Missing keys read as `None`.
    fn get(&self, py: Python<'_>, key: &str) -> PyResult<PyObject> {
        to_py(py, &self.state.get(key).unwrap_or_default())
    }

    /// Write a key, adding it reactively if new.
    fn set(&self, key: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        set(&self.state.clone().into(), key, from_py(value)?);
        Ok(())
    }

    fn delete(&self, key: &str) {
        del(&self.state.clone().into(), key);
    }

    fn keys(&self) -> Vec<String> {
        self.state.peek_keys()
    }

    /// Call `callback(new, old)` when `key` changes.
    #[pyo3(signature = (key, callback, deep = false, immediate = false))]
    fn watch(&self, key: String, callback: PyObject, deep: bool, immediate: bool) -> PyWatchHandle {
        let state = self.state.clone();
        let read_key = key.clone();
        let label = key.clone();

        let mut options = WatcherOptions::default().expression(key);
        options.deep = deep;
        options.immediate = immediate;

        let watcher = Watcher::watch(
            move || state.get(&read_key).unwrap_or_default(),
            move |new, old| {
                Python::with_gil(|py| {
                    let result = to_py(py, new)
                        .and_then(|new| Ok((new, to_py(py, old)?)))
                        .and_then(|args| callback.call1(py, args));
                    if let Err(err) = result {
                        error::handle_error(ReactiveError::Callback {
                            info: format!("python callback for \"{}\"", label),
                            scope: None,
                            message: err.to_string(),
                        });
                    }
                });
            },
            options,
        );
        PyWatchHandle { watcher }
    }

    fn to_json(&self) -> PyResult<String> {
        snapshot::to_json(&self.state.clone().into()).map_err(to_py_err)
    }

    fn __len__(&self) -> usize {
        self.state.peek_keys().len()
    }

    fn __repr__(&self) -> String {
        format!("Store(keys={:?})", self.state.peek_keys())
    }
}

/// Handle to a watcher created by `Store.watch`.
#[pyclass(unsendable, name = "WatchHandle")]
pub struct PyWatchHandle {
    watcher: Watcher,
}

#[pymethods]
impl PyWatchHandle {
    fn teardown(&self) {
        self.watcher.teardown();
    }

    #[getter]
    fn active(&self) -> bool {
        self.watcher.is_active()
    }
}

/// Run the current batch of deferred callbacks.
#[pyfunction]
fn run_pending() -> usize {
    scheduler::run_pending()
}

/// Run deferred callbacks until none are left.
#[pyfunction]
fn run_until_idle() -> usize {
    scheduler::run_until_idle()
}

pub(crate) fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyStore>()?;
    m.add_class::<PyWatchHandle>()?;
    m.add_function(wrap_pyfunction!(run_pending, m)?)?;
    m.add_function(wrap_pyfunction!(run_until_idle, m)?)?;
    Ok(())
}

fn to_py_err(err: ReactiveError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn to_py(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    let json = snapshot::to_json_value(value).map_err(to_py_err)?;
    json_to_py(py, &json)
}

fn json_to_py(py: Python<'_>, json: &serde_json::Value) -> PyResult<PyObject> {
    Ok(match json {
        serde_json::Value::Null => py.None(),
        serde_json::Value::Bool(b) => b.into_py(py),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => i.into_py(py),
            None => n.as_f64().unwrap_or(f64::NAN).into_py(py),
        },
        serde_json::Value::String(s) => s.as_str().into_py(py),
        serde_json::Value::Array(items) => {
            let list = PyList::empty_bound(py);
            for item in items {
                list.append(json_to_py(py, item)?)?;
            }
            list.into_py(py)
        }
        serde_json::Value::Object(map) => {
            let dict = PyDict::new_bound(py);
            for (key, item) in map {
                dict.set_item(key, json_to_py(py, item)?)?;
            }
            dict.into_py(py)
        }
    })
}

fn from_py(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    if obj.is_none() {
        return Ok(Value::Null);
    }
    // bool is a subclass of int, so it must be checked first.
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Ok(Value::Bool(b.is_true()));
    }
    if let Ok(n) = obj.extract::<f64>() {
        return Ok(Value::Number(n));
    }
    if let Ok(s) = obj.extract::<String>() {
        return Ok(Value::from(s));
    }
    if let Ok(list) = obj.downcast::<PyList>() {
        let items = list.iter().map(|item| from_py(&item)).collect::<PyResult<Vec<_>>>()?;
        return Ok(Value::Array(Array::from(items)));
    }
    if let Ok(dict) = obj.downcast::<PyDict>() {
        let object = Object::new();
        for (key, item) in dict.iter() {
            object.set(key.extract::<String>()?, from_py(&item)?);
        }
        return Ok(Value::Object(object));
    }
    Err(PyTypeError::new_err(format!(
        "unsupported value of type {}",
        obj.get_type().name()?
    )))
}
