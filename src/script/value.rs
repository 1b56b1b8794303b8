//! The value type threaded through the embedded interpreter.
//!
//! Kept deliberately small: no control flow or user-defined functions,
//! just an eval entry point over named global tables. Tables
//! and arrays are reference types so `cfg.mode = "B"` mutates the same
//! object other holders see, matching how the protected-table machinery
//! expects to find and snapshot them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ScriptResult;
use crate::sync::mutex::Mutex;

/// A native function exposed to scripts via `register_bindings`.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> ScriptResult<Value> + Send + Sync>;

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    Table(Arc<Mutex<HashMap<String, Value>>>),
    Array(Arc<Mutex<Vec<Value>>>),
    Native(NativeFn),
}

impl Value {
    /// A fresh, empty table.
    pub fn new_table() -> Value {
        Value::Table(Arc::new(Mutex::new(HashMap::new())))
    }

    /// A fresh, empty array.
    pub fn new_array() -> Value {
        Value::Array(Arc::new(Mutex::new(Vec::new())))
    }

    /// Truthiness: everything but `Nil` and `Bool(false)` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// A short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Array(_) => "array",
            Value::Native(_) => "function",
        }
    }

    /// Recursively clone a value's contents into fresh table/array storage.
    ///
    /// Used by the hot-reload backup step: a protected table must keep its
    /// own contents even if the reloaded script mutates the original in
    /// place, so a reference clone (just bumping the `Arc`) is not enough.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Nil => Value::Nil,
            Value::Bool(b) => Value::Bool(*b),
            Value::Number(n) => Value::Number(*n),
            Value::Str(s) => Value::Str(s.clone()),
            Value::Native(f) => Value::Native(f.clone()),
            Value::Table(t) => {
                let cloned: HashMap<String, Value> = t
                    .lock()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect();
                Value::Table(Arc::new(Mutex::new(cloned)))
            }
            Value::Array(a) => {
                let cloned: Vec<Value> = a.lock().iter().map(Value::deep_clone).collect();
                Value::Array(Arc::new(Mutex::new(cloned)))
            }
        }
    }

    /// Structural equality; two distinct `Table`/`Array` instances with
    /// identical contents compare equal (needed to assert protected-table
    /// preservation across a reload).
    pub fn values_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => {
                let a = a.lock();
                let b = b.lock();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|bv| v.values_equal(bv)))
            }
            (Value::Array(a), Value::Array(b)) => {
                let a = a.lock();
                let b = b.lock();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.values_equal(y))
            }
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Table(t) => write!(f, "table({} keys)", t.lock().len()),
            Value::Array(a) => write!(f, "array({} items)", a.lock().len()),
            Value::Native(_) => write!(f, "<native fn>"),
        }
    }
}


impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.values_equal(other)
    }
}
