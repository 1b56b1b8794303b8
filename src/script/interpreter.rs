//! The embedded interpreter: owns the global table and executes a
//! parsed [`Program`].
//!
//! Construction wires the interpreter's allocation hook: it reserves a
//! scratch region through the allocator's `reallocate` and grows it the
//! same way, so `RuntimeManager`'s chosen allocator is the one actually on
//! the hook, not just held for stats.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::alloc::Allocator;
use crate::error::{ErrorInfo, ErrorKind, ScriptResult};
use crate::script::parser::{BinOp, Expr, Program, Stmt, UnOp};
use crate::script::value::Value;
use crate::sync::mutex::Mutex;

/// Initial size of the interpreter's scratch allocation, grown on demand
/// through the allocator hook.
const INITIAL_SCRATCH_BYTES: usize = 256;

struct Scratch {
    ptr: Option<NonNull<u8>>,
    size: usize,
}

unsafe impl Send for Scratch {}

pub struct Interpreter {
    globals: Mutex<HashMap<String, Value>>,
    allocator: Mutex<Arc<dyn Allocator>>,
    scratch: Mutex<Scratch>,
}

impl Interpreter {
    /// Construct a new interpreter routing its allocation hook through
    /// `allocator`.
    pub fn new(allocator: Arc<dyn Allocator>) -> ScriptResult<Self> {
        let ptr = allocator.allocate(INITIAL_SCRATCH_BYTES, std::mem::align_of::<usize>())?;
        Ok(Self {
            globals: Mutex::new(HashMap::new()),
            allocator: Mutex::new(allocator),
            scratch: Mutex::new(Scratch {
                ptr: Some(ptr),
                size: INITIAL_SCRATCH_BYTES,
            }),
        })
    }

    /// The interpreter's allocation hook: `ptr == None` is allocate,
    /// `new_size == 0` is deallocate, otherwise a reallocate-style resize.
    /// Exercised here to grow the scratch region; exposed so a host
    /// embedding a real interpreter could route its own hook the same way.
    pub fn alloc_hook(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> ScriptResult<Option<NonNull<u8>>> {
        self.allocator
            .lock()
            .reallocate(ptr, old_size, new_size, std::mem::align_of::<usize>())
    }

    /// Grow the scratch region to at least `bytes`, routed through the
    /// allocator hook like any other interpreter-driven resize.
    pub fn ensure_scratch_capacity(&self, bytes: usize) -> ScriptResult<()> {
        let mut scratch = self.scratch.lock();
        if scratch.size >= bytes {
            return Ok(());
        }
        let new_ptr = self.allocator.lock().reallocate(
            scratch.ptr,
            scratch.size,
            bytes,
            std::mem::align_of::<usize>(),
        )?;
        scratch.ptr = new_ptr;
        scratch.size = bytes;
        Ok(())
    }

    /// Swap the allocator backing this interpreter's hook. The caller
    /// (`RuntimeManager::replace_allocator`) is responsible for ensuring no
    /// interpreter activity is in flight.
    pub fn set_allocator(&self, allocator: Arc<dyn Allocator>) {
        *self.allocator.lock() = allocator;
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.lock().get(name).cloned()
    }

    pub fn set_global(&self, name: impl Into<String>, value: Value) {
        self.globals.lock().insert(name.into(), value);
    }

    /// Register a native function as a global, rejecting an attempt to
    /// overwrite an existing one (spec's `FunctionExists`).
    pub fn register_function(
        &self,
        name: impl Into<String>,
        f: crate::script::value::NativeFn,
    ) -> ScriptResult<()> {
        let name = name.into();
        let mut globals = self.globals.lock();
        if globals.contains_key(&name) {
            return crate::error::make_error(
                ErrorKind::FunctionExists,
                format!("global '{name}' is already registered"),
                "Interpreter::register_function",
                None,
            );
        }
        globals.insert(name, Value::Native(f));
        Ok(())
    }

    /// Run every statement in `program`, returning the value of the final
    /// bare expression statement (or `Value::Nil` if there is none).
    pub fn execute(&self, program: &Program) -> ScriptResult<Value> {
        let mut last = Value::Nil;
        for stmt in &program.statements {
            last = self.execute_stmt(stmt)?;
        }
        Ok(last)
    }

    fn execute_stmt(&self, stmt: &Stmt) -> ScriptResult<Value> {
        match stmt {
            Stmt::Expr(expr) => self.eval(expr),
            Stmt::Assign(target, expr, line) => {
                let value = self.eval(expr)?;
                if target.path.is_empty() {
                    self.set_global(target.root.clone(), value.clone());
                    return Ok(value);
                }
                let root = self.get_global(&target.root).ok_or_else(|| {
                    ErrorInfo::new(
                        ErrorKind::RuntimeError,
                        format!("assignment to undefined global '{}'", target.root),
                        "Interpreter::execute",
                        Some(*line),
                    )
                })?;
                self.assign_path(&root, &target.path, value.clone(), *line)?;
                Ok(value)
            }
        }
    }

    fn assign_path(&self, root: &Value, path: &[String], value: Value, line: u32) -> ScriptResult<()> {
        let Value::Table(table) = root else {
            return crate::error::make_error(
                ErrorKind::RuntimeError,
                format!("cannot assign a field on a {}", root.type_name()),
                "Interpreter::execute",
                Some(line),
            );
        };
        let mut guard = table.lock();
        if path.len() == 1 {
            guard.insert(path[0].clone(), value);
            return Ok(());
        }
        let next = guard
            .entry(path[0].clone())
            .or_insert_with(Value::new_table)
            .clone();
        drop(guard);
        self.assign_path(&next, &path[1..], value, line)
    }

    fn eval(&self, expr: &Expr) -> ScriptResult<Value> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => self.get_global(name).ok_or_else(|| {
                ErrorInfo::new(
                    ErrorKind::RuntimeError,
                    format!("undefined global '{name}'"),
                    "Interpreter::execute",
                    None,
                )
            }),
            Expr::Field(base, field) => {
                let base = self.eval(base)?;
                match base {
                    Value::Table(t) => Ok(t.lock().get(field).cloned().unwrap_or(Value::Nil)),
                    other => crate::error::make_error(
                        ErrorKind::RuntimeError,
                        format!("cannot read field '{field}' of a {}", other.type_name()),
                        "Interpreter::execute",
                        None,
                    ),
                }
            }
            Expr::Table(fields) => {
                let mut map = HashMap::new();
                for (name, value_expr) in fields {
                    map.insert(name.clone(), self.eval(value_expr)?);
                }
                Ok(Value::Table(Arc::new(Mutex::new(map))))
            }
            Expr::Array(items) => {
                let mut vec = Vec::with_capacity(items.len());
                for item in items {
                    vec.push(self.eval(item)?);
                }
                Ok(Value::Array(Arc::new(Mutex::new(vec))))
            }
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                match (op, &v) {
                    (UnOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnOp::Not, _) => Ok(Value::Bool(!v.is_truthy())),
                    (UnOp::Neg, other) => crate::error::make_error(
                        ErrorKind::RuntimeError,
                        format!("cannot negate a {}", other.type_name()),
                        "Interpreter::execute",
                        None,
                    ),
                }
            }
            Expr::Binary(lhs, op, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.eval_binary(lhs, *op, rhs)
            }
            Expr::Call(name, args) => self.call_function_owned(name, args),
        }
    }

    fn call_function_owned(&self, name: &str, arg_exprs: &[Expr]) -> ScriptResult<Value> {
        let mut args = Vec::with_capacity(arg_exprs.len());
        for arg in arg_exprs {
            args.push(self.eval(arg)?);
        }
        self.call_function(name, &args)
    }

    /// Look up `name` as a global and invoke it as a native function.
    pub fn call_function(&self, name: &str, args: &[Value]) -> ScriptResult<Value> {
        let target = self.get_global(name).ok_or_else(|| {
            ErrorInfo::new(ErrorKind::FunctionNotFound, "function not found", name, None)
        })?;
        match target {
            Value::Native(f) => f(args).map_err(|e| {
                ErrorInfo::new(ErrorKind::RuntimeError, e.message, name, e.line_number)
            }),
            other => crate::error::make_error(
                ErrorKind::FunctionNotFound,
                format!("global '{name}' is a {}, not a function", other.type_name()),
                name,
                None,
            ),
        }
    }

    fn eval_binary(&self, lhs: Value, op: BinOp, rhs: Value) -> ScriptResult<Value> {
        use BinOp::*;
        if matches!(op, Eq | NotEq) {
            let eq = lhs.values_equal(&rhs);
            return Ok(Value::Bool(if op == Eq { eq } else { !eq }));
        }
        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(match op {
                Add => Value::Number(a + b),
                Sub => Value::Number(a - b),
                Mul => Value::Number(a * b),
                Div => Value::Number(a / b),
                Lt => Value::Bool(a < b),
                Gt => Value::Bool(a > b),
                Le => Value::Bool(a <= b),
                Ge => Value::Bool(a >= b),
                Eq | NotEq => unreachable!("handled above"),
            }),
            (Value::Str(a), Value::Str(b)) if op == Add => Ok(Value::Str(a + &b)),
            (a, b) => crate::error::make_error(
                ErrorKind::RuntimeError,
                format!("unsupported operands for {op:?}: {} and {}", a.type_name(), b.type_name()),
                "Interpreter::execute",
                None,
            ),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        let scratch = self.scratch.lock();
        if let Some(ptr) = scratch.ptr {
            let _ = self.allocator.lock().deallocate(ptr, scratch.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::DefaultAllocator;
    use std::sync::Arc;

    fn interp() -> Interpreter {
        Interpreter::new(Arc::new(DefaultAllocator::new())).unwrap()
    }

    #[test]
    fn assigns_and_reads_globals() {
        let i = interp();
        i.execute(&crate::script::parser::parse("x = 1 + 2").unwrap()).unwrap();
        assert_eq!(i.get_global("x"), Some(Value::Number(3.0)));
    }

    #[test]
    fn table_field_assignment_mutates_in_place() {
        let i = interp();
        i.execute(&crate::script::parser::parse(r#"cfg = {mode = "A"}"#).unwrap()).unwrap();
        i.execute(&crate::script::parser::parse(r#"cfg.mode = "B""#).unwrap()).unwrap();
        let cfg = i.get_global("cfg").unwrap();
        if let Value::Table(t) = cfg {
            assert_eq!(t.lock().get("mode"), Some(&Value::Str("B".into())));
        } else {
            panic!("expected table");
        }
    }

    #[test]
    fn call_missing_function_is_function_not_found() {
        let i = interp();
        let err = i.call_function("nope", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FunctionNotFound);
        assert_eq!(err.context, "nope");
    }

    #[test]
    fn binary_type_mismatch_is_runtime_error() {
        let i = interp();
        let err = i
            .execute(&crate::script::parser::parse("x = 1 + \"a\"").unwrap())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RuntimeError);
    }

    #[test]
    fn register_function_rejects_duplicate() {
        let i = interp();
        i.register_function("double", Arc::new(|args: &[Value]| {
            Ok(args.first().cloned().unwrap_or(Value::Nil))
        }))
        .unwrap();
        let err = i
            .register_function("double", Arc::new(|_: &[Value]| Ok(Value::Nil)))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FunctionExists);
    }
}
