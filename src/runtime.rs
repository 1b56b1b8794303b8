//! Runtime manager: owns the interpreter and allocator, registers native
//! bindings, executes scripts, and exposes the hot-reload host API.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::alloc::{Allocator, DefaultAllocator};
use crate::error::{ErrorInfo, ErrorKind, ScriptResult, VoidResult};
use crate::reload::{HotReloadEvent, HotReloadManager, ReloadCallback};
use crate::registry::ScriptInfo;
use crate::script::{Interpreter, Value};
use crate::sync::mutex::Mutex;
use crate::watch::WatchCallback;

/// A binding-registration callback: receives the interpreter handle and
/// performs side effects (typically `register_function` calls). Any error
/// it returns is converted to `BindingRegistrationFailed`.
pub type BindingFn = Box<dyn FnOnce(&Interpreter) -> VoidResult>;

/// Owns the interpreter, the installed allocator, and the hot-reload
/// subsystem.
///
/// Rust's ownership model already makes "use after move" a compile error,
/// so a moved-from-manager invariant has no runtime analogue here. Instead
/// [`shutdown`](Self::shutdown) gives callers an explicit, checkable way to
/// retire a manager they're keeping around (e.g. behind an `Arc`) instead
/// of dropping it.
pub struct RuntimeManager {
    interpreter: Mutex<Arc<Interpreter>>,
    allocator: Mutex<Arc<dyn Allocator>>,
    reload: HotReloadManager,
    valid: AtomicBool,
    /// Reload requests posted by a watcher's worker thread, drained on the
    /// manager's own thread by [`RuntimeManager::process_pending_reloads`].
    /// A lock-free queue keeps the watcher thread from re-entering the
    /// interpreter directly.
    pending_reloads: SegQueue<String>,
}

impl RuntimeManager {
    /// Construct with the default (system) allocator.
    pub fn new() -> ScriptResult<Self> {
        Self::with_allocator(Arc::new(DefaultAllocator::new()))
    }

    /// Construct with a caller-supplied allocator. The interpreter's
    /// allocation hook is routed through it immediately.
    pub fn with_allocator(allocator: Arc<dyn Allocator>) -> ScriptResult<Self> {
        let interpreter = Interpreter::new(allocator.clone())?;
        Ok(Self {
            interpreter: Mutex::new(Arc::new(interpreter)),
            allocator: Mutex::new(allocator),
            reload: HotReloadManager::new(),
            valid: AtomicBool::new(true),
            pending_reloads: SegQueue::new(),
        })
    }

    fn interpreter(&self) -> Arc<Interpreter> {
        self.interpreter.lock().clone()
    }

    fn check_valid(&self, op: &str) -> VoidResult {
        if self.valid.load(Ordering::Acquire) {
            Ok(())
        } else {
            crate::error::make_error(ErrorKind::InvalidState, "runtime manager has been shut down", op, None)
        }
    }

    /// Whether this manager is still usable.
    pub fn is_state_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Retire this manager. All subsequent operations fail with
    /// `InvalidState`.
    pub fn shutdown(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Invoke `f` with the interpreter handle; any error it returns is
    /// reported as `BindingRegistrationFailed`.
    pub fn register_bindings(&self, f: BindingFn) -> VoidResult {
        self.check_valid("RuntimeManager::register_bindings")?;
        f(&self.interpreter()).map_err(|e| {
            ErrorInfo::new(ErrorKind::BindingRegistrationFailed, e.message, e.context, e.line_number)
        })
    }

    /// Register several binding callbacks, stopping at the first error.
    pub fn register_multiple_bindings(&self, fns: Vec<BindingFn>) -> VoidResult {
        for f in fns {
            self.register_bindings(f)?;
        }
        Ok(())
    }

    /// Parse and run `src`, returning the value of its final expression
    /// statement (`Value::Nil` if none).
    pub fn execute_script(&self, src: &str) -> ScriptResult<Value> {
        self.check_valid("RuntimeManager::execute_script")?;
        let program = crate::script::parse(src)?;
        self.interpreter().execute(&program)
    }

    /// Read `path` and run it as a script.
    pub fn execute_file(&self, path: impl AsRef<std::path::Path>) -> ScriptResult<Value> {
        self.check_valid("RuntimeManager::execute_file")?;
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ErrorInfo::new(
                ErrorKind::FileReadError,
                format!("failed to read '{}': {e}", path.display()),
                "RuntimeManager::execute_file",
                None,
            )
        })?;
        self.execute_script(&content)
    }

    /// Look up `name` as a global and invoke it as a native function.
    pub fn call_lua_function(&self, name: &str, args: &[Value]) -> ScriptResult<Value> {
        self.check_valid("RuntimeManager::call_lua_function")?;
        self.interpreter().call_function(name, args)
    }

    /// Destroy and reconstruct the interpreter with the same allocator.
    /// The registry, protected-table set, and history survive; registered
    /// scripts are not automatically re-applied.
    pub fn reset_state(&self) -> VoidResult {
        self.check_valid("RuntimeManager::reset_state")?;
        let allocator = self.allocator.lock().clone();
        let fresh = Interpreter::new(allocator)?;
        *self.interpreter.lock() = Arc::new(fresh);
        Ok(())
    }

    /// The currently installed allocator.
    pub fn get_allocator(&self) -> Arc<dyn Allocator> {
        self.allocator.lock().clone()
    }

    /// Install a new allocator. Only valid with no interpreter activity in
    /// flight (single-threaded-by-contract, per the concurrency model);
    /// updates both the manager's handle and the interpreter's hook.
    pub fn replace_allocator(&self, new: Arc<dyn Allocator>) -> VoidResult {
        self.check_valid("RuntimeManager::replace_allocator")?;
        self.interpreter().set_allocator(new.clone());
        *self.allocator.lock() = new;
        Ok(())
    }

    // -- Hot reload host API ------------------------------------------------

    pub fn register_hot_reload_script(&self, name: impl Into<String>, path: impl AsRef<std::path::Path>) -> VoidResult {
        self.check_valid("RuntimeManager::register_hot_reload_script")?;
        self.reload.register_hot_reload_script(name, path)
    }

    pub fn reload_script(&self, name: &str) -> HotReloadEvent {
        self.reload.reload_script(name, &self.interpreter())
    }

    pub fn reload_script_content(&self, name: &str, content: &str) -> HotReloadEvent {
        self.reload.reload_script_content(name, content, &self.interpreter())
    }

    pub fn check_and_reload_scripts(&self) -> Vec<HotReloadEvent> {
        self.reload.check_and_reload_scripts(&self.interpreter())
    }

    pub fn needs_reload(&self, name: &str) -> ScriptResult<bool> {
        self.reload.needs_reload(name)
    }

    pub fn get_registered_scripts(&self) -> Vec<ScriptInfo> {
        self.reload.get_registered_scripts()
    }

    pub fn get_reload_history(&self) -> Vec<HotReloadEvent> {
        self.reload.get_reload_history()
    }

    pub fn add_protected_table(&self, name: impl Into<String>) {
        self.reload.protected.add(name);
    }

    pub fn remove_protected_table(&self, name: &str) {
        self.reload.protected.remove(name);
    }

    pub fn get_protected_tables(&self) -> Vec<String> {
        self.reload.protected.list()
    }

    pub fn set_pre_reload_callback(&self, cb: ReloadCallback) {
        self.reload.set_pre_reload_callback(cb);
    }

    pub fn set_post_reload_callback(&self, cb: ReloadCallback) {
        self.reload.set_post_reload_callback(cb);
    }

    // -- Watcher marshalling -------------------------------------------------

    /// A [`WatchCallback`] that posts `name` onto `manager`'s reload queue
    /// instead of reloading directly from the watcher's worker thread. Hand
    /// the result to `FileWatcher::watch_file` for each registered script;
    /// drain with [`process_pending_reloads`](Self::process_pending_reloads).
    pub fn reload_request_callback(manager: &Arc<RuntimeManager>, name: impl Into<String>) -> WatchCallback {
        let manager = manager.clone();
        let name = name.into();
        Arc::new(move |_path: &Path| manager.pending_reloads.push(name.clone()))
    }

    /// Drain every reload request posted since the last call and run each
    /// one on the calling thread, returning the collected events in the
    /// order they were queued.
    pub fn process_pending_reloads(&self) -> Vec<HotReloadEvent> {
        let mut events = Vec::new();
        while let Some(name) = self.pending_reloads.pop() {
            events.push(self.reload_script(&name));
        }
        events
    }

    /// Number of reload requests currently queued but not yet processed.
    pub fn pending_reload_count(&self) -> usize {
        self.pending_reloads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_missing_function_on_fresh_manager() {
        // calling an unregistered name on an otherwise-untouched manager.
        let mgr = RuntimeManager::new().unwrap();
        let err = mgr.call_lua_function("nope", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FunctionNotFound);
        assert_eq!(err.context, "nope");
    }

    #[test]
    fn execute_script_returns_last_expression_value() {
        let mgr = RuntimeManager::new().unwrap();
        let value = mgr.execute_script("x = 41 + 1").unwrap();
        assert_eq!(value, Value::Number(42.0));
    }

    #[test]
    fn register_bindings_wraps_errors() {
        let mgr = RuntimeManager::new().unwrap();
        let err = mgr
            .register_bindings(Box::new(|_interp| {
                crate::error::make_error(ErrorKind::InternalError, "boom", "binder", None)
            }))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BindingRegistrationFailed);
    }

    #[test]
    fn register_multiple_bindings_short_circuits() {
        let mgr = RuntimeManager::new().unwrap();
        let calls = Arc::new(Mutex::new(0u32));
        let calls2 = calls.clone();
        let result = mgr.register_multiple_bindings(vec![
            Box::new(move |_interp| {
                *calls.lock() += 1;
                Ok(())
            }),
            Box::new(|_interp| crate::error::make_error(ErrorKind::InternalError, "boom", "binder", None)),
            Box::new(move |_interp| {
                *calls2.lock() += 1;
                Ok(())
            }),
        ]);
        assert!(result.is_err());
        assert_eq!(*calls2.lock(), 1, "the third binder must not run after the second fails");
    }

    #[test]
    fn watcher_marshalled_reload_runs_on_drain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.script");
        std::fs::write(&path, "x = 1").unwrap();

        let mgr = Arc::new(RuntimeManager::new().unwrap());
        mgr.register_hot_reload_script("w", &path).unwrap();
        mgr.reload_script("w"); // establish baseline so the next change is detected

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, "x = 2").unwrap();

        let callback = RuntimeManager::reload_request_callback(&mgr, "w");
        assert_eq!(mgr.pending_reload_count(), 0);
        callback(&path);
        assert_eq!(mgr.pending_reload_count(), 1);

        let events = mgr.process_pending_reloads();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].result, crate::reload::ReloadResult::Success);
        assert_eq!(mgr.pending_reload_count(), 0);
    }

    #[test]
    fn shutdown_invalidates_subsequent_operations() {
        let mgr = RuntimeManager::new().unwrap();
        mgr.shutdown();
        assert!(!mgr.is_state_valid());
        let err = mgr.execute_script("x = 1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }

    #[test]
    fn reset_state_clears_globals_but_keeps_registry() {
        let mgr = RuntimeManager::new().unwrap();
        mgr.execute_script("x = 1").unwrap();
        mgr.add_protected_table("x");

        mgr.reset_state().unwrap();

        assert_eq!(mgr.get_protected_tables(), vec!["x".to_string()]);
        let err = mgr.call_lua_function("x", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FunctionNotFound);
    }

    #[test]
    fn end_to_end_hot_reload_updates_protected_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.script");
        std::fs::write(&path, r#"cfg = {mode = "A"}"#).unwrap();

        let mgr = RuntimeManager::new().unwrap();
        mgr.register_hot_reload_script("cfg", &path).unwrap();
        mgr.add_protected_table("cfg");
        assert_eq!(mgr.reload_script("cfg").result, crate::reload::ReloadResult::Success);

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, r#"cfg = {mode = "B"}"#).unwrap();
        assert_eq!(mgr.reload_script("cfg").result, crate::reload::ReloadResult::Success);

        let cfg = mgr.call_lua_function_table_probe("cfg");
        assert_eq!(cfg, Some("B".to_string()));
    }

    impl RuntimeManager {
        fn call_lua_function_table_probe(&self, name: &str) -> Option<String> {
            match self.interpreter().get_global(name) {
                Some(Value::Table(t)) => match t.lock().get("mode") {
                    Some(Value::Str(s)) => Some(s.clone()),
                    _ => None,
                },
                _ => None,
            }
        }
    }
}
