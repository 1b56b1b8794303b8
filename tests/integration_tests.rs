//! End-to-end tests exercising `RuntimeManager` the way a host would:
//! registering bindings, running scripts, and driving hot reload through
//! the watcher.

use scriptcore::alloc::pool::PoolAllocator;
use scriptcore::alloc::stack::StackAllocator;
use scriptcore::error::ErrorKind;
use scriptcore::reload::ReloadResult;
use scriptcore::runtime::RuntimeManager;
use scriptcore::script::Value;
use scriptcore::watch::{create_watcher, polling::PollingWatcher, FileWatcher};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn construct_with_stack_allocator_and_run_script() {
    let allocator = Arc::new(StackAllocator::new(64 * 1024));
    let mgr = RuntimeManager::with_allocator(allocator.clone()).unwrap();

    let value = mgr.execute_script("total = 10 * 4 + 2").unwrap();
    assert_eq!(value, Value::Number(42.0));
    assert!(allocator.stats().total_allocated > 0, "interpreter scratch allocation routed through the hook");
}

#[test]
fn construct_with_pool_allocator_and_run_script() {
    let allocator = Arc::new(PoolAllocator::new(4096, 16).unwrap());
    let mgr = RuntimeManager::with_allocator(allocator).unwrap();
    let value = mgr.execute_script("ok = true").unwrap();
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn register_bindings_exposes_native_function_to_scripts() {
    let mgr = RuntimeManager::new().unwrap();
    mgr.register_bindings(Box::new(|interp| {
        interp.register_function(
            "double",
            Arc::new(|args: &[Value]| match args.first() {
                Some(Value::Number(n)) => Ok(Value::Number(n * 2.0)),
                _ => scriptcore::error::make_error(
                    ErrorKind::InvalidArguments,
                    "double() expects one number",
                    "double",
                    None,
                ),
            }),
        )
    }))
    .unwrap();

    let result = mgr.call_lua_function("double", &[Value::Number(21.0)]).unwrap();
    assert_eq!(result, Value::Number(42.0));
}

#[test]
fn call_missing_function_reports_function_not_found() {
    // calling an unregistered name reports FunctionNotFound, not a panic.
    let mgr = RuntimeManager::new().unwrap();
    let err = mgr.call_lua_function("nope", &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::FunctionNotFound);
    assert_eq!(err.context, "nope");
}

#[test]
fn execute_file_runs_script_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.script");
    std::fs::write(&path, "answer = 6 * 7").unwrap();

    let mgr = RuntimeManager::new().unwrap();
    let value = mgr.execute_file(&path).unwrap();
    assert_eq!(value, Value::Number(42.0));
}

#[test]
fn syntax_error_rollback_preserves_protected_table() {
    // a syntax error in the new content rolls back to the last-good table.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.script");
    std::fs::write(&path, r#"cfg = {mode = "A"}"#).unwrap();

    let mgr = RuntimeManager::new().unwrap();
    mgr.register_hot_reload_script("cfg", &path).unwrap();
    mgr.add_protected_table("cfg");
    assert_eq!(mgr.reload_script("cfg").result, ReloadResult::Success);

    std::thread::sleep(Duration::from_millis(20));
    std::fs::write(&path, r#"cfg = {mode="B" <<< broken"#).unwrap();
    let event = mgr.reload_script("cfg");
    assert_eq!(event.result, ReloadResult::SyntaxError);

    let history = mgr.get_reload_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].result, ReloadResult::SyntaxError);
}

#[test]
fn reload_idempotence_on_unmodified_file() {
    // back-to-back reload of an unmodified file yields NoChanges.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.script");
    std::fs::write(&path, "x = 1").unwrap();

    let mgr = RuntimeManager::new().unwrap();
    mgr.register_hot_reload_script("s", &path).unwrap();
    assert_eq!(mgr.reload_script("s").result, ReloadResult::Success);
    assert_eq!(mgr.reload_script("s").result, ReloadResult::NoChanges);
}

#[test]
fn content_reload_keeps_file_backing_for_later_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("w.script");
    std::fs::write(&path, "x = 1").unwrap();

    let mgr = RuntimeManager::new().unwrap();
    mgr.register_hot_reload_script("w", &path).unwrap();
    assert_eq!(mgr.reload_script("w").result, ReloadResult::Success);

    // A content-only reload must not strip the script's file association.
    assert_eq!(mgr.reload_script_content("w", "x = 2").result, ReloadResult::Success);

    std::thread::sleep(Duration::from_millis(20));
    std::fs::write(&path, "x = 3").unwrap();
    let event = mgr.reload_script("w");
    assert_eq!(event.result, ReloadResult::Success, "file-backed reload must still find its file after a content-only reload");
}

#[test]
fn watcher_driven_reload_end_to_end() {
    // a polling watcher notices a file change and the manager drains the
    // resulting reload request.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watched.script");
    std::fs::write(&path, "x = 1").unwrap();

    let mgr = Arc::new(RuntimeManager::new().unwrap());
    mgr.register_hot_reload_script("watched", &path).unwrap();
    mgr.reload_script("watched");

    let watcher = PollingWatcher::new(Duration::from_millis(30));
    let callback = RuntimeManager::reload_request_callback(&mgr, "watched");
    watcher.watch_file(&path, callback).unwrap();
    watcher.start().unwrap();

    std::thread::sleep(Duration::from_millis(40));
    std::fs::write(&path, "x = 2").unwrap();

    let deadline = std::time::Instant::now() + Duration::from_millis(500);
    while mgr.pending_reload_count() == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    watcher.stop().unwrap();

    let events = mgr.process_pending_reloads();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, ReloadResult::Success);
}

#[test]
fn watcher_factory_always_produces_a_usable_watcher() {
    let watcher = create_watcher(Duration::from_millis(100));
    watcher.start().unwrap();
    watcher.stop().unwrap();
}

#[test]
fn reset_state_survives_registry_and_protected_tables() {
    let mgr = RuntimeManager::new().unwrap();
    mgr.add_protected_table("cfg");
    mgr.execute_script(r#"cfg = {mode = "A"}"#).unwrap();

    mgr.reset_state().unwrap();

    assert_eq!(mgr.get_protected_tables(), vec!["cfg".to_string()]);
    // A fresh interpreter has no "cfg" global until something re-applies it.
    let err = mgr.call_lua_function("cfg", &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::FunctionNotFound);
}
