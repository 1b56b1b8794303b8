//! Hot-reload protocol: protected-table backup/restore, staged apply,
//! rollback, append-only history, and pre/post callbacks.
//!
//! The state machine runs `CheckChange -> ReadFile -> BackupProtected ->
//! ApplyNewContent -> Execute -> RefreshRegistry -> PostCallback`, with
//! `RestoreProtected` on any failure branch.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{ErrorKind, ScriptResult};
use crate::registry::ScriptRegistry;
use crate::script::Interpreter;
use crate::sync::mutex::Mutex;

const DEFAULT_HISTORY_CAP: usize = 256;

/// Outcome classification of one reload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadResult {
    Success,
    NoChanges,
    SyntaxError,
    RuntimeError,
    FileNotFound,
    RollbackSuccess,
}

/// A single terminal reload outcome, appended to the history log.
#[derive(Debug, Clone)]
pub struct HotReloadEvent {
    pub script_name: String,
    pub result: ReloadResult,
    pub error_message: Option<String>,
    pub timestamp: u64,
}

impl HotReloadEvent {
    fn new(script_name: impl Into<String>, result: ReloadResult, error_message: Option<String>) -> Self {
        Self {
            script_name: script_name.into(),
            result,
            error_message,
            timestamp: now_unix(),
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Append-only, cap-evicting log of reload events.
pub struct HotReloadHistory {
    events: Mutex<VecDeque<HotReloadEvent>>,
    cap: usize,
}

impl HotReloadHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    fn push(&self, event: HotReloadEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.cap {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Vec<HotReloadEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for HotReloadHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

/// Callback invoked synchronously on the manager's thread with a completed
/// event. `pre` callbacks see the event before `ApplyNewContent` runs (only
/// `script_name` is meaningful then); `post` callbacks see the final,
/// fully-classified event.
pub type ReloadCallback = Arc<dyn Fn(&HotReloadEvent) + Send + Sync>;

/// Top-level global names whose contents must survive a reload unless the
/// reloaded script explicitly overwrites them.
pub struct ProtectedTables {
    names: Mutex<HashSet<String>>,
}

impl ProtectedTables {
    fn new() -> Self {
        Self {
            names: Mutex::new(HashSet::new()),
        }
    }

    pub fn add(&self, name: impl Into<String>) {
        self.names.lock().insert(name.into());
    }

    pub fn remove(&self, name: &str) {
        self.names.lock().remove(name);
    }

    pub fn list(&self) -> Vec<String> {
        self.names.lock().iter().cloned().collect()
    }
}

impl Default for ProtectedTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the registry, protected-table set, history, and callbacks, and runs
/// the reload state machine against whatever [`Interpreter`] it's given.
pub struct HotReloadManager {
    pub registry: ScriptRegistry,
    pub protected: ProtectedTables,
    pub history: HotReloadHistory,
    pre_callback: Mutex<Option<ReloadCallback>>,
    post_callback: Mutex<Option<ReloadCallback>>,
    in_progress: Mutex<HashSet<String>>,
}

impl HotReloadManager {
    pub fn new() -> Self {
        Self {
            registry: ScriptRegistry::new(),
            protected: ProtectedTables::new(),
            history: HotReloadHistory::default(),
            pre_callback: Mutex::new(None),
            post_callback: Mutex::new(None),
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_pre_reload_callback(&self, cb: ReloadCallback) {
        *self.pre_callback.lock() = Some(cb);
    }

    pub fn set_post_reload_callback(&self, cb: ReloadCallback) {
        *self.post_callback.lock() = Some(cb);
    }

    pub fn register_hot_reload_script(&self, name: impl Into<String>, path: impl AsRef<std::path::Path>) -> ScriptResult<()> {
        self.registry.register(name, path)
    }

    pub fn needs_reload(&self, name: &str) -> ScriptResult<bool> {
        self.registry.needs_reload(name)
    }

    pub fn get_registered_scripts(&self) -> Vec<crate::registry::ScriptInfo> {
        self.registry.all()
    }

    pub fn get_reload_history(&self) -> Vec<HotReloadEvent> {
        self.history.iter()
    }

    /// Reload a registered script from its backing file.
    pub fn reload_script(&self, name: &str, interpreter: &Interpreter) -> HotReloadEvent {
        self.run(name, None, interpreter)
    }

    /// Reload with supplied content, skipping file I/O. Does not touch the
    /// registry's stored `last_modified`.
    pub fn reload_script_content(&self, name: &str, content: &str, interpreter: &Interpreter) -> HotReloadEvent {
        self.run(name, Some(content.to_string()), interpreter)
    }

    /// Run `needs_reload` across the registry in registration order and
    /// reload every script that reports true, returning the collected
    /// events in that same order.
    pub fn check_and_reload_scripts(&self, interpreter: &Interpreter) -> Vec<HotReloadEvent> {
        let mut events = Vec::new();
        for info in self.registry.all() {
            match self.registry.needs_reload(&info.name) {
                Ok(true) => events.push(self.reload_script(&info.name, interpreter)),
                Ok(false) => {}
                Err(_) => {}
            }
        }
        events
    }

    fn run(&self, name: &str, content_override: Option<String>, interpreter: &Interpreter) -> HotReloadEvent {
        struct Guard<'a> {
            set: &'a Mutex<HashSet<String>>,
            name: String,
        }
        impl Drop for Guard<'_> {
            fn drop(&mut self) {
                self.set.lock().remove(&self.name);
            }
        }

        {
            let mut in_progress = self.in_progress.lock();
            if in_progress.contains(name) {
                return self.finish(HotReloadEvent::new(
                    name,
                    ReloadResult::RuntimeError,
                    Some("recursive reload rejected (InvalidState)".to_string()),
                ));
            }
            in_progress.insert(name.to_string());
        }
        let _guard = Guard { set: &self.in_progress, name: name.to_string() };

        // CheckChange / ReadFile.
        let content = match &content_override {
            Some(c) => c.clone(),
            None => {
                let info = match self.registry.get(name) {
                    Some(info) => info,
                    None => return self.finish(HotReloadEvent::new(name, ReloadResult::FileNotFound, Some(format!("'{name}' is not registered")))),
                };
                if info.file_path.is_empty() {
                    return self.finish(HotReloadEvent::new(name, ReloadResult::FileNotFound, Some("script has no backing file".to_string())));
                }
                let current_mtime = std::fs::metadata(&info.file_path).and_then(|m| m.modified()).ok();
                if current_mtime == info.last_modified {
                    return self.finish(HotReloadEvent::new(name, ReloadResult::NoChanges, None));
                }
                let new_content = match std::fs::read_to_string(&info.file_path) {
                    Ok(c) => c,
                    Err(_) => return self.finish(HotReloadEvent::new(name, ReloadResult::FileNotFound, Some(format!("failed to read '{}'", info.file_path)))),
                };
                let new_hash = blake3::hash(new_content.as_bytes());
                if new_hash == info.content_hash {
                    self.registry.insert_observed_mtime(name, current_mtime);
                    return self.finish(HotReloadEvent::new(name, ReloadResult::NoChanges, None));
                }
                new_content
            }
        };

        // BackupProtected.
        let protected_names = self.protected.list();
        let mut backups = Vec::new();
        for pname in &protected_names {
            if let Some(value) = interpreter.get_global(pname) {
                backups.push((pname.clone(), value.deep_clone()));
            }
        }

        if let Some(cb) = self.pre_callback.lock().as_ref() {
            cb(&HotReloadEvent::new(name, ReloadResult::Success, None));
        }

        // ApplyNewContent: parse.
        let program = match crate::script::parse(&content) {
            Ok(p) => p,
            Err(e) => {
                self.restore(&backups, interpreter);
                return self.finish(HotReloadEvent::new(name, ReloadResult::SyntaxError, Some(e.to_string())));
            }
        };

        // Execute.
        if let Err(e) = interpreter.execute(&program) {
            let restore_ok = self.restore(&backups, interpreter);
            let result = if restore_ok { ReloadResult::RollbackSuccess } else { ReloadResult::RuntimeError };
            return self.finish(HotReloadEvent::new(name, result, Some(e.to_string())));
        }

        // RefreshRegistry.
        match &content_override {
            Some(c) => self.registry.update_content(name, c.clone()),
            None => {
                if let Some(path) = self.registry.path_of(name) {
                    // re-register to pick up the new content/hash/mtime
                    let _ = self.registry.register(name, &path);
                }
            }
        }

        self.finish(HotReloadEvent::new(name, ReloadResult::Success, None))
    }

    /// Rewrite every captured backup back into the interpreter's globals.
    /// Returns whether every restore succeeded (always true here, since
    /// `set_global` cannot itself fail; kept as a `bool` so a restore
    /// failure can be recorded without masking the primary error, for
    /// interpreter implementations where restore itself can fail).
    fn restore(&self, backups: &[(String, crate::script::Value)], interpreter: &Interpreter) -> bool {
        for (name, value) in backups {
            interpreter.set_global(name.clone(), value.clone());
        }
        true
    }

    fn finish(&self, event: HotReloadEvent) -> HotReloadEvent {
        if let Some(cb) = self.post_callback.lock().as_ref() {
            cb(&event);
        }
        self.history.push(event.clone());
        event
    }
}

impl Default for HotReloadManager {
    fn default() -> Self {
        Self::new()
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
    fn hash_suppressed_reload_reports_no_changes() {
        // mtime moves but content hash is unchanged.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.script");
        std::fs::write(&path, "x = 1").unwrap();

        let mgr = HotReloadManager::new();
        mgr.register_hot_reload_script("s", &path).unwrap();
        let interpreter = interp();

        let events = mgr.check_and_reload_scripts(&interpreter);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].result, ReloadResult::Success);

        let events = mgr.check_and_reload_scripts(&interpreter);
        assert!(events.is_empty(), "unmodified file must need no reload");
    }

    #[test]
    fn syntax_error_rolls_back_protected_table() {
        // a broken edit must not clobber the last-good protected table.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.script");
        std::fs::write(&path, r#"cfg = {mode = "A"}"#).unwrap();

        let mgr = HotReloadManager::new();
        mgr.register_hot_reload_script("cfg", &path).unwrap();
        mgr.protected.add("cfg");
        let interpreter = interp();

        let event = mgr.reload_script("cfg", &interpreter);
        assert_eq!(event.result, ReloadResult::Success);

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, r#"cfg = {mode="B" <<< broken"#).unwrap();
        let event = mgr.reload_script("cfg", &interpreter);
        assert_eq!(event.result, ReloadResult::SyntaxError);

        let cfg = interpreter.get_global("cfg").unwrap();
        if let crate::script::Value::Table(t) = cfg {
            assert_eq!(
                t.lock().get("mode"),
                Some(&crate::script::Value::Str("A".to_string()))
            );
        } else {
            panic!("expected table");
        }
    }

    #[test]
    fn call_missing_function_after_fresh_manager() {
        // exercised directly against the interpreter here; RuntimeManager
        // has its own end-to-end version.
        let interpreter = interp();
        let err = interpreter.call_function("nope", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FunctionNotFound);
        assert_eq!(err.context, "nope");
    }

    #[test]
    fn history_is_append_only_and_respects_cap() {
        let history = HotReloadHistory::new(2);
        history.push(HotReloadEvent::new("a", ReloadResult::Success, None));
        history.push(HotReloadEvent::new("b", ReloadResult::Success, None));
        history.push(HotReloadEvent::new("c", ReloadResult::Success, None));
        let events = history.iter();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].script_name, "b");
        assert_eq!(events[1].script_name, "c");
    }

    #[test]
    fn content_reload_preserves_file_backing_for_later_file_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.script");
        std::fs::write(&path, "x = 1").unwrap();

        let mgr = HotReloadManager::new();
        mgr.register_hot_reload_script("w", &path).unwrap();
        let interpreter = interp();
        assert_eq!(mgr.reload_script("w", &interpreter).result, ReloadResult::Success);

        let before = mgr.registry.get("w").unwrap();
        let event = mgr.reload_script_content("w", "x = 2", &interpreter);
        assert_eq!(event.result, ReloadResult::Success);

        let after = mgr.registry.get("w").unwrap();
        assert_eq!(after.file_path, before.file_path, "content-only reload must not drop the file association");
        assert_eq!(after.last_modified, before.last_modified, "content-only reload must not touch last_modified");
        assert_eq!(after.content, "x = 2");

        // A later on-disk change must still be found via the preserved file_path.
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, "x = 3").unwrap();
        let event = mgr.reload_script("w", &interpreter);
        assert_eq!(event.result, ReloadResult::Success, "file-backed reload must still find its file after a content-only reload");
    }

    #[test]
    fn recursive_reload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.script");
        std::fs::write(&path, "x = 1").unwrap();

        let mgr = Arc::new(HotReloadManager::new());
        mgr.register_hot_reload_script("r", &path).unwrap();

        let recurse_mgr = mgr.clone();
        let interpreter = interp();
        mgr.set_pre_reload_callback(Arc::new(move |_event| {
            // Attempting a nested reload of the same script must be rejected.
            let nested_interp = Interpreter::new(Arc::new(DefaultAllocator::new())).unwrap();
            let nested = recurse_mgr.reload_script("r", &nested_interp);
            assert_eq!(nested.result, ReloadResult::RuntimeError);
        }));

        let event = mgr.reload_script("r", &interpreter);
        assert_eq!(event.result, ReloadResult::Success);
    }
}
