//! Script registry: per-name records of content, mtime, and content hash,
//! used by the hot-reload protocol to decide whether a reload is a no-op.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{ErrorKind, ScriptResult};
use crate::sync::mutex::Mutex;

/// A registered script's current known state.
#[derive(Debug, Clone)]
pub struct ScriptInfo {
    pub name: String,
    /// Empty for a content-only script registered via `reload_script_content`.
    pub file_path: String,
    pub content: String,
    pub last_modified: Option<SystemTime>,
    pub content_hash: blake3::Hash,
}

struct Entry {
    info: ScriptInfo,
}

/// Keyed by script name; preserves registration order for
/// `check_and_reload_scripts` and `get_registered_scripts`.
pub struct ScriptRegistry {
    order: Mutex<Vec<String>>,
    entries: Mutex<std::collections::HashMap<String, Entry>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self {
            order: Mutex::new(Vec::new()),
            entries: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Read `path`, store its content/hash/mtime under `name`. Replaces any
    /// existing record under the same name without disturbing its position
    /// in registration order.
    pub fn register(&self, name: impl Into<String>, path: impl AsRef<Path>) -> ScriptResult<()> {
        let name = name.into();
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::ErrorInfo::new(
                ErrorKind::FileReadError,
                format!("failed to read '{}': {e}", path.display()),
                "ScriptRegistry::register",
                None,
            )
        })?;
        let last_modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        self.insert(name, path.to_string_lossy().into_owned(), content, last_modified);
        Ok(())
    }

    /// Register a content-only script with no backing file.
    pub fn register_content(&self, name: impl Into<String>, content: impl Into<String>) {
        self.insert(name.into(), String::new(), content.into(), None);
    }

    /// Overwrite a registered script's `content`/`content_hash` in place,
    /// leaving `file_path` and `last_modified` untouched. Used by content-
    /// only reloads so a script originally registered against a real file
    /// keeps its file association. Falls back to `register_content` if
    /// `name` isn't registered yet.
    pub fn update_content(&self, name: &str, content: impl Into<String>) {
        let content = content.into();
        let mut entries = self.entries.lock();
        match entries.get_mut(name) {
            Some(entry) => {
                entry.info.content_hash = blake3::hash(content.as_bytes());
                entry.info.content = content;
            }
            None => {
                drop(entries);
                self.register_content(name.to_string(), content);
            }
        }
    }

    fn insert(&self, name: String, file_path: String, content: String, last_modified: Option<SystemTime>) {
        let content_hash = blake3::hash(content.as_bytes());
        let mut order = self.order.lock();
        if !order.contains(&name) {
            order.push(name.clone());
        }
        self.entries.lock().insert(
            name.clone(),
            Entry {
                info: ScriptInfo {
                    name,
                    file_path,
                    content,
                    last_modified,
                    content_hash,
                },
            },
        );
    }

    /// Remove a script from the registry. A no-op if it wasn't registered.
    pub fn unregister(&self, name: &str) {
        self.entries.lock().remove(name);
        self.order.lock().retain(|n| n != name);
    }

    pub fn get(&self, name: &str) -> Option<ScriptInfo> {
        self.entries.lock().get(name).map(|e| e.info.clone())
    }

    /// True iff the backing file's current mtime differs from the stored
    /// one. Content-only scripts (empty `file_path`) are never stale this
    /// way — reload them with `reload_script_content` instead.
    pub fn needs_reload(&self, name: &str) -> ScriptResult<bool> {
        let info = self.get(name).ok_or_else(|| {
            crate::error::ErrorInfo::new(
                ErrorKind::FileNotFound,
                format!("no script registered under '{name}'"),
                "ScriptRegistry::needs_reload",
                None,
            )
        })?;
        if info.file_path.is_empty() {
            return Ok(false);
        }
        let current = std::fs::metadata(&info.file_path).and_then(|m| m.modified()).ok();
        Ok(current != info.last_modified)
    }

    /// All registered scripts, in registration order.
    pub fn all(&self) -> Vec<ScriptInfo> {
        let order = self.order.lock();
        let entries = self.entries.lock();
        order
            .iter()
            .filter_map(|name| entries.get(name).map(|e| e.info.clone()))
            .collect()
    }

    /// Update only the stored `last_modified` for a script, without
    /// touching its content or hash. Used when a reload observes a
    /// mtime-only change (the bytes hash the same) so the next poll
    /// doesn't keep re-reading the file.
    pub(crate) fn insert_observed_mtime(&self, name: &str, mtime: Option<SystemTime>) {
        if let Some(entry) = self.entries.lock().get_mut(name) {
            entry.info.last_modified = mtime;
        }
    }

    pub(crate) fn path_of(&self, name: &str) -> Option<PathBuf> {
        self.get(name).filter(|i| !i.file_path.is_empty()).map(|i| PathBuf::from(i.file_path))
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}
