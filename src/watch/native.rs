//! OS-native watcher backend.
//!
//! Wraps `notify::RecommendedWatcher`, which itself selects kqueue on
//! BSD/macOS, inotify on Linux, and `ReadDirectoryChangesW` on Windows —
//! the three backends a native watcher needs. This module's job is narrower than
//! reimplementing those backends: translate notify's single
//! all-paths event handler into this crate's per-path `watch_file`
//! callback contract, and make `start`/`stop` idempotent and prompt, which
//! `notify` itself does not model (it watches as soon as `watch()` is
//! called).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{ErrorInfo, ErrorKind, ScriptResult};
use crate::sync::mutex::Mutex;
use crate::watch::{FileWatcher, WatchCallback};

struct Routing {
    callbacks: HashMap<PathBuf, WatchCallback>,
}

/// Native file watcher, backed by the OS event-queue `notify` selects for
/// the current platform.
pub struct NativeWatcher {
    routing: Arc<Mutex<Routing>>,
    running: Arc<AtomicBool>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl NativeWatcher {
    /// Probe whether a native watcher can be constructed on this platform.
    pub fn new() -> ScriptResult<Self> {
        Ok(Self {
            routing: Arc::new(Mutex::new(Routing {
                callbacks: HashMap::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
        })
    }

    fn build_watcher(
        routing: Arc<Mutex<Routing>>,
        running: Arc<AtomicBool>,
    ) -> ScriptResult<RecommendedWatcher> {
        notify::recommended_watcher(move |res: notify::Result<Event>| {
            if !running.load(Ordering::Acquire) {
                return;
            }
            let event = match res {
                Ok(event) => event,
                Err(_e) => {
                    #[cfg(feature = "log")]
                    log::warn!("file watcher backend reported an error: {_e}");
                    return;
                }
            };
            let routing = routing.lock();
            for path in &event.paths {
                if let Some(callback) = routing.callbacks.get(path) {
                    callback(path);
                }
            }
        })
        .map_err(|e| {
            ErrorInfo::new(
                ErrorKind::InternalError,
                format!("failed to construct native watcher: {e}"),
                "NativeWatcher::new",
                None,
            )
        })
    }
}

impl FileWatcher for NativeWatcher {
    fn watch_file(&self, path: &Path, callback: WatchCallback) -> ScriptResult<()> {
        let key = super::canonical_key(path);
        self.routing.lock().callbacks.insert(key.clone(), callback);

        let mut guard = self.watcher.lock();
        if let Some(watcher) = guard.as_mut() {
            watcher.watch(path, RecursiveMode::NonRecursive).map_err(|e| {
                ErrorInfo::new(
                    ErrorKind::FileNotFound,
                    format!("failed to watch {}: {e}", path.display()),
                    "NativeWatcher::watch_file",
                    None,
                )
            })?;
        }
        Ok(())
    }

    fn unwatch_file(&self, path: &Path) -> ScriptResult<()> {
        let key = super::canonical_key(path);
        self.routing.lock().callbacks.remove(&key);

        let mut guard = self.watcher.lock();
        if let Some(watcher) = guard.as_mut() {
            // Best-effort: the path may already be gone from disk.
            let _ = watcher.unwatch(path);
        }
        Ok(())
    }

    fn start(&self) -> ScriptResult<()> {
        let mut guard = self.watcher.lock();
        if guard.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::Release);
        let mut watcher = Self::build_watcher(self.routing.clone(), self.running.clone())?;

        let paths: Vec<PathBuf> = self.routing.lock().callbacks.keys().cloned().collect();
        for path in paths {
            if let Err(_e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                #[cfg(feature = "log")]
                log::warn!("failed to (re-)watch {}: {_e}", path.display());
            }
        }

        *guard = Some(watcher);
        Ok(())
    }

    fn stop(&self) -> ScriptResult<()> {
        self.running.store(false, Ordering::Release);
        // Dropping the watcher tears down its worker thread and OS handles.
        *self.watcher.lock() = None;
        Ok(())
    }
}

impl Drop for NativeWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
