//! Pluggable file-change watcher: interface, polling fallback, and native
//! OS backend.
//!
//! The three OS-native backends (kqueue, inotify, ReadDirectoryChangesW)
//! are exactly the three backends the `notify` crate selects between
//! internally via `notify::recommended_watcher`. Rather than hand-rolling
//! raw `libc`/`inotify`-descriptor bookkeeping that `notify` already
//! implements and tests across platforms, [`native`] wraps `notify`'s
//! recommended watcher and adapts its event stream to the
//! `watch_file`/`unwatch_file`/`start`/`stop` contract this crate's callers
//! expect, keeping its own path table for callback routing.

pub mod native;
pub mod polling;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ScriptResult;

/// Callback invoked from the watcher's worker thread when a watched file
/// changes. Must not block for long: it runs synchronously inside the
/// watcher's event loop.
pub type WatchCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// Capability set every watcher backend implements.
///
/// `start`/`stop` are idempotent. Dropping an implementation must stop the
/// worker thread and release any OS handles.
pub trait FileWatcher: Send + Sync {
    /// Begin watching `path`, invoking `callback` on changes. Replaces any
    /// existing watch on the same path.
    fn watch_file(&self, path: &Path, callback: WatchCallback) -> ScriptResult<()>;

    /// Stop watching `path`. A no-op if it wasn't being watched.
    fn unwatch_file(&self, path: &Path) -> ScriptResult<()>;

    /// Start the worker thread. Idempotent.
    fn start(&self) -> ScriptResult<()>;

    /// Stop the worker thread. Idempotent; must return within roughly one
    /// poll interval or OS-wait timeout, and no callback fires after it
    /// returns.
    fn stop(&self) -> ScriptResult<()>;
}

/// Attempt the OS-native backend for the current platform; on failure
/// (platform unsupported, or backend construction failed for any reason),
/// log a warning and fall back to the always-available polling backend.
pub fn create_watcher(poll_interval: std::time::Duration) -> Box<dyn FileWatcher> {
    #[cfg(feature = "native-watcher")]
    {
        match native::NativeWatcher::new() {
            Ok(w) => return Box::new(w),
            Err(_e) => {
                #[cfg(feature = "log")]
                log::warn!("native file watcher backend unavailable, falling back to polling: {_e}");
            }
        }
    }
    Box::new(polling::PollingWatcher::new(poll_interval))
}

pub(crate) fn canonical_key(path: &Path) -> PathBuf {
    path.to_path_buf()
}
