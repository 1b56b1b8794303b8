//! Always-available polling watcher backend.
//!
//! Wakes every `poll_interval`, re-stats each watched file, and fires the
//! callback on an `exists` flip or an `mtime` change. The sleep is split
//! into <=10ms slices so `stop()` is observed within that bound.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::error::ScriptResult;
use crate::sync::mutex::Mutex;
use crate::watch::{FileWatcher, WatchCallback};

const STOP_CHECK_SLICE: Duration = Duration::from_millis(10);

struct WatchedFile {
    callback: WatchCallback,
    last_mtime: Option<SystemTime>,
    exists: bool,
}

struct Shared {
    files: Mutex<HashMap<PathBuf, WatchedFile>>,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

/// Periodic stat-based change detector; works anywhere `std::fs` works.
pub struct PollingWatcher {
    shared: Arc<Shared>,
    poll_interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PollingWatcher {
    /// Create a new polling watcher waking every `poll_interval`.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                files: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
            }),
            poll_interval,
            worker: Mutex::new(None),
        }
    }
}

fn stat(path: &Path) -> (bool, Option<SystemTime>) {
    match std::fs::metadata(path) {
        Ok(meta) => (true, meta.modified().ok()),
        Err(_) => (false, None),
    }
}

fn poll_once(shared: &Shared) {
    let mut files = shared.files.lock();
    for (path, watched) in files.iter_mut() {
        let (exists, mtime) = stat(path);
        let changed = exists != watched.exists || mtime != watched.last_mtime;
        watched.exists = exists;
        watched.last_mtime = mtime;
        if changed {
            (watched.callback)(path);
        }
    }
}

fn run_worker(shared: Arc<Shared>, poll_interval: Duration) {
    while !shared.stop_requested.load(Ordering::Acquire) {
        poll_once(&shared);

        let mut slept = Duration::ZERO;
        while slept < poll_interval {
            if shared.stop_requested.load(Ordering::Acquire) {
                return;
            }
            let slice = STOP_CHECK_SLICE.min(poll_interval - slept);
            std::thread::sleep(slice);
            slept += slice;
        }
    }
}

impl FileWatcher for PollingWatcher {
    fn watch_file(&self, path: &Path, callback: WatchCallback) -> ScriptResult<()> {
        let (exists, last_mtime) = stat(path);
        self.shared.files.lock().insert(
            super::canonical_key(path),
            WatchedFile {
                callback,
                last_mtime,
                exists,
            },
        );
        Ok(())
    }

    fn unwatch_file(&self, path: &Path) -> ScriptResult<()> {
        self.shared.files.lock().remove(&super::canonical_key(path));
        Ok(())
    }

    fn start(&self) -> ScriptResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.shared.stop_requested.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let poll_interval = self.poll_interval;
        *worker = Some(std::thread::spawn(move || run_worker(shared, poll_interval)));
        Ok(())
    }

    fn stop(&self) -> ScriptResult<()> {
        self.shared.stop_requested.store(true, Ordering::Release);
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for PollingWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn fires_on_content_change() {
        // S5: create a file, watch at 50ms, start, overwrite, expect a
        // callback with the original path within ~200ms.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.lua");
        std::fs::write(&path, b"x = 1").unwrap();

        let watcher = PollingWatcher::new(Duration::from_millis(50));
        let fired = Arc::new(AtomicBool::new(false));
        let seen_path: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));

        let fired_cb = fired.clone();
        let seen_cb = seen_path.clone();
        watcher
            .watch_file(
                &path,
                Arc::new(move |p: &Path| {
                    fired_cb.store(true, Ordering::Release);
                    *seen_cb.lock() = Some(p.to_path_buf());
                }),
            )
            .unwrap();
        watcher.start().unwrap();

        std::thread::sleep(Duration::from_millis(60));
        let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.write_all(b"x = 2").unwrap();
        drop(f);

        let deadline = Instant::now() + Duration::from_millis(500);
        while !fired.load(Ordering::Acquire) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(fired.load(Ordering::Acquire), "callback should have fired");
        assert_eq!(seen_path.lock().as_deref(), Some(path.as_path()));

        watcher.stop().unwrap();
    }

    #[test]
    fn stop_is_prompt_and_idempotent() {
        let watcher = PollingWatcher::new(Duration::from_millis(500));
        watcher.start().unwrap();
        let start = Instant::now();
        watcher.stop().unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
        // Calling stop again must not hang or error.
        watcher.stop().unwrap();
    }

    #[test]
    fn no_callbacks_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.lua");
        std::fs::write(&path, b"a = 1").unwrap();

        let watcher = PollingWatcher::new(Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));
        let count_cb = count.clone();
        watcher
            .watch_file(&path, Arc::new(move |_p: &Path| {
                count_cb.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
        watcher.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        watcher.stop().unwrap();
        let after_stop = count.load(Ordering::Relaxed);

        std::fs::write(&path, b"a = 2").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::Relaxed), after_stop, "no callbacks should fire after stop()");
    }
}
