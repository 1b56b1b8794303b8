//! # scriptcore
//!
//! An embedded scripting runtime core: pluggable allocation routed through
//! an interpreter's allocation hook, hot reload of scripts with protected-
//! table state preservation and rollback, and cross-platform file-change
//! monitoring that drives automatic reload.
//!
//! Four subsystems, wired together by [`runtime::RuntimeManager`]:
//!
//! - [`alloc`] — the [`alloc::Allocator`] capability set, plus `stack`
//!   (LIFO arena), `pool` (fixed-block freelist), and `virtual_mem`
//!   (OS-backed page mappings) strategies.
//! - [`watch`] — the [`watch::FileWatcher`] capability set, with an
//!   always-available polling backend and an OS-native backend.
//! - [`registry`] and [`reload`] — script records with content hashing,
//!   and the hot-reload state machine (backup/restore, staged apply,
//!   rollback, history, callbacks).
//! - [`script`] — the default embedded interpreter scripts run in.
//!
//! Every fallible operation returns [`error::ScriptResult`] rather than
//! panicking across the crate boundary.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use scriptcore::runtime::RuntimeManager;
//!
//! let manager = RuntimeManager::new().unwrap();
//! let value = manager.execute_script("x = 1 + 2").unwrap();
//! assert_eq!(value, scriptcore::script::Value::Number(3.0));
//! ```

pub mod alloc;
pub mod error;
pub mod registry;
pub mod reload;
pub mod runtime;
pub mod script;
pub(crate) mod sync;
pub(crate) mod util;
pub mod watch;

pub use error::{ErrorInfo, ErrorKind, ResultExt, ScriptResult, VoidResult};
pub use runtime::RuntimeManager;
