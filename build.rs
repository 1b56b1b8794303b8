//! Build script for scriptcore.
//!
//! Provides build-time diagnostics and feature detection for users
//! integrating scriptcore into a host application.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DEBUG");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_NATIVE_WATCHER");

    let debug_enabled = env::var("CARGO_FEATURE_DEBUG").is_ok();
    let parking_lot_enabled = env::var("CARGO_FEATURE_PARKING_LOT").is_ok();
    let native_watcher_enabled = env::var("CARGO_FEATURE_NATIVE_WATCHER").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    if debug_enabled {
        emit_info("Debug features enabled");
        emit_note("Debug mode provides:");
        emit_note("  • Stack-allocator memory poisoning on reset()");
        emit_note("  • Allocation backtraces attached to ErrorInfo::stack_trace");
        if is_release {
            emit_warning("Debug features enabled in release build!");
            emit_note("This may impact performance. Consider disabling for production.");
        }
    } else if !is_release {
        emit_note("Tip: enable 'debug' for allocation backtraces:");
        emit_note("  scriptcore = { version = \"0.1\", features = [\"debug\"] }");
    }

    if parking_lot_enabled {
        emit_info("Using parking_lot for mutexes (faster lock implementation)");
    }

    if native_watcher_enabled {
        emit_info("Native file watcher backend enabled (notify)");
    } else {
        emit_warning("Native file watcher backend disabled — falling back to the polling watcher");
        emit_note("Enable the 'native-watcher' feature for kqueue/inotify/ReadDirectoryChangesW");
    }

    check_target();
}

fn emit_info(msg: &str) {
    println!("cargo:warning=[scriptcore] info: {}", msg);
}

fn emit_note(msg: &str) {
    if msg.is_empty() {
        println!("cargo:warning=[scriptcore]");
    } else {
        println!("cargo:warning=[scriptcore]    {}", msg);
    }
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[scriptcore] warning: {}", msg);
}

fn check_target() {
    let target = env::var("TARGET").unwrap_or_default();

    if target.contains("windows") {
        emit_info("Building for Windows: watcher backend is ReadDirectoryChangesW");
    } else if target.contains("linux") {
        emit_info("Building for Linux: watcher backend is inotify");
    } else if target.contains("darwin") || target.contains("bsd") {
        emit_info("Building for BSD/macOS: watcher backend is kqueue");
    } else if target.contains("wasm") {
        emit_warning("WebAssembly target detected: native watcher and VM allocator are unavailable");
        emit_note("Use the polling watcher and the default allocator on this target.");
    }
}
