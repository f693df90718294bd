// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::PathBuf;

/// Return the application data directory, creating it if needed.
///
/// `PRINTBRIDGE_DATA_DIR` wins, then `$XDG_DATA_HOME/printbridge`, then
/// `~/.local/share/printbridge`.
pub fn data_dir() -> PathBuf {
    let dir = resolve(
        std::env::var("PRINTBRIDGE_DATA_DIR").ok(),
        std::env::var("XDG_DATA_HOME").ok(),
        std::env::var("HOME").ok(),
    );
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Return a subdirectory inside the data dir (e.g. "logs").
pub fn data_subdir(name: &str) -> PathBuf {
    let dir = data_dir().join(name);
    std::fs::create_dir_all(&dir).ok();
    dir
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

fn resolve(explicit: Option<String>, xdg: Option<String>, home: Option<String>) -> PathBuf {
    let set = |v: Option<String>| v.filter(|v| !v.trim().is_empty());
    if let Some(dir) = set(explicit) {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = set(xdg) {
        return PathBuf::from(xdg).join("printbridge");
    }
    if let Some(home) = set(home) {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("printbridge");
    }
    // Last resort
    std::env::temp_dir().join("printbridge")
}
