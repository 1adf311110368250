// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use tracing::warn;

pub fn memory_path(workdir: &Path) -> PathBuf {
    workdir.join(".wave").join("MEMORY.md")
}

/// Read the memory file.  Missing files yield an empty string; unexpected
/// failures are logged and treated as empty.
pub fn load(workdir: &Path) -> String {
    let path = memory_path(workdir);
    match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read memory file");
            String::new()
        }
    }
}

/// Append a memory entry.  Best-effort: failures are logged, never raised.
pub fn save(workdir: &Path, content: &str) {
    let path = memory_path(workdir);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "failed to create memory dir");
            return;
        }
    }
    use std::io::Write;
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| writeln!(f, "{content}"));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to write memory file");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_memory_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(dir.path()), "");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "remember the port is 8080");
        save(dir.path(), "the user prefers tabs");
        let text = load(dir.path());
        assert!(text.contains("port is 8080"));
        assert!(text.contains("prefers tabs"));
    }
}
