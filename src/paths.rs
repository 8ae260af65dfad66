//! Centralized path definitions and helpers.
//!
//! This module is the single source of truth for leaf filenames and the
//! script-discovery rules. No other module should hard-code these strings.

use std::path::{Path, PathBuf};

// ── Leaf filenames ───────────────────────────────────────────────

pub const SETTINGS_FILE: &str = "settings.json";

/// File extensions recognized as runnable scripts: `.lua` for the embedded
/// Lua runtime, `.txt` for the DSL.
pub const LUA_EXT: &str = "lua";
pub const DSL_EXT: &str = "txt";

// ── Config-dir functions ─────────────────────────────────────────

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE)
}

// ── Script discovery ─────────────────────────────────────────────

/// List the runnable script files directly inside `dir`, sorted by name.
pub fn script_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ext == LUA_EXT || ext == DSL_EXT)
        })
        .collect();
    files.sort();
    files
}

/// Join path segments with `/`, the form scripts build paths in regardless
/// of platform.
pub fn path_join(segments: &[String]) -> String {
    segments.join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn path_join_uses_forward_slashes() {
        let joined = path_join(&["work".into(), "shots".into(), "a.png".into()]);
        assert_eq!(joined, "work/shots/a.png");
    }

    #[test]
    fn script_files_filters_by_extension() {
        let dir = std::env::temp_dir().join("actuate_test_scripts");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.lua"), "print(1)").unwrap();
        std::fs::write(dir.join("a.txt"), "print(1)").unwrap();
        std::fs::write(dir.join("notes.md"), "x").unwrap();

        let files = script_files(&dir);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.lua"]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
