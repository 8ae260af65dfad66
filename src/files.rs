//! File-system helpers exposed to scripts through the internal method
//! registry.

use std::path::{Path, PathBuf};

use crate::device::DeviceError;

/// Move a file to a new location, creating the destination directory.
pub fn file_move(source: &str, dest: &str) -> Result<PathBuf, DeviceError> {
    let source = Path::new(source);
    let dest = Path::new(dest);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DeviceError::new(format!("cannot create {}: {e}", parent.display())))?;
    }
    std::fs::rename(source, dest)
        .map_err(|e| DeviceError::new(format!("cannot move {}: {e}", source.display())))?;
    Ok(dest.to_path_buf())
}

/// Rename a file in place, keeping its directory.
pub fn file_rename(path: &str, new_name: &str) -> Result<PathBuf, DeviceError> {
    let path = Path::new(path);
    let renamed = path.with_file_name(new_name);
    std::fs::rename(path, &renamed)
        .map_err(|e| DeviceError::new(format!("cannot rename {}: {e}", path.display())))?;
    Ok(renamed)
}

/// Create a directory (and any missing parents).
pub fn folder_create(path: &str) -> Result<PathBuf, DeviceError> {
    let path = Path::new(path);
    std::fs::create_dir_all(path)
        .map_err(|e| DeviceError::new(format!("cannot create {}: {e}", path.display())))?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("actuate_test_files_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn move_creates_destination_directory() {
        let dir = scratch("move");
        let src = dir.join("a.txt");
        std::fs::write(&src, "x").unwrap();
        let dest = dir.join("nested").join("b.txt");

        file_move(&src.to_string_lossy(), &dest.to_string_lossy()).unwrap();
        assert!(!src.exists());
        assert!(dest.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rename_keeps_directory() {
        let dir = scratch("rename");
        let src = dir.join("a.txt");
        std::fs::write(&src, "x").unwrap();

        let renamed = file_rename(&src.to_string_lossy(), "b.txt").unwrap();
        assert_eq!(renamed, dir.join("b.txt"));
        assert!(renamed.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_source_is_an_error() {
        let err = file_move("/nonexistent/a", "/nonexistent/b").unwrap_err();
        assert!(err.message.contains("cannot"));
    }
}
