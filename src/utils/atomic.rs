//! Atomic file operations
//!
//! Every file the crate writes (archived objects, spool messages,
//! checkpoints) goes through the same pattern:
//!
//! 1. Write to a hidden sibling temp file (`.name.tmp`)
//! 2. Call sync_all() to flush to disk
//! 3. Rename temp file to final path (atomic on most filesystems)
//!
//! Readers therefore see either the previous version or the new one,
//! never a partial document.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const TEMP_SUFFIX: &str = ".tmp";

/// Temp path used while writing `path`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}{}", name, TEMP_SUFFIX))
}

/// Whether `path` is an in-flight temp file
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

/// Atomically write bytes to a file, creating parent directories
///
/// # Example
///
/// ```ignore
/// atomic_write("archive/sqs/2024/10/15/17/05/m-1", b"{...}")?;
/// ```
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let temp_path = temp_path_for(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

/// Remove temp files left behind by interrupted writes, recursively
///
/// Returns the number of files removed.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(0);
    }

    let mut cleaned = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            cleaned += cleanup_temp_files(&path)?;
        } else if is_temp_file(&path) {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("m-1.json");

        atomic_write(&path, b"Hello, World!").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"Hello, World!");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sqs/2024/10/15/17/05/m-1");

        atomic_write(&path, b"nested").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "nested");
    }

    #[test]
    fn test_temp_path_keeps_dotted_names_apart() {
        let a = temp_path_for(Path::new("dir/a.b"));
        let b = temp_path_for(Path::new("dir/a.c"));
        assert_ne!(a, b);
        assert!(is_temp_file(&a));
        assert!(!is_temp_file(Path::new("dir/a.b")));
    }

    #[test]
    fn test_cleanup_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("sqs/2024");
        fs::create_dir_all(&nested).unwrap();

        fs::write(temp_dir.path().join(".one.tmp"), "temp1").unwrap();
        fs::write(nested.join(".two.tmp"), "temp2").unwrap();
        fs::write(nested.join("keep"), "keep").unwrap();

        let cleaned = cleanup_temp_files(temp_dir.path()).unwrap();
        assert_eq!(cleaned, 2);
        assert!(nested.join("keep").exists());
    }
}
