//! Directory-backed object store
//!
//! Layout: `{root}/{bucket}/{key}` where `/` in keys maps to directories.
//! Writes are atomic; listing walks only the directory implied by the prefix
//! and returns keys in sorted order.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::ObjectStore;
use crate::error::{TransportError, TransportResult};
use crate::utils::atomic::{atomic_write, is_temp_file};

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> TransportResult<PathBuf> {
        Ok(self.root.join(validated(bucket)?))
    }

    fn object_path(&self, bucket: &str, key: &str) -> TransportResult<PathBuf> {
        Ok(self.bucket_dir(bucket)?.join(validated(key)?))
    }

    fn collect_keys(dir: &Path, key_prefix: &str, keys: &mut Vec<String>) -> io::Result<()> {
        let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = format!("{}{}", key_prefix, name);
            if path.is_dir() {
                Self::collect_keys(&path, &format!("{}/", key), keys)?;
            } else if !is_temp_file(&path) {
                keys.push(key);
            }
        }
        Ok(())
    }
}

/// Reject keys that would escape the bucket directory
fn validated(key: &str) -> TransportResult<&Path> {
    let path = Path::new(key);
    let escapes = key.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(TransportError::request("object key", format!("invalid key '{}'", key)));
    }
    Ok(path)
}

impl ObjectStore for FsObjectStore {
    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> TransportResult<()> {
        let path = self.object_path(bucket, key)?;
        atomic_write(&path, body)?;
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> TransportResult<Vec<String>> {
        let bucket_dir = self.bucket_dir(bucket)?;

        // Start from the deepest complete directory of the prefix
        let dir_prefix = match prefix.rfind('/') {
            Some(idx) => &prefix[..=idx],
            None => "",
        };
        let start = if dir_prefix.is_empty() {
            bucket_dir
        } else {
            bucket_dir.join(validated(dir_prefix.trim_end_matches('/'))?)
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        Self::collect_keys(&start, dir_prefix, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        Ok(keys)
    }

    fn get_object(&self, bucket: &str, key: &str) -> TransportResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TransportError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => TransportError::Io(e),
        })
    }
}
