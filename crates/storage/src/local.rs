//! Filesystem-backed object store
//!
//! `put` uses write-fsync-rename so readers never observe a partial object.
//! `put_if_absent` writes a temp file and hard-links it into place; the link
//! fails if the destination already exists, which gives an atomic
//! create-if-absent on POSIX filesystems.

use crate::object_store::ObjectStore;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tessel_core::{Error, Result};
use tracing::warn;
use uuid::Uuid;

/// Marker inside temp file names; listing skips them
const TEMP_MARKER: &str = ".tmp-";

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open (and create if needed) a store at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(LocalObjectStore { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if part == ".." || part == "." {
                return Err(Error::invalid_input(format!(
                    "object path '{}' may not contain relative components",
                    path
                )));
            }
            full.push(part);
        }
        Ok(full)
    }

    /// Write `data` to a fresh temp file next to `dest` and fsync it
    fn write_temp(&self, dest: &Path, data: &[u8]) -> Result<PathBuf> {
        let parent = dest
            .parent()
            .ok_or_else(|| Error::invalid_input("object path has no parent directory"))?;
        fs::create_dir_all(parent)?;
        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let temp = parent.join(format!("{}{}{}", file_name, TEMP_MARKER, Uuid::new_v4()));
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(temp)
    }

    fn sync_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if parent.exists() {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }

    fn walk(dir: &Path, rel: &str, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = if rel.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel, name)
            };
            if entry.file_type()?.is_dir() {
                Self::walk(&entry.path(), &child_rel, out)?;
            } else if !name.contains(TEMP_MARKER) {
                out.push(child_rel);
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalObjectStore {
    fn uri(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        match fs::read(self.resolve(path)?) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::not_found(path)),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        let dest = self.resolve(path)?;
        let temp = self.write_temp(&dest, data)?;
        fs::rename(&temp, &dest)?;
        Self::sync_parent(&dest)
    }

    fn put_if_absent(&self, path: &str, data: &[u8]) -> Result<()> {
        let dest = self.resolve(path)?;
        let temp = self.write_temp(&dest, data)?;
        let linked = fs::hard_link(&temp, &dest);
        if let Err(e) = fs::remove_file(&temp) {
            warn!(target: "tessel::storage", path = %temp.display(), error = %e, "Failed to remove temp file");
        }
        match linked {
            Ok(()) => Self::sync_parent(&dest),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Error::AlreadyExists {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk the deepest directory fully named by the prefix
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let dir = self.resolve(dir_part)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        Self::walk(&dir, dir_part, &mut out)?;
        out.retain(|p| p.starts_with(prefix));
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip_creates_directories() {
        let (_dir, store) = store();
        store.put("_versions/1.manifest", b"m1").unwrap();
        assert_eq!(store.get("_versions/1.manifest").unwrap(), b"m1");
        store.put("_versions/1.manifest", b"m1b").unwrap();
        assert_eq!(store.get("_versions/1.manifest").unwrap(), b"m1b");
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let (_dir, store) = store();
        let err = store.get("nope").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!store.exists("nope").unwrap());
    }

    #[test]
    fn test_put_if_absent_refuses_existing() {
        let (_dir, store) = store();
        store.put_if_absent("_versions/a", b"first").unwrap();
        let err = store.put_if_absent("_versions/a", b"second").unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert_eq!(store.get("_versions/a").unwrap(), b"first");
        // No temp files left behind
        assert_eq!(store.list("_versions/").unwrap(), vec!["_versions/a"]);
    }

    #[test]
    fn test_list_nested_and_sorted() {
        let (_dir, store) = store();
        store.put("_indices/u1/part0", b"").unwrap();
        store.put("_indices/u0/part0", b"").unwrap();
        store.put("data/x.lance", b"").unwrap();
        assert_eq!(
            store.list("_indices/").unwrap(),
            vec!["_indices/u0/part0", "_indices/u1/part0"]
        );
        assert_eq!(store.list("").unwrap().len(), 3);
        assert!(store.list("_missing/").unwrap().is_empty());
    }

    #[test]
    fn test_list_partial_name_prefix() {
        let (_dir, store) = store();
        store.put("_transactions/3-a.txn", b"").unwrap();
        store.put("_transactions/4-b.txn", b"").unwrap();
        assert_eq!(
            store.list("_transactions/3-").unwrap(),
            vec!["_transactions/3-a.txn"]
        );
    }

    #[test]
    fn test_relative_components_rejected() {
        let (_dir, store) = store();
        assert!(store.put("../escape", b"x").is_err());
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let (_dir, store) = store();
        store.delete("ghost").unwrap();
    }
}
