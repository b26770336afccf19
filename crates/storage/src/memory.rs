//! In-memory object store
//!
//! A `BTreeMap` behind a `parking_lot::RwLock`. Listing is a range scan, so
//! results come back sorted for free. Conditional put can be switched off to
//! model stores that need an external manifest store.

use crate::object_store::{conditional_put_unsupported, ObjectStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tessel_core::{Error, Result};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Object store held entirely in memory
#[derive(Debug)]
pub struct MemoryObjectStore {
    uri: String,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    conditional_put: bool,
}

impl MemoryObjectStore {
    /// Create an empty store with atomic put-if-absent
    pub fn new() -> Self {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        MemoryObjectStore {
            uri: format!("memory://{}", id),
            objects: RwLock::new(BTreeMap::new()),
            conditional_put: true,
        }
    }

    /// Create a store that refuses conditional puts
    pub fn without_conditional_put() -> Self {
        MemoryObjectStore {
            conditional_put: false,
            ..Self::new()
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// True if the store holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(path))
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        self.objects.write().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, path: &str, data: &[u8]) -> Result<()> {
        if !self.conditional_put {
            return Err(conditional_put_unsupported(&self.uri));
        }
        let mut objects = self.objects.write();
        if objects.contains_key(path) {
            return Err(Error::AlreadyExists {
                path: path.to_string(),
            });
        }
        objects.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn supports_conditional_put(&self) -> bool {
        self.conditional_put
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(path))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
