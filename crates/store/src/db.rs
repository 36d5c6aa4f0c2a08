//! The persistent key-value seam behind the snapshot store.
//!
//! The store only needs get/put/delete over opaque bytes; whatever
//! engine backs it (leveldb, rocksdb, ...) is wired in by the embedding
//! application. [`InMemoryDb`] is the reference implementation used in
//! tests and by clients that opt out of persistence.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;
}

/// A `Database` over a plain in-memory map.
#[derive(Debug, Default)]
pub struct InMemoryDb {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Database for InMemoryDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        let _previous = self.entries.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let _removed = self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let db = InMemoryDb::new();

        for b1 in 0..10_u8 {
            for b2 in 0..10_u8 {
                let bytes = vec![b1, b2];
                db.put(&bytes, bytes.clone()).expect("put should succeed");
                assert_eq!(
                    db.get(&bytes).expect("get should succeed"),
                    Some(bytes.clone()),
                );
            }
        }

        assert_eq!(db.len(), 100);
        assert_eq!(db.get(&[]).expect("get should succeed"), None);

        db.delete(&[0, 0]).expect("delete should succeed");
        assert_eq!(db.get(&[0, 0]).expect("get should succeed"), None);
        assert_eq!(db.len(), 99);
    }
}
