//! Two-tier snapshot cache: an in-memory LRU in front of an encrypted
//! key-value tier, scoped to the logged-in user.

pub mod db;
pub mod storage;

pub use db::{Database, InMemoryDb, StoreError};
pub use storage::{StorageUser, TeamStorage, DEFAULT_CACHE_CAPACITY};
