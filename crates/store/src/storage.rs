//! The two-tier [`TeamStorage`] cache.
//!
//! Reads check the in-memory LRU first and fall back to the encrypted
//! key-value tier; writes populate both. Any failure to read or decrypt
//! a disk record is a miss, never an error: a snapshot can always be
//! re-proved from the server, so the cache must not be able to wedge a
//! load.

use std::num::NonZeroUsize;
use std::sync::Arc;

use borsh::to_vec;
use lru::LruCache;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use teamchain_chain::TeamSnapshot;
use teamchain_crypto::{Nonce, SharedKey, NONCE_LEN};
use teamchain_primitives::identity::{PrivateKey, Uid};
use teamchain_primitives::team::TeamId;
use tracing::{debug, trace, warn};

use crate::db::Database;

/// Default LRU capacity (snapshots, not bytes).
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

const DISK_KEY_CONTEXT: &[u8] = b"team-store-v1";

/// The active user a storage operation runs as. The on-disk record key
/// and encryption key are both derived from this, so records written by
/// one user are invisible garbage to every other.
#[derive(Clone, Copy, Debug)]
pub struct StorageUser {
    pub uid: Uid,
    pub encryption_key: PrivateKey,
}

/// Two-tier snapshot cache. Internally synchronised; shared behind an
/// `Arc` by every loader call.
pub struct TeamStorage {
    db: Arc<dyn Database>,
    lru: Mutex<LruCache<TeamId, TeamSnapshot>>,
}

impl std::fmt::Debug for TeamStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamStorage")
            .field("cached", &self.lru.lock().len())
            .finish_non_exhaustive()
    }
}

impl TeamStorage {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(db: Arc<dyn Database>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be non-zero");

        Self {
            db,
            lru: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_default_capacity(db: Arc<dyn Database>) -> Self {
        Self::new(db, DEFAULT_CACHE_CAPACITY)
    }

    /// Fetch a snapshot for `user`, memory first, then disk. A disk hit
    /// is promoted into the LRU. Returns `None` on any miss, read
    /// failure or decrypt failure.
    pub fn get(&self, user: &StorageUser, team_id: &TeamId) -> Option<TeamSnapshot> {
        if let Some(snapshot) = self.lru.lock().get(team_id).cloned() {
            trace!(team_id = %team_id, "snapshot cache hit (memory)");
            return Some(snapshot);
        }

        let record = match self.db.get(&disk_key(user.uid, *team_id)) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(error) => {
                debug!(team_id = %team_id, %error, "snapshot disk read failed, treating as miss");
                return None;
            }
        };

        let Some(snapshot) = open_record(user, &record) else {
            debug!(team_id = %team_id, "snapshot record did not decrypt, treating as miss");
            return None;
        };

        trace!(team_id = %team_id, "snapshot cache hit (disk)");
        let _evicted = self.lru.lock().push(*team_id, snapshot.clone());

        Some(snapshot)
    }

    /// Write a snapshot into both tiers. Disk failures are logged and
    /// swallowed; the memory tier alone satisfies the cache contract
    /// for the rest of this process.
    pub fn put(&self, user: &StorageUser, snapshot: &TeamSnapshot) {
        let team_id = snapshot.chain.id;
        let _evicted = self.lru.lock().push(team_id, snapshot.clone());

        match seal_record(user, snapshot) {
            Some(record) => {
                if let Err(error) = self.db.put(&disk_key(user.uid, team_id), record) {
                    warn!(team_id = %team_id, %error, "snapshot disk write failed");
                }
            }
            None => warn!(team_id = %team_id, "snapshot record failed to seal"),
        }

        debug!(team_id = %team_id, last_seqno = %snapshot.chain.last_seqno, "cached snapshot");
    }

    /// Purge the in-memory tier. Disk records persist but are sealed
    /// under the departing user's key, so no future user can read them.
    pub fn on_logout(&self) {
        let purged = {
            let mut lru = self.lru.lock();
            let len = lru.len();
            lru.clear();
            len
        };
        debug!(purged, "purged snapshot cache at logout");
    }

    pub fn cached_count(&self) -> usize {
        self.lru.lock().len()
    }
}

fn disk_key(uid: Uid, team_id: TeamId) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(DISK_KEY_CONTEXT);
    hasher.update(uid.as_bytes());
    hasher.update(team_id.as_bytes());
    hasher.finalize().to_vec()
}

fn seal_record(user: &StorageUser, snapshot: &TeamSnapshot) -> Option<Vec<u8>> {
    let payload = to_vec(snapshot).ok()?;

    let mut nonce: Nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = SharedKey::from_secret(&user.encryption_key)
        .seal(payload, nonce)
        .ok()?;

    let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    record.extend_from_slice(&nonce);
    record.extend_from_slice(&ciphertext);
    Some(record)
}

fn open_record(user: &StorageUser, record: &[u8]) -> Option<TeamSnapshot> {
    if record.len() < NONCE_LEN {
        return None;
    }
    let (nonce_bytes, ciphertext) = record.split_at(NONCE_LEN);
    let nonce: Nonce = nonce_bytes.try_into().ok()?;

    let payload = SharedKey::from_secret(&user.encryption_key)
        .open(ciphertext.to_vec(), nonce)
        .ok()?;

    borsh::from_slice(&payload).ok()
}
