//! The loader's environment: every collaborator it talks to, passed in
//! explicitly at construction. There is no process-wide global context;
//! the session layer owns one `Env` and hands it to the loader it
//! builds.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use teamchain_chain::UserChainSource;
use teamchain_primitives::identity::{PrivateKey, UserVersion};
use teamchain_store::StorageUser;

use crate::clock::{Clock, SystemClock};
use crate::traits::{MerkleClient, TeamServer};

/// Default wall-clock age beyond which a cached snapshot must be
/// re-proved against Merkle.
pub const DEFAULT_FRESHNESS_HORIZON: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct Env {
    pub server: Arc<dyn TeamServer>,
    pub merkle: Arc<dyn MerkleClient>,
    pub users: Arc<dyn UserChainSource>,
    pub clock: Arc<dyn Clock>,
    pub freshness_horizon: Duration,
}

impl Env {
    pub fn new(
        server: Arc<dyn TeamServer>,
        merkle: Arc<dyn MerkleClient>,
        users: Arc<dyn UserChainSource>,
    ) -> Self {
        Self {
            server,
            merkle,
            users,
            clock: Arc::new(SystemClock),
            freshness_horizon: DEFAULT_FRESHNESS_HORIZON,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_freshness_horizon(mut self, horizon: Duration) -> Self {
        self.freshness_horizon = horizon;
        self
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("freshness_horizon", &self.freshness_horizon)
            .finish_non_exhaustive()
    }
}

/// The logged-in identity a loader acts as: its key era for role
/// lookups, and its per-user key for unboxing team seeds and sealing
/// the snapshot store.
#[derive(Clone, Copy, Debug)]
pub struct ActiveUser {
    pub user_version: UserVersion,
    pub per_user_key: PrivateKey,
}

impl ActiveUser {
    pub fn storage_user(&self) -> StorageUser {
        StorageUser {
            uid: self.user_version.uid,
            encryption_key: self.per_user_key,
        }
    }
}
