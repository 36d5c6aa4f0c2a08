//! Named mutex registry providing single-flight per team id.
//!
//! The registry's own map is synchronised independently of the per-name
//! locks it dispenses. Locks are keyed by name and not owned by any
//! thread, so a recursive parent/child load acquiring a *different*
//! team's lock interleaves freely with other callers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::ctx::Context;
use crate::error::LoadError;

#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held lock on a name; dropping it releases the next FIFO waiter.
#[derive(Debug)]
pub struct LockHandle {
    _guard: OwnedMutexGuard<()>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name`, waiting FIFO behind current
    /// holders. Cancelling the context aborts the wait without ever
    /// granting the lock.
    pub async fn acquire(&self, ctx: &Context, name: &str) -> Result<LockHandle, LoadError> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(name.to_owned()).or_default())
        };

        let guard = ctx.run(lock.lock_owned()).await?;
        Ok(LockHandle { _guard: guard })
    }
}
