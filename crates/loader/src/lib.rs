//! The team loader: materialises an authenticated, Merkle-anchored
//! snapshot of a team's state, serving repeated requests from a
//! two-tier cache with single-flight semantics per team id.
//!
//! [`loader::TeamLoader::load`] is the sole entrypoint; everything it
//! talks to (sigchain server, Merkle service, user-chain loader, clock)
//! is injected through [`env::Env`], so there is no process-wide state
//! and a deterministic server yields deterministic snapshots.

pub mod arg;
pub mod clock;
pub mod ctx;
pub mod env;
pub mod error;
pub mod freshness;
pub mod loader;
pub mod locktab;
pub mod traits;

pub use arg::LoadArg;
pub use clock::{Clock, ManualClock, SystemClock};
pub use ctx::Context;
pub use env::{ActiveUser, Env};
pub use error::{LoadError, MerkleError, TransportError};
pub use freshness::Freshness;
pub use loader::TeamLoader;
pub use locktab::{LockHandle, LockTable};
pub use traits::{MerkleClient, MerkleLeaf, TeamServer};
