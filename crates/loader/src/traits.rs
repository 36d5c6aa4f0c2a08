//! The loader's external seams: the sigchain server and the Merkle
//! service. Transports implement these; the loader never sees framing.

use teamchain_chain::{StubFill, TeamUpdate};
use teamchain_primitives::team::{LinkId, Seqno, TeamId, TeamName};

use crate::error::{MerkleError, TransportError};

/// The Merkle tree's commitment to a team's chain position.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MerkleLeaf {
    pub team_id: TeamId,
    pub seqno: Seqno,
    pub link_id: LinkId,
    /// The global Merkle root seqno this leaf was read under.
    pub root_seqno: Seqno,
}

/// Probe of the global Merkle tree.
#[async_trait::async_trait]
pub trait MerkleClient: Send + Sync {
    /// Look up the team's current `(seqno, link_id)`.
    ///
    /// Freshness is the entire purpose of this call: implementations
    /// must bypass any local leaf cache. Absence of the leaf (team does
    /// not exist, or the caller is not entitled to see it) is
    /// [`MerkleError::MissingLeaf`].
    async fn lookup_team(&self, team_id: &TeamId) -> Result<MerkleLeaf, MerkleError>;
}

/// The sigchain server. Untrusted: everything it returns is re-bound
/// through Merkle, hash commitments and signatures.
#[async_trait::async_trait]
pub trait TeamServer: Send + Sync {
    /// Links with `seqno > low`, plus any key box, prev seeds and
    /// reader key masks addressed to this caller.
    async fn fetch_new_links(
        &self,
        team_id: &TeamId,
        low: Seqno,
    ) -> Result<TeamUpdate, TransportError>;

    /// Inner payloads for previously stubbed seqnos.
    async fn fill_stubs(
        &self,
        team_id: &TeamId,
        seqnos: &[Seqno],
    ) -> Result<Vec<StubFill>, TransportError>;

    /// Resolve a subteam name to an id. The server can lie here; the
    /// answer is re-bound by the Merkle probe and the name check on the
    /// way out of `load`.
    async fn resolve_subteam_name(&self, name: &TeamName) -> Result<TeamId, TransportError>;
}
