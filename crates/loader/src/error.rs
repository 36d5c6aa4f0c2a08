use teamchain_chain::{ChainError, ProofError};
use teamchain_primitives::team::{LinkId, Seqno, TeamId, TeamName};
use thiserror::Error;

/// RPC transport failure. Retryable by the caller; the loader never
/// retries on its own.
#[derive(Debug, Error)]
#[error("rpc transport failure: {0}")]
pub struct TransportError(pub String);

/// Failures from the Merkle probe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MerkleError {
    #[error("merkle tree has no leaf for team {0}")]
    MissingLeaf(TeamId),

    #[error("merkle leaf names team {got}, expected {expected}")]
    WrongLeaf { expected: TeamId, got: TeamId },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Everything a `load` call can fail with.
///
/// Errors that indicate chain invalidity (`Chain`, `Signature`, `Proof`,
/// `MerkleMismatch`, `StubNotAllowed`, `ParentChildMismatch`, `BadBox`)
/// are raised before the snapshot is cached; the previously cached
/// snapshot stays intact. `NotAdmin` and `KeyGenTooLow` are return
/// checks raised *after* caching, so a subsequent lesser request still
/// benefits from the validated chain.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("bad load argument: {0}")]
    BadArg(&'static str),

    #[error("team name resolution failed: {0}")]
    Resolve(String),

    #[error("merkle tree has no leaf for team {0}")]
    MerkleMissing(TeamId),

    #[error("replayed chain tail {got} does not match merkle leaf {expected}")]
    MerkleMismatch { expected: LinkId, got: LinkId },

    #[error(transparent)]
    Chain(ChainError),

    #[error("signer validity failed: {0}")]
    Signature(ChainError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error("link {0} is stubbed but required in full")]
    StubNotAllowed(Seqno),

    #[error("no mirrored link for {child} at seqno {seqno} of {parent}")]
    ParentChildMismatch {
        parent: TeamId,
        child: TeamId,
        seqno: Seqno,
    },

    #[error("delivered team key box is invalid: {0}")]
    BadBox(String),

    #[error("caller is not an admin of the team")]
    NotAdmin,

    #[error("team key generation too low: {have} < {need}")]
    KeyGenTooLow { have: u32, need: u32 },

    #[error("loaded team is named {got}, expected {expected}")]
    WrongName { expected: TeamName, got: TeamName },

    #[error("server response is inconsistent: {0}")]
    FaultyServer(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<ChainError> for LoadError {
    fn from(error: ChainError) -> Self {
        match error {
            ChainError::StubNotAllowed(seqno) => LoadError::StubNotAllowed(seqno),
            ChainError::BadSignature(_) | ChainError::PermissionDenied { .. } => {
                LoadError::Signature(error)
            }
            other => LoadError::Chain(other),
        }
    }
}

impl From<MerkleError> for LoadError {
    fn from(error: MerkleError) -> Self {
        match error {
            MerkleError::MissingLeaf(team_id) => LoadError::MerkleMissing(team_id),
            MerkleError::WrongLeaf { .. } => LoadError::FaultyServer(error.to_string()),
            MerkleError::Transport(transport) => LoadError::Transport(transport),
        }
    }
}
