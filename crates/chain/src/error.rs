use teamchain_primitives::identity::{Uid, UserVersion};
use teamchain_primitives::team::{Generation, Seqno, TeamId};
use thiserror::Error;

use crate::link::LinkType;

/// Decoding failures. Raised before any state is touched; the link is
/// simply malformed or inconsistent with its own commitments.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("malformed link payload: {0}")]
    Malformed(#[from] std::io::Error),

    #[error("inner payload does not hash to the outer commitment")]
    InnerHashMismatch,

    #[error("outer link declares {declared:?} but inner body is {inner:?}")]
    TypeMismatch {
        declared: LinkType,
        inner: LinkType,
    },

    #[error("link at seqno {0} is not stubbed")]
    NotStubbed(Seqno),
}

/// Replay failures. Any of these invalidates the whole batch: the caller
/// discards the partial state and must not cache it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("expected seqno {expected}, got {got}")]
    WrongSeqno { expected: Seqno, got: Seqno },

    #[error("prev pointer of link {seqno} does not match the chain tail")]
    BrokenLinkage { seqno: Seqno },

    #[error("head link at seqno {0}, chain already started")]
    DuplicateHead(Seqno),

    #[error("first link of a chain must be a head link, got {0:?}")]
    MissingHead(LinkType),

    #[error("link names team {got}, expected {expected}")]
    WrongTeamId { expected: TeamId, got: TeamId },

    #[error("root team name does not derive the team id")]
    NameIdMismatch,

    #[error("subteam name is not a direct child of the parent name")]
    BadSubteamName,

    #[error("signature on link {0} does not verify")]
    BadSignature(Seqno),

    #[error("signer {signer} lacks permission for link {seqno}")]
    PermissionDenied { seqno: Seqno, signer: UserVersion },

    #[error("link {0} is stubbed but the caller needs it in full")]
    StubNotAllowed(Seqno),

    #[error("{link_type:?} link at seqno {seqno} may not be stubbed")]
    StubbedCriticalLink { seqno: Seqno, link_type: LinkType },

    #[error("no stub recorded at seqno {0}")]
    UnknownStub(Seqno),

    #[error("per-team key generation {got}, expected {expected}")]
    WrongGeneration {
        expected: Generation,
        got: Generation,
    },

    #[error("link {0} would leave the team without an owner")]
    LastOwner(Seqno),

    #[error("link {seqno} updates {user} more than once")]
    DuplicateMember { seqno: Seqno, user: UserVersion },

    #[error("{0} is not a subteam id")]
    NotASubteamId(TeamId),

    #[error("parent/child recursion revisited team {0}")]
    LinkageCycle(TeamId),
}

/// Failures while discharging deferred proof obligations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProofError {
    #[error("fetching sigchain for user {uid} failed: {reason}")]
    FetchFailed { uid: Uid, reason: String },

    #[error("key {kid} was not live for {user} at merkle seqno {merkle_seqno}")]
    KeyNotLive {
        user: UserVersion,
        kid: teamchain_primitives::identity::PublicKey,
        merkle_seqno: Seqno,
    },

    #[error("user {uid} was reset at merkle seqno {reset_at}, before {merkle_seqno}")]
    UserReset {
        uid: Uid,
        merkle_seqno: Seqno,
        reset_at: Seqno,
    },
}
