//! Sigchain decoding, replay and proof collection.
//!
//! This crate is the pure core of the team loader: given links fetched by
//! someone else, it decodes them ([`codec`]), folds them into a
//! [`snapshot::TeamSnapshot`] under the per-type transition rules
//! ([`player::ChainPlayer`]), and accumulates the deferred cryptographic
//! obligations that are discharged in one batch at the end of replay
//! ([`proofs::ProofSet`]).
//!
//! Nothing here performs network or disk I/O; the only async seam is
//! [`proofs::UserChainSource`], injected by the caller.

pub mod codec;
pub mod error;
pub mod link;
pub mod player;
pub mod proofs;
pub mod snapshot;
pub mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use error::{ChainError, CodecError, ProofError};
pub use link::{
    ChainLink, InnerLink, LinkBody, LinkInner, LinkType, OuterLink, ParentPointer, PerTeamKeyBody,
    SubteamPointer,
};
pub use player::{ChainPlayer, LoadHints, ParentChildKind, ParentChildOp};
pub use proofs::{ProofObligation, ProofSet, UserChainSource, UserKeyEra, UserKeyHistory};
pub use snapshot::{TeamChainState, TeamSnapshot};
pub use wire::{MaskEntry, PrevSeed, RawLink, StubFill, TeamKeyBox, TeamUpdate};
