//! Request and response bodies exchanged with the sigchain server.
//!
//! The loader's transport traits speak these types; no framing or RPC
//! machinery is implied here.

use borsh::{BorshDeserialize, BorshSerialize};
use teamchain_crypto::Nonce;
use teamchain_primitives::identity::PublicKey;
use teamchain_primitives::team::{Generation, Seqno, TeamApplication};

/// One link as served: the signed outer bytes, and the inner payload
/// unless the server withheld it for this caller.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct RawLink {
    pub outer: Vec<u8>,
    pub sig: [u8; 64],
    pub inner: Option<Vec<u8>>,
}

/// The caller's current-generation seed, boxed sender-to-caller under
/// their per-user keys.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct TeamKeyBox {
    pub generation: Generation,
    pub sender_kid: PublicKey,
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
}

/// A prior-generation seed sealed under the symmetric key of the
/// generation above it, so one box plus a prev chain delivers every
/// generation the caller is entitled to.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PrevSeed {
    pub generation: Generation,
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
}

/// A server-claimed reader key mask. Accepted only when it agrees with
/// the mask derived from a seed the caller actually holds.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct MaskEntry {
    pub application: TeamApplication,
    pub generation: Generation,
    pub mask: [u8; 32],
}

/// Response to a fetch-new-links request: the links above the caller's
/// watermark plus any key material addressed to them.
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct TeamUpdate {
    pub links: Vec<RawLink>,
    pub key_box: Option<TeamKeyBox>,
    pub prevs: Vec<PrevSeed>,
    pub reader_key_masks: Vec<MaskEntry>,
}

/// Response entry to a fill-stubs request: the withheld inner payload
/// for one seqno.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct StubFill {
    pub seqno: Seqno,
    pub inner: Vec<u8>,
}
