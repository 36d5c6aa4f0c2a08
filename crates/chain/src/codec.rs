//! Decoding of raw sigchain links.
//!
//! The codec checks format invariants only: outer/inner hash linkage and
//! type-tag consistency. Signatures need snapshot state to judge, so they
//! are the player's job.

use borsh::BorshDeserialize;
use teamchain_primitives::hash::Hash;

use crate::error::CodecError;
use crate::link::{ChainLink, InnerLink, LinkInner, OuterLink};
use crate::wire::RawLink;

/// Decode one raw link into a [`ChainLink`].
///
/// If the inner payload is present it must hash to the commitment named
/// in the outer payload and carry a body matching the declared type;
/// otherwise the link is stubbed and only the commitment is kept.
pub fn decode_link(raw: &RawLink) -> Result<ChainLink, CodecError> {
    let outer = OuterLink::try_from_slice(&raw.outer)?;
    let link_id = Hash::sha256(&raw.outer);

    let inner = match &raw.inner {
        Some(inner_bytes) => LinkInner::Full(decode_inner(&outer, inner_bytes)?),
        None => LinkInner::Stubbed,
    };

    Ok(ChainLink {
        link_id,
        outer,
        outer_raw: raw.outer.clone().into_boxed_slice(),
        sig: raw.sig,
        inner,
    })
}

/// Fill in a previously stubbed link: a pure `Stubbed -> Full` transform
/// gated by the hash commitment already carried in the outer payload.
pub fn fill_stub(link: &ChainLink, inner_bytes: &[u8]) -> Result<ChainLink, CodecError> {
    if !link.is_stubbed() {
        return Err(CodecError::NotStubbed(link.seqno()));
    }

    let inner = decode_inner(&link.outer, inner_bytes)?;

    Ok(ChainLink {
        inner: LinkInner::Full(inner),
        ..link.clone()
    })
}

fn decode_inner(outer: &OuterLink, inner_bytes: &[u8]) -> Result<InnerLink, CodecError> {
    if Hash::sha256(inner_bytes) != outer.inner_hash {
        return Err(CodecError::InnerHashMismatch);
    }

    let inner = InnerLink::try_from_slice(inner_bytes)?;

    if inner.body.link_type() != outer.link_type {
        return Err(CodecError::TypeMismatch {
            declared: outer.link_type,
            inner: inner.body.link_type(),
        });
    }

    Ok(inner)
}
