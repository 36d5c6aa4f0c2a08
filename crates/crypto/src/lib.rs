//! Key agreement, authenticated encryption and per-team key derivation.
//!
//! Everything that touches raw key bytes lives here: the DH shared key
//! used to box seeds between users, the AES-GCM sealing used both for
//! seed boxes and for the encrypted snapshot store, and the
//! deterministic derivations from a per-team seed to its public key ids
//! and reader key masks.
//!
//! Failures surface as [`CryptoError`]. Callers decide what a failure
//! means: the snapshot store maps any open failure to a cache miss,
//! while the loader treats a box that will not open as evidence of
//! tampering.

use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::SigningKey;
use ring::aead;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use teamchain_primitives::identity::{PrivateKey, PublicKey};
use thiserror::Error;

pub const NONCE_LEN: usize = 12;

pub type Nonce = [u8; NONCE_LEN];

const SEED_SIGNING_CONTEXT: &[u8] = b"team-seed-signing";
const SEED_ENCRYPTION_CONTEXT: &[u8] = b"team-seed-encryption";
const SEED_SYMMETRIC_CONTEXT: &[u8] = b"team-seed-symmetric";
const READER_KEY_MASK_CONTEXT: &[u8] = b"team-rkm-v1";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CryptoError {
    #[error("peer public key is not a valid curve point")]
    BadPeerKey,

    #[error("key material was rejected by the aead")]
    BadKeyMaterial,

    #[error("payload could not be sealed")]
    SealFailed,

    #[error("ciphertext failed authentication")]
    OpenFailed,

    #[error("unboxed seed is not 32 bytes")]
    BadSeedLength,
}

/// A symmetric AES-256-GCM key, either agreed between two users'
/// ed25519 identities or derived from a single local secret.
#[derive(Copy, Clone)]
pub struct SharedKey {
    key: [u8; 32],
}

impl SharedKey {
    /// Diffie-Hellman over the users' ed25519 keys: our scalar times
    /// the peer's curve point. Both box directions (sealing a seed for
    /// a member, opening one from an admin) agree on the same key.
    pub fn agree(local: &PrivateKey, peer: &PublicKey) -> Result<Self, CryptoError> {
        let point = CompressedEdwardsY(**peer)
            .decompress()
            .ok_or(CryptoError::BadPeerKey)?;
        let shared = SigningKey::from_bytes(local).to_scalar() * point;

        Ok(Self {
            key: shared.compress().to_bytes(),
        })
    }

    /// Symmetric key from a local secret, for data that never leaves
    /// this device (the encrypted snapshot store).
    pub fn from_secret(secret: &PrivateKey) -> Self {
        Self { key: **secret }
    }

    /// Symmetric key for sealing data under a per-team seed, e.g. the
    /// prior-generation seeds carried alongside a key rotation.
    pub fn from_seed(seed: &Seed) -> Self {
        Self {
            key: context_digest(SEED_SYMMETRIC_CONTEXT, seed.as_bytes()),
        }
    }

    fn aead_key(&self) -> Result<aead::LessSafeKey, CryptoError> {
        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &self.key)
            .map_err(|_| CryptoError::BadKeyMaterial)?;
        Ok(aead::LessSafeKey::new(unbound))
    }

    pub fn seal(&self, payload: Vec<u8>, nonce: Nonce) -> Result<Vec<u8>, CryptoError> {
        let mut sealed = payload;
        self.aead_key()?
            .seal_in_place_append_tag(
                aead::Nonce::assume_unique_for_key(nonce),
                aead::Aad::empty(),
                &mut sealed,
            )
            .map_err(|_| CryptoError::SealFailed)?;

        Ok(sealed)
    }

    pub fn open(&self, ciphertext: Vec<u8>, nonce: Nonce) -> Result<Vec<u8>, CryptoError> {
        let mut opened = ciphertext;
        let payload_len = self
            .aead_key()?
            .open_in_place(
                aead::Nonce::assume_unique_for_key(nonce),
                aead::Aad::empty(),
                &mut opened,
            )
            .map_err(|_| CryptoError::OpenFailed)?
            .len();

        opened.truncate(payload_len);

        Ok(opened)
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKey(..)")
    }
}

/// A 32-byte per-team key seed. All per-team key material at one
/// generation is derived from this value; holding the seed is what
/// "having the team key" means. Debug never prints the bytes.
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Seed([u8; 32]);

impl Seed {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Seed {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed(..)")
    }
}

/// The signing and encryption keypairs derived from a per-team seed.
pub struct TeamKeyPair {
    pub signing: SigningKey,
    pub encryption: SigningKey,
}

impl TeamKeyPair {
    pub fn signing_kid(&self) -> PublicKey {
        PublicKey::from(self.signing.verifying_key().to_bytes())
    }

    pub fn encryption_kid(&self) -> PublicKey {
        PublicKey::from(self.encryption.verifying_key().to_bytes())
    }
}

impl fmt::Debug for TeamKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamKeyPair")
            .field("signing_kid", &self.signing_kid())
            .field("encryption_kid", &self.encryption_kid())
            .finish()
    }
}

fn context_digest(context: &[u8], material: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(context);
    hasher.update(material);
    hasher.finalize().into()
}

/// Deterministically expand a seed into the team keypairs.
///
/// A seed delivered by the server is only accepted once the derived
/// encryption kid matches the public key log at that generation.
pub fn derive_per_team_keys(seed: &Seed) -> TeamKeyPair {
    TeamKeyPair {
        signing: SigningKey::from_bytes(&context_digest(SEED_SIGNING_CONTEXT, seed.as_bytes())),
        encryption: SigningKey::from_bytes(&context_digest(
            SEED_ENCRYPTION_CONTEXT,
            seed.as_bytes(),
        )),
    }
}

/// Per-application reader key mask for one seed generation.
pub fn derive_reader_key_mask(seed: &Seed, application_label: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(READER_KEY_MASK_CONTEXT);
    hasher.update(application_label.as_bytes());
    hasher.update(seed.as_bytes());
    hasher.finalize().into()
}

/// Open a seed boxed sender-to-recipient with the DH shared key.
pub fn open_sealed_seed(
    recipient: &PrivateKey,
    sender: &PublicKey,
    nonce: Nonce,
    ciphertext: &[u8],
) -> Result<Seed, CryptoError> {
    let payload = SharedKey::agree(recipient, sender)?.open(ciphertext.to_vec(), nonce)?;
    seed_from_payload(payload)
}

/// Seal a seed for a recipient. The counterpart of [`open_sealed_seed`];
/// the loader itself never seals, but fixtures and the write path do.
pub fn seal_seed(
    sender: &PrivateKey,
    recipient: &PublicKey,
    nonce: Nonce,
    seed: &Seed,
) -> Result<Vec<u8>, CryptoError> {
    SharedKey::agree(sender, recipient)?.seal(seed.as_bytes().to_vec(), nonce)
}

/// Open a prior-generation seed sealed under the symmetric key of the
/// generation above it.
pub fn open_prev_seed(newer: &Seed, nonce: Nonce, ciphertext: &[u8]) -> Result<Seed, CryptoError> {
    let payload = SharedKey::from_seed(newer).open(ciphertext.to_vec(), nonce)?;
    seed_from_payload(payload)
}

/// Seal a prior-generation seed under the generation above it.
pub fn seal_prev_seed(newer: &Seed, nonce: Nonce, prev: &Seed) -> Result<Vec<u8>, CryptoError> {
    SharedKey::from_seed(newer).seal(prev.as_bytes().to_vec(), nonce)
}

fn seed_from_payload(payload: Vec<u8>) -> Result<Seed, CryptoError> {
    let bytes: [u8; 32] = payload.try_into().map_err(|_| CryptoError::BadSeedLength)?;
    Ok(Seed(bytes))
}
