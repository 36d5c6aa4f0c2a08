//! Chain-building fixtures for tests.
//!
//! Builds real, signed sigchains so every verified path in the replay
//! and loader tests runs actual ed25519 and AES-GCM crypto. Gated
//! behind the `testing` feature for downstream integration tests.

use std::collections::BTreeSet;

use borsh::to_vec;
use ed25519_dalek::{Signer, SigningKey};
use teamchain_crypto::{
    derive_per_team_keys, derive_reader_key_mask, seal_prev_seed, seal_seed, Nonce, Seed,
};
use teamchain_primitives::hash::Hash;
use teamchain_primitives::identity::{PrivateKey, PublicKey, Uid, UserVersion};
use teamchain_primitives::team::{
    Generation, LinkId, Role, Seqno, TeamApplication, TeamId, TeamName, SUBTEAM_SUFFIX,
};

use crate::link::{LinkBody, OuterLink, ParentPointer, PerTeamKeyBody, SubteamPointer};
use crate::proofs::{UserKeyEra, UserKeyHistory};
use crate::wire::{MaskEntry, PrevSeed, RawLink, TeamKeyBox, TeamUpdate};

/// A deterministic test identity: uid, key era and signing key all
/// derived from one tag byte.
#[derive(Clone, Copy, Debug)]
pub struct TestUser {
    pub user_version: UserVersion,
    pub key: PrivateKey,
}

impl TestUser {
    pub fn new(tag: u8) -> Self {
        Self {
            user_version: UserVersion::new(Uid::from([tag; 16]), Seqno::new(1)),
            key: PrivateKey::from([tag; 32]),
        }
    }

    pub fn uid(&self) -> Uid {
        self.user_version.uid
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    /// The key history a healthy user-chain load would produce: one
    /// era, live since the beginning, never revoked.
    pub fn history(&self) -> UserKeyHistory {
        UserKeyHistory {
            uid: self.uid(),
            eras: vec![UserKeyEra {
                kid: self.public_key(),
                user_version: self.user_version,
                live_from: Seqno::new(1),
                revoked_at: None,
            }],
            reset_at: None,
        }
    }
}

/// A subteam id from a tag byte.
pub fn subteam_id(tag: u8) -> TeamId {
    let mut bytes = [tag; 16];
    bytes[15] = SUBTEAM_SUFFIX;
    TeamId::from_bytes(bytes).expect("subteam suffix is valid")
}

/// Deterministic per-team seed for a team and generation.
pub fn test_seed(id: TeamId, generation: Generation) -> Seed {
    let digest = Hash::sha256_parts(&[
        b"test-team-seed",
        id.as_bytes(),
        &generation.as_u32().to_le_bytes(),
    ]);
    Seed::from(*digest.as_bytes())
}

fn per_team_key_body(id: TeamId, generation: Generation) -> PerTeamKeyBody {
    let keys = derive_per_team_keys(&test_seed(id, generation));
    PerTeamKeyBody {
        generation,
        signing_kid: keys.signing_kid(),
        encryption_kid: keys.encryption_kid(),
    }
}

/// Sign one link. Exposed so tests can also build deliberately broken
/// chains (wrong prev, gapped seqnos, forged bodies).
pub fn sign_link(
    signer: &TestUser,
    seqno: Seqno,
    prev: Option<LinkId>,
    merkle_seqno: Seqno,
    body: LinkBody,
) -> RawLink {
    let inner = crate::link::InnerLink {
        signer: signer.user_version,
        signing_kid: signer.public_key(),
        merkle_seqno,
        ctime_ms: 1_700_000_000_000 + seqno.as_u64() * 1_000,
        body,
    };
    let inner_bytes = to_vec(&inner).expect("inner serializes");

    let outer = OuterLink {
        seqno,
        prev,
        link_type: inner.body.link_type(),
        inner_hash: Hash::sha256(&inner_bytes),
    };
    let outer_bytes = to_vec(&outer).expect("outer serializes");

    let sig = SigningKey::from_bytes(&signer.key)
        .sign(&outer_bytes)
        .to_bytes();

    RawLink {
        outer: outer_bytes,
        sig,
        inner: Some(inner_bytes),
    }
}

/// Builds a valid signed chain for one team, link by link.
#[derive(Debug)]
pub struct ChainBuilder {
    id: TeamId,
    name: TeamName,
    links: Vec<RawLink>,
    link_ids: Vec<LinkId>,
    generations: u32,
}

impl ChainBuilder {
    /// Start a root team: link 1 is a `RootTeam` head signed by `owner`,
    /// installing them as owner with key generation 1.
    pub fn root(name: &str, owner: &TestUser) -> Self {
        let name: TeamName = name.parse().expect("valid root name");
        let id = TeamId::for_root_name(&name);

        let mut builder = Self {
            id,
            name: name.clone(),
            links: Vec::new(),
            link_ids: Vec::new(),
            generations: 0,
        };

        builder.generations = 1;
        builder.push(
            owner,
            LinkBody::RootTeam {
                id,
                name,
                members: vec![(owner.user_version, Role::Owner)],
                per_team_key: per_team_key_body(id, Generation::FIRST),
            },
        );
        builder
    }

    /// Start a subteam: link 1 is a `SubteamHead` pointing up at the
    /// parent's `NewSubteam` position.
    pub fn subteam(name: &str, id: TeamId, parent: ParentPointer, creator: &TestUser) -> Self {
        let name: TeamName = name.parse().expect("valid subteam name");

        let mut builder = Self {
            id,
            name: name.clone(),
            links: Vec::new(),
            link_ids: Vec::new(),
            generations: 0,
        };

        builder.generations = 1;
        builder.push(
            creator,
            LinkBody::SubteamHead {
                id,
                name,
                parent,
                per_team_key: per_team_key_body(id, Generation::FIRST),
            },
        );
        builder
    }

    fn push(&mut self, signer: &TestUser, body: LinkBody) {
        let seqno = Seqno::new(self.links.len() as u64 + 1);
        let prev = self.link_ids.last().copied();
        let merkle_seqno = Seqno::new(1_000 + seqno.as_u64() * 10);

        let raw = sign_link(signer, seqno, prev, merkle_seqno, body);
        self.link_ids.push(Hash::sha256(&raw.outer));
        self.links.push(raw);
    }

    pub fn change_membership(mut self, signer: &TestUser, changes: &[(UserVersion, Role)]) -> Self {
        self.push(
            signer,
            LinkBody::ChangeMembership {
                changes: changes.to_vec(),
            },
        );
        self
    }

    pub fn rotate_key(mut self, signer: &TestUser) -> Self {
        self.generations += 1;
        let generation = Generation::new(self.generations);
        self.push(
            signer,
            LinkBody::RotateKey {
                per_team_key: per_team_key_body(self.id, generation),
            },
        );
        self
    }

    pub fn new_subteam(mut self, signer: &TestUser, id: TeamId, name: &str) -> Self {
        self.push(
            signer,
            LinkBody::NewSubteam {
                subteam: SubteamPointer {
                    id,
                    name: name.parse().expect("valid subteam name"),
                },
            },
        );
        self
    }

    pub fn rename_subteam(mut self, signer: &TestUser, id: TeamId, name: &str) -> Self {
        self.push(
            signer,
            LinkBody::RenameSubteam {
                subteam: SubteamPointer {
                    id,
                    name: name.parse().expect("valid subteam name"),
                },
            },
        );
        self
    }

    pub fn delete_subteam(mut self, signer: &TestUser, id: TeamId, name: &str) -> Self {
        self.push(
            signer,
            LinkBody::DeleteSubteam {
                subteam: SubteamPointer {
                    id,
                    name: name.parse().expect("valid subteam name"),
                },
            },
        );
        self
    }

    pub fn invite(mut self, signer: &TestUser, invite_id: Hash, role: Role) -> Self {
        self.push(signer, LinkBody::InviteAdd { invite_id, role });
        self
    }

    pub fn cancel_invite(mut self, signer: &TestUser, invite_id: Hash) -> Self {
        self.push(signer, LinkBody::InviteCancel { invite_id });
        self
    }

    pub fn fs_settings(mut self, signer: &TestUser, write_disabled: bool) -> Self {
        self.push(signer, LinkBody::FilesystemSettings { write_disabled });
        self
    }

    pub fn id(&self) -> TeamId {
        self.id
    }

    pub fn name(&self) -> &TeamName {
        &self.name
    }

    pub fn last_seqno(&self) -> Seqno {
        Seqno::new(self.links.len() as u64)
    }

    pub fn tail_link_id(&self) -> LinkId {
        *self.link_ids.last().expect("chain has a head link")
    }

    pub fn link_id_at(&self, seqno: Seqno) -> LinkId {
        self.link_ids[seqno.as_u64() as usize - 1]
    }

    pub fn raw_link_at(&self, seqno: Seqno) -> RawLink {
        self.links[seqno.as_u64() as usize - 1].clone()
    }

    /// The inner payload bytes at a seqno, as a fill-stubs response
    /// would carry them.
    pub fn inner_bytes_at(&self, seqno: Seqno) -> Vec<u8> {
        self.links[seqno.as_u64() as usize - 1]
            .inner
            .clone()
            .expect("builder links are always full")
    }

    pub fn seed(&self, generation: Generation) -> Seed {
        test_seed(self.id, generation)
    }

    pub fn latest_generation(&self) -> Generation {
        Generation::new(self.generations)
    }

    /// Links above `low`, with the given seqnos stubbed (inner payload
    /// withheld), as the server would return them to a reader.
    pub fn links_above(&self, low: Seqno, stubs: &BTreeSet<Seqno>) -> Vec<RawLink> {
        self.links
            .iter()
            .enumerate()
            .filter(|(index, _)| (*index as u64 + 1) > low.as_u64())
            .map(|(index, link)| {
                let seqno = Seqno::new(index as u64 + 1);
                let mut link = link.clone();
                if stubs.contains(&seqno) {
                    link.inner = None;
                }
                link
            })
            .collect()
    }

    /// A full fetch-new-links response for `recipient`: the links above
    /// `low` plus the latest seed boxed sender-to-recipient, the prev
    /// chain down to generation 1, and the derived reader key masks.
    pub fn team_update(
        &self,
        low: Seqno,
        sender: &TestUser,
        recipient: &TestUser,
        stubs: &BTreeSet<Seqno>,
    ) -> TeamUpdate {
        let latest = self.latest_generation();

        let mut prevs = Vec::new();
        let mut generation = latest;
        while generation > Generation::FIRST {
            let older = Generation::new(generation.as_u32() - 1);
            let nonce = seed_nonce(older);
            prevs.push(PrevSeed {
                generation: older,
                nonce,
                ciphertext: seal_prev_seed(&self.seed(generation), nonce, &self.seed(older))
                    .expect("prev seals"),
            });
            generation = older;
        }

        let mut reader_key_masks = Vec::new();
        for generation in (1..=latest.as_u32()).map(Generation::new) {
            for application in [TeamApplication::Files, TeamApplication::Chat] {
                reader_key_masks.push(MaskEntry {
                    application,
                    generation,
                    mask: derive_reader_key_mask(&self.seed(generation), application.label()),
                });
            }
        }

        let nonce = seed_nonce(latest);
        TeamUpdate {
            links: self.links_above(low, stubs),
            key_box: Some(TeamKeyBox {
                generation: latest,
                sender_kid: sender.public_key(),
                nonce,
                ciphertext: seal_seed(
                    &sender.key,
                    &recipient.key.public_key(),
                    nonce,
                    &self.seed(latest),
                )
                .expect("box seals"),
            }),
            prevs,
            reader_key_masks,
        }
    }
}

fn seed_nonce(generation: Generation) -> Nonce {
    let mut nonce = [0_u8; teamchain_crypto::NONCE_LEN];
    nonce[0] = generation.as_u32() as u8;
    nonce
}
