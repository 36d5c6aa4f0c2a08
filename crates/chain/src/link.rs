use borsh::{BorshDeserialize, BorshSerialize};
use teamchain_primitives::hash::Hash;
use teamchain_primitives::identity::{PublicKey, UserVersion};
use teamchain_primitives::team::{Generation, LinkId, Role, Seqno, TeamId, TeamName};

/// The kind of state transition a link performs. Carried in the outer
/// payload, so it is known even for stubbed links.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
pub enum LinkType {
    RootTeam,
    SubteamHead,
    ChangeMembership,
    RotateKey,
    NewSubteam,
    RenameSubteam,
    DeleteSubteam,
    InviteAdd,
    InviteCancel,
    FilesystemSettings,
}

impl LinkType {
    /// Whether the server may withhold this link's inner payload from a
    /// reader. Links that move membership or keys must always arrive in
    /// full; everything a reader does not need to replay its own access
    /// may be elided.
    pub fn may_be_stubbed(&self) -> bool {
        match self {
            LinkType::RootTeam
            | LinkType::SubteamHead
            | LinkType::ChangeMembership
            | LinkType::RotateKey => false,
            LinkType::NewSubteam
            | LinkType::RenameSubteam
            | LinkType::DeleteSubteam
            | LinkType::InviteAdd
            | LinkType::InviteCancel
            | LinkType::FilesystemSettings => true,
        }
    }
}

/// The signed envelope of a link. Its borsh bytes are what the signature
/// covers and what hashes to the link id, so this struct *is* the wire
/// format.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct OuterLink {
    pub seqno: Seqno,
    pub prev: Option<LinkId>,
    pub link_type: LinkType,
    pub inner_hash: Hash,
}

/// The per-team key material installed by a head or rotation link.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PerTeamKeyBody {
    pub generation: Generation,
    pub signing_kid: PublicKey,
    pub encryption_kid: PublicKey,
}

/// A parent chain position referenced by a subteam's head link.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ParentPointer {
    pub id: TeamId,
    pub seqno: Seqno,
}

/// A subteam referenced by a parent-side management link.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct SubteamPointer {
    pub id: TeamId,
    pub name: TeamName,
}

/// The body of an inner payload, one variant per [`LinkType`].
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum LinkBody {
    RootTeam {
        id: TeamId,
        name: TeamName,
        members: Vec<(UserVersion, Role)>,
        per_team_key: PerTeamKeyBody,
    },
    SubteamHead {
        id: TeamId,
        name: TeamName,
        parent: ParentPointer,
        per_team_key: PerTeamKeyBody,
    },
    ChangeMembership {
        changes: Vec<(UserVersion, Role)>,
    },
    RotateKey {
        per_team_key: PerTeamKeyBody,
    },
    NewSubteam {
        subteam: SubteamPointer,
    },
    RenameSubteam {
        subteam: SubteamPointer,
    },
    DeleteSubteam {
        subteam: SubteamPointer,
    },
    InviteAdd {
        invite_id: Hash,
        role: Role,
    },
    InviteCancel {
        invite_id: Hash,
    },
    FilesystemSettings {
        write_disabled: bool,
    },
}

impl LinkBody {
    pub fn link_type(&self) -> LinkType {
        match self {
            LinkBody::RootTeam { .. } => LinkType::RootTeam,
            LinkBody::SubteamHead { .. } => LinkType::SubteamHead,
            LinkBody::ChangeMembership { .. } => LinkType::ChangeMembership,
            LinkBody::RotateKey { .. } => LinkType::RotateKey,
            LinkBody::NewSubteam { .. } => LinkType::NewSubteam,
            LinkBody::RenameSubteam { .. } => LinkType::RenameSubteam,
            LinkBody::DeleteSubteam { .. } => LinkType::DeleteSubteam,
            LinkBody::InviteAdd { .. } => LinkType::InviteAdd,
            LinkBody::InviteCancel { .. } => LinkType::InviteCancel,
            LinkBody::FilesystemSettings { .. } => LinkType::FilesystemSettings,
        }
    }
}

/// The inner payload of a link: who signed it, against which global
/// Merkle root, and what it does. `ctime_ms` is advisory; all ordering
/// is by seqno.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct InnerLink {
    pub signer: UserVersion,
    pub signing_kid: PublicKey,
    pub merkle_seqno: Seqno,
    pub ctime_ms: u64,
    pub body: LinkBody,
}

/// The inner side of a decoded link: either the full payload or a stub,
/// whose commitment lives in `outer.inner_hash`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LinkInner {
    Full(InnerLink),
    Stubbed,
}

/// A decoded chain link. `outer_raw` is retained verbatim because the
/// signature covers those exact bytes and the link id is their hash.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChainLink {
    pub link_id: LinkId,
    pub outer: OuterLink,
    pub outer_raw: Box<[u8]>,
    pub sig: [u8; 64],
    pub inner: LinkInner,
}

impl ChainLink {
    pub fn seqno(&self) -> Seqno {
        self.outer.seqno
    }

    pub fn is_stubbed(&self) -> bool {
        matches!(self.inner, LinkInner::Stubbed)
    }

    pub fn full(&self) -> Option<&InnerLink> {
        match &self.inner {
            LinkInner::Full(inner) => Some(inner),
            LinkInner::Stubbed => None,
        }
    }
}
