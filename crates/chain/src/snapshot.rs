//! The verified, replayed team state.
//!
//! A snapshot is created by replaying a chain from its head and only
//! becomes observable to callers after every post-replay check passed.
//! Replay always works on a clone, so a failed batch never corrupts the
//! snapshot it started from.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use teamchain_crypto::Seed;
use teamchain_primitives::hash::Hash;
use teamchain_primitives::identity::UserVersion;
use teamchain_primitives::team::{
    Generation, LinkId, PerTeamKey, Role, Seqno, TeamApplication, TeamId, TeamName,
};

use crate::link::{LinkType, ParentPointer};

/// One entry of a user's role history. The current role is the last
/// entry; `Role::None` records a removal.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct RolePoint {
    pub seqno: Seqno,
    pub role: Role,
}

/// One entry of a subteam's name history as seen from the parent.
/// `name: None` is the deletion tombstone.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct SubteamPoint {
    pub seqno: Seqno,
    pub name: Option<TeamName>,
}

/// What is retained for a stubbed link: enough to keep the chain
/// linkage checkable and to validate a later back-fill, including the
/// signature that could not be verified without the inner payload.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct StubRecord {
    pub link_type: LinkType,
    pub inner_hash: Hash,
    pub outer_raw: Vec<u8>,
    pub sig: [u8; 64],
}

/// Filesystem flags for the team, last-writer-wins by seqno.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct FsSettings {
    pub seqno: Seqno,
    pub write_disabled: bool,
}

/// The replayed chain state of one team.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct TeamChainState {
    pub id: TeamId,
    pub name: TeamName,
    /// The parent chain position this subteam's head points up at;
    /// `None` for root teams.
    pub parent: Option<ParentPointer>,
    pub last_seqno: Seqno,
    pub last_link_id: LinkId,
    /// Link ids by seqno (dense, index = seqno - 1).
    pub link_ids: Vec<LinkId>,
    /// Per-user role history; the current role is the last entry.
    pub user_log: BTreeMap<UserVersion, Vec<RolePoint>>,
    /// Per-team key log (dense, index = generation - 1).
    pub per_team_key_log: Vec<PerTeamKey>,
    /// Stub records by seqno for links whose inner payload is missing.
    pub stubbed: BTreeMap<Seqno, StubRecord>,
    /// Name history of direct subteams.
    pub subteam_log: BTreeMap<TeamId, Vec<SubteamPoint>>,
    /// Open invites by id.
    pub active_invites: BTreeMap<Hash, Role>,
    pub fs_settings: Option<FsSettings>,
}

impl TeamChainState {
    /// The role a user held *after* link `seqno` was applied. The role
    /// in effect just before a link at seqno `s` is therefore
    /// `role_at(uv, s.prev())`.
    pub fn parent_id(&self) -> Option<TeamId> {
        self.parent.map(|pointer| pointer.id)
    }

    pub fn role_at(&self, user: &UserVersion, seqno: Seqno) -> Role {
        self.user_log
            .get(user)
            .into_iter()
            .flatten()
            .take_while(|point| point.seqno <= seqno)
            .last()
            .map_or(Role::None, |point| point.role)
    }

    pub fn current_role(&self, user: &UserVersion) -> Role {
        self.role_at(user, self.last_seqno)
    }

    pub fn owner_count(&self) -> usize {
        self.user_log
            .keys()
            .filter(|user| self.current_role(user).is_owner())
            .count()
    }

    pub fn latest_generation(&self) -> Option<Generation> {
        self.per_team_key_log.last().map(|key| key.generation)
    }

    pub fn per_team_key(&self, generation: Generation) -> Option<&PerTeamKey> {
        let index = generation.as_u32().checked_sub(1)? as usize;
        self.per_team_key_log.get(index)
    }

    pub fn link_id_at(&self, seqno: Seqno) -> Option<LinkId> {
        let index = seqno.as_u64().checked_sub(1)? as usize;
        self.link_ids.get(index).copied()
    }

    pub fn stubbed_seqnos(&self) -> BTreeSet<Seqno> {
        self.stubbed.keys().copied().collect()
    }

    pub fn has_stubbed_links(&self) -> bool {
        !self.stubbed.is_empty()
    }

    /// Current name of a direct subteam, or `None` if unknown or
    /// deleted.
    pub fn subteam_name(&self, id: &TeamId) -> Option<&TeamName> {
        self.subteam_log
            .get(id)
            .and_then(|points| points.last())
            .and_then(|point| point.name.as_ref())
    }

    /// The subteam-log entry recorded at exactly `seqno`, if any.
    pub fn subteam_point_at(&self, id: &TeamId, seqno: Seqno) -> Option<&SubteamPoint> {
        self.subteam_log
            .get(id)?
            .iter()
            .find(|point| point.seqno == seqno)
    }
}

/// A verified snapshot of a team: the replayed chain plus whatever key
/// material this caller was entitled to recover.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct TeamSnapshot {
    pub chain: TeamChainState,
    /// Present iff the caller could unbox the seed at that generation
    /// and it re-derived the logged encryption kid.
    pub per_team_key_seeds: BTreeMap<Generation, Seed>,
    pub reader_key_masks: BTreeMap<TeamApplication, BTreeMap<Generation, [u8; 32]>>,
    /// Wall-clock instant (unix millis) at which this snapshot was
    /// validated against Merkle.
    pub cached_at_ms: u64,
}

impl TeamSnapshot {
    pub fn new(chain: TeamChainState) -> Self {
        Self {
            chain,
            per_team_key_seeds: BTreeMap::new(),
            reader_key_masks: BTreeMap::new(),
            cached_at_ms: 0,
        }
    }

    pub fn latest_seed_generation(&self) -> Option<Generation> {
        self.per_team_key_seeds.keys().next_back().copied()
    }
}
