//! Folding validated links into a [`TeamChainState`].
//!
//! The player enforces the per-link-type transition rules and the
//! signer-permission preconditions. It never fetches anything: signature
//! validity against the signer's *user* chain is recorded as a deferred
//! obligation in the [`ProofSet`], and cross-chain subteam facts are
//! emitted as [`ParentChildOp`]s for the loader to discharge.
//!
//! On error the state passed in may be partially updated. Callers replay
//! on a clone of the cached state and discard it on failure, so this
//! never corrupts an observable snapshot.

use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use teamchain_primitives::identity::UserVersion;
use teamchain_primitives::team::{Generation, PerTeamKey, Role, Seqno, TeamId, TeamName};
use tracing::trace;

use crate::codec;
use crate::error::ChainError;
use crate::link::{ChainLink, InnerLink, LinkBody};
use crate::proofs::ProofSet;
use crate::snapshot::{FsSettings, RolePoint, StubRecord, SubteamPoint, TeamChainState};

/// Caller constraints that change how stubbed links are treated during
/// replay.
#[derive(Clone, Debug, Default)]
pub struct LoadHints {
    pub need_admin: bool,
    pub need_seqnos: BTreeSet<Seqno>,
}

/// Which side of a parent/child link pair was observed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParentChildKind {
    /// A subteam head pointing up at its parent's `NewSubteam`.
    Head,
    Create,
    Rename,
    Delete,
}

/// A cross-chain fact recorded during replay: the counterpart team's
/// chain must contain the mirrored operation at a consistent position.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ParentChildOp {
    pub kind: ParentChildKind,
    pub parent: TeamId,
    pub child: TeamId,
    pub parent_seqno: Seqno,
    pub child_seqno: Seqno,
    pub name: TeamName,
}

/// The chain-replay state machine. Stateless; all state lives in the
/// [`TeamChainState`] being folded.
#[derive(Debug, Clone, Copy)]
pub struct ChainPlayer;

impl ChainPlayer {
    /// Verify a full link against the state *immediately before* it:
    /// the outer signature must check out under the inner signing kid,
    /// the signer must hold the role the link type demands, and the
    /// signer's key liveness is recorded for batch proof discharge.
    ///
    /// Stubbed links carry nothing verifiable here and are a no-op.
    pub fn verify_link(
        prior: Option<&TeamChainState>,
        link: &ChainLink,
        proofs: &mut ProofSet,
    ) -> Result<(), ChainError> {
        let Some(inner) = link.full() else {
            return Ok(());
        };

        verify_signature(link, inner)?;

        if let Some(state) = prior {
            let signer_role = state.current_role(&inner.signer);
            check_permission(state, &inner.body, inner.signer, signer_role, link.seqno())?;
        }

        proofs.add_key_live(inner.signer, inner.signing_kid, inner.merkle_seqno);
        proofs.add_unrevoked(inner.signer.uid, inner.merkle_seqno);

        Ok(())
    }

    /// Initialise a chain from its head link (seqno 1).
    pub fn apply_head(
        expected_id: TeamId,
        link: &ChainLink,
        hints: &LoadHints,
    ) -> Result<(TeamChainState, Vec<ParentChildOp>), ChainError> {
        if link.seqno() != Seqno::new(1) {
            return Err(ChainError::WrongSeqno {
                expected: Seqno::new(1),
                got: link.seqno(),
            });
        }
        if link.outer.prev.is_some() {
            return Err(ChainError::BrokenLinkage {
                seqno: link.seqno(),
            });
        }

        let Some(inner) = link.full() else {
            if hints.need_admin || hints.need_seqnos.contains(&link.seqno()) {
                return Err(ChainError::StubNotAllowed(link.seqno()));
            }
            return Err(ChainError::StubbedCriticalLink {
                seqno: link.seqno(),
                link_type: link.outer.link_type,
            });
        };

        let mut ops = Vec::new();
        let mut user_log: BTreeMap<UserVersion, Vec<RolePoint>> = BTreeMap::new();
        let seqno = link.seqno();

        let (name, parent, per_team_key) = match &inner.body {
            LinkBody::RootTeam {
                id,
                name,
                members,
                per_team_key,
            } => {
                if *id != expected_id {
                    return Err(ChainError::WrongTeamId {
                        expected: expected_id,
                        got: *id,
                    });
                }
                if !name.is_root() || TeamId::for_root_name(name) != *id {
                    return Err(ChainError::NameIdMismatch);
                }

                let mut signer_is_owner = false;
                for (user, role) in members {
                    let previous = user_log.insert(
                        *user,
                        vec![RolePoint {
                            seqno,
                            role: *role,
                        }],
                    );
                    if previous.is_some() {
                        return Err(ChainError::DuplicateMember {
                            seqno,
                            user: *user,
                        });
                    }
                    if *user == inner.signer && role.is_owner() {
                        signer_is_owner = true;
                    }
                }
                if !signer_is_owner {
                    return Err(ChainError::PermissionDenied {
                        seqno,
                        signer: inner.signer,
                    });
                }

                (name.clone(), None, per_team_key)
            }
            LinkBody::SubteamHead {
                id,
                name,
                parent,
                per_team_key,
            } => {
                if *id != expected_id {
                    return Err(ChainError::WrongTeamId {
                        expected: expected_id,
                        got: *id,
                    });
                }
                if !id.is_sub_team() {
                    return Err(ChainError::NotASubteamId(*id));
                }
                if name.is_root() {
                    return Err(ChainError::BadSubteamName);
                }

                let _ignored = user_log.insert(
                    inner.signer,
                    vec![RolePoint {
                        seqno,
                        role: Role::Owner,
                    }],
                );

                ops.push(ParentChildOp {
                    kind: ParentChildKind::Head,
                    parent: parent.id,
                    child: *id,
                    parent_seqno: parent.seqno,
                    child_seqno: seqno,
                    name: name.clone(),
                });

                (name.clone(), Some(*parent), per_team_key)
            }
            other => return Err(ChainError::MissingHead(other.link_type())),
        };

        if per_team_key.generation != Generation::FIRST {
            return Err(ChainError::WrongGeneration {
                expected: Generation::FIRST,
                got: per_team_key.generation,
            });
        }

        let state = TeamChainState {
            id: expected_id,
            name,
            parent,
            last_seqno: seqno,
            last_link_id: link.link_id,
            link_ids: vec![link.link_id],
            user_log,
            per_team_key_log: vec![PerTeamKey {
                generation: per_team_key.generation,
                seqno,
                signing_kid: per_team_key.signing_kid,
                encryption_kid: per_team_key.encryption_kid,
            }],
            stubbed: BTreeMap::new(),
            subteam_log: BTreeMap::new(),
            active_invites: BTreeMap::new(),
            fs_settings: None,
        };

        Ok((state, ops))
    }

    /// Fold one link into an existing state, enforcing linkage and the
    /// per-type transition rules.
    pub fn apply_link(
        state: &mut TeamChainState,
        link: &ChainLink,
        hints: &LoadHints,
    ) -> Result<Vec<ParentChildOp>, ChainError> {
        let seqno = link.seqno();
        let expected = state.last_seqno.next();
        if seqno != expected {
            return Err(ChainError::WrongSeqno {
                expected,
                got: seqno,
            });
        }
        if link.outer.prev != Some(state.last_link_id) {
            return Err(ChainError::BrokenLinkage { seqno });
        }

        let Some(inner) = link.full() else {
            return Self::apply_stub(state, link, hints);
        };

        trace!(team_id = %state.id, seqno = %seqno, link_type = ?link.outer.link_type, "applying link");

        let mut ops = Vec::new();

        match &inner.body {
            LinkBody::RootTeam { .. } | LinkBody::SubteamHead { .. } => {
                return Err(ChainError::DuplicateHead(seqno));
            }
            LinkBody::ChangeMembership { changes } => {
                apply_membership(state, changes, seqno)?;
            }
            LinkBody::RotateKey { per_team_key } => {
                let expected_generation = state
                    .latest_generation()
                    .map_or(Generation::FIRST, |generation| generation.next());
                if per_team_key.generation != expected_generation {
                    return Err(ChainError::WrongGeneration {
                        expected: expected_generation,
                        got: per_team_key.generation,
                    });
                }
                state.per_team_key_log.push(PerTeamKey {
                    generation: per_team_key.generation,
                    seqno,
                    signing_kid: per_team_key.signing_kid,
                    encryption_kid: per_team_key.encryption_kid,
                });
            }
            LinkBody::NewSubteam { subteam } => {
                check_subteam_pointer(state, &subteam.id, &subteam.name)?;
                record_subteam_point(state, subteam.id, seqno, Some(subteam.name.clone()));
                ops.push(ParentChildOp {
                    kind: ParentChildKind::Create,
                    parent: state.id,
                    child: subteam.id,
                    parent_seqno: seqno,
                    child_seqno: Seqno::new(1),
                    name: subteam.name.clone(),
                });
            }
            LinkBody::RenameSubteam { subteam } => {
                check_subteam_pointer(state, &subteam.id, &subteam.name)?;
                record_subteam_point(state, subteam.id, seqno, Some(subteam.name.clone()));
                ops.push(ParentChildOp {
                    kind: ParentChildKind::Rename,
                    parent: state.id,
                    child: subteam.id,
                    parent_seqno: seqno,
                    child_seqno: Seqno::ZERO,
                    name: subteam.name.clone(),
                });
            }
            LinkBody::DeleteSubteam { subteam } => {
                if !subteam.id.is_sub_team() {
                    return Err(ChainError::NotASubteamId(subteam.id));
                }
                record_subteam_point(state, subteam.id, seqno, None);
                ops.push(ParentChildOp {
                    kind: ParentChildKind::Delete,
                    parent: state.id,
                    child: subteam.id,
                    parent_seqno: seqno,
                    child_seqno: Seqno::ZERO,
                    name: subteam.name.clone(),
                });
            }
            LinkBody::InviteAdd { invite_id, role } => {
                let _replaced = state.active_invites.insert(*invite_id, *role);
            }
            LinkBody::InviteCancel { invite_id } => {
                // Idempotent: the matching InviteAdd may have been
                // stubbed out of this caller's view.
                let _removed = state.active_invites.remove(invite_id);
            }
            LinkBody::FilesystemSettings { write_disabled } => {
                state.fs_settings = Some(FsSettings {
                    seqno,
                    write_disabled: *write_disabled,
                });
            }
        }

        state.last_seqno = seqno;
        state.last_link_id = link.link_id;
        state.link_ids.push(link.link_id);

        Ok(ops)
    }

    fn apply_stub(
        state: &mut TeamChainState,
        link: &ChainLink,
        hints: &LoadHints,
    ) -> Result<Vec<ParentChildOp>, ChainError> {
        let seqno = link.seqno();

        if hints.need_admin || hints.need_seqnos.contains(&seqno) {
            return Err(ChainError::StubNotAllowed(seqno));
        }
        if !link.outer.link_type.may_be_stubbed() {
            return Err(ChainError::StubbedCriticalLink {
                seqno,
                link_type: link.outer.link_type,
            });
        }

        trace!(team_id = %state.id, seqno = %seqno, link_type = ?link.outer.link_type, "recording stub");

        let _previous = state.stubbed.insert(
            seqno,
            StubRecord {
                link_type: link.outer.link_type,
                inner_hash: link.outer.inner_hash,
                outer_raw: link.outer_raw.to_vec(),
                sig: link.sig,
            },
        );

        state.last_seqno = seqno;
        state.last_link_id = link.link_id;
        state.link_ids.push(link.link_id);

        Ok(Vec::new())
    }

    /// Back-fill a previously stubbed seqno with its inner payload.
    ///
    /// The payload must hash to the commitment recorded when the stub
    /// was applied; the revealed signature and signer permissions are
    /// checked at the link's historical position. Only effects that are
    /// order-insensitive can come back this way, which is exactly why
    /// membership and key links may never be stubbed.
    pub fn inflate_link(
        state: &mut TeamChainState,
        seqno: Seqno,
        inner_bytes: &[u8],
        proofs: &mut ProofSet,
    ) -> Result<Vec<ParentChildOp>, ChainError> {
        let Some(stub) = state.stubbed.get(&seqno) else {
            return Err(ChainError::UnknownStub(seqno));
        };

        let stubbed_link = codec::decode_link(&crate::wire::RawLink {
            outer: stub.outer_raw.clone(),
            sig: stub.sig,
            inner: None,
        })?;
        let link = codec::fill_stub(&stubbed_link, inner_bytes)?;
        let inner = link
            .full()
            .expect("fill_stub always produces a full link");

        verify_signature(&link, inner)?;

        let signer_role = state.role_at(&inner.signer, seqno.prev());
        check_permission(state, &inner.body, inner.signer, signer_role, seqno)?;

        proofs.add_key_live(inner.signer, inner.signing_kid, inner.merkle_seqno);
        proofs.add_unrevoked(inner.signer.uid, inner.merkle_seqno);

        let mut ops = Vec::new();

        match &inner.body {
            LinkBody::NewSubteam { subteam } => {
                check_subteam_pointer(state, &subteam.id, &subteam.name)?;
                record_subteam_point(state, subteam.id, seqno, Some(subteam.name.clone()));
                ops.push(ParentChildOp {
                    kind: ParentChildKind::Create,
                    parent: state.id,
                    child: subteam.id,
                    parent_seqno: seqno,
                    child_seqno: Seqno::new(1),
                    name: subteam.name.clone(),
                });
            }
            LinkBody::RenameSubteam { subteam } => {
                check_subteam_pointer(state, &subteam.id, &subteam.name)?;
                record_subteam_point(state, subteam.id, seqno, Some(subteam.name.clone()));
                ops.push(ParentChildOp {
                    kind: ParentChildKind::Rename,
                    parent: state.id,
                    child: subteam.id,
                    parent_seqno: seqno,
                    child_seqno: Seqno::ZERO,
                    name: subteam.name.clone(),
                });
            }
            LinkBody::DeleteSubteam { subteam } => {
                record_subteam_point(state, subteam.id, seqno, None);
                ops.push(ParentChildOp {
                    kind: ParentChildKind::Delete,
                    parent: state.id,
                    child: subteam.id,
                    parent_seqno: seqno,
                    child_seqno: Seqno::ZERO,
                    name: subteam.name.clone(),
                });
            }
            LinkBody::InviteAdd { invite_id, role } => {
                let _replaced = state.active_invites.insert(*invite_id, *role);
            }
            LinkBody::InviteCancel { invite_id } => {
                let _removed = state.active_invites.remove(invite_id);
            }
            LinkBody::FilesystemSettings { write_disabled } => {
                if state
                    .fs_settings
                    .map_or(true, |current| current.seqno < seqno)
                {
                    state.fs_settings = Some(FsSettings {
                        seqno,
                        write_disabled: *write_disabled,
                    });
                }
            }
            // may_be_stubbed() rules these out; the stub record's type
            // was checked when the stub was applied and fill_stub
            // re-checks it against the revealed body.
            LinkBody::RootTeam { .. }
            | LinkBody::SubteamHead { .. }
            | LinkBody::ChangeMembership { .. }
            | LinkBody::RotateKey { .. } => {
                return Err(ChainError::StubbedCriticalLink {
                    seqno,
                    link_type: inner.body.link_type(),
                });
            }
        }

        let _removed = state.stubbed.remove(&seqno);

        Ok(ops)
    }
}

fn verify_signature(link: &ChainLink, inner: &InnerLink) -> Result<(), ChainError> {
    let verifying_key = VerifyingKey::from_bytes(inner.signing_kid.as_bytes())
        .map_err(|_| ChainError::BadSignature(link.seqno()))?;
    let signature = Signature::from_bytes(&link.sig);

    verifying_key
        .verify(&link.outer_raw, &signature)
        .map_err(|_| ChainError::BadSignature(link.seqno()))
}

/// The role the signer must have held immediately before the link.
/// Head links have no precondition (the signer becomes the first
/// owner); owner-touching membership changes additionally require the
/// signer to be an owner.
fn check_permission(
    state: &TeamChainState,
    body: &LinkBody,
    signer: UserVersion,
    signer_role: Role,
    seqno: Seqno,
) -> Result<(), ChainError> {
    let denied = || ChainError::PermissionDenied { seqno, signer };

    match body {
        LinkBody::RootTeam { .. } | LinkBody::SubteamHead { .. } => Ok(()),
        LinkBody::ChangeMembership { changes } => {
            if !signer_role.is_admin_or_above() {
                return Err(denied());
            }
            let touches_owner = changes.iter().any(|(user, role)| {
                role.is_owner() || state.current_role(user).is_owner()
            });
            if touches_owner && !signer_role.is_owner() {
                return Err(denied());
            }
            Ok(())
        }
        LinkBody::NewSubteam { .. }
        | LinkBody::RenameSubteam { .. }
        | LinkBody::DeleteSubteam { .. }
        | LinkBody::InviteCancel { .. } => {
            if signer_role.is_admin_or_above() {
                Ok(())
            } else {
                Err(denied())
            }
        }
        LinkBody::InviteAdd { role, .. } => {
            if !signer_role.is_admin_or_above() || role.is_owner() {
                return Err(denied());
            }
            Ok(())
        }
        LinkBody::RotateKey { .. } | LinkBody::FilesystemSettings { .. } => {
            if signer_role >= Role::Writer {
                Ok(())
            } else {
                Err(denied())
            }
        }
    }
}

fn apply_membership(
    state: &mut TeamChainState,
    changes: &[(UserVersion, Role)],
    seqno: Seqno,
) -> Result<(), ChainError> {
    let mut touched: BTreeSet<UserVersion> = BTreeSet::new();
    for (user, _) in changes {
        if !touched.insert(*user) {
            return Err(ChainError::DuplicateMember {
                seqno,
                user: *user,
            });
        }
    }

    // The team must keep at least one owner through every link.
    let mut owners: BTreeSet<UserVersion> = state
        .user_log
        .keys()
        .filter(|user| state.current_role(user).is_owner())
        .copied()
        .collect();
    for (user, role) in changes {
        if role.is_owner() {
            let _inserted = owners.insert(*user);
        } else {
            let _removed = owners.remove(user);
        }
    }
    if owners.is_empty() {
        return Err(ChainError::LastOwner(seqno));
    }

    for (user, role) in changes {
        state
            .user_log
            .entry(*user)
            .or_default()
            .push(RolePoint {
                seqno,
                role: *role,
            });
    }

    Ok(())
}

fn check_subteam_pointer(
    state: &TeamChainState,
    id: &TeamId,
    name: &TeamName,
) -> Result<(), ChainError> {
    if !id.is_sub_team() {
        return Err(ChainError::NotASubteamId(*id));
    }
    if name.parent().as_ref() != Some(&state.name) {
        return Err(ChainError::BadSubteamName);
    }
    Ok(())
}

/// Subteam points stay sorted by seqno so back-filled history lands in
/// the right place.
fn record_subteam_point(
    state: &mut TeamChainState,
    id: TeamId,
    seqno: Seqno,
    name: Option<TeamName>,
) {
    let points = state.subteam_log.entry(id).or_default();
    let position = points.partition_point(|point| point.seqno < seqno);
    points.insert(position, SubteamPoint { seqno, name });
}
