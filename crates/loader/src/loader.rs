//! The loader orchestration: cache, repoll, fetch, replay, discharge,
//! persist, return-check.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use teamchain_chain::codec;
use teamchain_chain::{
    ChainError, ChainPlayer, LoadHints, ParentChildKind, ParentChildOp, ParentPointer, PrevSeed,
    ProofSet, TeamSnapshot, TeamUpdate,
};
use teamchain_crypto::{
    derive_per_team_keys, derive_reader_key_mask, open_prev_seed, open_sealed_seed, Seed,
};
use teamchain_primitives::team::{Generation, Seqno, TeamId, TeamName};
use teamchain_store::TeamStorage;
use tracing::{debug, info, warn};

use crate::arg::{Load2Arg, LoadArg};
use crate::ctx::Context;
use crate::env::{ActiveUser, Env};
use crate::error::{LoadError, MerkleError};
use crate::freshness::decide_repoll;
use crate::locktab::LockTable;

/// Deepest permitted team nesting (a root plus 32 subteam levels); the
/// parent/child recursion bails out past this.
const MAX_CHAIN_DEPTH: usize = 33;

/// Loader of verified team snapshots. One per logged-in user; shared by
/// every caller in the process. Thread-safe.
pub struct TeamLoader {
    env: Env,
    storage: Arc<TeamStorage>,
    active: ActiveUser,
    locktab: LockTable,
}

impl fmt::Debug for TeamLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamLoader")
            .field("active", &self.active.user_version)
            .finish_non_exhaustive()
    }
}

impl TeamLoader {
    pub fn new(env: Env, storage: Arc<TeamStorage>, active: ActiveUser) -> Self {
        Self {
            env,
            storage,
            active,
            locktab: LockTable::new(),
        }
    }

    /// Load a verified snapshot of a team.
    ///
    /// Resolves the name if no id was given, runs the cache-coherent
    /// load under the team's single-flight lock, and checks the
    /// identity constraints on the way out.
    pub async fn load(&self, ctx: &Context, arg: LoadArg) -> Result<TeamSnapshot, LoadError> {
        arg.check()?;

        let team_id = match arg.id {
            Some(id) => id,
            None => {
                let name = arg.name.as_ref().expect("check: name present when id absent");
                self.resolve_name_to_id(ctx, name).await?
            }
        };

        let mut visited = HashSet::new();
        let snapshot = self
            .load2(ctx, Load2Arg::from_load(team_id, &arg), &mut visited)
            .await?;

        if snapshot.chain.id != team_id {
            return Err(LoadError::FaultyServer(format!(
                "loaded chain is for team {}, expected {team_id}",
                snapshot.chain.id,
            )));
        }
        if let Some(name) = &arg.name {
            if snapshot.chain.name != *name {
                return Err(LoadError::WrongName {
                    expected: name.clone(),
                    got: snapshot.chain.name.clone(),
                });
            }
        }

        Ok(snapshot)
    }

    /// Called by the session layer at logout; purges the in-memory
    /// snapshot cache.
    pub fn on_logout(&self) {
        self.storage.on_logout();
    }

    /// Root team ids derive locally from the canonical name; subteam
    /// names go to the server, whose answer is untrusted (re-bound via
    /// Merkle plus the name check on the way out of `load`).
    async fn resolve_name_to_id(
        &self,
        ctx: &Context,
        name: &TeamName,
    ) -> Result<TeamId, LoadError> {
        if name.is_root() {
            return Ok(TeamId::for_root_name(name));
        }

        let team_id = ctx
            .run(self.env.server.resolve_subteam_name(name))
            .await?
            .map_err(|error| LoadError::Resolve(error.to_string()))?;

        if !team_id.is_sub_team() {
            return Err(LoadError::Resolve(format!(
                "server resolved {name} to non-subteam id {team_id}",
            )));
        }

        Ok(team_id)
    }

    /// The recursive body behind `load`. `visited` carries the ancestor
    /// path of the parent/child recursion for cycle detection.
    fn load2<'a>(
        &'a self,
        ctx: &'a Context,
        arg: Load2Arg,
        visited: &'a mut HashSet<TeamId>,
    ) -> BoxFuture<'a, Result<TeamSnapshot, LoadError>> {
        Box::pin(async move {
            let team_id = arg.team_id;
            if visited.contains(&team_id) || visited.len() >= MAX_CHAIN_DEPTH {
                return Err(LoadError::Chain(ChainError::LinkageCycle(team_id)));
            }
            let _inserted = visited.insert(team_id);

            let result = self.load2_locked(ctx, arg, visited).await;

            let _removed = visited.remove(&team_id);
            result
        })
    }

    async fn load2_locked(
        &self,
        ctx: &Context,
        arg: Load2Arg,
        visited: &mut HashSet<TeamId>,
    ) -> Result<TeamSnapshot, LoadError> {
        let team_id = arg.team_id;

        // Single-flight: concurrent loads of this team queue here, and
        // each awakened caller re-reads the cache below, so the common
        // case is that followers return the winner's snapshot without
        // any further RPC.
        let _lock = self.locktab.acquire(ctx, &team_id.to_string()).await?;

        let user = self.active.storage_user();
        let mut cache = if arg.force_full_reload {
            None
        } else {
            self.storage.get(&user, &team_id)
        };

        let decision = decide_repoll(
            &arg,
            cache.as_ref(),
            &self.active.user_version,
            self.env.clock.now_ms(),
            self.env.freshness_horizon,
        );
        if decision.discard_cache {
            cache = None;
        }
        debug!(
            team_id = %team_id,
            repoll = decision.repoll,
            discard_cache = decision.discard_cache,
            cached = cache.is_some(),
            "repoll decision"
        );

        let leaf = if decision.repoll {
            let leaf = ctx.run(self.env.merkle.lookup_team(&team_id)).await??;
            if leaf.team_id != team_id {
                return Err(MerkleError::WrongLeaf {
                    expected: team_id,
                    got: leaf.team_id,
                }
                .into());
            }
            Some(leaf)
        } else {
            None
        };

        let mut snapshot = cache;
        let mut proofs = ProofSet::new();
        let mut ops: Vec<ParentChildOp> = Vec::new();
        let hints = LoadHints {
            need_admin: arg.need_admin,
            need_seqnos: arg.need_seqnos.clone(),
        };
        let mut revalidated = decision.repoll;

        // Back-fill stubbed links the caller needs from the cached
        // snapshot, validating against the recorded commitments.
        if let Some(snap) = snapshot.as_mut() {
            let wanted: Vec<Seqno> = arg
                .need_seqnos
                .iter()
                .copied()
                .filter(|seqno| snap.chain.stubbed.contains_key(seqno))
                .collect();
            if !wanted.is_empty() {
                debug!(team_id = %team_id, stubs = wanted.len(), "filling stubbed links");
                let fills = ctx
                    .run(self.env.server.fill_stubs(&team_id, &wanted))
                    .await??;
                for seqno in &wanted {
                    let fill = fills
                        .iter()
                        .find(|fill| fill.seqno == *seqno)
                        .ok_or_else(|| {
                            LoadError::FaultyServer(format!("stub fill missing seqno {seqno}"))
                        })?;
                    ops.extend(ChainPlayer::inflate_link(
                        &mut snap.chain,
                        *seqno,
                        &fill.inner,
                        &mut proofs,
                    )?);
                }
                revalidated = true;
            }
        }

        // Fetch and replay links above the cached tail.
        let low = snapshot
            .as_ref()
            .map_or(Seqno::ZERO, |snap| snap.chain.last_seqno);
        let needs_links = match (&snapshot, &leaf) {
            (None, _) => true,
            (Some(snap), Some(leaf)) => snap.chain.last_seqno < leaf.seqno,
            (Some(_), None) => false,
        };

        let mut update: Option<TeamUpdate> = None;
        if needs_links {
            let fetched = ctx
                .run(self.env.server.fetch_new_links(&team_id, low))
                .await??;
            info!(team_id = %team_id, low = %low, links = fetched.links.len(), "replaying new links");

            let mut state = snapshot.as_ref().map(|snap| snap.chain.clone());
            let mut expected = low.next();
            for raw in &fetched.links {
                let link = codec::decode_link(raw).map_err(ChainError::from)?;
                if link.seqno() != expected {
                    return Err(LoadError::FaultyServer(format!(
                        "expected link {expected}, server sent {}",
                        link.seqno(),
                    )));
                }

                ChainPlayer::verify_link(state.as_ref(), &link, &mut proofs)?;
                match state.as_mut() {
                    None => {
                        let (head, head_ops) = ChainPlayer::apply_head(team_id, &link, &hints)?;
                        ops.extend(head_ops);
                        state = Some(head);
                    }
                    Some(state) => ops.extend(ChainPlayer::apply_link(state, &link, &hints)?),
                }
                expected = expected.next();
            }

            let state = state.ok_or_else(|| {
                LoadError::FaultyServer("server returned no links for the team".to_owned())
            })?;
            snapshot = Some(match snapshot.take() {
                Some(mut snap) => {
                    snap.chain = state;
                    snap
                }
                None => TeamSnapshot::new(state),
            });
            update = Some(fetched);
            revalidated = true;
        }

        let mut snapshot = snapshot
            .ok_or_else(|| LoadError::FaultyServer("no cached or fetched chain".to_owned()))?;

        // Bind the replayed tail to the Merkle leaf. Nothing below this
        // point may run on a chain that Merkle does not vouch for.
        if let Some(leaf) = &leaf {
            if snapshot.chain.last_seqno != leaf.seqno || snapshot.chain.last_link_id != leaf.link_id
            {
                warn!(team_id = %team_id, "replayed tail does not match merkle leaf");
                return Err(LoadError::MerkleMismatch {
                    expected: leaf.link_id,
                    got: snapshot.chain.last_link_id,
                });
            }
        }

        // Cross-check the recorded parent/child operations against the
        // counterpart chains, recursively.
        for op in &ops {
            self.check_parent_child(ctx, op, visited).await?;
        }

        // Discharge the deferred user-key obligations in one batch.
        ctx.run(proofs.discharge(self.env.users.as_ref())).await??;

        // Recover whatever key material the server delivered for us.
        if let Some(update) = &update {
            self.absorb_secrets(&mut snapshot, update)?;
        }

        // Storage.Put is the linearisation point: cancellation past
        // here does not roll the cached snapshot back.
        if revalidated {
            snapshot.cached_at_ms = self.env.clock.now_ms();
            self.storage.put(&user, &snapshot);
        }

        // Return checks, deliberately after the cache write: the chain
        // is valid even when the caller asked for more than it grants.
        if arg.need_admin {
            let role = snapshot.chain.current_role(&self.active.user_version);
            if !role.is_admin_or_above() || snapshot.chain.has_stubbed_links() {
                return Err(LoadError::NotAdmin);
            }
        }
        if let Some(need) = arg.need_key_generation {
            let have = snapshot
                .chain
                .latest_generation()
                .map_or(0, |generation| generation.as_u32());
            if have < need.as_u32() {
                return Err(LoadError::KeyGenTooLow {
                    have,
                    need: need.as_u32(),
                });
            }
        }

        Ok(snapshot)
    }

    /// Verify one recorded parent/child operation by loading the
    /// counterpart team and checking the mirrored fact.
    async fn check_parent_child(
        &self,
        ctx: &Context,
        op: &ParentChildOp,
        visited: &mut HashSet<TeamId>,
    ) -> Result<(), LoadError> {
        let counterpart = match op.kind {
            ParentChildKind::Head => op.parent,
            ParentChildKind::Create | ParentChildKind::Rename | ParentChildKind::Delete => op.child,
        };

        if visited.contains(&counterpart) {
            // An ancestor of this load; the pairing was checked on the
            // way down.
            return Ok(());
        }

        debug!(parent = %op.parent, child = %op.child, kind = ?op.kind, "checking parent/child pair");

        let need_seqnos = match op.kind {
            // The parent's subteam link must be visible in full to
            // compare names.
            ParentChildKind::Head => BTreeSet::from([op.parent_seqno]),
            _ => BTreeSet::new(),
        };
        let counterpart_snapshot = self
            .load2(ctx, Load2Arg::for_counterpart(counterpart, need_seqnos), visited)
            .await?;

        let mismatch = || LoadError::ParentChildMismatch {
            parent: op.parent,
            child: op.child,
            seqno: op.parent_seqno,
        };

        match op.kind {
            ParentChildKind::Head => {
                let point = counterpart_snapshot
                    .chain
                    .subteam_point_at(&op.child, op.parent_seqno)
                    .ok_or_else(mismatch)?;
                if point.name.as_ref() != Some(&op.name) {
                    return Err(mismatch());
                }
            }
            ParentChildKind::Create => {
                let expected = ParentPointer {
                    id: op.parent,
                    seqno: op.parent_seqno,
                };
                if counterpart_snapshot.chain.parent != Some(expected) {
                    return Err(mismatch());
                }
            }
            ParentChildKind::Rename | ParentChildKind::Delete => {
                if counterpart_snapshot.chain.parent_id() != Some(op.parent) {
                    return Err(mismatch());
                }
            }
        }

        Ok(())
    }

    /// Unbox the delivered team key material. Every accepted seed must
    /// re-derive the encryption kid logged in the chain; masks are only
    /// trusted where they agree with a seed we hold.
    fn absorb_secrets(
        &self,
        snapshot: &mut TeamSnapshot,
        update: &TeamUpdate,
    ) -> Result<(), LoadError> {
        let Some(key_box) = &update.key_box else {
            return Ok(());
        };

        let seed = open_sealed_seed(
            &self.active.per_user_key,
            &key_box.sender_kid,
            key_box.nonce,
            &key_box.ciphertext,
        )
        .map_err(|error| LoadError::BadBox(format!("team key box did not open: {error}")))?;
        accept_seed(snapshot, key_box.generation, seed)?;

        // Walk the prev chain downward from the boxed generation.
        let mut prevs: Vec<&PrevSeed> = update.prevs.iter().collect();
        prevs.sort_by_key(|prev| std::cmp::Reverse(prev.generation));
        for prev in prevs {
            let Some(newer) = snapshot
                .per_team_key_seeds
                .get(&prev.generation.next())
                .copied()
            else {
                warn!(generation = %prev.generation, "prev seed does not connect to a held generation");
                continue;
            };
            let seed = open_prev_seed(&newer, prev.nonce, &prev.ciphertext).map_err(|error| {
                LoadError::BadBox(format!(
                    "prev seed at generation {} did not open: {error}",
                    prev.generation,
                ))
            })?;
            accept_seed(snapshot, prev.generation, seed)?;
        }

        for entry in &update.reader_key_masks {
            let Some(seed) = snapshot.per_team_key_seeds.get(&entry.generation) else {
                continue;
            };
            if derive_reader_key_mask(seed, entry.application.label()) != entry.mask {
                warn!(
                    application = ?entry.application,
                    generation = %entry.generation,
                    "server mask disagrees with derived mask, ignoring"
                );
                continue;
            }
            let _previous = snapshot
                .reader_key_masks
                .entry(entry.application)
                .or_default()
                .insert(entry.generation, entry.mask);
        }

        Ok(())
    }
}

fn accept_seed(
    snapshot: &mut TeamSnapshot,
    generation: Generation,
    seed: Seed,
) -> Result<(), LoadError> {
    let Some(logged) = snapshot.chain.per_team_key(generation) else {
        return Err(LoadError::BadBox(format!(
            "seed delivered for unknown generation {generation}",
        )));
    };
    if derive_per_team_keys(&seed).encryption_kid() != logged.encryption_kid {
        return Err(LoadError::BadBox(format!(
            "seed at generation {generation} does not derive the logged encryption key",
        )));
    }
    let _previous = snapshot.per_team_key_seeds.insert(generation, seed);
    Ok(())
}
