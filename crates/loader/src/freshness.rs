//! Cache freshness classification and the repoll decision.
//!
//! `decide_repoll` is a pure function of the request, the cached
//! snapshot and the clock, so the whole decision table is unit-tested
//! without any transport in the picture.

use std::time::Duration;

use teamchain_chain::TeamSnapshot;
use teamchain_primitives::identity::UserVersion;
use tracing::debug;

use crate::arg::Load2Arg;

/// How stale a cached snapshot is relative to the freshness horizon.
/// Only `Rancid` forces a repoll (unless the caller passed `stale_ok`);
/// `Aged` snapshots are served as-is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Freshness {
    Fresh,
    Aged,
    Rancid,
}

pub fn classify(age: Duration, horizon: Duration) -> Freshness {
    if age < horizon / 2 {
        Freshness::Fresh
    } else if age < horizon {
        Freshness::Aged
    } else {
        Freshness::Rancid
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Repoll {
    /// Forget the cached snapshot entirely and rebuild from seqno 1.
    pub discard_cache: bool,
    /// Contact Merkle for the current chain tail.
    pub repoll: bool,
}

pub(crate) fn decide_repoll(
    arg: &Load2Arg,
    cache: Option<&TeamSnapshot>,
    me: &UserVersion,
    now_ms: u64,
    horizon: Duration,
) -> Repoll {
    let Some(cache) = cache else {
        return Repoll {
            discard_cache: false,
            repoll: true,
        };
    };

    // Admin rights may have arrived via links the server stubbed out of
    // the cached view (populated back when we were not an admin), so a
    // cache that cannot satisfy admin-without-stubs is worthless here.
    if arg.need_admin
        && (!cache.chain.current_role(me).is_admin_or_above() || cache.chain.has_stubbed_links())
    {
        return Repoll {
            discard_cache: true,
            repoll: true,
        };
    }

    let repoll = Repoll {
        discard_cache: false,
        repoll: true,
    };

    if arg.force_repoll {
        return repoll;
    }

    if let Some(need) = arg.need_key_generation {
        if cache.chain.latest_generation().map_or(true, |have| have < need) {
            return repoll;
        }
    }

    if arg
        .want_members
        .iter()
        .any(|member| cache.chain.current_role(member) == teamchain_primitives::team::Role::None)
    {
        return repoll;
    }

    if let Some(highest) = arg.need_seqnos.iter().next_back() {
        if cache.chain.last_seqno < *highest {
            return repoll;
        }
    }

    let age = Duration::from_millis(now_ms.saturating_sub(cache.cached_at_ms));
    let freshness = classify(age, horizon);
    if freshness == Freshness::Rancid && !arg.stale_ok {
        return repoll;
    }
    if freshness == Freshness::Aged {
        debug!(team_id = %arg.team_id, age_ms = age.as_millis() as u64, "serving aged snapshot");
    }

    Repoll::default()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use teamchain_chain::codec::decode_link;
    use teamchain_chain::testing::{ChainBuilder, TestUser};
    use teamchain_chain::{ChainPlayer, LoadHints, TeamSnapshot};
    use teamchain_primitives::team::{Generation, Role, Seqno};

    use super::*;

    const HORIZON: Duration = Duration::from_secs(600);

    fn cached_snapshot(builder: &ChainBuilder, cached_at_ms: u64) -> TeamSnapshot {
        let hints = LoadHints::default();
        let mut state = None;
        for seqno in 1..=builder.last_seqno().as_u64() {
            let link = decode_link(&builder.raw_link_at(Seqno::new(seqno))).expect("decodes");
            match state.as_mut() {
                None => {
                    state = Some(
                        ChainPlayer::apply_head(builder.id(), &link, &hints)
                            .expect("head applies")
                            .0,
                    );
                }
                Some(state) => {
                    let _ops =
                        ChainPlayer::apply_link(state, &link, &hints).expect("link applies");
                }
            }
        }

        let mut snapshot = TeamSnapshot::new(state.expect("chain is non-empty"));
        snapshot.cached_at_ms = cached_at_ms;
        snapshot
    }

    fn plain_arg(builder: &ChainBuilder) -> Load2Arg {
        Load2Arg::for_counterpart(builder.id(), BTreeSet::new())
    }

    #[test]
    fn classify_splits_the_horizon() {
        assert_eq!(classify(Duration::from_secs(0), HORIZON), Freshness::Fresh);
        assert_eq!(
            classify(Duration::from_secs(299), HORIZON),
            Freshness::Fresh,
        );
        assert_eq!(classify(Duration::from_secs(300), HORIZON), Freshness::Aged);
        assert_eq!(classify(Duration::from_secs(599), HORIZON), Freshness::Aged);
        assert_eq!(
            classify(Duration::from_secs(600), HORIZON),
            Freshness::Rancid,
        );
    }

    #[test]
    fn absent_cache_repolls() {
        let owner = TestUser::new(1);
        let builder = ChainBuilder::root("alpha", &owner);
        let arg = plain_arg(&builder);

        let decision = decide_repoll(&arg, None, &owner.user_version, 0, HORIZON);
        assert!(decision.repoll);
        assert!(!decision.discard_cache);
    }

    #[test]
    fn fresh_cache_is_served() {
        let owner = TestUser::new(1);
        let builder = ChainBuilder::root("alpha", &owner);
        let snapshot = cached_snapshot(&builder, 1_000);
        let arg = plain_arg(&builder);

        let decision = decide_repoll(&arg, Some(&snapshot), &owner.user_version, 2_000, HORIZON);
        assert_eq!(decision, Repoll::default());
    }

    #[test]
    fn rancid_cache_repolls_unless_stale_ok() {
        let owner = TestUser::new(1);
        let builder = ChainBuilder::root("alpha", &owner);
        let snapshot = cached_snapshot(&builder, 0);
        let now = HORIZON.as_millis() as u64 + 1;

        let arg = plain_arg(&builder);
        assert!(decide_repoll(&arg, Some(&snapshot), &owner.user_version, now, HORIZON).repoll);

        let mut stale_ok = plain_arg(&builder);
        stale_ok.stale_ok = true;
        assert!(
            !decide_repoll(&stale_ok, Some(&snapshot), &owner.user_version, now, HORIZON).repoll,
        );
    }

    #[test]
    fn aged_cache_is_still_served() {
        let owner = TestUser::new(1);
        let builder = ChainBuilder::root("alpha", &owner);
        let snapshot = cached_snapshot(&builder, 0);
        let now = (HORIZON.as_millis() / 2) as u64 + 1;

        let arg = plain_arg(&builder);
        assert!(!decide_repoll(&arg, Some(&snapshot), &owner.user_version, now, HORIZON).repoll);
    }

    #[test]
    fn force_repoll_overrides_freshness() {
        let owner = TestUser::new(1);
        let builder = ChainBuilder::root("alpha", &owner);
        let snapshot = cached_snapshot(&builder, 1_000);

        let mut arg = plain_arg(&builder);
        arg.force_repoll = true;
        let decision = decide_repoll(&arg, Some(&snapshot), &owner.user_version, 1_000, HORIZON);
        assert!(decision.repoll);
        assert!(!decision.discard_cache);
    }

    #[test]
    fn need_admin_discards_non_admin_cache() {
        let owner = TestUser::new(1);
        let reader = TestUser::new(2);
        let builder = ChainBuilder::root("alpha", &owner)
            .change_membership(&owner, &[(reader.user_version, Role::Reader)]);
        let snapshot = cached_snapshot(&builder, 1_000);

        let mut arg = plain_arg(&builder);
        arg.need_admin = true;
        let decision = decide_repoll(&arg, Some(&snapshot), &reader.user_version, 1_000, HORIZON);
        assert!(decision.repoll);
        assert!(decision.discard_cache);

        // An owner with a stub-free cache is satisfied.
        let decision = decide_repoll(&arg, Some(&snapshot), &owner.user_version, 1_000, HORIZON);
        assert_eq!(decision, Repoll::default());
    }

    #[test]
    fn missing_key_generation_repolls() {
        let owner = TestUser::new(1);
        let builder = ChainBuilder::root("alpha", &owner);
        let snapshot = cached_snapshot(&builder, 1_000);

        let mut arg = plain_arg(&builder);
        arg.need_key_generation = Some(Generation::new(2));
        assert!(decide_repoll(&arg, Some(&snapshot), &owner.user_version, 1_000, HORIZON).repoll);

        arg.need_key_generation = Some(Generation::FIRST);
        assert!(!decide_repoll(&arg, Some(&snapshot), &owner.user_version, 1_000, HORIZON).repoll);
    }

    #[test]
    fn unseen_wanted_member_repolls() {
        let owner = TestUser::new(1);
        let newcomer = TestUser::new(3);
        let builder = ChainBuilder::root("alpha", &owner);
        let snapshot = cached_snapshot(&builder, 1_000);

        let mut arg = plain_arg(&builder);
        arg.want_members = vec![newcomer.user_version];
        assert!(decide_repoll(&arg, Some(&snapshot), &owner.user_version, 1_000, HORIZON).repoll);

        arg.want_members = vec![owner.user_version];
        assert!(!decide_repoll(&arg, Some(&snapshot), &owner.user_version, 1_000, HORIZON).repoll);
    }

    #[test]
    fn needed_seqno_past_tail_repolls() {
        let owner = TestUser::new(1);
        let builder = ChainBuilder::root("alpha", &owner).rotate_key(&owner);
        let snapshot = cached_snapshot(&builder, 1_000);

        let mut arg = plain_arg(&builder);
        arg.need_seqnos = BTreeSet::from([Seqno::new(5)]);
        assert!(decide_repoll(&arg, Some(&snapshot), &owner.user_version, 1_000, HORIZON).repoll);

        arg.need_seqnos = BTreeSet::from([Seqno::new(2)]);
        assert!(!decide_repoll(&arg, Some(&snapshot), &owner.user_version, 1_000, HORIZON).repoll);
    }
}
