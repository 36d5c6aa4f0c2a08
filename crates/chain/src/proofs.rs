//! Deferred cryptographic obligations gathered during replay.
//!
//! Verifying that a signing key belonged to a user at a given Merkle
//! position requires that user's sigchain. Fetching it per link would
//! cost one round-trip per signature, so replay only *records* what must
//! hold and the whole set is discharged in one pass at the end, one
//! fetch per distinct user.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use teamchain_primitives::identity::{PublicKey, Uid, UserVersion};
use teamchain_primitives::team::Seqno;
use tracing::debug;

use crate::error::ProofError;

/// One deferred obligation. All seqnos are global Merkle seqnos.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ProofObligation {
    /// `kid` must have been bound to `user` (that uid at that key era)
    /// at the given Merkle position.
    KeyLiveAt {
        user: UserVersion,
        kid: PublicKey,
        merkle_seqno: Seqno,
    },
    /// `uid` must not have been reset before the given Merkle position.
    UnrevokedThrough { uid: Uid, merkle_seqno: Seqno },
}

/// Append-only, deduplicated collection of [`ProofObligation`]s.
#[derive(Debug, Default)]
pub struct ProofSet {
    obligations: Vec<ProofObligation>,
    seen: HashSet<ProofObligation>,
}

impl ProofSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key_live(&mut self, user: UserVersion, kid: PublicKey, merkle_seqno: Seqno) {
        self.add(ProofObligation::KeyLiveAt {
            user,
            kid,
            merkle_seqno,
        });
    }

    pub fn add_unrevoked(&mut self, uid: Uid, merkle_seqno: Seqno) {
        self.add(ProofObligation::UnrevokedThrough { uid, merkle_seqno });
    }

    fn add(&mut self, obligation: ProofObligation) {
        if self.seen.insert(obligation) {
            self.obligations.push(obligation);
        }
    }

    pub fn len(&self) -> usize {
        self.obligations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obligations.is_empty()
    }

    /// The users whose sigchains discharge needs, each fetched once.
    pub fn distinct_uids(&self) -> BTreeSet<Uid> {
        self.obligations
            .iter()
            .map(|obligation| match obligation {
                ProofObligation::KeyLiveAt { user, .. } => user.uid,
                ProofObligation::UnrevokedThrough { uid, .. } => *uid,
            })
            .collect()
    }

    /// Fetch each distinct user's key history once and evaluate every
    /// obligation against it, failing on the first unsatisfied one.
    /// The outcome is a pure function of the collected obligations and
    /// the fetched histories.
    pub async fn discharge(&self, source: &dyn UserChainSource) -> Result<(), ProofError> {
        if self.obligations.is_empty() {
            return Ok(());
        }

        let mut histories: BTreeMap<Uid, UserKeyHistory> = BTreeMap::new();
        for uid in self.distinct_uids() {
            let history = source.load_user_keys(uid).await?;
            let _ignored = histories.insert(uid, history);
        }

        debug!(
            obligations = self.obligations.len(),
            users = histories.len(),
            "discharging proof set"
        );

        for obligation in &self.obligations {
            match *obligation {
                ProofObligation::KeyLiveAt {
                    user,
                    kid,
                    merkle_seqno,
                } => {
                    let live = histories
                        .get(&user.uid)
                        .is_some_and(|history| history.key_live_at(&user, &kid, merkle_seqno));
                    if !live {
                        return Err(ProofError::KeyNotLive {
                            user,
                            kid,
                            merkle_seqno,
                        });
                    }
                }
                ProofObligation::UnrevokedThrough { uid, merkle_seqno } => {
                    if let Some(reset_at) = histories
                        .get(&uid)
                        .and_then(|history| history.reset_before(merkle_seqno))
                    {
                        return Err(ProofError::UserReset {
                            uid,
                            merkle_seqno,
                            reset_at,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// One key era of a user's sigchain: a kid, the key era it belongs to,
/// and the Merkle window in which it was live.
#[derive(Clone, Copy, Debug)]
pub struct UserKeyEra {
    pub kid: PublicKey,
    pub user_version: UserVersion,
    pub live_from: Seqno,
    pub revoked_at: Option<Seqno>,
}

/// A user's verified key history, as produced by the user-identity
/// loader (out of scope here; this is its contract).
#[derive(Clone, Debug)]
pub struct UserKeyHistory {
    pub uid: Uid,
    pub eras: Vec<UserKeyEra>,
    pub reset_at: Option<Seqno>,
}

impl UserKeyHistory {
    fn key_live_at(&self, user: &UserVersion, kid: &PublicKey, merkle_seqno: Seqno) -> bool {
        self.eras.iter().any(|era| {
            era.kid == *kid
                && era.user_version == *user
                && era.live_from <= merkle_seqno
                && era.revoked_at.map_or(true, |revoked| revoked > merkle_seqno)
        })
    }

    fn reset_before(&self, merkle_seqno: Seqno) -> Option<Seqno> {
        self.reset_at.filter(|reset| *reset < merkle_seqno)
    }
}

/// Source of verified user key histories. Implemented by the user-chain
/// loader in production and by fixtures in tests.
#[async_trait::async_trait]
pub trait UserChainSource: Send + Sync {
    async fn load_user_keys(&self, uid: Uid) -> Result<UserKeyHistory, ProofError>;
}
