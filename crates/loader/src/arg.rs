//! Arguments to [`crate::loader::TeamLoader::load`].

use std::collections::BTreeSet;

use teamchain_primitives::identity::UserVersion;
use teamchain_primitives::team::{Generation, Seqno, TeamId, TeamName};

use crate::error::LoadError;

/// What to load and under which constraints. At least one of `id` and
/// `name` is required; everything else defaults to the cheapest load.
#[derive(Clone, Debug, Default)]
pub struct LoadArg {
    pub id: Option<TeamId>,
    pub name: Option<TeamName>,
    /// Caller requires admin rights and a view with no stubbed links.
    pub need_admin: bool,
    /// Minimum per-team-key generation the caller needs to see.
    pub need_key_generation: Option<Generation>,
    /// Members the caller hopes to observe. A soft hint: may trigger a
    /// repoll, never an error.
    pub want_members: Vec<UserVersion>,
    /// Seqnos the caller needs in un-stubbed form.
    pub need_seqnos: BTreeSet<Seqno>,
    /// Discard any cached snapshot before loading.
    pub force_full_reload: bool,
    /// Always contact Merkle, even for a fresh cache.
    pub force_repoll: bool,
    /// Accept a cached snapshot past the freshness horizon.
    pub stale_ok: bool,
}

impl LoadArg {
    pub fn by_id(id: TeamId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_name(name: TeamName) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    pub fn need_admin(mut self) -> Self {
        self.need_admin = true;
        self
    }

    pub fn force_repoll(mut self) -> Self {
        self.force_repoll = true;
        self
    }

    pub fn stale_ok(mut self) -> Self {
        self.stale_ok = true;
        self
    }

    pub(crate) fn check(&self) -> Result<(), LoadError> {
        if self.id.is_none() && self.name.is_none() {
            return Err(LoadError::BadArg("either id or name is required"));
        }
        if self
            .need_key_generation
            .is_some_and(|generation| generation.as_u32() == 0)
        {
            return Err(LoadError::BadArg("key generations are 1-based"));
        }
        Ok(())
    }
}

/// The internal, id-resolved form `load2` recurses with.
#[derive(Clone, Debug)]
pub(crate) struct Load2Arg {
    pub team_id: TeamId,
    pub need_admin: bool,
    pub need_key_generation: Option<Generation>,
    pub want_members: Vec<UserVersion>,
    pub need_seqnos: BTreeSet<Seqno>,
    pub force_full_reload: bool,
    pub force_repoll: bool,
    pub stale_ok: bool,
}

impl Load2Arg {
    pub fn from_load(team_id: TeamId, arg: &LoadArg) -> Self {
        Self {
            team_id,
            need_admin: arg.need_admin,
            need_key_generation: arg.need_key_generation,
            want_members: arg.want_members.clone(),
            need_seqnos: arg.need_seqnos.clone(),
            force_full_reload: arg.force_full_reload,
            force_repoll: arg.force_repoll,
            stale_ok: arg.stale_ok,
        }
    }

    /// A plain recursive load of a parent/child counterpart:
    /// no caller constraints beyond the seqnos the cross-check needs.
    pub fn for_counterpart(team_id: TeamId, need_seqnos: BTreeSet<Seqno>) -> Self {
        Self {
            team_id,
            need_admin: false,
            need_key_generation: None,
            want_members: Vec::new(),
            need_seqnos,
            force_full_reload: false,
            force_repoll: false,
            stale_ok: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_arg_with_neither_id_nor_name() {
        let result = LoadArg::default().check();
        assert!(matches!(result, Err(LoadError::BadArg(_))));
    }

    #[test]
    fn need_admin_alone_is_allowed() {
        let name: TeamName = "alpha".parse().expect("valid name");
        let arg = LoadArg::by_name(name).need_admin();
        assert!(arg.check().is_ok());
    }

    #[test]
    fn rejects_zero_key_generation() {
        let name: TeamName = "alpha".parse().expect("valid name");
        let mut arg = LoadArg::by_name(name);
        arg.need_key_generation = Some(Generation::new(0));
        assert!(matches!(arg.check(), Err(LoadError::BadArg(_))));
    }
}
