use core::fmt;
use core::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Hash;
use crate::identity::PublicKey;

/// Identity of a link within a chain: the hash of its outer payload.
pub type LinkId = Hash;

/// Suffix byte marking a root team id.
pub const ROOT_TEAM_SUFFIX: u8 = 0x24;

/// Suffix byte marking a subteam id.
pub const SUBTEAM_SUFFIX: u8 = 0x25;

const TEAM_ID_DERIVATION_PREFIX: &[u8] = b"team-id-v1";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("team id suffix {0:#04x} is neither root nor subteam")]
    BadTeamSuffix(u8),

    #[error("team name is empty")]
    EmptyName,

    #[error("bad team name part: {0:?}")]
    BadNamePart(String),
}

/// Opaque 16-byte team identifier. The final byte distinguishes root
/// teams from subteams; everything else is opaque. Equality is byte
/// equality.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct TeamId([u8; 16]);

impl TeamId {
    pub fn from_bytes(bytes: [u8; 16]) -> Result<Self, IdentityError> {
        match bytes[15] {
            ROOT_TEAM_SUFFIX | SUBTEAM_SUFFIX => Ok(Self(bytes)),
            other => Err(IdentityError::BadTeamSuffix(other)),
        }
    }

    /// Derive the id of a root team from its canonical name. Root ids are
    /// a pure function of the name, so clients never ask a server for
    /// them.
    pub fn for_root_name(name: &TeamName) -> Self {
        debug_assert!(name.is_root(), "subteam ids cannot be derived locally");

        let digest = Hash::sha256_parts(&[TEAM_ID_DERIVATION_PREFIX, name.as_str().as_bytes()]);
        let mut bytes = [0_u8; 16];
        bytes[..15].copy_from_slice(&digest.as_bytes()[..15]);
        bytes[15] = ROOT_TEAM_SUFFIX;
        Self(bytes)
    }

    pub const fn is_root_team(&self) -> bool {
        self.0[15] == ROOT_TEAM_SUFFIX
    }

    pub const fn is_sub_team(&self) -> bool {
        self.0[15] == SUBTEAM_SUFFIX
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TeamId({self})")
    }
}

/// 1-based link index within one team's chain. `Seqno::ZERO` means
/// "before any links".
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Seqno(u64);

impl Seqno {
    pub const ZERO: Seqno = Seqno(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seqno({})", self.0)
    }
}

/// 1-based per-team-key generation, bumped by every key rotation.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Generation(u32);

impl Generation {
    pub const FIRST: Generation = Generation(1);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generation({})", self.0)
    }
}

/// Membership role, ordered by privilege.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub enum Role {
    #[default]
    None,
    Reader,
    Writer,
    Admin,
    Owner,
}

impl Role {
    pub fn is_admin_or_above(&self) -> bool {
        *self >= Role::Admin
    }

    pub fn is_owner(&self) -> bool {
        *self == Role::Owner
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::None => "none",
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Admin => "admin",
            Role::Owner => "owner",
        };
        f.pad(name)
    }
}

/// Key application domains that reader key masks are scoped to.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub enum TeamApplication {
    Files,
    Chat,
    Git,
}

impl TeamApplication {
    pub const fn label(&self) -> &'static str {
        match self {
            TeamApplication::Files => "files",
            TeamApplication::Chat => "chat",
            TeamApplication::Git => "git",
        }
    }
}

/// One entry of the per-team key log: the public halves of the team
/// keypair at a generation, and the chain seqno that installed it.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct PerTeamKey {
    pub generation: Generation,
    pub seqno: Seqno,
    pub signing_kid: PublicKey,
    pub encryption_kid: PublicKey,
}

/// A dot-separated team name in canonical form.
///
/// Canonical means ASCII lowercase with every part matching
/// `[a-z0-9_]{2,16}`; parsing rejects anything else, so two equal names
/// are always byte-equal. A root team has a single part; each further
/// part names a subteam of the part before it.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub struct TeamName {
    raw: String,
}

fn valid_name_part(part: &str) -> bool {
    (2..=16).contains(&part.len())
        && part
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

impl TeamName {
    pub fn root_part(&self) -> &str {
        self.raw.split('.').next().unwrap_or(&self.raw)
    }

    pub fn is_root(&self) -> bool {
        !self.raw.contains('.')
    }

    /// Number of dot-separated parts; a root name has depth 1.
    pub fn depth(&self) -> usize {
        self.raw.split('.').count()
    }

    /// The name one level up, or `None` for a root name.
    pub fn parent(&self) -> Option<TeamName> {
        let (parent, _) = self.raw.rsplit_once('.')?;
        Some(TeamName {
            raw: parent.to_owned(),
        })
    }

    /// Extend this name by one subteam part.
    pub fn append(&self, part: &str) -> Result<TeamName, IdentityError> {
        if !valid_name_part(part) {
            return Err(IdentityError::BadNamePart(part.to_owned()));
        }
        Ok(TeamName {
            raw: format!("{}.{part}", self.raw),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for TeamName {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdentityError::EmptyName);
        }
        for part in s.split('.') {
            if !valid_name_part(part) {
                return Err(IdentityError::BadNamePart(part.to_owned()));
            }
        }
        Ok(TeamName { raw: s.to_owned() })
    }
}

impl fmt::Display for TeamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.raw)
    }
}

impl fmt::Debug for TeamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TeamName({})", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_id_derivation_is_stable() {
        let name: TeamName = "alpha".parse().expect("valid name");
        let id = TeamId::for_root_name(&name);

        assert_eq!(id, TeamId::for_root_name(&name));
        assert!(id.is_root_team());
        assert!(!id.is_sub_team());
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let alpha = TeamId::for_root_name(&"alpha".parse().expect("valid"));
        let bravo = TeamId::for_root_name(&"bravo".parse().expect("valid"));
        assert_ne!(alpha, bravo);
    }

    #[test]
    fn id_suffix_is_validated() {
        let mut bytes = [0_u8; 16];
        bytes[15] = SUBTEAM_SUFFIX;
        assert!(TeamId::from_bytes(bytes).expect("valid subteam id").is_sub_team());

        bytes[15] = 0x7f;
        assert!(matches!(
            TeamId::from_bytes(bytes),
            Err(IdentityError::BadTeamSuffix(0x7f)),
        ));
    }

    #[test]
    fn name_parsing_round_trips() {
        for raw in ["alpha", "alpha.bravo", "alpha.bravo.charlie_3"] {
            let name: TeamName = raw.parse().expect("valid name");
            assert_eq!(name.as_str(), raw);
            assert_eq!(name.to_string().parse::<TeamName>().expect("round trip"), name);
        }
    }

    #[test]
    fn name_parsing_rejects_non_canonical() {
        for raw in ["", "Alpha", "a", "alpha..bravo", "alpha.", "al pha", "émile"] {
            assert!(raw.parse::<TeamName>().is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn name_parent_and_append() {
        let name: TeamName = "alpha.bravo".parse().expect("valid name");
        assert!(!name.is_root());
        assert_eq!(name.depth(), 2);
        assert_eq!(name.parent().expect("has parent").as_str(), "alpha");
        assert_eq!(
            name.append("charlie").expect("valid part").as_str(),
            "alpha.bravo.charlie",
        );
        assert!(name.append("UPPER").is_err());
    }

    #[test]
    fn roles_order_by_privilege() {
        assert!(Role::None < Role::Reader);
        assert!(Role::Reader < Role::Writer);
        assert!(Role::Writer < Role::Admin);
        assert!(Role::Admin < Role::Owner);
        assert!(Role::Admin.is_admin_or_above());
        assert!(Role::Owner.is_admin_or_above());
        assert!(!Role::Writer.is_admin_or_above());
    }
}
