//! Mock transports for loader integration tests: an in-process sigchain
//! server, Merkle tree and user-chain source, all backed by real signed
//! chains from the chain crate's `ChainBuilder`.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use teamchain_chain::testing::{ChainBuilder, TestUser};
use teamchain_chain::{ProofError, StubFill, TeamUpdate, UserChainSource, UserKeyHistory};
use teamchain_loader::{
    ActiveUser, Env, LoadError, ManualClock, MerkleClient, MerkleError, MerkleLeaf, TeamLoader,
    TeamServer, TransportError,
};
use teamchain_primitives::identity::Uid;
use teamchain_primitives::team::{Seqno, TeamId, TeamName};
use teamchain_store::{InMemoryDb, TeamStorage};

pub struct TeamFixture {
    pub builder: ChainBuilder,
    pub sender: TestUser,
    /// Seqnos served stubbed to this caller.
    pub stubs: BTreeSet<Seqno>,
    /// Overrides the honest Merkle answer, for mismatch scenarios.
    pub merkle_override: Option<MerkleLeaf>,
    pub serve_box: bool,
    pub tamper_box: bool,
}

#[derive(Default)]
pub struct Counters {
    pub fetch_links: AtomicUsize,
    pub fill_stubs: AtomicUsize,
    pub merkle_lookups: AtomicUsize,
    pub user_fetches: AtomicUsize,
}

/// The whole "network" a loader talks to, serving one caller.
pub struct MockNet {
    recipient: TestUser,
    teams: Mutex<HashMap<TeamId, TeamFixture>>,
    users: Mutex<HashMap<Uid, UserKeyHistory>>,
    pub counters: Counters,
    pub fetch_lows: Mutex<Vec<(TeamId, Seqno)>>,
}

impl MockNet {
    pub fn new(recipient: &TestUser) -> Arc<Self> {
        Arc::new(Self {
            recipient: *recipient,
            teams: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            fetch_lows: Mutex::new(Vec::new()),
        })
    }

    pub fn add_team(&self, builder: ChainBuilder, sender: &TestUser) {
        let _previous = self.teams.lock().insert(
            builder.id(),
            TeamFixture {
                builder,
                sender: *sender,
                stubs: BTreeSet::new(),
                merkle_override: None,
                serve_box: true,
                tamper_box: false,
            },
        );
    }

    pub fn add_user(&self, user: &TestUser) {
        let _previous = self.users.lock().insert(user.uid(), user.history());
    }

    pub fn set_stubs(&self, team_id: TeamId, stubs: BTreeSet<Seqno>) {
        self.teams
            .lock()
            .get_mut(&team_id)
            .expect("fixture exists")
            .stubs = stubs;
    }

    pub fn set_merkle_override(&self, team_id: TeamId, leaf: Option<MerkleLeaf>) {
        self.teams
            .lock()
            .get_mut(&team_id)
            .expect("fixture exists")
            .merkle_override = leaf;
    }

    pub fn set_serve_box(&self, team_id: TeamId, serve_box: bool) {
        self.teams
            .lock()
            .get_mut(&team_id)
            .expect("fixture exists")
            .serve_box = serve_box;
    }

    pub fn set_tamper_box(&self, team_id: TeamId, tamper_box: bool) {
        self.teams
            .lock()
            .get_mut(&team_id)
            .expect("fixture exists")
            .tamper_box = tamper_box;
    }

    /// Append links to a fixture's chain, as a publish on the server
    /// side would.
    pub fn extend_team(&self, team_id: TeamId, extend: impl FnOnce(ChainBuilder) -> ChainBuilder) {
        let mut teams = self.teams.lock();
        let mut fixture = teams.remove(&team_id).expect("fixture exists");
        fixture.builder = extend(fixture.builder);
        let _previous = teams.insert(team_id, fixture);
    }

    pub fn fetch_count(&self) -> usize {
        self.counters.fetch_links.load(Ordering::SeqCst)
    }

    pub fn fill_count(&self) -> usize {
        self.counters.fill_stubs.load(Ordering::SeqCst)
    }

    pub fn merkle_count(&self) -> usize {
        self.counters.merkle_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MerkleClient for MockNet {
    async fn lookup_team(&self, team_id: &TeamId) -> Result<MerkleLeaf, MerkleError> {
        let _count = self.counters.merkle_lookups.fetch_add(1, Ordering::SeqCst);

        let teams = self.teams.lock();
        let Some(fixture) = teams.get(team_id) else {
            return Err(MerkleError::MissingLeaf(*team_id));
        };

        if let Some(leaf) = fixture.merkle_override {
            return Ok(leaf);
        }

        let seqno = fixture.builder.last_seqno();
        Ok(MerkleLeaf {
            team_id: *team_id,
            seqno,
            link_id: fixture.builder.tail_link_id(),
            root_seqno: Seqno::new(1_000 + seqno.as_u64() * 10),
        })
    }
}

#[async_trait::async_trait]
impl TeamServer for MockNet {
    async fn fetch_new_links(
        &self,
        team_id: &TeamId,
        low: Seqno,
    ) -> Result<TeamUpdate, TransportError> {
        let _count = self.counters.fetch_links.fetch_add(1, Ordering::SeqCst);
        self.fetch_lows.lock().push((*team_id, low));

        let teams = self.teams.lock();
        let fixture = teams
            .get(team_id)
            .ok_or_else(|| TransportError(format!("unknown team {team_id}")))?;

        let mut update =
            fixture
                .builder
                .team_update(low, &fixture.sender, &self.recipient, &fixture.stubs);

        if !fixture.serve_box {
            update.key_box = None;
            update.prevs.clear();
            update.reader_key_masks.clear();
        }
        if fixture.tamper_box {
            if let Some(key_box) = update.key_box.as_mut() {
                key_box.ciphertext[0] ^= 0x01;
            }
        }

        Ok(update)
    }

    async fn fill_stubs(
        &self,
        team_id: &TeamId,
        seqnos: &[Seqno],
    ) -> Result<Vec<StubFill>, TransportError> {
        let _count = self.counters.fill_stubs.fetch_add(1, Ordering::SeqCst);

        let teams = self.teams.lock();
        let fixture = teams
            .get(team_id)
            .ok_or_else(|| TransportError(format!("unknown team {team_id}")))?;

        Ok(seqnos
            .iter()
            .filter(|seqno| **seqno <= fixture.builder.last_seqno())
            .map(|seqno| StubFill {
                seqno: *seqno,
                inner: fixture.builder.inner_bytes_at(*seqno),
            })
            .collect())
    }

    async fn resolve_subteam_name(&self, name: &TeamName) -> Result<TeamId, TransportError> {
        let teams = self.teams.lock();
        teams
            .values()
            .find(|fixture| fixture.builder.name() == name)
            .map(|fixture| fixture.builder.id())
            .ok_or_else(|| TransportError(format!("no team named {name}")))
    }
}

#[async_trait::async_trait]
impl UserChainSource for MockNet {
    async fn load_user_keys(&self, uid: Uid) -> Result<UserKeyHistory, ProofError> {
        let _count = self.counters.user_fetches.fetch_add(1, Ordering::SeqCst);

        self.users
            .lock()
            .get(&uid)
            .cloned()
            .ok_or_else(|| ProofError::FetchFailed {
                uid,
                reason: "user unknown to mock".to_owned(),
            })
    }
}

pub const TEST_HORIZON: Duration = Duration::from_secs(600);

/// A loader for `active`, talking to `net`, with an injectable clock
/// and a shared database so tests can inspect or reuse the disk tier.
pub fn loader_for(
    net: &Arc<MockNet>,
    active: &TestUser,
    clock: &Arc<ManualClock>,
    db: &Arc<InMemoryDb>,
) -> TeamLoader {
    let storage = Arc::new(TeamStorage::with_default_capacity(
        Arc::clone(db) as Arc<dyn teamchain_store::Database>
    ));

    let env = Env::new(
        Arc::clone(net) as Arc<dyn TeamServer>,
        Arc::clone(net) as Arc<dyn MerkleClient>,
        Arc::clone(net) as Arc<dyn UserChainSource>,
    )
    .with_clock(Arc::clone(clock) as Arc<dyn teamchain_loader::Clock>)
    .with_freshness_horizon(TEST_HORIZON);

    TeamLoader::new(
        env,
        storage,
        ActiveUser {
            user_version: active.user_version,
            per_user_key: active.key,
        },
    )
}

/// Ignore-value helper for asserting an error kind.
pub fn assert_load_err(result: Result<teamchain_chain::TeamSnapshot, LoadError>) -> LoadError {
    result.expect_err("load should have failed")
}
