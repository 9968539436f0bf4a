use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, warn};

use tally_common::{
    auth::{Authenticator, Secp256k1Authenticator},
    env::NodeState,
    error::{Result, TallyError},
    utils::NodeId,
};
use tally_gossip::GossipDisseminator;
use tally_ledger::{Applier, KeyValueApplier, KvStore, MemoryStore, ReplicatedLog};

use crate::{election::CombinationIndex, settings::ClusterSettings};

use super::{
    core::Cluster,
    voting::{Eligibility, LogFreshness},
};

/// Assembles a [`Cluster`]. Defaults: in-memory store, key/value applier,
/// log-freshness eligibility, entropy-seeded timers and a throwaway
/// command key.
pub struct ClusterBuilder {
    auth: Secp256k1Authenticator,
    signer: Option<Secp256k1Authenticator>,
    settings: ClusterSettings,
    members: BTreeSet<NodeId>,
    command_keys: BTreeMap<NodeId, NodeId>,
    store: Option<Arc<dyn KvStore>>,
    applier: Box<dyn Applier>,
    eligibility: Box<dyn Eligibility>,
    seed: Option<u64>,
}

impl ClusterBuilder {
    pub fn new(auth: Secp256k1Authenticator) -> Self {
        Self {
            auth,
            signer: None,
            settings: ClusterSettings::default(),
            members: BTreeSet::new(),
            command_keys: BTreeMap::new(),
            store: None,
            applier: Box::new(KeyValueApplier),
            eligibility: Box::new(LogFreshness),
            seed: None,
        }
    }

    pub fn settings(mut self, settings: ClusterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn member(mut self, id: NodeId) -> Self {
        self.members.insert(id);
        self
    }

    pub fn members(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.members.extend(ids);
        self
    }

    /// Key the local node signs commands with. Must differ from the
    /// identity key.
    pub fn command_signer(mut self, signer: Secp256k1Authenticator) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Adds `member` along with the key its commands are verified against.
    pub fn command_key(mut self, member: NodeId, key: NodeId) -> Self {
        self.members.insert(member.clone());
        self.command_keys.insert(member, key);
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn applier(mut self, applier: impl Applier + 'static) -> Self {
        self.applier = Box::new(applier);
        self
    }

    pub fn boxed_applier(mut self, applier: Box<dyn Applier>) -> Self {
        self.applier = applier;
        self
    }

    pub fn eligibility(mut self, eligibility: impl Eligibility + 'static) -> Self {
        self.eligibility = Box::new(eligibility);
        self
    }

    /// Fixes the election timer jitter, for reproducible runs.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Opens the log and returns a node in the stopped state.
    pub fn build(self, now: u64) -> Result<Cluster> {
        self.settings.validate()?;

        let id = self.auth.public_key();
        let mut members = self.members;
        members.insert(id.clone());
        for member in &members {
            tally_common::auth::parse_public_key(member)?;
        }

        let signer = self.signer.unwrap_or_else(Secp256k1Authenticator::generate);
        let mut command_keys = self.command_keys;
        command_keys.insert(id.clone(), signer.public_key());
        for (member, key) in &command_keys {
            check_command_key(&members, member, key)?;
        }
        if command_keys.values().collect::<BTreeSet<_>>().len() != command_keys.len() {
            return Err(TallyError::Config("members share a command key".to_string()));
        }
        for member in members.iter().filter(|m| !command_keys.contains_key(*m)) {
            warn!("Member {} has no command key, its commands will be dropped", member.short());
        }
        let index = CombinationIndex::build(&members, self.settings.quorum.size(members.len()))?;

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let mut log = ReplicatedLog::open(store)?;
        let term = log.term()?;
        let replayed = log.apply_committed(self.applier.as_ref())?;
        if !replayed.is_empty() {
            info!("Applied {} committed entries left over from the last run", replayed.len());
        }

        let mut gossip = GossipDisseminator::new(id.clone(), now, self.settings.liveness_timeout_ms);
        for member in members.iter().filter(|m| **m != id) {
            gossip.add_peer(member.clone(), now);
        }

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let verified_index = log.committed_index();

        Ok(Cluster {
            auth: self.auth,
            signer,
            command_keys,
            id,
            settings: self.settings,
            members,
            index,
            log,
            gossip,
            applier: self.applier,
            eligibility: self.eligibility,
            state: NodeState::Stopped,
            shut_down: false,
            term,
            leader: None,
            session: None,
            own_proof: None,
            accepted_proof: None,
            election_deadline: now,
            heartbeat_deadline: now,
            last_append_at: now,
            last_reappend_at: 0,
            verified_index,
            last_nonce: 0,
            rng,
            events: Vec::new(),
        })
    }
}

/// A command key is a valid point and never one of the identity keys.
pub(crate) fn check_command_key(members: &BTreeSet<NodeId>, member: &NodeId, key: &NodeId) -> Result<()> {
    tally_common::auth::parse_public_key(key)?;
    if members.contains(key) {
        return Err(TallyError::Config(format!("command key of {} is an identity key", member.short())));
    }
    Ok(())
}
