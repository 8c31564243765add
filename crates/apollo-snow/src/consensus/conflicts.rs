//! Conflict sets over proposals that may not both be accepted.
//!
//! Every proposal names the keys it consumes (inputs for UTXO-like
//! transfers, the parent for blocks). Two different proposals conflict when
//! they share a key, and all proposals sharing a key form one
//! [`ConflictSet`]. Each set keeps a Snowball-style preference among its
//! members.
//!
//! A proposal builds confidence only while it wins the poll *and* is the
//! preference of every set containing it. It is virtuous while each of its
//! sets has no other member, and rogue otherwise. The finalization
//! threshold is read at the time of the poll, so a rogue proposal whose
//! rivals were all rejected finalizes at `beta_virtuous`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use apollo_ids::Id;
use apollo_utils::Bag;
use tracing::{debug, trace};

use super::Status;
use crate::{ConsensusError, Parameters, Result};

/// Something that can conflict with other proposals.
pub trait Conflicting {
    /// Returns the proposal's unique identifier.
    fn id(&self) -> Id;

    /// Returns the keys this proposal consumes.
    fn conflict_keys(&self) -> Vec<Id>;

    /// Returns true if the proposals differ and share a key.
    fn conflicts_with(&self, other: &dyn Conflicting) -> bool {
        if self.id() == other.id() {
            return false;
        }
        let mine = self.conflict_keys();
        other.conflict_keys().iter().any(|key| mine.contains(key))
    }
}

/// A proposal consuming a list of inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub id: Id,
    pub inputs: Vec<Id>,
}

impl Proposal {
    pub fn new(id: Id, inputs: Vec<Id>) -> Self {
        Self { id, inputs }
    }
}

impl Conflicting for Proposal {
    fn id(&self) -> Id {
        self.id
    }

    fn conflict_keys(&self) -> Vec<Id> {
        self.inputs.clone()
    }
}

/// Proposals decided by a single call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decisions {
    pub accepted: Vec<Id>,
    pub rejected: Vec<Id>,
}

impl Decisions {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }

    fn extend(&mut self, other: Decisions) {
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
    }
}

/// The proposals sharing one key.
#[derive(Debug, Clone)]
pub struct ConflictSet {
    key: Id,
    members: BTreeSet<Id>,
    preference: Id,
    num_successful_polls: HashMap<Id, usize>,
    last_winner: Option<Id>,
    same_running_count: usize,
}

impl ConflictSet {
    fn new(key: Id, first: Id) -> Self {
        Self {
            key,
            members: BTreeSet::from([first]),
            preference: first,
            num_successful_polls: HashMap::new(),
            last_winner: None,
            same_running_count: 0,
        }
    }

    pub fn key(&self) -> Id {
        self.key
    }

    pub fn members(&self) -> &BTreeSet<Id> {
        &self.members
    }

    pub fn preference(&self) -> Id {
        self.preference
    }

    /// Number of consecutive polls won by the same member.
    pub fn same_running_count(&self) -> usize {
        self.same_running_count
    }

    pub fn num_successful_polls(&self, id: &Id) -> usize {
        self.num_successful_polls.get(id).copied().unwrap_or(0)
    }

    pub fn is_virtuous(&self) -> bool {
        self.members.len() == 1
    }

    fn record_poll(&mut self, winner: Option<Id>) {
        let Some(winner) = winner else {
            self.last_winner = None;
            self.same_running_count = 0;
            return;
        };

        let polls = {
            let polls = self.num_successful_polls.entry(winner).or_insert(0);
            *polls += 1;
            *polls
        };
        if polls > self.num_successful_polls(&self.preference) {
            self.preference = winner;
        }

        if self.last_winner == Some(winner) {
            self.same_running_count += 1;
        } else {
            self.last_winner = Some(winner);
            self.same_running_count = 1;
        }
    }

    /// Drops a rejected member; returns true if the set is now empty.
    fn remove(&mut self, id: &Id) -> bool {
        self.members.remove(id);
        self.num_successful_polls.remove(id);
        if self.last_winner == Some(*id) {
            self.last_winner = None;
            self.same_running_count = 0;
        }

        if self.preference == *id {
            // Most successful polls wins; ties go to the smallest id.
            let mut best: Option<(usize, Id)> = None;
            for member in &self.members {
                let polls = self.num_successful_polls(member);
                if best.map_or(true, |(most, _)| polls > most) {
                    best = Some((polls, *member));
                }
            }
            if let Some((_, member)) = best {
                self.preference = member;
            }
        }
        self.members.is_empty()
    }
}

impl fmt::Display for ConflictSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CS(Key = {}, Members = {}, Preference = {}, SameRunningCount = {})",
            self.key,
            self.members.len(),
            self.preference,
            self.same_running_count
        )
    }
}

#[derive(Debug, Clone)]
struct ProposalNode {
    keys: Vec<Id>,
    confidence: usize,
}

/// Consensus over proposals grouped into conflict sets.
#[derive(Debug)]
pub struct ConflictGraph {
    params: Parameters,
    /// Processing proposals
    proposals: HashMap<Id, ProposalNode>,
    /// Open conflict sets by key
    sets: HashMap<Id, ConflictSet>,
    /// Keys consumed by an accepted proposal
    consumed: HashSet<Id>,
    /// Decided proposals
    decided: HashMap<Id, Status>,
}

impl ConflictGraph {
    /// Creates an empty graph, validating the parameters.
    pub fn new(params: Parameters) -> Result<Self> {
        params.validate().map_err(ConsensusError::InvalidParameters)?;
        Ok(Self {
            params,
            proposals: HashMap::new(),
            sets: HashMap::new(),
            consumed: HashSet::new(),
            decided: HashMap::new(),
        })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Adds a proposal.
    ///
    /// A proposal spending a key already consumed by an accepted proposal can
    /// never be accepted and is rejected on the spot.
    pub fn add<P: Conflicting + ?Sized>(&mut self, proposal: &P) -> Result<Decisions> {
        let id = proposal.id();
        if self.proposals.contains_key(&id) || self.decided.contains_key(&id) {
            return Err(ConsensusError::DuplicateProposal(id));
        }

        let mut keys = proposal.conflict_keys();
        keys.sort();
        keys.dedup();

        let mut decisions = Decisions::default();
        if keys.iter().any(|key| self.consumed.contains(key)) {
            debug!(proposal = %id, "rejecting proposal spending a consumed key");
            self.decided.insert(id, Status::Rejected);
            decisions.rejected.push(id);
            return Ok(decisions);
        }

        for key in &keys {
            match self.sets.get_mut(key) {
                Some(set) => {
                    set.members.insert(id);
                }
                None => {
                    self.sets.insert(*key, ConflictSet::new(*key, id));
                }
            }
        }
        trace!(proposal = %id, keys = keys.len(), "added proposal");
        self.proposals.insert(id, ProposalNode { keys, confidence: 0 });
        Ok(decisions)
    }

    /// Folds one poll into the graph.
    ///
    /// A proposal wins the poll when it received at least `alpha` votes.
    pub fn record_poll(&mut self, votes: &Bag<Id>) -> Decisions {
        let alpha = self.params.alpha;
        let winners: HashSet<Id> = self
            .proposals
            .keys()
            .filter(|id| votes.count(id) >= alpha)
            .copied()
            .collect();

        for set in self.sets.values_mut() {
            let winner = set
                .members
                .iter()
                .filter(|member| winners.contains(*member))
                .max_by(|a, b| votes.count(a).cmp(&votes.count(b)).then(b.cmp(a)))
                .copied();
            set.record_poll(winner);
        }

        let mut ids: Vec<Id> = self.proposals.keys().copied().collect();
        ids.sort();

        let mut to_accept = Vec::new();
        for id in ids {
            let successful = winners.contains(&id) && self.is_preferred(&id);
            let rogue = !self.is_virtuous(&id);
            let Some(node) = self.proposals.get_mut(&id) else {
                continue;
            };
            if successful {
                node.confidence += 1;
            } else {
                node.confidence = 0;
            }
            if node.confidence >= self.params.beta(rogue) {
                to_accept.push(id);
            }
        }

        let mut decisions = Decisions::default();
        for id in to_accept {
            if self.proposals.contains_key(&id) {
                decisions.extend(self.accept(id));
            }
        }
        decisions
    }

    fn accept(&mut self, id: Id) -> Decisions {
        let mut decisions = Decisions::default();
        let Some(node) = self.proposals.remove(&id) else {
            return decisions;
        };

        debug!(proposal = %id, "accepted proposal");
        self.decided.insert(id, Status::Accepted);
        decisions.accepted.push(id);

        for key in &node.keys {
            self.consumed.insert(*key);
            let Some(set) = self.sets.remove(key) else {
                continue;
            };
            for member in set.members {
                if member != id {
                    self.reject(member, &mut decisions);
                }
            }
        }
        decisions
    }

    fn reject(&mut self, id: Id, decisions: &mut Decisions) {
        let Some(node) = self.proposals.remove(&id) else {
            return;
        };

        debug!(proposal = %id, "rejected proposal");
        self.decided.insert(id, Status::Rejected);
        decisions.rejected.push(id);

        for key in &node.keys {
            let empty = match self.sets.get_mut(key) {
                Some(set) => set.remove(&id),
                None => false,
            };
            if empty {
                self.sets.remove(key);
            }
        }
    }

    /// Returns the status of a proposal.
    pub fn status(&self, id: &Id) -> Status {
        if self.proposals.contains_key(id) {
            return Status::Processing;
        }
        self.decided.get(id).copied().unwrap_or(Status::Unknown)
    }

    /// Returns true if the proposal is processing and preferred by every set
    /// containing it.
    pub fn is_preferred(&self, id: &Id) -> bool {
        match self.proposals.get(id) {
            Some(node) => node
                .keys
                .iter()
                .all(|key| self.sets.get(key).map_or(true, |set| set.preference == *id)),
            None => false,
        }
    }

    /// Returns true if the proposal is processing and conflicts with nothing.
    pub fn is_virtuous(&self, id: &Id) -> bool {
        match self.proposals.get(id) {
            Some(node) => node
                .keys
                .iter()
                .all(|key| self.sets.get(key).map_or(true, ConflictSet::is_virtuous)),
            None => false,
        }
    }

    /// Returns the processing proposals preferred in all of their sets.
    pub fn preferences(&self) -> HashSet<Id> {
        self.proposals
            .keys()
            .filter(|id| self.is_preferred(id))
            .copied()
            .collect()
    }

    /// Returns the processing proposals without conflicts.
    pub fn virtuous(&self) -> HashSet<Id> {
        self.proposals
            .keys()
            .filter(|id| self.is_virtuous(id))
            .copied()
            .collect()
    }

    /// Returns the processing proposals conflicting with `id`.
    pub fn conflicts_of(&self, id: &Id) -> HashSet<Id> {
        let Some(node) = self.proposals.get(id) else {
            return HashSet::new();
        };
        node.keys
            .iter()
            .filter_map(|key| self.sets.get(key))
            .flat_map(|set| set.members.iter())
            .filter(|member| *member != id)
            .copied()
            .collect()
    }

    /// Returns the open conflict set for a key.
    pub fn conflict_set(&self, key: &Id) -> Option<&ConflictSet> {
        self.sets.get(key)
    }

    /// Returns the confidence of a processing proposal.
    pub fn confidence(&self, id: &Id) -> Option<usize> {
        self.proposals.get(id).map(|node| node.confidence)
    }

    pub fn num_processing(&self) -> usize {
        self.proposals.len()
    }

    /// Returns true when no proposal is processing.
    pub fn finalized(&self) -> bool {
        self.proposals.is_empty()
    }
}
