//! Snowman consensus implementation.
//!
//! Snowman is a linear chain consensus protocol built on Snowball. Blocks
//! form a tree rooted at the last accepted block; every block owns a Snow
//! instance deciding among its children, and the preferred tip is reached by
//! following those preferences down from the root.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use apollo_ids::Id;
use apollo_utils::Bag;
use tracing::{debug, info, trace};

use super::conflicts::Conflicting;
use super::snowball::{NnarySnow, UnarySnow};
use super::Status;
use crate::{ConsensusError, Parameters, Result};

/// A block in the Snowman chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: Id,
    pub parent: Id,
    pub height: u64,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(id: Id, parent: Id, height: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            parent,
            height,
            payload: payload.into(),
        }
    }

    /// Returns the block's byte representation.
    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }
}

/// Blocks conflict when they fork from the same parent.
impl Conflicting for Block {
    fn id(&self) -> Id {
        self.id
    }

    fn conflict_keys(&self) -> Vec<Id> {
        vec![self.parent]
    }
}

/// Rejected block ids remembered by default. Older ones report
/// [`Status::Unknown`].
pub const DEFAULT_REJECTED_CAPACITY: usize = 16 * 1024;

/// Invoked with each decided block.
pub type DecisionCallback = Box<dyn FnMut(&Block) + Send>;

/// Decision among the children of one block.
///
/// Starts unary with the first child and becomes n-ary (and rogue) when a
/// sibling arrives.
#[derive(Debug, Clone)]
enum ChildDecision {
    Unary { child: Id, snow: UnarySnow },
    Nnary(NnarySnow),
}

impl ChildDecision {
    fn preference(&self) -> Id {
        match self {
            ChildDecision::Unary { child, .. } => *child,
            ChildDecision::Nnary(snow) => snow.preference(),
        }
    }

    fn finalized(&self) -> bool {
        match self {
            ChildDecision::Unary { snow, .. } => snow.finalized(),
            ChildDecision::Nnary(snow) => snow.finalized(),
        }
    }

    fn record_successful_poll(&mut self, choice: Id) {
        match self {
            ChildDecision::Unary { child, snow } => {
                debug_assert_eq!(*child, choice);
                snow.record_successful_poll();
            }
            ChildDecision::Nnary(snow) => snow.record_successful_poll(choice),
        }
    }

    fn record_unsuccessful_poll(&mut self) {
        match self {
            ChildDecision::Unary { snow, .. } => snow.record_unsuccessful_poll(),
            ChildDecision::Nnary(snow) => snow.record_unsuccessful_poll(),
        }
    }

    fn add(&mut self, choice: Id, params: &Parameters) {
        match self {
            ChildDecision::Unary { child, snow } => {
                let nnary =
                    snow.extend_nnary(params.beta_virtuous, params.beta_rogue, *child, choice);
                *self = ChildDecision::Nnary(nnary);
            }
            ChildDecision::Nnary(snow) => snow.add(choice),
        }
    }
}

impl fmt::Display for ChildDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildDecision::Unary { snow, .. } => write!(f, "{snow}"),
            ChildDecision::Nnary(snow) => write!(f, "{snow}"),
        }
    }
}

/// Block metadata stored by Snowman.
#[derive(Debug, Clone)]
struct BlockNode {
    block: Block,
    children: Vec<Id>,
    decision: Option<ChildDecision>,
}

/// Snowman linear chain consensus.
///
/// `blocks` holds the processing blocks plus the last accepted block, which
/// is the root of the tree. Decided blocks leave the tree and are only
/// remembered by id: every accepted id for the life of the instance, and the
/// most recent `rejected_capacity` rejected ids.
pub struct Snowman {
    params: Parameters,
    /// Root of the processing tree
    last_accepted: Id,
    /// Tip of the preferred chain
    preferred: Id,
    blocks: HashMap<Id, BlockNode>,
    accepted: HashSet<Id>,
    rejected: HashSet<Id>,
    /// Rejection order, oldest first
    rejected_order: VecDeque<Id>,
    rejected_capacity: usize,
    num_rejected: usize,
    on_accept: Vec<DecisionCallback>,
    on_reject: Vec<DecisionCallback>,
}

impl Snowman {
    /// Creates a Snowman instance whose root is the accepted genesis block.
    pub fn new(params: Parameters, genesis_id: Id, genesis_height: u64) -> Result<Self> {
        params.validate().map_err(ConsensusError::InvalidParameters)?;

        let genesis = BlockNode {
            block: Block::new(genesis_id, Id::EMPTY, genesis_height, Vec::new()),
            children: Vec::new(),
            decision: None,
        };

        Ok(Self {
            params,
            last_accepted: genesis_id,
            preferred: genesis_id,
            blocks: HashMap::from([(genesis_id, genesis)]),
            accepted: HashSet::from([genesis_id]),
            rejected: HashSet::new(),
            rejected_order: VecDeque::new(),
            rejected_capacity: DEFAULT_REJECTED_CAPACITY,
            num_rejected: 0,
            on_accept: Vec::new(),
            on_reject: Vec::new(),
        })
    }

    /// Sets how many rejected block ids are remembered.
    #[must_use]
    pub fn with_rejected_capacity(mut self, capacity: usize) -> Self {
        self.rejected_capacity = capacity;
        self.evict_rejected();
        self
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Registers a callback run once per accepted block, in chain order.
    pub fn on_accept(&mut self, callback: DecisionCallback) {
        self.on_accept.push(callback);
    }

    /// Registers a callback run once per rejected block.
    pub fn on_reject(&mut self, callback: DecisionCallback) {
        self.on_reject.push(callback);
    }

    /// Returns the last accepted block ID.
    pub fn last_accepted(&self) -> Id {
        self.last_accepted
    }

    /// Returns the height of the last accepted block.
    pub fn height(&self) -> u64 {
        self.blocks
            .get(&self.last_accepted)
            .map_or(0, |node| node.block.height)
    }

    /// Returns the tip of the preferred chain.
    pub fn preference(&self) -> Id {
        self.preferred
    }

    pub fn is_accepted(&self, id: &Id) -> bool {
        self.accepted.contains(id)
    }

    pub fn is_processing(&self, id: &Id) -> bool {
        *id != self.last_accepted && self.blocks.contains_key(id)
    }

    /// Gets the status of a block.
    pub fn status(&self, id: &Id) -> Status {
        if self.accepted.contains(id) {
            Status::Accepted
        } else if self.rejected.contains(id) {
            Status::Rejected
        } else if self.blocks.contains_key(id) {
            Status::Processing
        } else {
            Status::Unknown
        }
    }

    /// Returns a processing block or the last accepted one.
    pub fn block(&self, id: &Id) -> Option<&Block> {
        self.blocks.get(id).map(|node| &node.block)
    }

    pub fn num_processing(&self) -> usize {
        self.blocks.len() - 1
    }

    /// Returns the processing blocks of the preferred chain, tip first.
    pub fn preferred_chain(&self) -> Vec<Id> {
        let mut chain = Vec::new();
        let mut current = self.preferred;
        while current != self.last_accepted {
            let Some(node) = self.blocks.get(&current) else {
                break;
            };
            chain.push(current);
            current = node.block.parent;
        }
        chain
    }

    /// Returns all processing block IDs.
    pub fn processing_blocks(&self) -> Vec<Id> {
        self.blocks
            .keys()
            .filter(|id| **id != self.last_accepted)
            .copied()
            .collect()
    }

    /// Returns the number of accepted blocks, the root excluded.
    pub fn num_accepted(&self) -> usize {
        self.accepted.len() - 1
    }

    /// Returns the number of blocks rejected so far, including those no
    /// longer remembered.
    pub fn num_rejected(&self) -> usize {
        self.num_rejected
    }

    /// Returns true when no block is processing.
    pub fn finalized(&self) -> bool {
        self.num_processing() == 0
    }

    /// Adds a block to be processed.
    pub fn add(&mut self, block: Block) -> Result<()> {
        let id = block.id;
        if self.blocks.contains_key(&id) || self.accepted.contains(&id) || self.rejected.contains(&id)
        {
            return Err(ConsensusError::DuplicateBlock(id));
        }

        let params = &self.params;
        let parent = self
            .blocks
            .get_mut(&block.parent)
            .ok_or(ConsensusError::BadParent {
                block: id,
                parent: block.parent,
            })?;

        let expected = parent.block.height + 1;
        if block.height != expected {
            return Err(ConsensusError::InvalidHeight {
                block: id,
                expected,
                actual: block.height,
            });
        }

        parent.children.push(id);
        match parent.decision.as_mut() {
            Some(decision) => decision.add(id, params),
            None => {
                parent.decision = Some(ChildDecision::Unary {
                    child: id,
                    snow: UnarySnow::new(params.flavor, params.beta_virtuous),
                })
            }
        }

        debug!(block = %id, parent = %block.parent, height = block.height, "added block");
        self.blocks.insert(
            id,
            BlockNode {
                block,
                children: Vec::new(),
                decision: None,
            },
        );
        self.update_preference();
        Ok(())
    }

    /// Records the result of a poll.
    ///
    /// A vote for a block also counts for each of its processing ancestors.
    /// Walking down from the last accepted block, a child with at least
    /// `alpha` inclusive votes wins its parent's poll; the first level without
    /// such a child, and everything below it, records an unsuccessful poll.
    /// Returns true if a preference changed or a block was accepted.
    pub fn record_poll(&mut self, votes: &Bag<Id>) -> bool {
        let mut tally: HashMap<Id, usize> = HashMap::new();
        for (voted, count) in votes.iter() {
            let mut current = *voted;
            while current != self.last_accepted {
                let Some(node) = self.blocks.get(&current) else {
                    break;
                };
                *tally.entry(current).or_insert(0) += count;
                current = node.block.parent;
            }
        }
        trace!(votes = votes.len(), blocks = tally.len(), "recording poll");

        let alpha = self.params.alpha;
        let mut changed = false;
        let mut current = self.last_accepted;
        loop {
            let Some(node) = self.blocks.get_mut(&current) else {
                break;
            };
            let Some(decision) = node.decision.as_mut() else {
                break;
            };

            let winner = node
                .children
                .iter()
                .filter(|child| tally.get(*child).copied().unwrap_or(0) >= alpha)
                .max_by(|a, b| tally[*a].cmp(&tally[*b]).then(b.cmp(a)))
                .copied();

            match winner {
                Some(child) => {
                    let before = decision.preference();
                    decision.record_successful_poll(child);
                    changed |= decision.preference() != before;

                    let losers: Vec<Id> = node
                        .children
                        .iter()
                        .filter(|sibling| **sibling != child)
                        .copied()
                        .collect();
                    self.reset_subtrees(losers);
                    current = child;
                }
                None => {
                    decision.record_unsuccessful_poll();
                    let children = node.children.clone();
                    self.reset_subtrees(children);
                    break;
                }
            }
        }

        changed |= self.accept_finalized();
        changed |= self.update_preference();
        changed
    }

    /// Records an unsuccessful poll on every instance below `roots`.
    fn reset_subtrees(&mut self, roots: Vec<Id>) {
        let mut stack = roots;
        while let Some(id) = stack.pop() {
            if let Some(node) = self.blocks.get_mut(&id) {
                if let Some(decision) = node.decision.as_mut() {
                    decision.record_unsuccessful_poll();
                }
                stack.extend(node.children.iter().copied());
            }
        }
    }

    /// Accepts children of the last accepted block for as long as its
    /// decision is final. Returns true if anything was accepted.
    fn accept_finalized(&mut self) -> bool {
        let mut accepted_any = false;
        loop {
            let next = match self
                .blocks
                .get(&self.last_accepted)
                .and_then(|node| node.decision.as_ref())
            {
                Some(decision) if decision.finalized() => decision.preference(),
                _ => return accepted_any,
            };
            self.accept(next);
            accepted_any = true;
        }
    }

    fn accept(&mut self, id: Id) {
        let Some(root) = self.blocks.remove(&self.last_accepted) else {
            return;
        };
        let node = self
            .blocks
            .get(&id)
            .unwrap_or_else(|| panic!("accepting unknown block {id}"));
        assert_eq!(
            node.block.parent, self.last_accepted,
            "accepted block must extend the last accepted block"
        );

        info!(block = %id, height = node.block.height, "accepted block");
        self.accepted.insert(id);
        self.last_accepted = id;
        for callback in self.on_accept.iter_mut() {
            callback(&node.block);
        }

        for sibling in root.children {
            if sibling != id {
                self.reject_subtree(sibling);
            }
        }
    }

    /// Rejects a block and all its descendants.
    fn reject_subtree(&mut self, id: Id) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.blocks.remove(&id) else {
                continue;
            };
            debug!(block = %id, height = node.block.height, "rejected block");
            self.rejected.insert(id);
            self.rejected_order.push_back(id);
            self.num_rejected += 1;
            self.evict_rejected();
            for callback in self.on_reject.iter_mut() {
                callback(&node.block);
            }
            stack.extend(node.children);
        }
    }

    fn evict_rejected(&mut self) {
        while self.rejected_order.len() > self.rejected_capacity {
            if let Some(oldest) = self.rejected_order.pop_front() {
                self.rejected.remove(&oldest);
            }
        }
    }

    /// Recomputes the preferred tip. Returns true if it moved.
    fn update_preference(&mut self) -> bool {
        let mut tip = self.last_accepted;
        while let Some(decision) = self.blocks.get(&tip).and_then(|node| node.decision.as_ref()) {
            tip = decision.preference();
        }

        if tip == self.preferred {
            return false;
        }
        trace!(from = %self.preferred, to = %tip, "preference changed");
        self.preferred = tip;
        true
    }
}

impl fmt::Debug for Snowman {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snowman")
            .field("params", &self.params)
            .field("last_accepted", &self.last_accepted)
            .field("preferred", &self.preferred)
            .field("processing", &self.num_processing())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Snowman {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SM(LastAccepted = {}", self.last_accepted)?;
        if let Some(decision) = self
            .blocks
            .get(&self.last_accepted)
            .and_then(|node| node.decision.as_ref())
        {
            write!(f, ", {decision}")?;
        }
        write!(f, ")")
    }
}
