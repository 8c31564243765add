//! Poll rounds.
//!
//! A round samples k peers, sends each the preferred block and collects
//! their preferences. The [`Poller`] is a plain state machine: the caller
//! feeds it responses and clock readings and acts on the rounds it returns,
//! which keeps it independent of any runtime.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use apollo_ids::{Id, NodeId};
use apollo_utils::{Bag, Timer};
use tracing::{debug, trace, warn};

use crate::membership::Membership;
use crate::transport::{QueryReply, TransportError};
use crate::{ConsensusError, Parameters, Result};

/// State of a single poll round.
#[derive(Debug, Clone)]
pub struct PollState {
    request_id: u32,
    block_id: Id,
    alpha: usize,
    sampled: HashSet<NodeId>,
    replies: HashMap<NodeId, Id>,
    failed: HashSet<NodeId>,
    timer: Timer,
    deadline: Instant,
    cancelled: bool,
}

impl PollState {
    /// Starts a round over `sampled`; repeated peers are polled once.
    pub fn new(
        request_id: u32,
        block_id: Id,
        sampled: impl IntoIterator<Item = NodeId>,
        alpha: usize,
        timeout: Duration,
    ) -> Self {
        let timer = Timer::start();
        Self {
            request_id,
            block_id,
            alpha,
            sampled: sampled.into_iter().collect(),
            replies: HashMap::new(),
            failed: HashSet::new(),
            deadline: timer.deadline(timeout),
            timer,
            cancelled: false,
        }
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Returns the block whose preference was polled.
    pub fn block_id(&self) -> Id {
        self.block_id
    }

    pub fn sampled(&self) -> &HashSet<NodeId> {
        &self.sampled
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns the number of sampled peers that have neither replied nor
    /// failed.
    pub fn outstanding(&self) -> usize {
        self.sampled.len() - self.replies.len() - self.failed.len()
    }

    fn is_pending(&self, peer: &NodeId) -> bool {
        self.sampled.contains(peer) && !self.replies.contains_key(peer) && !self.failed.contains(peer)
    }

    /// Records a peer's preference. Only the first answer of a sampled peer
    /// counts; returns false if the reply was ignored.
    pub fn record_reply(&mut self, peer: NodeId, preferred: Id) -> bool {
        if !self.is_pending(&peer) {
            return false;
        }
        self.replies.insert(peer, preferred);
        true
    }

    /// Records that a peer will not answer.
    pub fn record_failure(&mut self, peer: NodeId) -> bool {
        if !self.is_pending(&peer) {
            return false;
        }
        self.failed.insert(peer);
        true
    }

    /// Returns the replies so far, with the threshold set to alpha.
    pub fn tally(&self) -> Bag<Id> {
        let mut bag = Bag::new();
        bag.set_threshold(self.alpha);
        for choice in self.replies.values() {
            bag.add(*choice);
        }
        bag
    }

    /// Returns true once waiting longer cannot change the outcome.
    ///
    /// That is the case when every sampled peer has answered or failed, when
    /// a choice already has alpha votes (the rest cannot give alpha to a
    /// conflicting block), or when fewer than alpha peers can still answer.
    pub fn is_complete(&self) -> bool {
        if self.outstanding() == 0 {
            return true;
        }
        if self.replies.len() + self.outstanding() < self.alpha {
            return true;
        }
        !self.tally().threshold().is_empty()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Marks the round so that its result is discarded.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The round completed and its votes should be applied
    Completed,
    /// The preferred block changed while the round was in flight
    Cancelled,
    /// The deadline passed before the round completed; the replies that
    /// did arrive still count
    Expired,
}

/// A round that is no longer tracked.
#[derive(Debug, Clone)]
pub struct FinishedPoll {
    pub request_id: u32,
    pub block_id: Id,
    pub outcome: RoundOutcome,
    pub votes: Bag<Id>,
    pub elapsed: Duration,
}

impl FinishedPoll {
    /// Returns the votes to apply, or `None` for a cancelled round.
    ///
    /// An expired round yields the replies received before its deadline;
    /// missing peers simply did not vote.
    pub fn into_votes(self) -> Option<Bag<Id>> {
        match self.outcome {
            RoundOutcome::Completed | RoundOutcome::Expired => Some(self.votes),
            RoundOutcome::Cancelled => None,
        }
    }

    /// Returns [`ConsensusError::DeadlineExceeded`] if the round expired.
    pub fn deadline_error(&self) -> Option<ConsensusError> {
        (self.outcome == RoundOutcome::Expired)
            .then_some(ConsensusError::DeadlineExceeded(self.request_id))
    }
}

/// A round that was just started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedPoll {
    pub request_id: u32,
    pub block_id: Id,
    pub peers: Vec<NodeId>,
}

/// Tracks the rounds in flight.
///
/// At most `concurrent_repolls` rounds run at once and at most one per
/// block, so concurrent rounds poll different blocks of the preferred chain.
/// Request ids increase monotonically.
#[derive(Debug)]
pub struct Poller {
    k: usize,
    alpha: usize,
    concurrent_repolls: usize,
    query_timeout: Duration,
    next_request_id: u32,
    rounds: HashMap<u32, PollState>,
    by_block: HashMap<Id, u32>,
}

impl Poller {
    pub fn new(params: &Parameters) -> Self {
        Self {
            k: params.k,
            alpha: params.alpha,
            concurrent_repolls: params.concurrent_repolls,
            query_timeout: params.query_timeout,
            next_request_id: 1,
            rounds: HashMap::new(),
            by_block: HashMap::new(),
        }
    }

    /// Returns the number of rounds in flight.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn is_polling(&self, block_id: &Id) -> bool {
        self.by_block.contains_key(block_id)
    }

    pub fn round(&self, request_id: u32) -> Option<&PollState> {
        self.rounds.get(&request_id)
    }

    /// Returns true if a round for `block_id` may start now.
    pub fn can_start(&self, block_id: &Id) -> bool {
        self.rounds.len() < self.concurrent_repolls && !self.is_polling(block_id)
    }

    /// Starts a round for `block_id`, sampling from `membership`.
    ///
    /// Returns `None` if the poller is at capacity or already polling the
    /// block, and [`ConsensusError::NoPeers`] if k distinct peers cannot be
    /// sampled.
    pub fn start(
        &mut self,
        block_id: Id,
        membership: &dyn Membership,
    ) -> Result<Option<StartedPoll>> {
        if !self.can_start(&block_id) {
            return Ok(None);
        }

        let mut peers = membership.sample(self.k)?;
        let mut seen = HashSet::new();
        peers.retain(|peer| seen.insert(*peer));
        if peers.len() < self.k {
            return Err(ConsensusError::NoPeers {
                needed: self.k,
                have: peers.len(),
            });
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        let round = PollState::new(
            request_id,
            block_id,
            peers.iter().copied(),
            self.alpha,
            self.query_timeout,
        );
        self.rounds.insert(request_id, round);
        self.by_block.insert(block_id, request_id);
        debug!(request_id, block = %block_id, peers = peers.len(), "started poll");

        Ok(Some(StartedPoll {
            request_id,
            block_id,
            peers,
        }))
    }

    /// Folds the response of `peer` to request `request_id` into its round.
    ///
    /// Failed queries and replies naming another request count as missing
    /// replies. Returns the round if it is now complete.
    pub fn record_response(
        &mut self,
        request_id: u32,
        peer: NodeId,
        response: std::result::Result<QueryReply, TransportError>,
    ) -> Option<FinishedPoll> {
        let Some(round) = self.rounds.get_mut(&request_id) else {
            trace!(request_id, peer = %peer, "response for finished poll");
            return None;
        };

        let recorded = match response.and_then(|reply| reply.verify(request_id).map(|()| reply)) {
            Ok(reply) => round.record_reply(peer, reply.preferred_id),
            Err(err @ TransportError::RequestIdMismatch { .. })
            | Err(err @ TransportError::Malformed(_)) => {
                warn!(request_id, peer = %peer, error = %err, "dropping bad reply");
                round.record_failure(peer)
            }
            Err(err) => {
                debug!(request_id, peer = %peer, error = %err, "query failed");
                round.record_failure(peer)
            }
        };
        if !recorded {
            trace!(request_id, peer = %peer, "ignored duplicate or unsolicited response");
        }

        if round.is_complete() {
            let outcome = if round.is_cancelled() {
                RoundOutcome::Cancelled
            } else {
                RoundOutcome::Completed
            };
            return self.finish(request_id, outcome);
        }
        None
    }

    /// Marks every round polling a block off `preferred_chain` as cancelled.
    pub fn cancel_stale(&mut self, preferred_chain: &[Id]) -> usize {
        let mut cancelled = 0;
        for round in self.rounds.values_mut() {
            if !preferred_chain.contains(&round.block_id) && !round.cancelled {
                debug!(request_id = round.request_id, block = %round.block_id, "poll is stale");
                round.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Removes and returns the rounds whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<FinishedPoll> {
        let mut expired: Vec<u32> = self
            .rounds
            .values()
            .filter(|round| round.is_expired(now))
            .map(|round| round.request_id)
            .collect();
        expired.sort_unstable();

        expired
            .into_iter()
            .filter_map(|request_id| {
                let cancelled = self.rounds.get(&request_id).map_or(false, |r| r.cancelled);
                let outcome = if cancelled {
                    RoundOutcome::Cancelled
                } else {
                    RoundOutcome::Expired
                };
                self.finish(request_id, outcome)
            })
            .collect()
    }

    /// Drops every round. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.rounds.len();
        self.rounds.clear();
        self.by_block.clear();
        dropped
    }

    fn finish(&mut self, request_id: u32, outcome: RoundOutcome) -> Option<FinishedPoll> {
        let round = self.rounds.remove(&request_id)?;
        self.by_block.remove(&round.block_id);
        debug!(
            request_id,
            block = %round.block_id,
            ?outcome,
            replies = round.replies.len(),
            elapsed_ms = round.elapsed().as_millis() as u64,
            "finished poll"
        );
        Some(FinishedPoll {
            request_id,
            block_id: round.block_id,
            outcome,
            votes: round.tally(),
            elapsed: round.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::PeerSet;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 20])
    }

    fn id(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    fn params() -> Parameters {
        Parameters::new(5, 4, 3, 4)
            .with_concurrent_repolls(2)
            .with_query_timeout(Duration::from_millis(100))
    }

    fn peers() -> PeerSet {
        PeerSet::uniform((1..=5).map(node))
    }

    fn reply(request_id: u32, choice: Id) -> std::result::Result<QueryReply, TransportError> {
        Ok(QueryReply::new(request_id, choice))
    }

    #[test]
    fn test_round_completes_at_alpha() {
        let mut round = PollState::new(1, id(1), (1..=5).map(node), 4, Duration::from_secs(1));
        for byte in 1..=3 {
            assert!(round.record_reply(node(byte), id(1)));
            assert!(!round.is_complete());
        }
        round.record_reply(node(4), id(1));
        assert!(round.is_complete());
        assert_eq!(round.tally().count(&id(1)), 4);
        assert_eq!(round.outstanding(), 1);
    }

    #[test]
    fn test_round_completes_when_alpha_unreachable() {
        let mut round = PollState::new(1, id(1), (1..=5).map(node), 4, Duration::from_secs(1));
        round.record_failure(node(1));
        assert!(!round.is_complete());
        round.record_failure(node(2));
        assert!(round.is_complete());
    }

    #[test]
    fn test_split_round_waits_for_everyone() {
        let mut round = PollState::new(1, id(1), (1..=5).map(node), 4, Duration::from_secs(1));
        round.record_reply(node(1), id(1));
        round.record_reply(node(2), id(2));
        round.record_reply(node(3), id(1));
        round.record_reply(node(4), id(2));
        assert!(!round.is_complete());
        round.record_reply(node(5), id(2));
        assert!(round.is_complete());
    }

    #[test]
    fn test_duplicate_and_unsolicited_replies() {
        let mut round = PollState::new(1, id(1), [node(1), node(1), node(2)], 2, Duration::from_secs(1));
        assert_eq!(round.sampled().len(), 2);

        assert!(round.record_reply(node(1), id(1)));
        assert!(!round.record_reply(node(1), id(2)), "first reply wins");
        assert!(!round.record_failure(node(1)));
        assert!(!round.record_reply(node(9), id(1)));
        assert_eq!(round.tally().count(&id(1)), 1);
        assert_eq!(round.tally().count(&id(2)), 0);
    }

    #[test]
    fn test_request_ids_increase() {
        let mut poller = Poller::new(&params());
        let first = poller.start(id(1), &peers()).unwrap().unwrap();
        let second = poller.start(id(2), &peers()).unwrap().unwrap();
        assert!(second.request_id > first.request_id);
        assert_eq!(first.peers.len(), 5);
    }

    #[test]
    fn test_one_round_per_block_and_capacity() {
        let mut poller = Poller::new(&params());
        assert!(poller.start(id(1), &peers()).unwrap().is_some());
        assert!(poller.start(id(1), &peers()).unwrap().is_none());
        assert!(poller.start(id(2), &peers()).unwrap().is_some());
        assert!(poller.start(id(3), &peers()).unwrap().is_none());
        assert_eq!(poller.len(), 2);
    }

    #[test]
    fn test_not_enough_peers() {
        let mut poller = Poller::new(&params());
        let few = PeerSet::uniform((1..=3).map(node));
        assert_eq!(
            poller.start(id(1), &few),
            Err(ConsensusError::NoPeers { needed: 5, have: 3 })
        );
        assert!(poller.is_empty());
    }

    #[test]
    fn test_responses_finish_round() {
        let mut poller = Poller::new(&params());
        let started = poller.start(id(1), &peers()).unwrap().unwrap();
        let rid = started.request_id;

        for byte in 1..=3 {
            assert!(poller.record_response(rid, node(byte), reply(rid, id(1))).is_none());
        }
        let finished = poller.record_response(rid, node(4), reply(rid, id(1))).unwrap();
        assert_eq!(finished.outcome, RoundOutcome::Completed);
        assert_eq!(finished.block_id, id(1));

        let votes = finished.into_votes().unwrap();
        assert!(votes.threshold().contains(&id(1)));
        assert!(!poller.is_polling(&id(1)));

        // Late reply for a finished round.
        assert!(poller.record_response(rid, node(5), reply(rid, id(1))).is_none());
    }

    #[test]
    fn test_mismatched_request_id_counts_as_failure() {
        let mut poller = Poller::new(&params());
        let rid = poller.start(id(1), &peers()).unwrap().unwrap().request_id;

        poller.record_response(rid, node(1), reply(rid + 7, id(1)));
        let round = poller.round(rid).unwrap();
        assert_eq!(round.tally().count(&id(1)), 0);
        assert_eq!(round.outstanding(), 4);

        let finished = poller
            .record_response(rid, node(2), Err(TransportError::Timeout))
            .unwrap();
        assert_eq!(finished.outcome, RoundOutcome::Completed);
        assert!(finished.votes.threshold().is_empty());
    }

    #[test]
    fn test_cancelled_round_is_discarded() {
        let mut poller = Poller::new(&params());
        let rid = poller.start(id(1), &peers()).unwrap().unwrap().request_id;
        assert_eq!(poller.cancel_stale(&[id(2)]), 1);
        assert_eq!(poller.cancel_stale(&[id(2)]), 0);

        let mut finished = None;
        for byte in 1..=4 {
            finished = poller.record_response(rid, node(byte), reply(rid, id(1)));
        }
        let finished = finished.unwrap();
        assert_eq!(finished.outcome, RoundOutcome::Cancelled);
        assert!(finished.into_votes().is_none());
    }

    #[test]
    fn test_deadline_expires_round() {
        let mut poller = Poller::new(&params());
        let rid = poller.start(id(1), &peers()).unwrap().unwrap().request_id;
        poller.record_response(rid, node(1), reply(rid, id(1)));

        assert!(poller.expire(Instant::now()).is_empty());
        let expired = poller.expire(Instant::now() + Duration::from_secs(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].outcome, RoundOutcome::Expired);
        assert!(matches!(
            expired[0].deadline_error(),
            Some(ConsensusError::DeadlineExceeded(r)) if r == rid
        ));
        let votes = expired[0].clone().into_votes().unwrap();
        assert_eq!(votes.count(&id(1)), 1);
        assert!(poller.is_empty());
    }

    #[test]
    fn test_expired_round_keeps_partial_replies() {
        let mut poller = Poller::new(&params());
        let rid = poller.start(id(2), &peers()).unwrap().unwrap().request_id;

        // Two votes for a block and two for its child: neither has alpha on
        // its own and the silent fifth peer keeps the round open.
        poller.record_response(rid, node(1), reply(rid, id(1)));
        poller.record_response(rid, node(2), reply(rid, id(1)));
        poller.record_response(rid, node(3), reply(rid, id(2)));
        assert!(poller.record_response(rid, node(4), reply(rid, id(2))).is_none());

        let expired = poller.expire(Instant::now() + Duration::from_secs(1));
        assert_eq!(expired.len(), 1);
        assert!(expired[0].deadline_error().is_some());
        let votes = expired[0].clone().into_votes().unwrap();
        assert_eq!(votes.count(&id(1)), 2);
        assert_eq!(votes.count(&id(2)), 2);
        assert!(votes.threshold().is_empty());
    }

    #[test]
    fn test_concurrent_rounds_poll_distinct_blocks() {
        let mut poller = Poller::new(&params());
        assert!(poller.start(id(3), &peers()).unwrap().is_some());
        assert!(poller.start(id(3), &peers()).unwrap().is_none());
        assert!(poller.start(id(2), &peers()).unwrap().is_some());
        assert!(poller.start(id(1), &peers()).unwrap().is_none());
        assert_eq!(poller.len(), 2);

        // Both blocks are still on the preferred chain.
        assert_eq!(poller.cancel_stale(&[id(3), id(2), id(1)]), 0);
        assert_eq!(poller.cancel_stale(&[id(2), id(1)]), 1);
    }

    #[test]
    fn test_clear_drops_rounds() {
        let mut poller = Poller::new(&params());
        poller.start(id(1), &peers()).unwrap();
        poller.start(id(2), &peers()).unwrap();
        assert_eq!(poller.clear(), 2);
        assert!(poller.can_start(&id(1)));
    }
}
