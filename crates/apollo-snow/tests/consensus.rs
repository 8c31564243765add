//! Consensus integration tests.
//!
//! Drives the Snow primitives, the conflict graph and Snowman through the
//! public API only.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use apollo_ids::Id;
use apollo_snow::{
    Bag, BinarySnowball, BinarySnowflake, Block, ConflictGraph, NnarySnowball, Parameters,
    Proposal, Snowman, Status, UnarySnowball, UnarySnowflake,
};

fn make_id(byte: u8) -> Id {
    Id::from_bytes([byte; 32])
}

fn votes(id: Id, count: usize) -> Bag<Id> {
    let mut bag = Bag::new();
    bag.add_count(id, count);
    bag
}

fn params() -> Parameters {
    Parameters::new(5, 4, 2, 2)
}

#[test]
fn test_unary_finalization() {
    let mut sf = UnarySnowflake::new(3);
    sf.record_successful_poll();
    sf.record_successful_poll();
    assert!(!sf.finalized());
    sf.record_successful_poll();
    assert!(sf.finalized());
}

#[test]
fn test_unary_reset() {
    let mut sb = UnarySnowball::new(3);
    let mut seen = Vec::new();

    sb.record_successful_poll();
    seen.push(sb.confidence());
    sb.record_successful_poll();
    seen.push(sb.confidence());
    sb.record_unsuccessful_poll();
    seen.push(sb.confidence());
    sb.record_successful_poll();
    seen.push(sb.confidence());
    sb.record_successful_poll();
    seen.push(sb.confidence());

    assert_eq!(seen, vec![1, 2, 0, 1, 2]);
    assert!(!sb.finalized());
    assert_eq!(sb.num_successful_polls(), 4);
}

#[test]
fn test_binary_snowflake_flip() {
    let mut sf = BinarySnowflake::new(2, 0);
    sf.record_successful_poll(1);
    assert_eq!(sf.preference(), 1);
    assert_eq!(sf.confidence(), 1);
    assert!(!sf.finalized());

    sf.record_successful_poll(1);
    assert!(sf.finalized());
    assert_eq!(sf.preference(), 1);
}

#[test]
fn test_binary_snowball_tie_break() {
    let mut sb = BinarySnowball::new(4, 0);
    for choice in [0, 0, 1, 1, 0] {
        sb.record_successful_poll(choice);
    }

    assert_eq!(sb.num_successful_polls(0), 3);
    assert_eq!(sb.num_successful_polls(1), 2);
    assert_eq!(sb.preference(), 0);
    assert_eq!(sb.confidence(), 1);
    assert!(!sb.finalized());
}

#[test]
fn test_snowman_acceptance() {
    let genesis = make_id(0);
    let b = make_id(1);
    let mut sm = Snowman::new(Parameters::new(5, 4, 2, 3), genesis, 0).unwrap();
    sm.add(Block::new(b, genesis, 1, b"b".to_vec())).unwrap();

    sm.record_poll(&votes(b, 4));
    assert_eq!(sm.status(&b), Status::Processing);
    sm.record_poll(&votes(b, 4));

    assert!(sm.is_accepted(&b));
    assert_eq!(sm.last_accepted(), b);
    assert_eq!(sm.height(), 1);
    assert!(sm.finalized());
}

#[test]
fn test_snowman_conflict() {
    let genesis = make_id(0);
    let (b1, b2, c2) = (make_id(1), make_id(2), make_id(3));
    let mut sm = Snowman::new(params(), genesis, 0).unwrap();

    let rejected = Arc::new(Mutex::new(Vec::new()));
    let sink = rejected.clone();
    sm.on_reject(Box::new(move |block: &Block| sink.lock().unwrap().push(block.id)));

    sm.add(Block::new(b1, genesis, 1, Vec::new())).unwrap();
    sm.add(Block::new(b2, genesis, 1, Vec::new())).unwrap();
    sm.add(Block::new(c2, b2, 2, Vec::new())).unwrap();

    for winner in [b1, b2, b1, b1] {
        sm.record_poll(&votes(winner, 4));
    }

    assert!(sm.is_accepted(&b1));
    assert_eq!(sm.status(&b2), Status::Rejected);
    assert_eq!(sm.status(&c2), Status::Rejected);
    assert!(sm.block(&b2).is_none());
    assert!(sm.block(&c2).is_none());
    assert_eq!(sm.num_processing(), 0);

    let mut rejected = rejected.lock().unwrap().clone();
    rejected.sort();
    assert_eq!(rejected, vec![b2, c2]);
}

#[test]
fn test_snowman_vote_for_descendant_supports_ancestors() {
    let genesis = make_id(0);
    let (a, b, c) = (make_id(1), make_id(2), make_id(3));
    let mut sm = Snowman::new(params(), genesis, 0).unwrap();
    sm.add(Block::new(a, genesis, 1, Vec::new())).unwrap();
    sm.add(Block::new(b, a, 2, Vec::new())).unwrap();
    sm.add(Block::new(c, b, 3, Vec::new())).unwrap();
    assert_eq!(sm.preference(), c);

    sm.record_poll(&votes(c, 4));
    sm.record_poll(&votes(c, 4));

    assert_eq!(sm.last_accepted(), c);
    assert_eq!(sm.num_accepted(), 3);
}

#[test]
fn test_conflict_graph_double_spend() {
    let spent = make_id(50);
    let mut graph = ConflictGraph::new(params()).unwrap();
    graph.add(&Proposal::new(make_id(1), vec![spent])).unwrap();
    graph.add(&Proposal::new(make_id(2), vec![spent])).unwrap();
    assert!(graph.is_preferred(&make_id(1)));
    assert!(!graph.is_virtuous(&make_id(1)));

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for winner in [2, 2, 2] {
        let decisions = graph.record_poll(&votes(make_id(winner), 4));
        accepted.extend(decisions.accepted);
        rejected.extend(decisions.rejected);
    }

    assert_eq!(accepted, vec![make_id(2)]);
    assert_eq!(rejected, vec![make_id(1)]);
    assert!(graph.finalized());

    // The key is consumed; later spenders are rejected on arrival.
    let late = graph.add(&Proposal::new(make_id(3), vec![spent])).unwrap();
    assert_eq!(late.rejected, vec![make_id(3)]);
    assert_eq!(graph.status(&make_id(3)), Status::Rejected);
}

proptest! {
    #[test]
    fn prop_binary_snowball_prefers_argmax(polls in prop::collection::vec(0usize..2, 0..64)) {
        let mut sb = BinarySnowball::new(1000, 0);
        let mut counts = [0usize; 2];
        let mut expected = 0;
        for choice in polls {
            sb.record_successful_poll(choice);
            counts[choice] += 1;
            if counts[choice] > counts[expected] {
                expected = choice;
            }
            prop_assert_eq!(sb.preference(), expected);
            prop_assert_eq!(sb.num_successful_polls(sb.preference()), counts[0].max(counts[1]));
        }
    }

    #[test]
    fn prop_nnary_snowball_prefers_argmax(polls in prop::collection::vec(0u8..4, 0..64)) {
        let mut sb = NnarySnowball::new(1000, 1000, make_id(0));
        for choice in 1..4 {
            sb.add(make_id(choice));
        }
        let mut counts = [0usize; 4];
        let mut expected = 0u8;
        for choice in polls {
            sb.record_successful_poll(make_id(choice));
            counts[choice as usize] += 1;
            if counts[choice as usize] > counts[expected as usize] {
                expected = choice;
            }
            prop_assert_eq!(sb.preference(), make_id(expected));
        }
    }

    #[test]
    fn prop_finalized_is_frozen(
        polls in prop::collection::vec(prop::option::of(0usize..2), 0..32),
    ) {
        let mut sb = BinarySnowball::new(2, 0);
        sb.record_successful_poll(1);
        sb.record_successful_poll(1);
        prop_assert!(sb.finalized());
        let before = sb.to_string();

        for poll in polls {
            match poll {
                Some(choice) => sb.record_successful_poll(choice),
                None => sb.record_unsuccessful_poll(),
            }
            prop_assert!(sb.finalized());
            prop_assert_eq!(sb.preference(), 1);
            prop_assert_eq!(sb.to_string(), before.clone());
        }
    }

    #[test]
    fn prop_unary_extend_carries_state(
        polls in prop::collection::vec(any::<bool>(), 0..16),
        original in 0usize..2,
    ) {
        let mut unary = UnarySnowball::new(1000);
        for successful in polls {
            if successful {
                unary.record_successful_poll();
            } else {
                unary.record_unsuccessful_poll();
            }
        }

        let binary = unary.extend(1000, original);
        prop_assert_eq!(binary.preference(), original);
        prop_assert_eq!(binary.confidence(), unary.confidence());
        prop_assert_eq!(binary.num_successful_polls(original), unary.num_successful_polls());
        prop_assert_eq!(binary.num_successful_polls(1 - original), 0);
    }

    #[test]
    fn prop_snowman_accepts_one_sibling(polls in prop::collection::vec(0u8..3, 0..48)) {
        let genesis = make_id(0);
        let mut sm = Snowman::new(params(), genesis, 0).unwrap();
        sm.add(Block::new(make_id(1), genesis, 1, Vec::new())).unwrap();
        sm.add(Block::new(make_id(2), genesis, 1, Vec::new())).unwrap();

        let mut last_accepted = genesis;
        for poll in polls {
            // Choice 0 is a split vote that gives nobody alpha.
            let bag = match poll {
                0 => {
                    let mut bag = votes(make_id(1), 2);
                    bag.add_count(make_id(2), 2);
                    bag
                }
                n => votes(make_id(n), 4),
            };
            sm.record_poll(&bag);

            if last_accepted != genesis {
                prop_assert_eq!(sm.last_accepted(), last_accepted);
            }
            last_accepted = sm.last_accepted();
        }

        let candidates = [make_id(1), make_id(2)];
        let decided: Vec<_> = candidates
            .iter()
            .filter(|id| sm.is_accepted(id))
            .collect();
        prop_assert!(decided.len() <= 1);
        if let Some(winner) = decided.first() {
            let loser = if **winner == make_id(1) { make_id(2) } else { make_id(1) };
            prop_assert_eq!(sm.status(&loser), Status::Rejected);
        }
    }
}
