//! Snow family metastable consensus.
//!
//! This crate provides the Snow decision primitives and the protocols built
//! on them.
//!
//! # Architecture
//!
//! - **Snowball**: Slush, Snowflake and Snowball in unary, binary and n-ary form
//! - **Conflicts**: Conflict sets over proposals that consume shared keys
//! - **Snowman**: Linear chain consensus over a tree of blocks
//! - **Poller**: Poll rounds over k sampled peers
//! - **Engine**: Single-writer consensus worker driving Snowman with the poller
//! - **Membership** / **Transport**: Seams to the peer layer
//! - **Routing**: Dispatch of requests to the consensus instance they address
//!
//! # Example
//!
//! ```
//! use apollo_ids::Id;
//! use apollo_snow::{Bag, Block, Parameters, Snowman};
//!
//! let genesis = Id::from_hash(b"genesis");
//! let params = Parameters::new(5, 4, 2, 3);
//! let mut snowman = Snowman::new(params, genesis, 0).unwrap();
//!
//! let block = Block::new(Id::from_hash(b"one"), genesis, 1, b"payload".to_vec());
//! snowman.add(block.clone()).unwrap();
//!
//! let mut votes = Bag::new();
//! votes.add_count(block.id, 4);
//! snowman.record_poll(&votes);
//! snowman.record_poll(&votes);
//! assert!(snowman.is_accepted(&block.id));
//! ```

pub mod config;
pub mod consensus;
mod engine;
mod error;
mod membership;
mod parameters;
pub mod poller;
mod routing;
mod transport;

pub use apollo_utils::Bag;
pub use config::Config;
pub use consensus::conflicts::Proposal;
pub use consensus::snowball::{
    BinarySlush, BinarySnow, BinarySnowball, BinarySnowflake, NnarySlush, NnarySnow,
    NnarySnowball, NnarySnowflake, SnowFlavor, UnarySnow, UnarySnowball, UnarySnowflake,
};
pub use consensus::snowman::DecisionCallback;
pub use consensus::{Block, ConflictGraph, ConflictSet, Conflicting, Decisions, Snowman, Status};
pub use engine::{Engine, EngineConfig, EngineHandle, EngineStats};
pub use error::{ConsensusError, Result};
pub use membership::{Membership, Peer, PeerSet};
pub use parameters::Parameters;
pub use poller::{FinishedPoll, PollState, Poller, RoundOutcome, StartedPoll};
pub use routing::Router;
pub use transport::{Query, QueryReply, Transport, TransportError};
