//! Error types for consensus.

use apollo_ids::Id;
use thiserror::Error;

use crate::transport::TransportError;

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors that can occur during consensus operations.
///
/// Peer misbehaviour never surfaces here: malformed or late replies are
/// counted as missing replies inside the round that received them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Parameters failed validation
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The block's parent is neither processing nor the last accepted block
    #[error("block {block} has unknown or decided parent {parent}")]
    BadParent { block: Id, parent: Id },

    /// The block id is already known
    #[error("duplicate block: {0}")]
    DuplicateBlock(Id),

    /// The block height is not its parent's height plus one
    #[error("block {block} has height {actual}, expected {expected}")]
    InvalidHeight { block: Id, expected: u64, actual: u64 },

    /// The proposal id is already known to the conflict graph
    #[error("duplicate proposal: {0}")]
    DuplicateProposal(Id),

    /// The membership cannot supply k distinct peers
    #[error("not enough peers: need {needed}, have {have}")]
    NoPeers { needed: usize, have: usize },

    /// A single peer query failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A poll round ran past its deadline
    #[error("poll {0} exceeded its deadline")]
    DeadlineExceeded(u32),

    /// No service is bound for the requested context
    #[error("no service bound for context {0}")]
    NotFound(Id),

    /// The consensus worker has stopped
    #[error("consensus worker is shut down")]
    Shutdown,

    /// Configuration could not be read or parsed
    #[error("config error: {0}")]
    Config(String),
}

impl ConsensusError {
    /// Returns true for errors the caller may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConsensusError::NoPeers { .. }
                | ConsensusError::Transport(_)
                | ConsensusError::DeadlineExceeded(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ConsensusError::NoPeers { needed: 5, have: 2 }.is_retryable());
        assert!(ConsensusError::DeadlineExceeded(7).is_retryable());
        assert!(!ConsensusError::Shutdown.is_retryable());
        assert!(!ConsensusError::DuplicateBlock(Id::EMPTY).is_retryable());
    }

    #[test]
    fn test_transport_conversion() {
        let err: ConsensusError = TransportError::Unreachable("peer".into()).into();
        assert!(matches!(err, ConsensusError::Transport(_)));
    }
}
