//! Transport abstraction for peer queries.
//!
//! A query carries the local preference for a context; the reply carries
//! the peer's preference. On the wire a reply payload is exactly one
//! 32-byte [`Id`], and the request id travels in the envelope.

use async_trait::async_trait;
use thiserror::Error;

use apollo_ids::{Id, NodeId, ID_LEN};

/// Errors produced by a single peer query.
///
/// Inside a poll round every one of these counts as a missing reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("query timed out")]
    Timeout,

    #[error("reply for request {actual}, expected {expected}")]
    RequestIdMismatch { expected: u32, actual: u32 },

    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The peer has no service bound for the query's context.
    #[error("context not found")]
    NotFound,
}

/// A request for a peer's preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub request_id: u32,
    /// Consensus instance the query belongs to
    pub context: Id,
    pub preferred_id: Id,
    pub preferred_bytes: Vec<u8>,
}

/// A peer's answer to a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryReply {
    pub request_id: u32,
    pub preferred_id: Id,
}

impl QueryReply {
    pub fn new(request_id: u32, preferred_id: Id) -> Self {
        Self {
            request_id,
            preferred_id,
        }
    }

    /// Returns the wire payload.
    pub fn encode(&self) -> Vec<u8> {
        self.preferred_id.as_bytes().to_vec()
    }

    /// Parses a wire payload received for `request_id`.
    pub fn decode(request_id: u32, payload: &[u8]) -> Result<Self, TransportError> {
        if payload.len() != ID_LEN {
            return Err(TransportError::Malformed(format!(
                "expected {} bytes, got {}",
                ID_LEN,
                payload.len()
            )));
        }
        let preferred_id =
            Id::from_slice(payload).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(Self::new(request_id, preferred_id))
    }

    /// Checks that the reply answers request `expected`.
    pub fn verify(&self, expected: u32) -> Result<(), TransportError> {
        if self.request_id != expected {
            return Err(TransportError::RequestIdMismatch {
                expected,
                actual: self.request_id,
            });
        }
        Ok(())
    }
}

/// Sends queries to peers.
///
/// Authentication of replies is the transport's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn query(&self, peer: NodeId, query: Query) -> Result<QueryReply, TransportError>;
}
