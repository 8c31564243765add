//! 20-byte peer identifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::cb58::{decode_cb58, encode_cb58, Cb58Error};
use crate::NODE_ID_LEN;

/// The prefix for NodeID string representations.
pub const NODE_ID_PREFIX: &str = "NodeID-";

/// A 20-byte identifier for a peer in the membership.
///
/// Peers sampled for a poll are addressed by `NodeId`. Identity derivation
/// (certificates, keys) belongs to the membership layer; [`NodeId::from_key`]
/// only offers a stable hash-based mapping for embedders and tests.
///
/// ```
/// use apollo_ids::NodeId;
///
/// let id = NodeId::from_bytes([0u8; 20]);
/// assert!(id.to_string().starts_with("NodeID-"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId([u8; NODE_ID_LEN]);

/// Errors that can occur when parsing a NodeID.
#[derive(Debug, Error)]
pub enum NodeIdError {
    /// The CB58 decoding failed.
    #[error("cb58 decoding failed: {0}")]
    Cb58(#[from] Cb58Error),

    /// The decoded bytes have the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The NodeID string is missing the required prefix.
    #[error("missing NodeID- prefix")]
    MissingPrefix,
}

impl NodeId {
    /// The empty (zero) NodeID.
    pub const EMPTY: Self = Self([0u8; NODE_ID_LEN]);

    /// Creates a NodeID from a 20-byte array.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a NodeID from a slice.
    ///
    /// # Errors
    ///
    /// Returns `NodeIdError::InvalidLength` if the slice is not exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, NodeIdError> {
        let arr: [u8; NODE_ID_LEN] =
            bytes
                .try_into()
                .map_err(|_| NodeIdError::InvalidLength {
                    expected: NODE_ID_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Derives a NodeID from the first 20 bytes of SHA-256(`key`).
    #[must_use]
    pub fn from_key(key: &[u8]) -> Self {
        let hash = Sha256::digest(key);
        let mut arr = [0u8; NODE_ID_LEN];
        arr.copy_from_slice(&hash[..NODE_ID_LEN]);
        Self(arr)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Returns true if this is the empty (zero) NodeID.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; NODE_ID_LEN]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NODE_ID_PREFIX}{}", encode_cb58(&self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s
            .strip_prefix(NODE_ID_PREFIX)
            .ok_or(NodeIdError::MissingPrefix)?;
        let bytes = decode_cb58(stripped)?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; NODE_ID_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}
