//! Consensus protocols.
//!
//! [`snowball`] holds the Snow decision primitives, [`conflicts`] drives
//! sets of mutually exclusive proposals and [`snowman`] drives a tree of
//! blocks toward a single accepted chain.

pub mod conflicts;
pub mod snowball;
pub mod snowman;

use std::fmt;

pub use conflicts::{ConflictGraph, ConflictSet, Conflicting, Decisions};
pub use snowball::{BinarySnow, NnarySnow, SnowFlavor, UnarySnow};
pub use snowman::{Block, Snowman};

/// Status of a decidable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Being processed
    Processing,
    /// Accepted and finalized
    Accepted,
    /// Rejected
    Rejected,
    /// Unknown status
    Unknown,
}

impl Status {
    /// Returns true if decided (accepted or rejected).
    pub fn decided(&self) -> bool {
        matches!(self, Status::Accepted | Status::Rejected)
    }

    /// Returns true if the item was accepted.
    pub fn accepted(&self) -> bool {
        matches!(self, Status::Accepted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Processing => "Processing",
            Status::Accepted => "Accepted",
            Status::Rejected => "Rejected",
            Status::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}
