//! The Snow family of decision primitives.
//!
//! Each level adds one property to the level below:
//!
//! - Slush adopts the color of the last successful poll and never decides
//! - Snowflake counts consecutive successes and decides at β
//! - Snowball additionally keeps a running total per choice and prefers the
//!   choice with the most successful polls
//!
//! Unary instances decide whether to accept a single value, binary instances
//! choose between `0` and `1`, and n-ary instances choose among [`Id`]s.
//! [`UnarySnow`], [`BinarySnow`] and [`NnarySnow`] select the level at
//! runtime from a [`SnowFlavor`].

mod binary;
mod nnary;
mod unary;

use std::fmt;
use std::str::FromStr;

use apollo_ids::Id;
use serde::{Deserialize, Serialize};

pub use binary::{BinarySlush, BinarySnowball, BinarySnowflake};
pub use nnary::{NnarySlush, NnarySnowball, NnarySnowflake};
pub use unary::{UnarySnowball, UnarySnowflake};

/// Member of the Snow family driving a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnowFlavor {
    Slush,
    Snowflake,
    #[default]
    Snowball,
}

impl fmt::Display for SnowFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnowFlavor::Slush => write!(f, "slush"),
            SnowFlavor::Snowflake => write!(f, "snowflake"),
            SnowFlavor::Snowball => write!(f, "snowball"),
        }
    }
}

impl FromStr for SnowFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slush" => Ok(SnowFlavor::Slush),
            "snowflake" => Ok(SnowFlavor::Snowflake),
            "snowball" => Ok(SnowFlavor::Snowball),
            other => Err(format!("unknown snow flavor: {other}")),
        }
    }
}

/// A unary decision of any flavor.
///
/// A unary Slush has no state to keep: it never finalizes and ignores polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnarySnow {
    Slush,
    Snowflake(UnarySnowflake),
    Snowball(UnarySnowball),
}

impl UnarySnow {
    pub fn new(flavor: SnowFlavor, beta: usize) -> Self {
        match flavor {
            SnowFlavor::Slush => UnarySnow::Slush,
            SnowFlavor::Snowflake => UnarySnow::Snowflake(UnarySnowflake::new(beta)),
            SnowFlavor::Snowball => UnarySnow::Snowball(UnarySnowball::new(beta)),
        }
    }

    pub fn flavor(&self) -> SnowFlavor {
        match self {
            UnarySnow::Slush => SnowFlavor::Slush,
            UnarySnow::Snowflake(_) => SnowFlavor::Snowflake,
            UnarySnow::Snowball(_) => SnowFlavor::Snowball,
        }
    }

    pub fn confidence(&self) -> usize {
        match self {
            UnarySnow::Slush => 0,
            UnarySnow::Snowflake(sf) => sf.confidence(),
            UnarySnow::Snowball(sb) => sb.confidence(),
        }
    }

    pub fn finalized(&self) -> bool {
        match self {
            UnarySnow::Slush => false,
            UnarySnow::Snowflake(sf) => sf.finalized(),
            UnarySnow::Snowball(sb) => sb.finalized(),
        }
    }

    pub fn record_successful_poll(&mut self) {
        match self {
            UnarySnow::Slush => {}
            UnarySnow::Snowflake(sf) => sf.record_successful_poll(),
            UnarySnow::Snowball(sb) => sb.record_successful_poll(),
        }
    }

    pub fn record_unsuccessful_poll(&mut self) {
        match self {
            UnarySnow::Slush => {}
            UnarySnow::Snowflake(sf) => sf.record_unsuccessful_poll(),
            UnarySnow::Snowball(sb) => sb.record_unsuccessful_poll(),
        }
    }

    /// Converts into a binary decision preferring `original_preference`.
    pub fn extend(&self, beta: usize, original_preference: usize) -> BinarySnow {
        match self {
            UnarySnow::Slush => BinarySnow::Slush(BinarySlush::new(original_preference)),
            UnarySnow::Snowflake(sf) => BinarySnow::Snowflake(sf.extend(beta, original_preference)),
            UnarySnow::Snowball(sb) => BinarySnow::Snowball(sb.extend(beta, original_preference)),
        }
    }

    /// Converts into an n-ary decision preferring `original` with `other`
    /// registered as a competitor.
    pub fn extend_nnary(
        &self,
        beta_virtuous: usize,
        beta_rogue: usize,
        original: Id,
        other: Id,
    ) -> NnarySnow {
        match self {
            UnarySnow::Slush => NnarySnow::Slush(NnarySlush::new(original)),
            UnarySnow::Snowflake(sf) => NnarySnow::Snowflake(sf.extend_nnary(
                beta_virtuous,
                beta_rogue,
                original,
                other,
            )),
            UnarySnow::Snowball(sb) => NnarySnow::Snowball(sb.extend_nnary(
                beta_virtuous,
                beta_rogue,
                original,
                other,
            )),
        }
    }
}

impl fmt::Display for UnarySnow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnarySnow::Slush => write!(f, "SL()"),
            UnarySnow::Snowflake(sf) => write!(f, "{sf}"),
            UnarySnow::Snowball(sb) => write!(f, "{sb}"),
        }
    }
}

/// A binary decision of any flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySnow {
    Slush(BinarySlush),
    Snowflake(BinarySnowflake),
    Snowball(BinarySnowball),
}

impl BinarySnow {
    pub fn new(flavor: SnowFlavor, beta: usize, initial: usize) -> Self {
        match flavor {
            SnowFlavor::Slush => BinarySnow::Slush(BinarySlush::new(initial)),
            SnowFlavor::Snowflake => BinarySnow::Snowflake(BinarySnowflake::new(beta, initial)),
            SnowFlavor::Snowball => BinarySnow::Snowball(BinarySnowball::new(beta, initial)),
        }
    }

    pub fn preference(&self) -> usize {
        match self {
            BinarySnow::Slush(sl) => sl.preference(),
            BinarySnow::Snowflake(sf) => sf.preference(),
            BinarySnow::Snowball(sb) => sb.preference(),
        }
    }

    pub fn confidence(&self) -> usize {
        match self {
            BinarySnow::Slush(_) => 0,
            BinarySnow::Snowflake(sf) => sf.confidence(),
            BinarySnow::Snowball(sb) => sb.confidence(),
        }
    }

    pub fn finalized(&self) -> bool {
        match self {
            BinarySnow::Slush(_) => false,
            BinarySnow::Snowflake(sf) => sf.finalized(),
            BinarySnow::Snowball(sb) => sb.finalized(),
        }
    }

    pub fn record_successful_poll(&mut self, choice: usize) {
        match self {
            BinarySnow::Slush(sl) => sl.record_poll(choice),
            BinarySnow::Snowflake(sf) => sf.record_successful_poll(choice),
            BinarySnow::Snowball(sb) => sb.record_successful_poll(choice),
        }
    }

    pub fn record_unsuccessful_poll(&mut self) {
        match self {
            BinarySnow::Slush(_) => {}
            BinarySnow::Snowflake(sf) => sf.record_unsuccessful_poll(),
            BinarySnow::Snowball(sb) => sb.record_unsuccessful_poll(),
        }
    }
}

impl fmt::Display for BinarySnow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinarySnow::Slush(sl) => write!(f, "{sl}"),
            BinarySnow::Snowflake(sf) => write!(f, "{sf}"),
            BinarySnow::Snowball(sb) => write!(f, "{sb}"),
        }
    }
}

/// An n-ary decision of any flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NnarySnow {
    Slush(NnarySlush),
    Snowflake(NnarySnowflake),
    Snowball(NnarySnowball),
}

impl NnarySnow {
    pub fn new(flavor: SnowFlavor, beta_virtuous: usize, beta_rogue: usize, initial: Id) -> Self {
        match flavor {
            SnowFlavor::Slush => NnarySnow::Slush(NnarySlush::new(initial)),
            SnowFlavor::Snowflake => {
                NnarySnow::Snowflake(NnarySnowflake::new(beta_virtuous, beta_rogue, initial))
            }
            SnowFlavor::Snowball => {
                NnarySnow::Snowball(NnarySnowball::new(beta_virtuous, beta_rogue, initial))
            }
        }
    }

    /// Registers a competing choice.
    pub fn add(&mut self, choice: Id) {
        match self {
            NnarySnow::Slush(_) => {}
            NnarySnow::Snowflake(sf) => sf.add(choice),
            NnarySnow::Snowball(sb) => sb.add(choice),
        }
    }

    pub fn preference(&self) -> Id {
        match self {
            NnarySnow::Slush(sl) => sl.preference(),
            NnarySnow::Snowflake(sf) => sf.preference(),
            NnarySnow::Snowball(sb) => sb.preference(),
        }
    }

    pub fn confidence(&self) -> usize {
        match self {
            NnarySnow::Slush(_) => 0,
            NnarySnow::Snowflake(sf) => sf.confidence(),
            NnarySnow::Snowball(sb) => sb.confidence(),
        }
    }

    pub fn finalized(&self) -> bool {
        match self {
            NnarySnow::Slush(_) => false,
            NnarySnow::Snowflake(sf) => sf.finalized(),
            NnarySnow::Snowball(sb) => sb.finalized(),
        }
    }

    pub fn record_successful_poll(&mut self, choice: Id) {
        match self {
            NnarySnow::Slush(sl) => sl.record_poll(choice),
            NnarySnow::Snowflake(sf) => sf.record_successful_poll(choice),
            NnarySnow::Snowball(sb) => sb.record_successful_poll(choice),
        }
    }

    pub fn record_unsuccessful_poll(&mut self) {
        match self {
            NnarySnow::Slush(_) => {}
            NnarySnow::Snowflake(sf) => sf.record_unsuccessful_poll(),
            NnarySnow::Snowball(sb) => sb.record_unsuccessful_poll(),
        }
    }
}

impl fmt::Display for NnarySnow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NnarySnow::Slush(sl) => write!(f, "{sl}"),
            NnarySnow::Snowflake(sf) => write!(f, "{sf}"),
            NnarySnow::Snowball(sb) => write!(f, "{sb}"),
        }
    }
}
