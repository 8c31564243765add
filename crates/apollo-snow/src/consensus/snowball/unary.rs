//! Unary Snow instances: deciding whether to accept a single value.
//!
//! After sampling k peers, a poll is successful if α of them voted for the
//! value. Successful polls build confidence; any unsuccessful poll resets it.

use std::fmt;

use apollo_ids::Id;

use super::binary::{BinarySlush, BinarySnowball, BinarySnowflake};
use super::nnary::{NnarySlush, NnarySnowball, NnarySnowflake};

/// Unary Snowflake: counts consecutive successful polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnarySnowflake {
    beta: usize,
    confidence: usize,
    finalized: bool,
}

impl UnarySnowflake {
    /// Creates an instance that finalizes after `beta` consecutive successes.
    pub fn new(beta: usize) -> Self {
        Self {
            beta,
            confidence: 0,
            finalized: false,
        }
    }

    pub fn record_successful_poll(&mut self) {
        if self.finalized {
            return;
        }
        self.confidence += 1;
        self.finalized = self.confidence >= self.beta;
    }

    pub fn record_unsuccessful_poll(&mut self) {
        if self.finalized {
            return;
        }
        self.confidence = 0;
    }

    pub fn confidence(&self) -> usize {
        self.confidence
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    /// Converts into a binary instance once a second value is observed.
    ///
    /// `original_preference` (0 or 1) inherits the accumulated confidence.
    pub fn extend(&self, beta: usize, original_preference: usize) -> BinarySnowflake {
        BinarySnowflake::resume(
            BinarySlush::new(original_preference),
            beta,
            self.confidence,
            self.finalized,
        )
    }

    /// Converts into an n-ary instance preferring `original` with `other` added.
    pub fn extend_nnary(
        &self,
        beta_virtuous: usize,
        beta_rogue: usize,
        original: Id,
        other: Id,
    ) -> NnarySnowflake {
        let mut snowflake = NnarySnowflake::resume(
            NnarySlush::new(original),
            beta_virtuous,
            beta_rogue,
            self.confidence,
            self.finalized,
        );
        snowflake.add(other);
        snowflake
    }
}

impl fmt::Display for UnarySnowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SF(Confidence = {}, Finalized = {})",
            self.confidence, self.finalized
        )
    }
}

/// Unary Snowball: a Snowflake that also keeps a running total of successes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnarySnowball {
    snowflake: UnarySnowflake,
    num_successful_polls: usize,
}

impl UnarySnowball {
    pub fn new(beta: usize) -> Self {
        Self {
            snowflake: UnarySnowflake::new(beta),
            num_successful_polls: 0,
        }
    }

    pub fn record_successful_poll(&mut self) {
        if self.finalized() {
            return;
        }
        self.num_successful_polls += 1;
        self.snowflake.record_successful_poll();
    }

    pub fn record_unsuccessful_poll(&mut self) {
        self.snowflake.record_unsuccessful_poll();
    }

    pub fn confidence(&self) -> usize {
        self.snowflake.confidence()
    }

    pub fn num_successful_polls(&self) -> usize {
        self.num_successful_polls
    }

    pub fn finalized(&self) -> bool {
        self.snowflake.finalized()
    }

    /// Converts into a binary Snowball once a second value is observed.
    ///
    /// The result prefers `original_preference`, carries this instance's
    /// confidence, credits its running total to `original_preference` and
    /// starts the alternative at zero.
    pub fn extend(&self, beta: usize, original_preference: usize) -> BinarySnowball {
        let mut num_successful_polls = [0; 2];
        num_successful_polls[original_preference] = self.num_successful_polls;
        BinarySnowball::resume(
            self.snowflake.extend(beta, original_preference),
            original_preference,
            num_successful_polls,
        )
    }

    /// Converts into an n-ary Snowball preferring `original` with `other` added.
    pub fn extend_nnary(
        &self,
        beta_virtuous: usize,
        beta_rogue: usize,
        original: Id,
        other: Id,
    ) -> NnarySnowball {
        let snowflake = self
            .snowflake
            .extend_nnary(beta_virtuous, beta_rogue, original, other);
        NnarySnowball::resume(snowflake, original, self.num_successful_polls)
    }
}

impl fmt::Display for UnarySnowball {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SB(NumSuccessfulPolls = {}, {})",
            self.num_successful_polls, self.snowflake
        )
    }
}
