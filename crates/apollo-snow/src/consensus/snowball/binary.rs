//! Binary Snow instances: deciding between choice 0 and choice 1.

use std::fmt;

/// Binary Slush: adopts the color of the last successful poll. Never decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinarySlush {
    preference: usize,
}

impl BinarySlush {
    pub fn new(initial: usize) -> Self {
        debug_assert!(initial < 2, "binary choice out of range");
        Self {
            preference: initial,
        }
    }

    pub fn preference(&self) -> usize {
        self.preference
    }

    pub fn record_poll(&mut self, majority: usize) {
        debug_assert!(majority < 2, "binary choice out of range");
        self.preference = majority;
    }
}

impl fmt::Display for BinarySlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SL(Preference = {})", self.preference)
    }
}

/// Binary Snowflake: Slush plus a counter of consecutive successful polls
/// for the current color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySnowflake {
    slush: BinarySlush,
    beta: usize,
    confidence: usize,
    finalized: bool,
}

impl BinarySnowflake {
    pub fn new(beta: usize, initial: usize) -> Self {
        Self::resume(BinarySlush::new(initial), beta, 0, false)
    }

    pub(crate) fn resume(slush: BinarySlush, beta: usize, confidence: usize, finalized: bool) -> Self {
        Self {
            slush,
            beta,
            confidence,
            finalized,
        }
    }

    pub fn preference(&self) -> usize {
        self.slush.preference()
    }

    pub fn confidence(&self) -> usize {
        self.confidence
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    pub fn record_successful_poll(&mut self, choice: usize) {
        assert!(choice < 2, "binary choice {choice} out of range");
        if self.finalized {
            return;
        }

        if self.preference() == choice {
            self.confidence += 1;
        } else {
            self.confidence = 1;
            self.slush.record_poll(choice);
        }
        self.finalized = self.confidence >= self.beta;
    }

    pub fn record_unsuccessful_poll(&mut self) {
        if self.finalized {
            return;
        }
        self.confidence = 0;
    }
}

impl fmt::Display for BinarySnowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SF(Confidence = {}, Finalized = {}, {})",
            self.confidence, self.finalized, self.slush
        )
    }
}

/// Binary Snowball: the preference is the color with the most successful
/// polls overall. The embedded Snowflake tracks the last successful color,
/// so its confidence measures the current run. Once that run finalizes, the
/// preference is the color that finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySnowball {
    snowflake: BinarySnowflake,
    preference: usize,
    num_successful_polls: [usize; 2],
}

impl BinarySnowball {
    pub fn new(beta: usize, initial: usize) -> Self {
        Self::resume(BinarySnowflake::new(beta, initial), initial, [0; 2])
    }

    pub(crate) fn resume(
        snowflake: BinarySnowflake,
        preference: usize,
        num_successful_polls: [usize; 2],
    ) -> Self {
        Self {
            snowflake,
            preference,
            num_successful_polls,
        }
    }

    pub fn preference(&self) -> usize {
        self.preference
    }

    pub fn confidence(&self) -> usize {
        self.snowflake.confidence()
    }

    pub fn finalized(&self) -> bool {
        self.snowflake.finalized()
    }

    pub fn num_successful_polls(&self, choice: usize) -> usize {
        self.num_successful_polls.get(choice).copied().unwrap_or(0)
    }

    pub fn record_successful_poll(&mut self, choice: usize) {
        assert!(choice < 2, "binary choice {choice} out of range");
        if self.finalized() {
            return;
        }

        self.num_successful_polls[choice] += 1;
        // Strict comparison: the incumbent keeps the preference on a tie.
        if self.num_successful_polls[choice] > self.num_successful_polls[self.preference] {
            self.preference = choice;
        }
        self.snowflake.record_successful_poll(choice);
        if self.snowflake.finalized() {
            self.preference = self.snowflake.preference();
        }
    }

    pub fn record_unsuccessful_poll(&mut self) {
        self.snowflake.record_unsuccessful_poll();
    }
}

impl fmt::Display for BinarySnowball {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SB(Preference = {}, NumSuccessfulPolls[0] = {}, NumSuccessfulPolls[1] = {}, {})",
            self.preference,
            self.num_successful_polls[0],
            self.num_successful_polls[1],
            self.snowflake
        )
    }
}
