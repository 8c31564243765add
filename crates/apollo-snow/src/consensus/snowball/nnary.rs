//! N-ary Snow instances: deciding among an open set of [`Id`] choices.

use std::collections::HashMap;
use std::fmt;

use apollo_ids::Id;

/// N-ary Slush: adopts the choice of the last successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NnarySlush {
    preference: Id,
}

impl NnarySlush {
    pub fn new(initial: Id) -> Self {
        Self {
            preference: initial,
        }
    }

    pub fn preference(&self) -> Id {
        self.preference
    }

    pub fn record_poll(&mut self, majority: Id) {
        self.preference = majority;
    }
}

impl fmt::Display for NnarySlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SL(Preference = {})", self.preference)
    }
}

/// N-ary Snowflake.
///
/// The instance starts virtuous and turns rogue as soon as a choice other
/// than its preference is added. A virtuous instance finalizes after
/// `beta_virtuous` consecutive successes, a rogue one after `beta_rogue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NnarySnowflake {
    slush: NnarySlush,
    beta_virtuous: usize,
    beta_rogue: usize,
    confidence: usize,
    rogue: bool,
    finalized: bool,
}

impl NnarySnowflake {
    pub fn new(beta_virtuous: usize, beta_rogue: usize, initial: Id) -> Self {
        Self::resume(NnarySlush::new(initial), beta_virtuous, beta_rogue, 0, false)
    }

    pub(crate) fn resume(
        slush: NnarySlush,
        beta_virtuous: usize,
        beta_rogue: usize,
        confidence: usize,
        finalized: bool,
    ) -> Self {
        Self {
            slush,
            beta_virtuous,
            beta_rogue,
            confidence,
            rogue: false,
            finalized,
        }
    }

    /// Registers a competing choice.
    pub fn add(&mut self, choice: Id) {
        self.rogue = self.rogue || choice != self.slush.preference();
    }

    pub fn preference(&self) -> Id {
        self.slush.preference()
    }

    pub fn confidence(&self) -> usize {
        self.confidence
    }

    pub fn is_rogue(&self) -> bool {
        self.rogue
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    pub fn record_successful_poll(&mut self, choice: Id) {
        if self.finalized {
            return;
        }

        if self.preference() == choice {
            self.confidence += 1;
        } else {
            self.confidence = 1;
            self.slush.record_poll(choice);
        }

        self.finalized = (!self.rogue && self.confidence >= self.beta_virtuous)
            || self.confidence >= self.beta_rogue;
    }

    pub fn record_unsuccessful_poll(&mut self) {
        if self.finalized {
            return;
        }
        self.confidence = 0;
    }
}

impl fmt::Display for NnarySnowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SF(Confidence = {}, Finalized = {}, Rogue = {}, {})",
            self.confidence, self.finalized, self.rogue, self.slush
        )
    }
}

/// N-ary Snowball.
///
/// Until the instance finalizes, `preference` has the maximal entry in
/// `num_successful_polls` and a challenger takes over only when its total
/// strictly exceeds the incumbent's. Once the embedded Snowflake finalizes,
/// the preference is the choice it finalized on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NnarySnowball {
    snowflake: NnarySnowflake,
    preference: Id,
    max_successful_polls: usize,
    num_successful_polls: HashMap<Id, usize>,
}

impl NnarySnowball {
    pub fn new(beta_virtuous: usize, beta_rogue: usize, initial: Id) -> Self {
        Self::resume(
            NnarySnowflake::new(beta_virtuous, beta_rogue, initial),
            initial,
            0,
        )
    }

    pub(crate) fn resume(snowflake: NnarySnowflake, preference: Id, polls: usize) -> Self {
        let mut num_successful_polls = HashMap::new();
        if polls > 0 {
            num_successful_polls.insert(preference, polls);
        }
        Self {
            snowflake,
            preference,
            max_successful_polls: polls,
            num_successful_polls,
        }
    }

    pub fn add(&mut self, choice: Id) {
        self.snowflake.add(choice);
    }

    pub fn preference(&self) -> Id {
        self.preference
    }

    pub fn confidence(&self) -> usize {
        self.snowflake.confidence()
    }

    pub fn is_rogue(&self) -> bool {
        self.snowflake.is_rogue()
    }

    pub fn finalized(&self) -> bool {
        self.snowflake.finalized()
    }

    pub fn num_successful_polls(&self, choice: &Id) -> usize {
        self.num_successful_polls.get(choice).copied().unwrap_or(0)
    }

    pub fn record_successful_poll(&mut self, choice: Id) {
        if self.finalized() {
            return;
        }

        let polls = self.num_successful_polls.entry(choice).or_insert(0);
        *polls += 1;
        if *polls > self.max_successful_polls {
            self.preference = choice;
            self.max_successful_polls = *polls;
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

impl fmt::Display for NnarySnowball {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SB(Preference = {}, MaxSuccessfulPolls = {}, {})",
            self.preference, self.max_successful_polls, self.snowflake
        )
    }
}
