//! Consensus parameters.

use std::time::Duration;

use crate::consensus::SnowFlavor;

/// Parameters for Snow consensus protocols.
///
/// `Parameters::new` and struct literals are unchecked; every consumer
/// calls [`Parameters::validate`] before using them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    /// Sample size (k) - number of peers to poll
    pub k: usize,

    /// Quorum size (alpha) - votes needed for a successful poll
    pub alpha: usize,

    /// Beta for virtuous decisions - consecutive successes needed
    pub beta_virtuous: usize,

    /// Beta for rogue decisions - consecutive successes needed when conflicting
    pub beta_rogue: usize,

    /// Poll rounds allowed in flight at once
    pub concurrent_repolls: usize,

    /// Deadline for a single poll round
    pub query_timeout: Duration,

    /// Which member of the Snow family drives binary and n-ary decisions
    pub flavor: SnowFlavor,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            k: 20,
            alpha: 15,
            beta_virtuous: 15,
            beta_rogue: 20,
            concurrent_repolls: 4,
            query_timeout: Duration::from_secs(2),
            flavor: SnowFlavor::Snowball,
        }
    }
}

impl Parameters {
    /// Creates new parameters with the given values.
    pub fn new(k: usize, alpha: usize, beta_virtuous: usize, beta_rogue: usize) -> Self {
        Self {
            k,
            alpha,
            beta_virtuous,
            beta_rogue,
            concurrent_repolls: 1,
            ..Default::default()
        }
    }

    /// Sets the poll deadline.
    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Sets the number of concurrent poll rounds.
    #[must_use]
    pub fn with_concurrent_repolls(mut self, repolls: usize) -> Self {
        self.concurrent_repolls = repolls;
        self
    }

    /// Sets the Snow flavor.
    #[must_use]
    pub fn with_flavor(mut self, flavor: SnowFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.k == 0 {
            return Err("k must be positive".to_string());
        }
        if self.alpha * 2 <= self.k {
            return Err(format!(
                "alpha ({}) must be greater than k/2 ({}/2)",
                self.alpha, self.k
            ));
        }
        if self.alpha > self.k {
            return Err(format!("alpha ({}) must be <= k ({})", self.alpha, self.k));
        }
        if self.beta_virtuous == 0 {
            return Err("beta_virtuous must be positive".to_string());
        }
        if self.beta_rogue < self.beta_virtuous {
            return Err(format!(
                "beta_rogue ({}) must be >= beta_virtuous ({})",
                self.beta_rogue, self.beta_virtuous
            ));
        }
        if self.concurrent_repolls == 0 {
            return Err("concurrent_repolls must be positive".to_string());
        }
        if self.concurrent_repolls > self.beta_virtuous {
            return Err(format!(
                "concurrent_repolls ({}) must be <= beta_virtuous ({})",
                self.concurrent_repolls, self.beta_virtuous
            ));
        }
        if self.query_timeout.is_zero() {
            return Err("query_timeout must be non-zero".to_string());
        }
        Ok(())
    }

    /// Finalization threshold for a decision with or without conflicts.
    pub fn beta(&self, rogue: bool) -> usize {
        if rogue {
            self.beta_rogue
        } else {
            self.beta_virtuous
        }
    }
}
