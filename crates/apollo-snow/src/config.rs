//! File configuration.
//!
//! ```toml
//! [consensus]
//! k = 20
//! alpha = 15
//! beta_virtuous = 15
//! beta_rogue = 20
//! concurrent_repolls = 4
//! query_timeout_ms = 2000
//! flavor = "snowball"
//!
//! [engine]
//! tick_interval_ms = 50
//! auto_poll = true
//!
//! [logging]
//! level = "info"
//! directives = ["apollo_snow::poller=debug"]
//! ```
//!
//! Every table and key is optional; missing values take their defaults.

use std::path::Path;
use std::time::Duration;

use apollo_ids::Id;
use apollo_utils::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};

use crate::consensus::SnowFlavor;
use crate::engine::EngineConfig;
use crate::{ConsensusError, Parameters, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub consensus: ConsensusConfig,
    pub engine: WorkerConfig,
    pub logging: LoggingConfig,
}

/// The `[consensus]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub k: usize,
    pub alpha: usize,
    pub beta_virtuous: usize,
    pub beta_rogue: usize,
    pub concurrent_repolls: usize,
    pub query_timeout_ms: u64,
    pub flavor: SnowFlavor,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let params = Parameters::default();
        Self {
            k: params.k,
            alpha: params.alpha,
            beta_virtuous: params.beta_virtuous,
            beta_rogue: params.beta_rogue,
            concurrent_repolls: params.concurrent_repolls,
            query_timeout_ms: params.query_timeout.as_millis() as u64,
            flavor: params.flavor,
        }
    }
}

/// The `[engine]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Consensus instance served, as CB58
    pub context: Id,
    pub genesis_id: Id,
    pub genesis_height: u64,
    pub tick_interval_ms: u64,
    pub auto_poll: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            context: Id::EMPTY,
            genesis_id: Id::EMPTY,
            genesis_height: 0,
            tick_interval_ms: 50,
            auto_poll: true,
        }
    }
}

/// The `[logging]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directives: Vec<String>,
    pub json: bool,
    pub file_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default().to_string(),
            directives: Vec::new(),
            json: false,
            file_line: false,
        }
    }
}

impl Config {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConsensusError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConsensusError::Config(e.to_string()))
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConsensusError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| ConsensusError::Config(format!("{}: {e}", path.display())))
    }

    /// Returns validated consensus parameters.
    pub fn parameters(&self) -> Result<Parameters> {
        let c = &self.consensus;
        let params = Parameters {
            k: c.k,
            alpha: c.alpha,
            beta_virtuous: c.beta_virtuous,
            beta_rogue: c.beta_rogue,
            concurrent_repolls: c.concurrent_repolls,
            query_timeout: Duration::from_millis(c.query_timeout_ms),
            flavor: c.flavor,
        };
        params.validate().map_err(ConsensusError::InvalidParameters)?;
        Ok(params)
    }

    /// Returns the worker settings.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let e = &self.engine;
        if e.tick_interval_ms == 0 {
            return Err(ConsensusError::Config(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(EngineConfig::new(e.context, e.genesis_id, self.parameters()?)
            .with_genesis_height(e.genesis_height)
            .with_tick_interval(Duration::from_millis(e.tick_interval_ms))
            .with_auto_poll(e.auto_poll))
    }

    /// Returns the logging setup.
    pub fn log_config(&self) -> Result<LogConfig> {
        let level = self
            .logging
            .level
            .parse::<LogLevel>()
            .map_err(|e| ConsensusError::Config(e.to_string()))?;
        let mut config = LogConfig::new()
            .with_level(level)
            .with_file_line(self.logging.file_line)
            .with_json(self.logging.json);
        for directive in &self.logging.directives {
            config = config.with_directive(directive.clone());
        }
        Ok(config)
    }
}
