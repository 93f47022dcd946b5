//! Configuration types for a cosim run.

use cosim_protocol::ProtocolConfig;
use cosim_types::{GroupColor, RankLayout};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors loading or validating a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One simulator group's population.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PopulationConfig {
    /// Entities in the whole group, spread over its ranks.
    pub entities: u32,

    /// Mean spikes per entity per simulation time unit.
    pub rate: f64,

    /// Smallest delay the group tolerates between exchanges.
    ///
    /// The group's communication estimate is half of this.
    pub min_delay: f32,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            entities: 100,
            rate: 0.05,
            min_delay: 2.0,
        }
    }
}

impl PopulationConfig {
    pub fn new(entities: u32, rate: f64, min_delay: f32) -> Self {
        Self {
            entities,
            rate,
            min_delay,
        }
    }

    /// Value announced in the handshake.
    pub fn comm_estimate(&self) -> f32 {
        self.min_delay / 2.0
    }
}

/// How worker processes of a multi-process job reach each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Hub-and-spoke TCP, placed by the `COSIM_*` environment.
    #[default]
    Tcp,
    /// The MPI world the process was started in, e.g. by `mpiexec`.
    Mpi,
}

impl Transport {
    /// Whether this build can run the transport.
    pub fn is_available(self) -> bool {
        match self {
            Transport::Tcp => true,
            Transport::Mpi => cfg!(feature = "mpi"),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Mpi => write!(f, "mpi"),
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "mpi" => Ok(Transport::Mpi),
            _ => Err(format!("Unknown transport: {}", s)),
        }
    }
}

/// Configuration for a whole run: every rank must load the same one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Total number of ranks in the job.
    pub ranks: usize,

    /// How many of them run the leaf group.
    pub leaf_ranks: usize,

    /// How colors are assigned to ranks.
    pub layout: RankLayout,

    /// Base seed; each rank derives its own from it.
    pub seed: u64,

    /// Transport for worker processes. Local runs always use threads.
    pub transport: Transport,

    pub leaf: PopulationConfig,

    pub host: PopulationConfig,

    pub protocol: ProtocolConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ranks: 4,
            leaf_ranks: 2,
            layout: RankLayout::default(),
            seed: 12345,
            transport: Transport::default(),
            leaf: PopulationConfig::default(),
            host: PopulationConfig::new(40, 0.1, 3.0),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl RunConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Set the job shape.
    pub fn with_ranks(mut self, ranks: usize, leaf_ranks: usize) -> Self {
        self.ranks = ranks;
        self.leaf_ranks = leaf_ranks;
        self
    }

    /// Set the rank layout.
    pub fn with_layout(mut self, layout: RankLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set one group's population.
    pub fn with_population(mut self, color: GroupColor, population: PopulationConfig) -> Self {
        match color {
            GroupColor::Leaf => self.leaf = population,
            GroupColor::Host => self.host = population,
        }
        self
    }

    /// Set the protocol configuration.
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn population(&self, color: GroupColor) -> &PopulationConfig {
        match color {
            GroupColor::Leaf => &self.leaf,
            GroupColor::Host => &self.host,
        }
    }

    /// Color of every rank, indexed by rank.
    pub fn colors(&self) -> Vec<GroupColor> {
        self.layout.colors(self.ranks, self.leaf_ranks)
    }

    /// Seed for one rank's random stream.
    pub fn rank_seed(&self, rank: usize) -> u64 {
        self.seed.wrapping_add(rank as u64)
    }

    /// Reject shapes the protocol cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leaf_ranks == 0 || self.leaf_ranks >= self.ranks {
            return Err(ConfigError::Invalid(format!(
                "{} leaf ranks out of {} leaves a group empty",
                self.leaf_ranks, self.ranks
            )));
        }
        if !self.transport.is_available() {
            return Err(ConfigError::Invalid(format!(
                "transport {} needs a build with the {} feature",
                self.transport, self.transport
            )));
        }
        if self.protocol.collective_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "collective timeout must be at least 1 ms; omit it to block forever".into(),
            ));
        }
        for color in GroupColor::ALL {
            let population = self.population(color);
            if !(population.rate.is_finite() && population.rate >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} spike rate {} must be finite and non-negative",
                    color, population.rate
                )));
            }
        }
        Ok(())
    }
}
