//! Running the toy populations over a real transport.
//!
//! [`run_local`] runs every rank as a thread of the current process over
//! in-memory channels. [`run_worker`] runs a single rank of a multi-process
//! job over the configured [`Transport`]: over MPI the process takes its
//! place from the MPI world, over TCP from [`WorkerEnv`].

use crate::config::{ConfigError, RunConfig, Transport};
use crate::metrics::{MetricsCollector, RankReport};
use crate::population::PoissonPopulation;
use cosim_core::{CollectiveChannel, CollectiveError};
use cosim_network_memory::{run_cluster, MemoryConfig};
use cosim_network_tcp::{TcpChannel, TcpConfig};
use cosim_protocol::{run_session, CoordinationContext, CoordinationError};
use cosim_types::{GroupColor, Rank};
use std::net::SocketAddr;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Rank of a worker process.
pub const RANK_ENV: &str = "COSIM_RANK";
/// Number of ranks in the job.
pub const SIZE_ENV: &str = "COSIM_SIZE";
/// Optional color override; without it the configured layout decides.
pub const COLOR_ENV: &str = "COSIM_COLOR";
/// Address of the rank 0 hub.
pub const HUB_ENV: &str = "COSIM_HUB";
/// The whole run configuration as TOML, so every worker loads the same one.
pub const CONFIG_ENV: &str = "COSIM_CONFIG";

/// Errors from a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("worker environment: {0}")]
    Env(String),

    #[error("joining the job: {0}")]
    Transport(#[from] CollectiveError),

    #[error("{rank} failed: {source}")]
    Rank {
        rank: Rank,
        #[source]
        source: CoordinationError,
    },
}

/// Run one rank to completion over `channel`.
pub fn run_rank<C>(
    config: &RunConfig,
    color: GroupColor,
    channel: &mut C,
) -> Result<RankReport, CoordinationError>
where
    C: CollectiveChannel + ?Sized,
{
    let ctx = CoordinationContext::for_channel(channel, color, config.protocol.clone());
    let seed = config.rank_seed(ctx.rank().index());
    let mut population = PoissonPopulation::new(color, config.population(color).clone(), seed);
    let mut metrics = MetricsCollector::new();

    let session = run_session(&ctx, channel, &mut population, |step| {
        metrics.observe(step)
    })?;

    ctx.span().in_scope(|| {
        info!(
            steps = session.summary.steps,
            emitted = population.emitted(),
            foreign = population.foreign_received(),
            "Rank finished"
        );
    });
    Ok(metrics.finish(
        ctx.rank(),
        session.layout.own_group(),
        session.summary,
        population.foreign_received(),
    ))
}

/// Run the whole job on threads of this process.
///
/// Reports are indexed by rank. When several ranks fail, the lowest
/// failing rank's error is returned.
pub fn run_local(config: &RunConfig) -> Result<Vec<RankReport>, RunError> {
    config.validate()?;
    let colors = config.colors();
    let memory = MemoryConfig {
        timeout: config.protocol.collective_timeout(),
    };

    let results = run_cluster(config.ranks, &memory, |mut channel| {
        let color = colors[channel.rank().index()];
        run_rank(config, color, &mut channel)
    });

    results
        .into_iter()
        .enumerate()
        .map(|(rank, result)| {
            result.map_err(|source| RunError::Rank {
                rank: Rank(rank as u32),
                source,
            })
        })
        .collect()
}

/// Where one worker process sits in a TCP job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub rank: Rank,
    pub size: usize,
    pub color: Option<GroupColor>,
    pub hub: SocketAddr,
}

impl WorkerEnv {
    /// Read the worker variables from the process environment.
    pub fn from_env() -> Result<Self, RunError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the worker variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunError> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| RunError::Env(format!("{} is not set", key)))
        };
        let invalid =
            |key: &str, value: &str| RunError::Env(format!("{}={} is invalid", key, value));

        let rank = required(RANK_ENV)?;
        let rank: u32 = rank.parse().map_err(|_| invalid(RANK_ENV, &rank))?;
        let size = required(SIZE_ENV)?;
        let size: usize = size.parse().map_err(|_| invalid(SIZE_ENV, &size))?;
        let hub = required(HUB_ENV)?;
        let hub: SocketAddr = hub.parse().map_err(|_| invalid(HUB_ENV, &hub))?;
        let color = match lookup(COLOR_ENV) {
            Some(color) => Some(color.parse::<GroupColor>().map_err(|_| invalid(COLOR_ENV, &color))?),
            None => None,
        };

        Ok(Self {
            rank: Rank(rank),
            size,
            color,
            hub,
        })
    }

    /// Set the worker variables on a child process.
    pub fn apply(&self, command: &mut Command) {
        command
            .env(RANK_ENV, self.rank.0.to_string())
            .env(SIZE_ENV, self.size.to_string())
            .env(HUB_ENV, self.hub.to_string());
        if let Some(color) = self.color {
            command.env(COLOR_ENV, color.to_string());
        }
    }
}

/// Run this process's rank of a multi-process job.
pub fn run_worker(config: &RunConfig) -> Result<RankReport, RunError> {
    config.validate()?;
    match config.transport {
        Transport::Tcp => run_tcp_worker(config, &WorkerEnv::from_env()?),
        #[cfg(feature = "mpi")]
        Transport::Mpi => run_mpi_worker(config),
        #[cfg(not(feature = "mpi"))]
        Transport::Mpi => Err(ConfigError::Invalid("built without MPI support".into()).into()),
    }
}

/// Run this process's rank of a TCP job.
pub fn run_tcp_worker(config: &RunConfig, env: &WorkerEnv) -> Result<RankReport, RunError> {
    config.validate()?;
    let rank_error = |source: CoordinationError| RunError::Rank {
        rank: env.rank,
        source,
    };
    let color = match env.color {
        Some(color) => color,
        None => color_of(config, env.rank, env.size)?,
    };

    let tcp = TcpConfig::new(env.rank, env.size, env.hub)
        .with_timeout(config.protocol.collective_timeout());
    let mut channel = TcpChannel::establish(&tcp).map_err(|e| rank_error(e.into()))?;
    run_rank(config, color, &mut channel).map_err(rank_error)
}

/// Run this process's rank of the MPI job it was started in.
///
/// The group communicator is split off before the protocol runs and checked
/// against the group rank discovery finds.
#[cfg(feature = "mpi")]
pub fn run_mpi_worker(config: &RunConfig) -> Result<RankReport, RunError> {
    use cosim_network_mpi::{initialize, MpiChannel};

    config.validate()?;
    let universe = initialize()?;
    let mut channel = MpiChannel::world(&universe);
    let rank = channel.rank();
    if config.protocol.collective_timeout().is_some() {
        warn!("MPI collectives do not time out; ignoring the collective timeout");
    }
    let rank_error = |source: CoordinationError| RunError::Rank { rank, source };

    let color = color_of(config, rank, channel.size())?;
    let group = channel.split_group(color)?;
    let report = run_rank(config, color, &mut channel).map_err(rank_error)?;
    group
        .placement()
        .confirm(&report.group)
        .map_err(|e| rank_error(e.into()))?;
    Ok(report)
}

/// Color of `rank` in a job of `size` under the configured layout.
fn color_of(config: &RunConfig, rank: Rank, size: usize) -> Result<GroupColor, RunError> {
    if size != config.ranks {
        warn!(
            job_size = size,
            config_ranks = config.ranks,
            "Job size differs from the configuration; using the job size"
        );
    }
    config
        .layout
        .colors(size, config.leaf_ranks)
        .get(rank.index())
        .copied()
        .ok_or_else(|| RunError::Env(format!("{} is outside a job of {}", rank, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_worker_env_parses() {
        let env = WorkerEnv::from_lookup(lookup(&[
            (RANK_ENV, "2"),
            (SIZE_ENV, "4"),
            (HUB_ENV, "127.0.0.1:7000"),
            (COLOR_ENV, "host"),
        ]))
        .unwrap();
        assert_eq!(env.rank, Rank(2));
        assert_eq!(env.size, 4);
        assert_eq!(env.color, Some(GroupColor::Host));
        assert_eq!(env.hub.port(), 7000);
    }

    #[test]
    fn test_worker_env_color_is_optional() {
        let env = WorkerEnv::from_lookup(lookup(&[
            (RANK_ENV, "0"),
            (SIZE_ENV, "2"),
            (HUB_ENV, "127.0.0.1:7000"),
        ]))
        .unwrap();
        assert_eq!(env.color, None);
    }

    #[test]
    fn test_worker_env_errors() {
        let missing = WorkerEnv::from_lookup(lookup(&[(RANK_ENV, "0")]));
        assert!(matches!(missing, Err(RunError::Env(msg)) if msg.contains(SIZE_ENV)));

        let bad = WorkerEnv::from_lookup(lookup(&[
            (RANK_ENV, "zero"),
            (SIZE_ENV, "2"),
            (HUB_ENV, "127.0.0.1:7000"),
        ]));
        assert!(matches!(bad, Err(RunError::Env(msg)) if msg.contains("zero")));
    }

    #[test]
    fn test_local_run_over_default_config() {
        let config = RunConfig::default();
        let reports = run_local(&config).unwrap();
        assert_eq!(reports.len(), config.ranks);

        // every rank sees the same merged stream, so the same totals
        let first = &reports[0];
        for report in &reports {
            assert_eq!(report.summary.steps, first.summary.steps);
            assert_eq!(report.summary.records_received, first.summary.records_received);
        }
        let sent: u64 = reports.iter().map(|r| r.summary.records_sent).sum();
        assert_eq!(first.summary.records_received, sent);
    }

    #[traced_test]
    #[test]
    fn test_local_run_logs_each_rank() {
        let config = RunConfig::default().with_ranks(2, 1);
        run_local(&config).unwrap();
        assert!(logs_contain("Rank finished"));
        assert!(logs_contain("foreign="));
    }

    #[test]
    fn test_reports_carry_discovered_groups() {
        let config = RunConfig::default().with_ranks(5, 2);
        let reports = run_local(&config).unwrap();
        for color in GroupColor::ALL {
            let mut local: Vec<usize> = reports
                .iter()
                .filter(|r| r.color == color)
                .map(|r| r.group.local_rank())
                .collect();
            let expected = if color == GroupColor::Leaf { 2 } else { 3 };
            assert!(reports
                .iter()
                .filter(|r| r.color == color)
                .all(|r| r.group.size() == expected));
            local.sort_unstable();
            assert_eq!(local, (0..expected).collect::<Vec<_>>());
        }
    }

    #[cfg(not(feature = "mpi"))]
    #[test]
    fn test_mpi_worker_needs_feature() {
        let mut config = RunConfig::default();
        config.transport = Transport::Mpi;
        assert!(matches!(run_worker(&config), Err(RunError::Config(_))));
    }

    #[test]
    fn test_invalid_config_rejected_before_running() {
        let config = RunConfig::default().with_ranks(3, 3);
        assert!(matches!(run_local(&config), Err(RunError::Config(_))));
    }
}
