//! Cosim CLI
//!
//! Run two toy spiking populations in lockstep over the coordination
//! protocol.
//!
//! # Example
//!
//! ```bash
//! # Six ranks as threads of one process, leaf and host ranks alternating
//! cosim local --ranks 6 --leaf-ranks 3 --layout interleaved
//!
//! # The same job as six processes talking over TCP
//! cosim launch --config cosim.toml --hub 127.0.0.1:7447
//!
//! # Six processes over MPI (built with --features mpi)
//! mpiexec -n 6 cosim worker --config cosim.toml --transport mpi
//! ```

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use cosim_simulator::runner::CONFIG_ENV;
use cosim_simulator::{run_local, run_worker, RunConfig, Transport, WorkerEnv};
use cosim_types::{Rank, RankLayout};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cosim")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every rank as a thread of this process
    Local(RunArgs),

    /// Spawn one worker process per rank and wait for them
    Launch {
        #[command(flatten)]
        run: RunArgs,

        /// Address the rank 0 worker listens on
        #[arg(long, default_value = "127.0.0.1:7447")]
        hub: SocketAddr,
    },

    /// Run one rank of a multi-process job: an MPI rank started by mpiexec,
    /// or a TCP rank placed by the COSIM_* environment
    Worker(RunArgs),
}

/// Configuration file and the overrides applied on top of it.
#[derive(Args, Debug)]
struct RunArgs {
    /// TOML run configuration. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total number of ranks
    #[arg(short = 'n', long)]
    ranks: Option<usize>,

    /// Ranks running the leaf group
    #[arg(long)]
    leaf_ranks: Option<usize>,

    /// Rank layout (prefix, suffix, interleaved)
    #[arg(long)]
    layout: Option<RankLayout>,

    /// Base random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated duration
    #[arg(short = 'd', long)]
    duration: Option<f64>,

    /// Per-collective timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Worker transport (tcp, mpi)
    #[arg(long)]
    transport: Option<Transport>,
}

impl RunArgs {
    fn load(&self) -> anyhow::Result<RunConfig> {
        let mut config = match (&self.config, std::env::var(CONFIG_ENV)) {
            (Some(path), _) => RunConfig::load(path)?,
            (None, Ok(text)) => RunConfig::from_toml_str(&text)
                .with_context(|| format!("parsing {}", CONFIG_ENV))?,
            (None, Err(_)) => RunConfig::default(),
        };

        if let Some(ranks) = self.ranks {
            config.ranks = ranks;
        }
        if let Some(leaf_ranks) = self.leaf_ranks {
            config.leaf_ranks = leaf_ranks;
        }
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(duration) = self.duration {
            config.protocol.total_duration = duration;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.protocol.collective_timeout_ms = Some(timeout_ms);
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        config.validate()?;
        Ok(config)
    }
}

fn launch(config: &RunConfig, hub: SocketAddr) -> anyhow::Result<()> {
    if config.transport != Transport::Tcp {
        bail!(
            "launch starts TCP workers; start {} jobs with `mpiexec -n {} cosim worker --transport {}`",
            config.transport,
            config.ranks,
            config.transport
        );
    }
    let exe = std::env::current_exe().context("locating the cosim binary")?;
    // workers get the resolved configuration, overrides included
    let text = toml::to_string(config).context("serializing the run configuration")?;
    let colors = config.colors();

    let mut children = Vec::with_capacity(config.ranks);
    for (rank, color) in colors.into_iter().enumerate() {
        let env = WorkerEnv {
            rank: Rank(rank as u32),
            size: config.ranks,
            color: Some(color),
            hub,
        };
        let mut command = Command::new(&exe);
        command.arg("worker").env(CONFIG_ENV, &text);
        env.apply(&mut command);
        let child = command
            .spawn()
            .with_context(|| format!("spawning worker for {}", env.rank))?;
        children.push((env.rank, child));
    }
    info!(workers = children.len(), %hub, "Workers launched");

    let mut failed = Vec::new();
    for (rank, mut child) in children {
        let status = child
            .wait()
            .with_context(|| format!("waiting for {}", rank))?;
        if !status.success() {
            warn!(%rank, %status, "Worker failed");
            failed.push(rank);
        }
    }
    if !failed.is_empty() {
        bail!("{} of {} workers failed: {:?}", failed.len(), config.ranks, failed);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn,cosim_protocol=info,cosim_simulator=info")
        }))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Local(args) => {
            let config = args.load()?;
            info!(
                ranks = config.ranks,
                leaf_ranks = config.leaf_ranks,
                layout = ?config.layout,
                seed = config.seed,
                "Starting local run"
            );
            for report in run_local(&config)? {
                println!("{}", report);
            }
        }

        Commands::Launch { run, hub } => {
            let config = run.load()?;
            launch(&config, hub)?;
        }

        Commands::Worker(args) => {
            let config = args.load()?;
            let report = run_worker(&config)?;
            println!("{}", report);
        }
    }

    Ok(())
}
