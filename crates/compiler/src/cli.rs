//! CLI wiring for the TileForge PGO driver.

use crate::config::{PgoConfig, PgoTuning};
use crate::session::KernelCompileSession;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tileforge_autotune::{rank, DecisionStore};
use tileforge_toolchain::{
    ArtifactDir, ExternalToolchain, KernelId, KernelSource, ToolchainConfig,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tileforge", about = "Profile-guided tiling optimisation for generated kernels")]
pub struct Cli {
    /// Directory holding persisted decisions, one subdirectory per kernel.
    #[arg(long, global = true)]
    pub decision_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a kernel, searching for a tiling when PGO is enabled.
    Compile {
        #[arg(long)]
        kernel: String,
        #[arg(long)]
        source: PathBuf,
        /// JSON file describing the compiler and harness builder.
        #[arg(long)]
        toolchain: PathBuf,
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[arg(long, default_value = "device0")]
        device: String,
        /// Force PGO on regardless of the environment.
        #[arg(long, default_value_t = false)]
        pgo: bool,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Write the JSON report here instead of stdout.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Rank an existing search log and print the result as JSON.
    Rank {
        #[arg(long)]
        log: PathBuf,
        #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
        top_n: i64,
    },
    /// Inspect or remove a persisted decision.
    Decision {
        #[command(subcommand)]
        action: DecisionAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum DecisionAction {
    Show {
        #[arg(long)]
        kernel: String,
    },
    Clear {
        #[arg(long)]
        kernel: String,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        decision_dir,
        command,
    } = cli;
    let mut config = PgoConfig::from_env();
    if let Some(dir) = decision_dir {
        config = config.with_decision_root(dir);
    }

    match command {
        Command::Compile {
            kernel,
            source,
            toolchain,
            work_dir,
            device,
            pgo,
            top_n,
            timeout_secs,
            report,
        } => {
            let mut tuning = config.tuning.clone();
            tuning.enabled |= pgo;
            if let Some(top_n) = top_n {
                tuning.top_n = top_n;
            }
            if let Some(secs) = timeout_secs.filter(|secs| *secs > 0) {
                tuning.measure_timeout = Duration::from_secs(secs);
            }
            config = apply_compile_overrides(config, tuning, work_dir, device);

            let toolchain_config = ToolchainConfig::load_from_file(&toolchain)
                .with_context(|| format!("loading toolchain config {}", toolchain.display()))?;
            let toolchain = ExternalToolchain::new(toolchain_config);
            let session = KernelCompileSession::new(toolchain.clone(), toolchain, config);

            let kernel = KernelSource::new(kernel_id(&kernel)?, source);
            let compiled = session.compile(&kernel)?;
            info!(
                kernel = %kernel.id,
                artifact = %compiled.artifact,
                harness_runs = compiled.report.harness_runs,
                "compile finished"
            );

            match report {
                Some(path) => compiled.report.save(path)?,
                None => println!("{}", compiled.report.to_json()?),
            }
        }
        Command::Rank { log, top_n } => {
            let ranking = rank(&log, top_n)
                .ok_or_else(|| anyhow!("search log {} has no usable entries", log.display()))?;
            println!("{}", serde_json::to_string_pretty(&ranking)?);
        }
        Command::Decision { action } => match action {
            DecisionAction::Show { kernel } => {
                let store = decision_store(&config, &kernel)?;
                match store.read()? {
                    Some(decision) => println!("{}", serde_json::to_string_pretty(&decision)?),
                    None => println!("no decision recorded at {}", store.path().display()),
                }
            }
            DecisionAction::Clear { kernel } => {
                let store = decision_store(&config, &kernel)?;
                if store.remove()? {
                    info!(path = %store.path().display(), "decision removed");
                } else {
                    info!(path = %store.path().display(), "no decision to remove");
                }
            }
        },
    }
    Ok(())
}

fn apply_compile_overrides(
    config: PgoConfig,
    tuning: PgoTuning,
    work_dir: Option<PathBuf>,
    device: String,
) -> PgoConfig {
    let config = config.with_tuning(tuning).with_device(device);
    match work_dir {
        Some(dir) => config.with_work_root(dir),
        None => config,
    }
}

fn kernel_id(raw: &str) -> Result<KernelId> {
    KernelId::new(raw).ok_or_else(|| anyhow!("kernel identity must not be empty"))
}

fn decision_store(config: &PgoConfig, kernel: &str) -> Result<DecisionStore> {
    let id = kernel_id(kernel)?;
    let dir = ArtifactDir::new(&config.decision_root, &id);
    Ok(DecisionStore::in_dir(dir.root()))
}
