//! Main entry point for the sa-miner coordinator.

use clap::Parser;

use sa_miner::config::{Args, Config};
use sa_miner::daemon::Daemon;
use sa_miner::solver::solver_path;
use sa_miner::tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.list {
        list_devices()?;
    }

    let config = Config::from_args(&args)?;
    tracing::init(config.verbosity);

    Daemon::new(config).run().await
}

/// Replace this process with `sa-solver --list`.
///
/// Device enumeration lives in the solver; there is nothing to add here,
/// so exec it directly. Returns only if the exec itself failed.
fn list_devices() -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;

    let path = solver_path()?;
    let err = std::process::Command::new(&path).arg("--list").exec();

    Err(sa_miner::error::Error::Solver(format!("failed to exec {}: {err}", path.display())).into())
}
