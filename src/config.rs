//! Command-line surface and runtime configuration.
//!
//! The CLI is parsed with clap into [`Args`], then validated into an
//! immutable [`Config`] that is passed down by `main`. Anything that fails
//! validation (pool URL, GPU list) is a startup error and exits 1.

use clap::Parser;

use crate::error::{Error, Result};
use crate::solver::DevId;

/// Default pool, used when `--connect` is not given.
const DEFAULT_POOL: &str = "stratum+tcp://us1-zcash.flypool.org:3333";

/// Default worker. Mining to this address supports sa-miner development.
const DEFAULT_USER: &str = "t1Zo1GGn8UQAyVMK6tzhTrbD8aeqgCWCpKj.sa-miner";

/// Command-line arguments for the sa-miner coordinator.
#[derive(Parser, Debug)]
#[command(
    name = "sa-miner",
    about = "Mining coordinator for the SILENTARMY Equihash solver",
    long_about = "Connects to a Stratum pool, drives one sa-solver process per \
                  GPU instance, and submits the solutions they find as shares."
)]
pub struct Args {
    /// Increase verbosity (repeat for more detail)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Maximum verbosity, equivalent to -vv
    #[arg(long)]
    pub debug: bool,

    /// List available OpenCL devices and exit
    #[arg(long)]
    pub list: bool,

    /// Comma-separated list of GPU ids to mine on
    #[arg(long = "use", value_name = "LIST", default_value = "0")]
    pub use_gpus: String,

    /// Number of solver instances to run per GPU
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub instances: u32,

    /// Stratum pool to connect to
    #[arg(
        short = 'c',
        long = "connect",
        value_name = "URL",
        default_value = DEFAULT_POOL
    )]
    pub connect: String,

    /// Username (workername) for pool authorization
    #[arg(short = 'u', long = "user", value_name = "USER", default_value = DEFAULT_USER)]
    pub user: String,

    /// Password for pool authorization
    #[arg(short = 'p', long = "pwd", value_name = "PWD")]
    pub pwd: Option<String>,
}

/// Immutable runtime configuration, validated from [`Args`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Pool hostname (may be an IPv6 literal)
    pub host: String,

    /// Pool TCP port
    pub port: u16,

    /// Worker username
    pub user: String,

    /// Worker password, if the pool wants one
    pub pwd: Option<String>,

    /// GPU ids to mine on
    pub gpus: Vec<u32>,

    /// Solver instances per GPU
    pub instances: u32,

    /// Verbosity level (0 = info, 1 = debug, 2+ = trace)
    pub verbosity: u8,
}

impl Config {
    /// Validate command-line arguments into a runtime configuration.
    pub fn from_args(args: &Args) -> Result<Self> {
        let (host, port) = parse_pool_url(&args.connect)?;
        let gpus = parse_gpu_list(&args.use_gpus)?;

        let verbosity = if args.debug { 2 } else { args.verbose };

        Ok(Self {
            host,
            port,
            user: args.user.clone(),
            pwd: args.pwd.clone(),
            gpus,
            instances: args.instances,
            verbosity,
        })
    }

    /// Every devid in the configured GPU x instance product.
    pub fn devids(&self) -> Vec<DevId> {
        let mut ids = Vec::with_capacity(self.gpus.len() * self.instances as usize);
        for &gpu in &self.gpus {
            for instance in 0..self.instances {
                ids.push(DevId { gpu, instance });
            }
        }
        ids
    }
}

/// Parse a `stratum+tcp://host:port` pool URL.
///
/// The host may itself contain colons (IPv6 literal), so the port is
/// split off at the rightmost colon.
fn parse_pool_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("stratum+tcp://")
        .ok_or_else(|| Error::Config(format!("bad pool URL (want stratum+tcp://...): {url}")))?;

    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("bad pool URL (missing port): {url}")))?;

    if host.is_empty() {
        return Err(Error::Config(format!("bad pool URL (empty host): {url}")));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::Config(format!("bad pool URL (bad port): {url}")))?;

    Ok((host.to_string(), port))
}

/// Parse the `--use` GPU list: comma-separated non-negative integers.
fn parse_gpu_list(list: &str) -> Result<Vec<u32>> {
    let list = list.trim();
    if list.is_empty() {
        return Ok(Vec::new());
    }

    list.split(',')
        .map(|tok| {
            tok.trim()
                .parse::<u32>()
                .map_err(|_| Error::Config(format!("bad --use GPU list: {list}")))
        })
        .collect()
}
