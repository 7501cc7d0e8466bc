use std::{env, path::PathBuf, time::Duration};

use anyhow::bail;
use clap::{Args, Parser, Subcommand, ValueEnum};
use snowdrift::{BitLayout, DEFAULT_EPOCH};

/// Command-line interface of the `snowdrift` binary.
///
/// Every option falls back to a `SNOWDRIFT_*` environment variable, and a
/// `.env` file in the working directory is loaded before parsing.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "snowdrift",
    version,
    about = "Generate and inspect Snowflake-style 64-bit IDs"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate IDs and print them to stdout, one per line.
    Generate(GenerateArgs),
    /// Split IDs into their fields.
    Decode(DecodeArgs),
    /// Remove stale lock files left behind by the file-lock resolver.
    Cleanup(CleanupArgs),
}

/// Which resolver coordinates sequence allocation.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    /// Unique across threads of this process only.
    InProcess,
    /// Unique across every process sharing the lock directory.
    FileLock,
    /// Unique across every process sharing the Redis server at `--store-url`.
    AtomicStore,
}

#[derive(Args, Debug, Clone)]
pub struct EpochArgs {
    /// Generator epoch in Unix milliseconds.
    ///
    /// Every process minting or decoding IDs of one namespace must agree on
    /// it. Defaults to 2019-08-08T00:00:00Z.
    ///
    /// Environment variable: `SNOWDRIFT_EPOCH_MS`
    #[arg(long, env = "SNOWDRIFT_EPOCH_MS", default_value_t = DEFAULT_EPOCH.as_millis() as u64)]
    pub epoch_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Number of IDs to generate.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,

    /// Number of threads sharing the generator. Defaults to the number of
    /// CPUs, capped at `--count`.
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Datacenter id encoded into every ID (5 bits).
    ///
    /// Environment variable: `SNOWDRIFT_DATACENTER_ID`
    #[arg(long, env = "SNOWDRIFT_DATACENTER_ID", default_value_t = 0)]
    pub datacenter_id: u64,

    /// Worker id encoded into every ID (5 bits).
    ///
    /// Environment variable: `SNOWDRIFT_WORKER_ID`
    #[arg(long, env = "SNOWDRIFT_WORKER_ID", default_value_t = 0)]
    pub worker_id: u64,

    #[command(flatten)]
    pub epoch: EpochArgs,

    /// Sequence resolver. Use `file-lock` or `atomic-store` when several
    /// processes share one datacenter and worker id.
    ///
    /// Environment variable: `SNOWDRIFT_RESOLVER`
    #[arg(long, value_enum, env = "SNOWDRIFT_RESOLVER", default_value_t = ResolverKind::InProcess)]
    pub resolver: ResolverKind,

    /// Directory holding the lock files of the `file-lock` resolver.
    /// Defaults to `snowdrift` under the system temp directory.
    ///
    /// Environment variable: `SNOWDRIFT_LOCK_DIR`
    #[arg(long, env = "SNOWDRIFT_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,

    /// Redis server backing the `atomic-store` resolver.
    ///
    /// Environment variable: `SNOWDRIFT_STORE_URL`
    #[arg(long, env = "SNOWDRIFT_STORE_URL", default_value = "redis://127.0.0.1:6379/")]
    pub store_url: String,

    /// Clock rollbacks up to this many milliseconds are absorbed instead of
    /// failing. Only the `in-process` resolver tracks rollbacks.
    ///
    /// Environment variable: `SNOWDRIFT_ROLLBACK_TOLERANCE_MS`
    #[arg(long, env = "SNOWDRIFT_ROLLBACK_TOLERANCE_MS", default_value_t = 0)]
    pub rollback_tolerance_ms: u64,

    /// Give up on a single ID after this many milliseconds. Waits
    /// indefinitely when unset.
    ///
    /// Environment variable: `SNOWDRIFT_TIMEOUT_MS`
    #[arg(long, env = "SNOWDRIFT_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
    /// IDs to decode, in decimal.
    #[arg(required = true)]
    pub ids: Vec<u64>,

    #[command(flatten)]
    pub epoch: EpochArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// Directory holding the lock files.
    ///
    /// Environment variable: `SNOWDRIFT_LOCK_DIR`
    #[arg(long, env = "SNOWDRIFT_LOCK_DIR")]
    pub lock_dir: PathBuf,

    /// Only remove lock files for buckets at least this many milliseconds
    /// old. Must cover the clock skew between processes sharing the
    /// directory.
    #[arg(long, default_value_t = 1_000)]
    pub older_than_ms: u64,

    /// Remove every lock file regardless of age. Only safe while no process
    /// is generating.
    #[arg(long, default_value_t = false)]
    pub all: bool,

    #[command(flatten)]
    pub epoch: EpochArgs,
}

/// Validated settings for `snowdrift generate`.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub count: usize,
    pub threads: usize,
    pub datacenter_id: u64,
    pub worker_id: u64,
    pub epoch: Duration,
    pub resolver: ResolverKind,
    pub lock_dir: PathBuf,
    pub store_url: String,
    pub rollback_tolerance: Duration,
    pub timeout: Option<Duration>,
}

impl TryFrom<GenerateArgs> for GenerateConfig {
    type Error = anyhow::Error;

    fn try_from(args: GenerateArgs) -> Result<Self, Self::Error> {
        let layout = BitLayout::DEFAULT;

        if args.count == 0 {
            bail!("--count must be greater than 0");
        }

        let threads = args
            .threads
            .unwrap_or_else(num_cpus::get)
            .min(args.count);
        if threads == 0 {
            bail!("--threads must be greater than 0");
        }

        if args.datacenter_id > layout.max_datacenter_id() {
            bail!(
                "SNOWDRIFT_DATACENTER_ID ({}) exceeds the datacenter id space (max = {})",
                args.datacenter_id,
                layout.max_datacenter_id()
            );
        }

        if args.worker_id > layout.max_worker_id() {
            bail!(
                "SNOWDRIFT_WORKER_ID ({}) exceeds the worker id space (max = {})",
                args.worker_id,
                layout.max_worker_id()
            );
        }

        if args.timeout_ms == Some(0) {
            bail!("SNOWDRIFT_TIMEOUT_MS must be greater than 0");
        }

        let lock_dir = args
            .lock_dir
            .unwrap_or_else(|| env::temp_dir().join("snowdrift"));

        Ok(Self {
            count: args.count,
            threads,
            datacenter_id: args.datacenter_id,
            worker_id: args.worker_id,
            epoch: Duration::from_millis(args.epoch.epoch_ms),
            resolver: args.resolver,
            lock_dir,
            store_url: args.store_url,
            rollback_tolerance: Duration::from_millis(args.rollback_tolerance_ms),
            timeout: args.timeout_ms.map(Duration::from_millis),
        })
    }
}
