#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::{
    io::{self, BufWriter, Write},
    thread::scope,
    time::Instant,
};

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use config::{CleanupArgs, CliArgs, Command, DecodeArgs, GenerateConfig, ResolverKind};
use snowdrift::{
    AtomicStoreResolver, BitLayout, Deadline, FileLockResolver, Generator, InProcessResolver,
    RedisStore, SequenceResolver, SnowflakeId,
};
use telemetry::init_telemetry;

/// Resolver picked at runtime from `--resolver`.
type DynResolver = Box<dyn SequenceResolver + Send + Sync>;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    init_telemetry()?;

    match args.command {
        Command::Generate(args) => generate(&GenerateConfig::try_from(args)?),
        Command::Decode(args) => decode(&args),
        Command::Cleanup(args) => cleanup(&args),
    }
}

fn build_resolver(config: &GenerateConfig) -> anyhow::Result<DynResolver> {
    let resolver: DynResolver = match config.resolver {
        ResolverKind::InProcess => Box::new(InProcessResolver::with_rollback_tolerance(
            config.rollback_tolerance,
        )),
        ResolverKind::FileLock => {
            let resolver = FileLockResolver::new(&config.lock_dir)
                .with_context(|| format!("cannot use lock dir {}", config.lock_dir.display()))?;
            Box::new(resolver)
        }
        ResolverKind::AtomicStore => {
            let store = RedisStore::open(&config.store_url)
                .with_context(|| format!("invalid store url {}", config.store_url))?;
            Box::new(AtomicStoreResolver::new(store))
        }
    };
    if config.resolver != ResolverKind::InProcess && !config.rollback_tolerance.is_zero() {
        tracing::warn!(resolver = ?config.resolver, "rollback tolerance is ignored");
    }
    Ok(resolver)
}

fn generate(config: &GenerateConfig) -> anyhow::Result<()> {
    let generator = Generator::builder()
        .datacenter_id(config.datacenter_id)
        .worker_id(config.worker_id)
        .epoch(config.epoch)
        .sequence_resolver(build_resolver(config)?)
        .build()
        .context("invalid generator configuration")?;

    if cfg!(debug_assertions) {
        tracing::debug!("Generating with full config: {:#?}", config);
    } else {
        tracing::debug!(
            count = config.count,
            threads = config.threads,
            resolver = ?config.resolver,
            "Generating"
        );
    }

    let started = Instant::now();
    let per_thread = config.count / config.threads;
    let remainder = config.count % config.threads;

    let batches = scope(|s| {
        let handles: Vec<_> = (0..config.threads)
            .map(|i| {
                let generator = &generator;
                let quota = per_thread + usize::from(i < remainder);
                let timeout = config.timeout;
                s.spawn(move || {
                    (0..quota)
                        .map(|_| {
                            let deadline = timeout.map_or(Deadline::NONE, Deadline::after);
                            generator.next_id_until(deadline)
                        })
                        .collect::<snowdrift::Result<Vec<SnowflakeId>>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("generator thread panicked"))?
                    .context("failed to generate ID")
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })?;

    let mut out = BufWriter::new(io::stdout().lock());
    for id in batches.iter().flatten() {
        writeln!(out, "{id}")?;
    }
    out.flush()?;

    tracing::info!(
        count = config.count,
        threads = config.threads,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Generated IDs"
    );
    Ok(())
}

fn decode(args: &DecodeArgs) -> anyhow::Result<()> {
    let layout = BitLayout::DEFAULT;
    let mut out = BufWriter::new(io::stdout().lock());

    for &raw in &args.ids {
        if raw >> BitLayout::MAX_BITS != 0 {
            bail!("{raw} is not a Snowflake ID: the sign bit is set");
        }
        let parts = layout.decode(SnowflakeId::from_raw(raw));
        writeln!(
            out,
            "id={raw} timestamp_ms={} datacenter_id={} worker_id={} sequence={}",
            parts.timestamp.saturating_add(args.epoch.epoch_ms),
            parts.datacenter_id,
            parts.worker_id,
            parts.sequence
        )?;
    }

    out.flush()?;
    Ok(())
}

fn cleanup(args: &CleanupArgs) -> anyhow::Result<()> {
    let resolver = FileLockResolver::new(&args.lock_dir)
        .with_context(|| format!("cannot use lock dir {}", args.lock_dir.display()))?;

    let removed = if args.all {
        resolver.clean_all()?
    } else {
        let generator = Generator::builder()
            .start_timestamp(args.epoch.epoch_ms)
            .sequence_resolver(&resolver)
            .build()
            .context("invalid epoch")?;
        let before_bucket = generator
            .current_bucket()?
            .saturating_sub(args.older_than_ms);
        resolver.cleanup(before_bucket)?
    };

    tracing::info!(removed, dir = %args.lock_dir.display(), "Cleaned up lock files");
    println!("{removed}");
    Ok(())
}
