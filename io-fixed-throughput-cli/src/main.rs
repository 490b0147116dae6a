//! `io-fixed-throughput`: a small fio-like driver that reads or writes a file
//! block by block, holding each job to a fixed bandwidth.

#[cfg(not(unix))]
compile_error!("io-fixed-throughput drives POSIX file I/O and needs a unix target");

mod args;
mod exit;
mod report;
mod worker;

use std::io::{self, Write};
use std::process::ExitCode;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use args::{Args, IoPattern, Plan};
use worker::{JobOptions, Worker};

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = setup_logging(&args.log_level) {
        eprintln!("error: {err:#}");
        return ExitCode::from(exit::EXIT_FAILURE);
    }

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit::code_for(&err))
        }
    }
}

fn setup_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("invalid log filter {level:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {e}"))
}

fn run(args: &Args) -> Result<u8> {
    let plan = Plan::from_args(args)?;
    let mut stdout = io::stdout().lock();

    if args.verbose {
        if let Some(bandwidth) = args.bandwidth {
            writeln!(stdout, "bandwidth: {bandwidth}B/s")?;
        }
        writeln!(stdout, "bs: {}B", plan.bs)?;
        writeln!(stdout, "size in bytes: {}", plan.size)?;
    }
    if !plan.is_aligned() {
        eprintln!("bs {} does not divide size {}", plan.bs, plan.size);
        return Ok(exit::EXIT_FAILURE);
    }
    if plan.num_blocks == 0 {
        return Ok(exit::EXIT_SUCCESS);
    }

    let seed = args.randseed.unwrap_or_else(|| rand::rng().random());
    if args.verbose {
        writeln!(stdout, "randseed: {seed}")?;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let direct = !args.buffered;

    let file = match args.readwrite {
        IoPattern::Write if args.numjobs > 1 => {
            eprintln!("Multithread write is not supported yet.");
            return Ok(exit::EXIT_FAILURE);
        }
        IoPattern::Write => worker::open_for_write(&args.filename, direct)?,
        IoPattern::RandRead | IoPattern::Read => worker::prepare_for_read(
            &args.filename,
            plan.bs,
            plan.size,
            direct,
            rng.random(),
            &mut stdout,
        )?,
    };

    let options = JobOptions {
        pattern: args.readwrite,
        bs: plan.bs,
        num_blocks: plan.num_blocks,
        align: worker::alignment_of(&file)?,
        pacing: plan.pacing.clone(),
        max_wait: plan.max_wait,
    };
    info!(
        jobs = args.numjobs,
        pattern = ?args.readwrite,
        bs = plan.bs,
        blocks = plan.num_blocks,
        paced = options.pacing.is_some(),
        direct,
        "starting run"
    );

    let workers = (0..args.numjobs)
        .map(|_| Worker::new(&options, &file, rng.random()))
        .collect::<Result<Vec<_>>>()?;

    let start = Instant::now();
    let reports = thread::scope(|scope| {
        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| scope.spawn(move || worker.run()))
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(i, handle)| {
                handle
                    .join()
                    .map_err(|_| anyhow!("job {i} panicked"))?
                    .with_context(|| format!("job {i}"))
            })
            .collect::<Result<Vec<_>>>()
    })?;
    let wall = start.elapsed();

    report::print(&mut stdout, &reports, wall, args.group_reporting, args.verbose)?;
    Ok(exit::EXIT_SUCCESS)
}
