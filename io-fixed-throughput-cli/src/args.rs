//! Command-line options and the validated job plan derived from them.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use io_fixed_throughput::{parse_bandwidth, parse_duration, parse_size, GovernorConfig};

#[derive(Debug, Parser)]
#[command(
    name = "io-fixed-throughput",
    version,
    about = "Drive block I/O against a file at a fixed throughput"
)]
pub struct Args {
    /// Per-job throughput cap, e.g. `200MB/s`. Unthrottled when omitted.
    #[arg(long, value_name = "N B/s", value_parser = parse_bandwidth)]
    pub bandwidth: Option<u64>,

    /// Bucket capacity in bytes. Defaults to the block size.
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub burst: Option<u64>,

    /// Block size of every I/O
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub bs: u64,

    #[arg(long, value_name = "PATH")]
    pub filename: PathBuf,

    /// Display statistics for groups of jobs as a whole instead of for each
    /// individual job
    #[arg(long = "group_reporting")]
    pub group_reporting: bool,

    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub numjobs: usize,

    #[arg(long, value_enum)]
    pub readwrite: IoPattern,

    /// Master seed; every job derives its own seed from it
    #[arg(long)]
    pub randseed: Option<u64>,

    /// Bytes moved by each job
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub size: u64,

    /// Give up on a block whose admission waits longer than this, e.g. `500ms`
    #[arg(long = "max-wait", value_name = "DURATION", value_parser = parse_duration)]
    pub max_wait: Option<Duration>,

    /// Go through the page cache instead of opening with O_DIRECT
    #[arg(long)]
    pub buffered: bool,

    /// Print parsed parameters and latency percentiles
    #[arg(long)]
    pub verbose: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long = "log-level", value_name = "FILTER", default_value = "warn")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IoPattern {
    #[value(name = "randread")]
    RandRead,
    Read,
    Write,
}

/// Option combinations the driver refuses to run.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("block size must be positive")]
    ZeroBlockSize,
    #[error("burst {burst} is smaller than block size {bs}")]
    BurstBelowBlock { burst: u64, bs: u64 },
    #[error("bandwidth must be positive")]
    ZeroBandwidth,
    #[error("--burst needs --bandwidth")]
    BurstWithoutBandwidth,
}

/// Everything a run needs, checked once up front.
#[derive(Debug, Clone)]
pub struct Plan {
    pub bs: u64,
    pub size: u64,
    pub num_blocks: u64,
    /// `None` runs unthrottled.
    pub pacing: Option<GovernorConfig>,
    pub max_wait: Option<Duration>,
}

impl Plan {
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        if args.bs == 0 {
            return Err(UsageError::ZeroBlockSize.into());
        }
        let pacing = match args.bandwidth {
            None if args.burst.is_some() => return Err(UsageError::BurstWithoutBandwidth.into()),
            None => None,
            Some(0) => return Err(UsageError::ZeroBandwidth.into()),
            Some(bandwidth) => {
                let burst = args.burst.unwrap_or(args.bs);
                if burst < args.bs {
                    return Err(UsageError::BurstBelowBlock { burst, bs: args.bs }.into());
                }
                Some(GovernorConfig::new(bandwidth as f64, burst)?)
            }
        };
        Ok(Self {
            bs: args.bs,
            size: args.size,
            num_blocks: args.size / args.bs,
            pacing,
            max_wait: args.max_wait,
        })
    }

    /// Whether the job size is a whole number of blocks.
    pub fn is_aligned(&self) -> bool {
        self.size % self.bs == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "io-fixed-throughput",
            "--filename",
            "/tmp/target",
            "--readwrite",
            "randread",
            "--bs",
            "4K",
            "--size",
            "1M",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parses_units_and_defaults() {
        let args = parse(&["--bandwidth", "10MB/s"]);
        assert_eq!(args.bs, 4096);
        assert_eq!(args.size, 1 << 20);
        assert_eq!(args.bandwidth, Some(10_000_000));
        assert_eq!(args.numjobs, 1);
        assert_eq!(args.readwrite, IoPattern::RandRead);
        assert!(!args.group_reporting);

        let plan = Plan::from_args(&args).unwrap();
        assert_eq!(plan.num_blocks, 256);
        let pacing = plan.pacing.unwrap();
        assert_eq!(pacing.burst_capacity(), 4096);
        assert_eq!(pacing.target_rate(), 10_000_000.0);
    }

    #[test]
    fn fio_style_flags() {
        let args = parse(&["--group_reporting", "--numjobs", "4", "--max-wait", "250ms"]);
        assert!(args.group_reporting);
        assert_eq!(args.numjobs, 4);
        assert_eq!(args.max_wait, Some(Duration::from_millis(250)));
        assert!(Plan::from_args(&args).unwrap().pacing.is_none());
    }

    #[test]
    fn rejects_bad_values_at_parse_time() {
        let base = ["io-fixed-throughput", "--filename", "f", "--bs", "4K", "--size", "1M"];
        let with = |extra: &[&str]| {
            let mut argv = base.to_vec();
            argv.extend_from_slice(extra);
            Args::try_parse_from(argv)
        };
        assert!(with(&["--readwrite", "randwrite"]).is_err());
        assert!(with(&["--readwrite", "read", "--bandwidth", "10MB"]).is_err());
        assert!(with(&["--readwrite", "read", "--numjobs", "0"]).is_err());
        assert!(with(&["--readwrite", "read", "--burst", "4X"]).is_err());
    }

    #[test]
    fn burst_must_hold_a_block() {
        let args = parse(&["--bandwidth", "1MB/s", "--burst", "1K"]);
        let err = Plan::from_args(&args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UsageError>(),
            Some(UsageError::BurstBelowBlock { burst: 1024, bs: 4096 })
        ));
    }

    #[test]
    fn unaligned_size_is_detected() {
        let mut args = parse(&[]);
        args.size = 10_000;
        let plan = Plan::from_args(&args).unwrap();
        assert!(!plan.is_aligned());
    }

    #[test]
    fn burst_without_bandwidth_is_refused() {
        let args = parse(&["--burst", "64K"]);
        let err = Plan::from_args(&args).unwrap_err();
        assert!(matches!(err.downcast_ref::<UsageError>(), Some(UsageError::BurstWithoutBandwidth)));
        assert_eq!(crate::exit::code_for(&err), crate::exit::EXIT_MISCONFIGURED);
    }
}
