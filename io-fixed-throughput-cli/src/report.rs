//! Throughput and latency summaries.

use std::io::{self, Write};
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::worker::JobReport;

fn megabytes_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    bytes as f64 / secs / 1e6
}

fn avg_latency_ns(io_time: Duration, blocks: u64) -> u128 {
    io_time.as_nanos() / u128::from(blocks.max(1))
}

fn write_percentiles(out: &mut impl Write, latencies: &Histogram<u64>) -> io::Result<()> {
    writeln!(
        out,
        "  lat (ns): min={} p50={} p90={} p99={} p99.9={} max={}",
        latencies.min(),
        latencies.value_at_quantile(0.50),
        latencies.value_at_quantile(0.90),
        latencies.value_at_quantile(0.99),
        latencies.value_at_quantile(0.999),
        latencies.max(),
    )
}

/// Print one line per job, or a single aggregate line when `group` is set
/// and there is more than one job. `wall` is the wall time of the whole run.
pub fn print(
    out: &mut impl Write,
    reports: &[JobReport],
    wall: Duration,
    group: bool,
    verbose: bool,
) -> io::Result<()> {
    if group && reports.len() > 1 {
        let bytes: u64 = reports.iter().map(|r| r.bytes).sum();
        let blocks: u64 = reports.iter().map(|r| r.blocks).sum();
        let io_time: Duration = reports.iter().map(|r| r.io_time).sum();
        writeln!(
            out,
            "Throughput {:.2}MB/s, avg latency {}ns",
            megabytes_per_sec(bytes, wall),
            avg_latency_ns(io_time, blocks)
        )?;
        if verbose {
            let mut merged = Histogram::<u64>::new(3).map_err(io::Error::other)?;
            for report in reports {
                merged.add(&report.latencies).map_err(io::Error::other)?;
            }
            write_percentiles(out, &merged)?;
        }
        return Ok(());
    }

    for (i, report) in reports.iter().enumerate() {
        if reports.len() > 1 {
            write!(out, "{i}: ")?;
        }
        writeln!(
            out,
            "throughput {:.2}MB/s, avg latency {}ns",
            megabytes_per_sec(report.bytes, report.run_time),
            avg_latency_ns(report.io_time, report.blocks)
        )?;
        if verbose {
            write_percentiles(out, &report.latencies)?;
            writeln!(out, "  throttled {:?}", report.throttled)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(bytes: u64, blocks: u64, io_ms: u64, run_ms: u64) -> JobReport {
        let mut latencies = Histogram::<u64>::new(3).unwrap();
        for _ in 0..blocks {
            latencies.record(io_ms * 1_000_000 / blocks).unwrap();
        }
        JobReport {
            blocks,
            bytes,
            io_time: Duration::from_millis(io_ms),
            run_time: Duration::from_millis(run_ms),
            throttled: Duration::ZERO,
            latencies,
        }
    }

    fn render(reports: &[JobReport], wall: Duration, group: bool, verbose: bool) -> String {
        let mut out = Vec::new();
        print(&mut out, reports, wall, group, verbose).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn single_job_line() {
        let text = render(&[report(10_000_000, 10, 5, 1000)], Duration::from_secs(1), false, false);
        assert_eq!(text, "throughput 10.00MB/s, avg latency 500000ns\n");
    }

    #[test]
    fn jobs_are_numbered_without_group_reporting() {
        let reports = [report(2_000_000, 4, 4, 1000), report(2_000_000, 4, 8, 2000)];
        let text = render(&reports, Duration::from_secs(2), false, false);
        assert_eq!(
            text,
            "0: throughput 2.00MB/s, avg latency 1000000ns\n\
             1: throughput 1.00MB/s, avg latency 2000000ns\n"
        );
    }

    #[test]
    fn group_reporting_aggregates_over_wall_time() {
        let reports = [report(2_000_000, 4, 4, 1000), report(2_000_000, 4, 8, 2000)];
        let text = render(&reports, Duration::from_secs(2), true, false);
        assert_eq!(text, "Throughput 2.00MB/s, avg latency 1500000ns\n");
    }

    #[test]
    fn group_reporting_with_one_job_prints_the_job_line() {
        let text = render(&[report(1_000_000, 1, 1, 1000)], Duration::from_secs(1), true, false);
        assert!(text.starts_with("throughput "));
    }

    #[test]
    fn verbose_adds_percentiles() {
        let text = render(&[report(1_000_000, 2, 2, 1000)], Duration::from_secs(1), false, true);
        assert!(text.contains("lat (ns): min="));
        assert!(text.contains("throttled 0ns"));
    }
}
