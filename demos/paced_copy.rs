//! Copying bytes through a throttled reader.
//!
//! Moves 256 KiB through a `ThrottledReader` capped at 1 MB/s with a 64 KiB
//! bucket, then prints the achieved rate.

use io_fixed_throughput::prelude::*;
use std::io::{self, Cursor};
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== io-fixed-throughput: paced copy ===\n");

    let governor = Governor::with_rate(1_000_000.0, 64 * 1024)?;
    let source = Cursor::new(vec![7u8; 256 * 1024]);
    let mut reader = ThrottledReader::new(source, governor.clone());
    let mut sink = io::sink();

    let start = Instant::now();
    let copied = io::copy(&mut reader, &mut sink)?;
    let elapsed = start.elapsed();

    // The first 64 KiB ride the full bucket, the rest trickle in at 1 MB/s.
    println!("   copied {copied} bytes in {elapsed:?}");
    println!(
        "   effective rate {:.2} MB/s",
        copied as f64 / elapsed.as_secs_f64() / 1e6
    );

    let stats = governor.stats();
    println!(
        "   {} admissions, {} deferred\n",
        stats.admitted_requests, stats.deferred
    );
    Ok(())
}
