//! FIFO admission across tasks.
//!
//! A large request queued first is served before a later small one, even
//! though the small one would fit sooner.

use io_fixed_throughput::{Governor, GovernorConfig};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== io-fixed-throughput: FIFO waiting ===\n");

    // 100 units/s, 100 unit bucket, drained up front.
    let governor = Governor::new(GovernorConfig::new(100.0, 100)?);
    governor.admit_async(100).await?;
    let start = Instant::now();

    let big = {
        let governor = governor.clone();
        tokio::spawn(async move { governor.admit_async(80).await })
    };
    while governor.queue_len() == 0 {
        tokio::task::yield_now().await;
    }
    let small = {
        let governor = governor.clone();
        tokio::spawn(async move { governor.admit_async(5).await })
    };

    let big = big.await??;
    println!("   80 units admitted after {:?}", big.waited());
    let small = small.await??;
    println!("   5 units admitted after  {:?}", small.waited());
    println!("   total {:?}\n", start.elapsed());

    // Bounded waits give up without spending anything.
    match governor.admit_async_timeout(100, Duration::from_millis(50)).await {
        Ok(grant) => println!("   unexpected grant of {}", grant.granted()),
        Err(err) => println!("   bounded wait: {err}"),
    }
    println!("   tokens available: {:.1}", governor.available());
    Ok(())
}
