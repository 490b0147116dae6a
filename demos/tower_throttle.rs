//! Throttling a tower service by payload size.

use io_fixed_throughput::prelude::*;
use std::time::{Duration, Instant};
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== io-fixed-throughput: tower layer ===\n");

    // 4 KiB/s, one 4 KiB payload of burst.
    let governor = Governor::with_rate(4096.0, 4096)?;
    let layer = GovernorLayer::new(governor.clone())
        .weigh_with(|payload: &Vec<u8>| payload.len() as u64)
        .max_wait(Duration::from_secs(2));

    let mut svc = ServiceBuilder::new().layer(layer).service(service_fn(|payload: Vec<u8>| async move {
        Ok::<_, std::io::Error>(payload.len())
    }));

    let start = Instant::now();
    for size in [4096, 1024, 1024, 2048] {
        let written = svc.ready().await?.call(vec![0u8; size]).await?;
        println!("   {written:>5} bytes at {:?}", start.elapsed());
    }

    // Larger than the bucket: rejected outright.
    match svc.ready().await?.call(vec![0u8; 8192]).await {
        Ok(_) => println!("   oversized payload went through?"),
        Err(err) => println!("   oversized payload: {err}"),
    }

    println!("\n   {:?}", governor.stats());
    Ok(())
}
