use std::time::Instant;

use anyhow::Context;
use courier::{IpcClient, IpcConfig};

use crate::demo::Ping;
use crate::error::CliResult;

pub async fn execute(count: u32, config: IpcConfig) -> CliResult<()> {
    let client = IpcClient::new(config)?;

    for seq in 1..=count {
        let started = Instant::now();
        let pong = client
            .request(&Ping, None)
            .await
            .with_context(|| format!("ping {seq} failed"))?;
        println!(
            "pong seq={seq} value={} time={:.2}ms",
            pong.value,
            started.elapsed().as_secs_f64() * 1000.0
        );
    }

    client.shutdown();
    Ok(())
}
