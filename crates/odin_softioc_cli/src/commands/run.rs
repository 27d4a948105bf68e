//! Run command implementation.

use odin_softioc_server::{AdapterConfig, SoftIocAdapter};
use std::time::Duration;

/// Runs the run command.
///
/// Starts the adapter on a tokio runtime and serves until Ctrl-C, or until
/// `duration` seconds have passed.
pub fn run(config: AdapterConfig, duration: Option<f64>) -> Result<(), Box<dyn std::error::Error>> {
    let duration = duration
        .map(|secs| {
            if secs.is_finite() && secs > 0.0 {
                Ok(Duration::from_secs_f64(secs))
            } else {
                Err(format!("duration must be a positive number of seconds, got {secs}"))
            }
        })
        .transpose()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("odin-softioc")
        .build()?;

    runtime.block_on(async move {
        let adapter = SoftIocAdapter::with_memory_ioc(config)?;
        adapter.initialize()?;

        let prefix = adapter.controller().config().ioc_device_prefix.clone();
        let pvs = adapter
            .controller()
            .bridge()
            .map(|bridge| bridge.bindings().len())
            .unwrap_or(0);
        tracing::info!(%prefix, pvs, "serving soft IOC, press Ctrl-C to stop");

        match duration {
            Some(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        tracing::info!("run duration elapsed");
                    }
                    result = tokio::signal::ctrl_c() => {
                        result?;
                        tracing::info!("interrupted");
                    }
                }
            }
            None => {
                tokio::signal::ctrl_c().await?;
                tracing::info!("interrupted");
            }
        }

        if let Some(bridge) = adapter.controller().bridge() {
            let stats = bridge.stats();
            println!(
                "control writes: {}, device writes: {}, refreshes: {}, rejected: {}, propagation failures: {}, dropped events: {}",
                stats.control_writes,
                stats.device_writes,
                stats.refreshes,
                stats.rejected_writes,
                stats.propagation_failures,
                stats.dropped_events
            );
        }
        adapter.cleanup()?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
