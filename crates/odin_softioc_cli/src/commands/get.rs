//! Get command implementation.

use odin_softioc_server::{AdapterConfig, SoftIocAdapter};

/// Runs the get command.
pub fn run(
    config: AdapterConfig,
    path: &str,
    metadata: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = SoftIocAdapter::with_memory_ioc(config)?;
    adapter.initialize()?;
    let response = adapter.get(path, metadata);
    adapter.cleanup()?;

    println!("{}", serde_json::to_string_pretty(&response.body)?);
    if response.is_success() {
        Ok(())
    } else {
        Err(format!("GET {path} failed with status {}", response.status_code).into())
    }
}
