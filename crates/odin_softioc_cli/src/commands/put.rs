//! Put command implementation.

use odin_softioc_core::ScanPolicy;
use odin_softioc_ioc::SoftIoc;
use odin_softioc_server::{AdapterConfig, SoftIocAdapter};

/// Runs the put command.
///
/// Writes through the adapter, then shows the response and what each
/// affected PV now holds.
pub fn run(config: AdapterConfig, path: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = SoftIocAdapter::with_memory_ioc(config)?;
    adapter.initialize()?;

    let response = adapter.put(path, value);
    println!("{}", serde_json::to_string_pretty(&response.body)?);

    if response.is_success() {
        let prefix = path.trim_matches('/').replace('/', ".");
        if let Some(bridge) = adapter.controller().bridge() {
            let ioc = adapter.controller().ioc();
            for binding in bridge.bindings() {
                let touched = prefix.is_empty()
                    || binding.node == prefix
                    || binding.node.starts_with(&format!("{prefix}."));
                if touched && binding.scan != ScanPolicy::Polled {
                    println!("{} = {}", binding.pv_name, ioc.get(&binding.pv_name)?);
                }
            }
        }
    }
    adapter.cleanup()?;

    if response.is_success() {
        Ok(())
    } else {
        Err(format!("PUT {path} failed with status {}", response.status_code).into())
    }
}
