//! PV listing command implementation.

use odin_softioc_ioc::SoftIoc;
use odin_softioc_server::{AdapterConfig, SoftIocAdapter};
use serde::Serialize;

/// One published PV.
#[derive(Debug, Serialize)]
pub struct PvRow {
    /// Full PV name.
    pub pv: String,
    /// EPICS record type.
    pub record: String,
    /// Scan policy.
    pub scan: String,
    /// Dotted parameter node.
    pub node: String,
    /// Value at startup.
    pub value: serde_json::Value,
}

/// Runs the pvs command.
pub fn run(config: AdapterConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = SoftIocAdapter::with_memory_ioc(config)?;
    adapter.initialize()?;

    let bridge = adapter
        .controller()
        .bridge()
        .ok_or("bridge did not start")?;
    let ioc = adapter.controller().ioc();

    let mut rows = Vec::new();
    for binding in bridge.bindings() {
        rows.push(PvRow {
            value: ioc.get(&binding.pv_name)?.to_json(),
            record: binding.kind.to_string(),
            scan: binding.scan.to_string(),
            pv: binding.pv_name,
            node: binding.node,
        });
    }
    adapter.cleanup()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => print_text_output(&rows),
    }
    Ok(())
}

fn print_text_output(rows: &[PvRow]) {
    let width = rows.iter().map(|row| row.pv.len()).max().unwrap_or(2).max(2);
    println!("{:<width$}  {:<6}  {:<8}  {:<28}  VALUE", "PV", "RECORD", "SCAN", "NODE");
    for row in rows {
        println!(
            "{:<width$}  {:<6}  {:<8}  {:<28}  {}",
            row.pv, row.record, row.scan, row.node, row.value
        );
    }
    println!();
    println!("{} PVs", rows.len());
}
