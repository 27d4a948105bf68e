//! End-to-end tests: tree, engine, bridge and in-memory IOC together.

use odin_softioc_core::{
    BridgeError, Branch, Origin, ParamValue, Parameter, ParameterTree, RecordKind, ScanPolicy,
};
use odin_softioc_ioc::{IocError, IocState, MemoryIoc, SoftIoc};
use odin_softioc_server::{AdapterConfig, BridgeConfig, BridgeService, SoftIocAdapter};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn temperature_tree() -> ParameterTree {
    ParameterTree::new(
        Branch::new()
            .branch(
                "temp",
                Branch::new()
                    .param("setpoint", Parameter::value(20.0).writeable())
                    .param("readback", Parameter::value(19.5)),
            )
            .branch(
                "status",
                Branch::new().param("enabled", Parameter::value(false).writeable()),
            ),
    )
}

fn start_bridge(prefix: &str) -> (Arc<BridgeService<MemoryIoc>>, Arc<MemoryIoc>) {
    let ioc = Arc::new(MemoryIoc::new());
    let bridge = BridgeService::start(
        Arc::new(temperature_tree()),
        Arc::clone(&ioc),
        BridgeConfig::new(prefix).with_propagation_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    (Arc::new(bridge), ioc)
}

#[test]
fn temperature_scenario() {
    let (bridge, ioc) = start_bridge("LAB");

    let bindings = bridge.bindings();
    assert_eq!(bindings.len(), 3);
    let names: Vec<&str> = bindings.iter().map(|b| b.pv_name.as_str()).collect();
    assert_eq!(names, ["LAB:TEMP:SETPOINT", "LAB:TEMP:READBACK", "LAB:STATUS:ENABLED"]);
    assert_eq!(bindings[0].kind, RecordKind::AnalogOut);
    assert_eq!(bindings[1].kind, RecordKind::AnalogIn);
    assert_eq!(bindings[2].kind, RecordKind::BinaryOut);
    assert!(bindings.iter().all(|b| b.scan == ScanPolicy::Interrupt));

    // control write reaches the PV
    bridge.tree().set("temp/setpoint", &json!(25.5)).unwrap();
    assert_eq!(
        bridge.device_read("LAB:TEMP:SETPOINT").unwrap(),
        ParamValue::Float(25.5)
    );
    assert_eq!(ioc.caget("LAB:TEMP:SETPOINT").unwrap(), ParamValue::Float(25.5));
    let snapshot = bridge.engine().read("temp.setpoint").unwrap();
    assert_eq!(snapshot.origin, Origin::Control);

    // read-only node refuses control writes and the PV is untouched
    let err = bridge
        .tree()
        .set("temp/readback", &json!(30.0))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Validation { .. }));
    assert_eq!(ioc.caget("LAB:TEMP:READBACK").unwrap(), ParamValue::Float(19.5));

    // shutdown: no more writes, no records left
    bridge.shutdown().unwrap();
    assert!(matches!(
        bridge.engine().write_from_control("temp.setpoint", ParamValue::Float(1.0)),
        Err(BridgeError::ShuttingDown)
    ));
    assert!(matches!(
        bridge.engine().write_from_device("temp.setpoint", ParamValue::Float(1.0)),
        Err(BridgeError::ShuttingDown)
    ));
    assert!(ioc.record_names().is_empty());
    assert_eq!(ioc.state(), IocState::Stopped);
}

#[test]
fn caput_flows_into_tree_and_events() {
    let (bridge, ioc) = start_bridge("LAB");
    let events = bridge.subscribe();

    ioc.caput("LAB:STATUS:ENABLED", true).unwrap();

    let event = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(event.node, "status.enabled");
    assert_eq!(event.origin, Origin::Device);
    assert_eq!(
        bridge.tree().get("status/enabled", false).unwrap(),
        json!({"enabled": true})
    );

    // the IOC refuses client writes to input records
    assert!(matches!(
        ioc.caput("LAB:TEMP:READBACK", 1.0),
        Err(IocError::ReadOnlyRecord(_))
    ));
}

#[test]
fn application_update_reaches_read_only_pv() {
    let (bridge, ioc) = start_bridge("LAB");
    bridge.tree().update("temp.readback", 21.0).unwrap();
    assert_eq!(ioc.caget("LAB:TEMP:READBACK").unwrap(), ParamValue::Float(21.0));
    assert_eq!(bridge.stats().refreshes, 1);
}

#[test]
fn stalled_record_does_not_block_other_nodes() {
    let (bridge, ioc) = start_bridge("LAB");
    ioc.set_write_delay("LAB:TEMP:SETPOINT", Duration::from_millis(300));

    let slow = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || bridge.tree().set("temp/setpoint", &json!(40.0)))
    };
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    bridge.tree().set("status/enabled", &json!(true)).unwrap();
    assert!(started.elapsed() < Duration::from_millis(150));

    // the stalled push misses its deadline; the engine keeps the value
    slow.join().unwrap().unwrap();
    assert_eq!(
        bridge.engine().read("temp.setpoint").unwrap().value,
        ParamValue::Float(40.0)
    );
    assert_eq!(bridge.stats().propagation_failures, 1);
    assert_eq!(ioc.caget("LAB:TEMP:SETPOINT").unwrap(), ParamValue::Float(20.0));
}

#[test]
fn name_collision_aborts_startup() {
    let tree = Arc::new(ParameterTree::new(
        Branch::new()
            .param("a_b", Parameter::value(1))
            .param("a-b", Parameter::value(2)),
    ));
    let ioc = Arc::new(MemoryIoc::new());
    let err = BridgeService::start(tree, Arc::clone(&ioc), BridgeConfig::new("X")).unwrap_err();
    assert!(err.is_startup_error());
    assert!(ioc.is_empty());
    assert_eq!(ioc.state(), IocState::Building);
}

#[test]
fn adapter_round_trip() {
    let adapter =
        SoftIocAdapter::with_memory_ioc(AdapterConfig::new().with_prefix("ADP")).unwrap();
    adapter.initialize().unwrap();
    let ioc = Arc::clone(adapter.controller().ioc());

    let response = adapter.put("task_count", "7");
    assert_eq!(response.status_code, 200);
    assert_eq!(ioc.caget("ADP:BG-TASK-COUNT").unwrap(), ParamValue::Int(7));

    ioc.caput("ADP:BG-TASK-COUNT", 9).unwrap();
    assert_eq!(adapter.get("task_count", false).body, json!({"task_count": 9}));

    let response = adapter.put("ioc_device_prefix", r#""NEW""#);
    assert_eq!(response.status_code, 400);

    adapter.cleanup().unwrap();
    assert!(ioc.is_empty());
    // after cleanup the tree serves its own values again
    assert_eq!(adapter.get("task_count", false).body, json!({"task_count": 9}));
}
