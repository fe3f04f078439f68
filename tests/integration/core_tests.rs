//! Core service scenarios: writes, attributes, virtual ports and reads.

use serde_json::json;

use portcore::expr::ExprError;
use portcore::peripheral::RUNNER_QUEUE_SIZE;
use portcore::{CoreConfig, Error, PortSpec};

use crate::mock_hw::{Harness, MockDriver};

fn with_relay(h: &Harness, driver: &MockDriver) {
    h.core
        .add_peripheral("bus", vec![(PortSpec::boolean("relay"), driver.boxed())])
        .unwrap();
}

// ── Writes ────────────────────────────────────────────────────

#[test]
fn repeated_write_emits_exactly_one_value_change() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();

    h.write("v", 5.0).unwrap();
    h.events.clear();
    h.write("v", 5.0).unwrap();

    assert_eq!(h.events.values_of("v"), vec![Some(5.0)]);
}

#[test]
fn ignored_hardware_write_reports_actual_value() {
    let h = Harness::new();
    let driver = MockDriver::with_value(0.0);
    with_relay(&h, &driver);
    h.tick();
    assert_eq!(h.core.get_port_value("relay"), Ok(Some(0.0)));

    driver.state().ignore_writes = true;
    h.events.clear();
    h.write("relay", 1.0).unwrap();

    assert_eq!(driver.writes(), vec![1.0]);
    assert_eq!(h.events.values_of("relay"), vec![Some(0.0)]);
    assert_eq!(h.core.get_port_value("relay"), Ok(Some(0.0)));
}

#[test]
fn hardware_write_reads_back_the_value() {
    let h = Harness::new();
    let driver = MockDriver::with_value(0.0);
    with_relay(&h, &driver);

    h.write("relay", 1.0).unwrap();

    assert_eq!(driver.writes(), vec![1.0]);
    assert_eq!(h.core.get_port_value("relay"), Ok(Some(1.0)));
    assert_eq!(h.events.values_of("relay"), vec![Some(1.0)]);
}

#[test]
fn step_grid_is_anchored_at_min() {
    let h = Harness::new();
    h.core
        .add_virtual_port(PortSpec::number("dim").range(0.0, 100.0).step(5.0))
        .unwrap();

    assert_eq!(h.write("dim", 7.0), Err(Error::InvalidField("value".into())));
    assert_eq!(h.write("dim", 10.0), Ok(()));
    assert_eq!(h.core.get_port_value("dim"), Ok(Some(10.0)));
}

#[test]
fn boolean_ports_only_take_zero_or_one() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::boolean("b")).unwrap();

    assert_eq!(h.write("b", 2.0), Err(Error::InvalidField("value".into())));
    assert_eq!(h.write("b", 1.0), Ok(()));
}

// ── Expressions ───────────────────────────────────────────────

#[test]
fn circular_expressions_are_rejected() {
    let h = Harness::new();
    for id in ["a", "b", "c"] {
        h.core.add_virtual_port(PortSpec::number(id)).unwrap();
    }
    h.patch("b", json!({"expression": "$c"})).unwrap();
    h.patch("c", json!({"expression": "$a"})).unwrap();

    let r = h.patch("a", json!({"expression": "ADD($b, 1)"}));
    assert!(
        matches!(r, Err(Error::Expression(ExprError::CircularDependency(_)))),
        "{r:?}"
    );
    assert_eq!(h.core.get_port("a").unwrap()["expression"], json!(null));
}

#[test]
fn diamond_dependencies_are_accepted() {
    let h = Harness::new();
    for id in ["a", "b", "c", "d"] {
        h.core.add_virtual_port(PortSpec::number(id)).unwrap();
    }
    h.patch("b", json!({"expression": "$d"})).unwrap();
    h.patch("c", json!({"expression": "$d"})).unwrap();
    h.patch("a", json!({"expression": "ADD($b, $c)"})).unwrap();

    assert_eq!(h.core.get_port("a").unwrap()["expression"], "ADD($b, $c)");
}

#[test]
fn bad_expressions_are_rejected() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();

    assert!(matches!(
        h.patch("v", json!({"expression": "NOPE(1)"})),
        Err(Error::Expression(_))
    ));
    assert!(matches!(
        h.patch("v", json!({"expression": "ADD(1)"})),
        Err(Error::Expression(ExprError::ArgumentCount { .. }))
    ));
}

// ── Attributes ────────────────────────────────────────────────

#[test]
fn attribute_patch_errors() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();
    h.core
        .add_virtual_port(PortSpec::number("ro").read_only())
        .unwrap();

    assert_eq!(
        h.patch("v", json!({"colour": "red"})),
        Err(Error::NoSuchAttribute("colour".into()))
    );
    assert_eq!(
        h.patch("v", json!({"id": "w"})),
        Err(Error::AttributeNotModifiable("id".into()))
    );
    assert_eq!(
        h.patch("ro", json!({"expression": "1"})),
        Err(Error::AttributeNotModifiable("expression".into()))
    );
    assert_eq!(
        h.patch("v", json!({"enabled": "yes"})),
        Err(Error::InvalidField("enabled".into()))
    );
    assert_eq!(
        h.patch("nope", json!({"unit": "V"})),
        Err(Error::NoSuchPort("nope".into()))
    );
}

#[test]
fn first_bad_attribute_in_request_order_is_reported() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();

    assert_eq!(
        h.patch("v", json!({"zzz": 1, "id": "x"})),
        Err(Error::NoSuchAttribute("zzz".into()))
    );
    assert_eq!(
        h.patch("v", json!({"id": "x", "zzz": 1})),
        Err(Error::AttributeNotModifiable("id".into()))
    );
}

#[test]
fn disabled_port_hides_its_value() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();
    h.write("v", 3.0).unwrap();

    h.patch("v", json!({"enabled": false})).unwrap();
    assert_eq!(h.core.get_port_value("v"), Ok(None));
    assert_eq!(h.core.get_port("v").unwrap()["value"], json!(null));
    assert_eq!(h.write("v", 1.0), Err(Error::PortDisabled));

    h.patch("v", json!({"enabled": true})).unwrap();
    assert_eq!(h.core.get_port_value("v"), Ok(Some(3.0)));
}

#[test]
fn attribute_patch_emits_port_update() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();
    h.events.clear();

    h.patch("v", json!({"unit": "W", "display_name": "Power"})).unwrap();

    assert_eq!(h.events.count("port-update", "v"), 1);
    let update = h.events.last("port-update", "v").unwrap();
    assert_eq!(update["unit"], "W");
    assert_eq!(update["display_name"], "Power");
}

#[test]
fn attributes_survive_restart() {
    let h = Harness::new();
    let driver = MockDriver::with_value(1.0);
    with_relay(&h, &driver);
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();
    h.patch("v", json!({"unit": "K", "expression": "ADD($relay, 1)"}))
        .unwrap();
    h.patch("relay", json!({"enabled": false})).unwrap();
    h.core.block_on(h.core.shutdown());

    let store = h.store.clone();
    drop(h);
    let h = Harness::with_store(CoreConfig::default(), store);
    with_relay(&h, &MockDriver::with_value(1.0));

    let v = h.core.get_port("v").unwrap();
    assert_eq!(v["unit"], "K");
    assert_eq!(v["expression"], "ADD($relay, 1)");
    assert_eq!(h.core.get_port("relay").unwrap()["enabled"], false);
}

// ── Virtual ports ─────────────────────────────────────────────

#[test]
fn virtual_port_limits() {
    let h = Harness::with_config(CoreConfig {
        max_virtual_ports: 2,
        ..CoreConfig::default()
    });
    h.core.add_virtual_port(PortSpec::number("a")).unwrap();
    assert_eq!(
        h.core.add_virtual_port(PortSpec::number("a")),
        Err(Error::DuplicatePort("a".into()))
    );
    h.core.add_virtual_port(PortSpec::number("b")).unwrap();
    assert_eq!(
        h.core.add_virtual_port(PortSpec::number("c")),
        Err(Error::TooManyPorts)
    );
    assert_eq!(
        h.core.add_virtual_port(PortSpec::number("bad id!")),
        Err(Error::InvalidField("id".into()))
    );
}

#[test]
fn removing_ports() {
    let h = Harness::new();
    with_relay(&h, &MockDriver::default());
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();
    h.patch("v", json!({"history_interval": -1})).unwrap();
    h.write("v", 1.0).unwrap();

    assert_eq!(
        h.core.remove_port("relay"),
        Err(Error::PortNotRemovable("relay".into()))
    );

    h.core.remove_port("v").unwrap();
    assert_eq!(h.events.count("port-remove", "v"), 1);
    assert_eq!(h.core.get_port("v"), Err(Error::NoSuchPort("v".into())));
    assert_eq!(h.core.remove_port("v"), Err(Error::NoSuchPort("v".into())));

    // A new port with the same id starts clean.
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();
    assert_eq!(h.core.get_port_value("v"), Ok(None));
    assert!(h.core.get_port_history("v", None, None, None).unwrap().is_empty());
}

#[test]
fn virtual_ports_survive_restart() {
    let h = Harness::new();
    h.core
        .add_virtual_port(PortSpec::number("v").range(0.0, 10.0))
        .unwrap();
    let store = h.store.clone();
    drop(h);

    let h = Harness::with_store(CoreConfig::default(), store);
    let v = h.core.get_port("v").unwrap();
    assert_eq!(v["virtual"], true);
    assert_eq!(v["max"], 10.0);
}

// ── Hardware reads ────────────────────────────────────────────

#[test]
fn read_failures_are_reported_until_recovery() {
    let h = Harness::new();
    let driver = MockDriver::with_value(1.0);
    with_relay(&h, &driver);
    h.tick();
    assert_eq!(h.core.get_port("relay").unwrap()["online"], true);

    driver.state().read_error = Some(Error::PortError("bus fault".into()));
    h.events.clear();
    h.tick();

    assert_eq!(
        h.core.get_port_value("relay"),
        Err(Error::PortError("bus fault".into()))
    );
    assert_eq!(h.core.get_port("relay").unwrap()["online"], false);
    assert_eq!(h.events.count("port-update", "relay"), 1);

    driver.state().read_error = None;
    h.tick();
    assert_eq!(h.core.get_port_value("relay"), Ok(Some(1.0)));
    assert_eq!(h.core.get_port("relay").unwrap()["online"], true);
}

#[test]
fn disabled_hardware_ports_are_not_read() {
    let h = Harness::new();
    let driver = MockDriver::with_value(1.0);
    with_relay(&h, &driver);
    h.patch("relay", json!({"enabled": false})).unwrap();

    h.tick();
    assert_eq!(driver.state().reads, 0);
}

#[test]
fn hardware_changes_are_notified_once() {
    let h = Harness::new();
    let driver = MockDriver::with_value(1.0);
    with_relay(&h, &driver);

    h.tick();
    h.tick();
    assert_eq!(h.events.values_of("relay"), vec![Some(1.0)]);

    driver.state().value = Some(0.0);
    h.tick();
    assert_eq!(h.events.values_of("relay"), vec![Some(1.0), Some(0.0)]);
}

#[test]
fn full_peripheral_queue_is_reported_as_busy() {
    let h = Harness::with_config(CoreConfig {
        tick_interval_ms: 10,
        read_timeout_ms: 10,
        write_timeout_ms: 10,
        ..CoreConfig::default()
    });
    let driver = MockDriver::with_value(0.0);
    with_relay(&h, &driver);
    h.tick();
    let online = h.core.get_port("relay").unwrap()["online"].clone();

    let gate = driver.hold();
    // One call runs on the worker, the rest wait in the queue.
    for _ in 0..=RUNNER_QUEUE_SIZE {
        assert_eq!(h.write("relay", 1.0), Err(Error::PortTimeout));
    }
    let busy = h.write("relay", 1.0).unwrap_err();
    assert_eq!(busy, Error::Busy);
    assert!(busy.is_retryable());

    // A read that cannot be queued leaves the port's health alone.
    h.tick();
    assert_eq!(h.core.get_port_value("relay"), Ok(Some(0.0)));
    assert_eq!(h.core.get_port("relay").unwrap()["online"], online);

    drop(gate);
    h.run_for(20);
    assert_eq!(driver.writes().len(), RUNNER_QUEUE_SIZE + 1);
}
