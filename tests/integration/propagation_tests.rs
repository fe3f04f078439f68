//! Derived ports: expression evaluation driven by ticks.

use serde_json::json;

use portcore::PortSpec;

use crate::mock_hw::{Harness, MockDriver, T0};

fn vports(h: &Harness, ids: &[&str]) {
    for id in ids {
        h.core.add_virtual_port(PortSpec::number(id)).unwrap();
    }
}

#[test]
fn changes_propagate_through_a_chain_in_one_tick() {
    let h = Harness::new();
    vports(&h, &["a", "b", "c"]);
    h.patch("b", json!({"expression": "MUL($a, 2)"})).unwrap();
    h.patch("c", json!({"expression": "ADD($b, 1)"})).unwrap();
    h.tick();

    h.write("a", 3.0).unwrap();
    h.tick();

    assert_eq!(h.core.get_port_value("b"), Ok(Some(6.0)));
    assert_eq!(h.core.get_port_value("c"), Ok(Some(7.0)));
}

#[test]
fn new_expression_is_evaluated_on_next_tick() {
    let h = Harness::new();
    vports(&h, &["k"]);
    h.patch("k", json!({"expression": "ADD(2, 3)"})).unwrap();
    assert_eq!(h.core.get_port_value("k"), Ok(None));

    h.tick();
    assert_eq!(h.core.get_port_value("k"), Ok(Some(5.0)));
}

#[test]
fn unchanged_inputs_do_not_reevaluate() {
    let h = Harness::new();
    vports(&h, &["a", "b"]);
    h.patch("b", json!({"expression": "ADD($a, 1)"})).unwrap();
    h.write("a", 1.0).unwrap();
    h.tick();
    h.events.clear();

    h.tick();
    h.tick();
    assert!(h.events.values_of("b").is_empty());
}

#[test]
fn missing_inputs_keep_previous_value() {
    let h = Harness::new();
    vports(&h, &["a", "b"]);
    h.patch("b", json!({"expression": "ADD($a, 1)"})).unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("b"), Ok(None));

    h.write("a", 1.0).unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("b"), Ok(Some(2.0)));

    h.patch("a", json!({"enabled": false})).unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("b"), Ok(Some(2.0)));
}

#[test]
fn results_are_adapted_to_the_port() {
    let h = Harness::new();
    vports(&h, &["a"]);
    h.core
        .add_virtual_port(PortSpec::number("pct").range(0.0, 100.0).integer())
        .unwrap();
    h.patch("pct", json!({"expression": "MUL($a, 10)"})).unwrap();

    h.write("a", 42.0).unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("pct"), Ok(Some(100.0)));

    h.write("a", 1.26).unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("pct"), Ok(Some(12.0)));
}

#[test]
fn time_dependent_expressions_follow_the_clock() {
    let h = Harness::new();
    vports(&h, &["now"]);
    h.patch("now", json!({"expression": "TIMEMS()"})).unwrap();

    h.tick();
    assert_eq!(h.core.get_port_value("now"), Ok(Some(T0 as f64)));

    h.clock.advance(10);
    h.tick();
    assert_eq!(h.core.get_port_value("now"), Ok(Some((T0 + 10) as f64)));
}

#[test]
fn calendar_functions_wait_for_a_real_clock() {
    let h = Harness::new();
    h.clock.set_real(false);
    vports(&h, &["t"]);
    h.patch("t", json!({"expression": "TIME()"})).unwrap();

    h.tick();
    assert_eq!(h.core.get_port_value("t"), Ok(None));

    h.clock.set_real(true);
    h.clock.advance(1000);
    h.tick();
    assert_eq!(
        h.core.get_port_value("t"),
        Ok(Some(((T0 + 1000) / 1000) as f64))
    );
}

#[test]
fn hardware_derived_ports_write_through_the_driver() {
    let h = Harness::new();
    let out = MockDriver::with_value(0.0);
    h.core
        .add_peripheral("bus", vec![(PortSpec::boolean("out"), out.boxed())])
        .unwrap();
    vports(&h, &["cmd"]);
    h.patch("out", json!({"expression": "GT($cmd, 5)"})).unwrap();

    h.write("cmd", 9.0).unwrap();
    h.tick();
    h.run_for(20);

    assert_eq!(out.writes(), vec![1.0]);
    assert_eq!(h.core.get_port_value("out"), Ok(Some(1.0)));

    // Derived hardware ports are not polled.
    let reads = out.state().reads;
    h.tick();
    h.run_for(5);
    assert_eq!(out.state().reads, reads);
}

#[test]
fn removed_inputs_stop_evaluation() {
    let h = Harness::new();
    vports(&h, &["a", "b"]);
    h.patch("b", json!({"expression": "ADD($a, 1)"})).unwrap();
    h.write("a", 1.0).unwrap();
    h.tick();

    h.core.remove_port("a").unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("b"), Ok(Some(2.0)));
}

#[test]
fn self_reference_sees_previous_value() {
    let h = Harness::new();
    vports(&h, &["tick", "count"]);
    h.write("count", 0.0).unwrap();
    h.patch("count", json!({"expression": "ADD($, $tick)"})).unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("count"), Ok(Some(0.0)));

    h.write("tick", 1.0).unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("count"), Ok(Some(1.0)));

    h.write("tick", 2.0).unwrap();
    h.tick();
    assert_eq!(h.core.get_port_value("count"), Ok(Some(3.0)));
}

// ── History ───────────────────────────────────────────────────

#[test]
fn on_change_history_records_every_change() {
    let h = Harness::new();
    vports(&h, &["v"]);
    h.patch("v", json!({"history_interval": -1})).unwrap();

    h.write("v", 1.0).unwrap();
    h.clock.advance(1000);
    h.write("v", 2.0).unwrap();
    h.clock.advance(1000);
    h.write("v", 2.0).unwrap();

    let samples = h.core.get_port_history("v", None, None, None).unwrap();
    let values: Vec<_> = samples.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![Some(1.0), Some(2.0)]);
    assert_eq!(samples[0].timestamp_ms, T0);

    let later = h
        .core
        .get_port_history("v", Some(T0 + 1), None, None)
        .unwrap();
    assert_eq!(later.len(), 1);

    assert_eq!(h.core.remove_port_history("v", None, Some(T0 + 1)), Ok(1));
    assert_eq!(
        h.core.get_port_history("v", None, None, None).unwrap().len(),
        1
    );
}

#[test]
fn periodic_history_samples_on_interval() {
    let h = Harness::new();
    vports(&h, &["v"]);
    h.write("v", 4.0).unwrap();
    h.patch("v", json!({"history_interval": 10})).unwrap();

    h.tick();
    h.clock.advance(5_000);
    h.tick();
    h.clock.advance(5_000);
    h.tick();

    let samples = h.core.get_port_history("v", None, None, None).unwrap();
    let stamps: Vec<_> = samples.iter().map(|s| s.timestamp_ms).collect();
    assert_eq!(stamps, vec![T0, T0 + 10_000]);
}

#[test]
fn janitor_purges_expired_samples() {
    let h = Harness::new();
    vports(&h, &["v"]);
    h.patch("v", json!({"history_interval": -1, "history_retention": 10}))
        .unwrap();

    h.write("v", 1.0).unwrap();
    h.clock.advance(20_000);
    h.write("v", 2.0).unwrap();
    h.tick();

    let samples = h.core.get_port_history("v", None, None, None).unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, Some(2.0));
}
