//! Timed value sequences on virtual and hardware ports.

use serde_json::json;

use portcore::{Error, PortSpec};

use crate::mock_hw::{Harness, MockDriver};

#[test]
fn sequence_repeats_in_order() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();

    h.sequence("v", &[1.0, 2.0, 3.0], &[0, 0, 0], 2).unwrap();
    h.settle("v");

    let expected: Vec<_> = [1.0, 2.0, 3.0, 1.0, 2.0, 3.0].map(Some).into();
    assert_eq!(h.events.values_of("v"), expected);
    assert_eq!(h.core.get_port_value("v"), Ok(Some(3.0)));
}

#[test]
fn sequence_drives_hardware() {
    let h = Harness::new();
    let driver = MockDriver::with_value(0.0);
    h.core
        .add_peripheral("bus", vec![(PortSpec::boolean("led"), driver.boxed())])
        .unwrap();

    h.sequence("led", &[1.0, 0.0], &[2, 2], 3).unwrap();
    h.settle("led");

    assert_eq!(driver.writes(), vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    assert_eq!(h.core.get_port_value("led"), Ok(Some(0.0)));
}

#[test]
fn direct_write_cancels_sequence() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();

    h.sequence("v", &[1.0, 2.0], &[60_000, 60_000], 0).unwrap();
    h.run_for(5);
    assert_eq!(h.core.get_port_value("v"), Ok(Some(1.0)));
    assert_eq!(h.core.has_sequence("v"), Ok(true));

    h.write("v", 5.0).unwrap();
    assert_eq!(h.core.has_sequence("v"), Ok(false));

    h.run_for(5);
    assert_eq!(h.core.get_port_value("v"), Ok(Some(5.0)));
}

#[test]
fn new_sequence_replaces_running_one() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();

    h.sequence("v", &[1.0, 2.0], &[60_000, 60_000], 0).unwrap();
    h.run_for(5);
    h.sequence("v", &[7.0], &[0], 1).unwrap();
    h.settle("v");

    assert_eq!(h.events.values_of("v"), vec![Some(1.0), Some(7.0)]);
}

#[test]
fn disabling_cancels_sequence() {
    let h = Harness::new();
    h.core.add_virtual_port(PortSpec::number("v")).unwrap();

    h.sequence("v", &[1.0, 2.0], &[60_000, 60_000], 0).unwrap();
    h.run_for(5);
    h.patch("v", json!({"enabled": false})).unwrap();

    assert_eq!(h.core.has_sequence("v"), Ok(false));
}

#[test]
fn sequence_is_validated_up_front() {
    let h = Harness::new();
    h.core
        .add_virtual_port(PortSpec::number("v").range(0.0, 10.0))
        .unwrap();
    h.core
        .add_virtual_port(PortSpec::number("ro").read_only())
        .unwrap();
    h.core.add_virtual_port(PortSpec::number("d")).unwrap();
    h.patch("d", json!({"expression": "1"})).unwrap();

    assert_eq!(
        h.sequence("v", &[1.0, 2.0], &[10], 1),
        Err(Error::InvalidField("delays".into()))
    );
    assert_eq!(
        h.sequence("v", &[1.0, 20.0], &[10, 10], 1),
        Err(Error::InvalidField("values".into()))
    );
    assert_eq!(
        h.sequence("ro", &[1.0], &[10], 1),
        Err(Error::ReadOnlyPort)
    );
    assert_eq!(
        h.sequence("d", &[1.0], &[10], 1),
        Err(Error::PortWithExpression)
    );
    assert_eq!(h.core.has_sequence("v"), Ok(false));
}
