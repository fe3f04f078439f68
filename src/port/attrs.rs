//! Port attribute table.
//!
//! | name                | modifiable | persisted | schema              |
//! |---------------------|------------|-----------|---------------------|
//! | `id`, `type`        | no         | -         | -                   |
//! | `writable`          | no         | -         | -                   |
//! | `virtual`, `online` | no         | -         | -                   |
//! | `enabled`           | yes        | yes       | bool                |
//! | `display_name`      | yes        | yes       | string ≤ 64         |
//! | `unit`, `tag`       | yes        | yes       | string ≤ 64         |
//! | `expression`        | writable   | yes       | string ≤ 1024       |
//! | `history_interval`  | yes        | yes       | integer ≥ -1        |
//! | `history_retention` | yes        | yes       | integer ≥ 0         |
//! | `min`, `max`, ...   | no         | -         | fixed at creation   |

use serde_json::{Value, json};

use crate::app::ports::Record;
use crate::error::{Error, Result};

use super::Port;

/// Collection holding persisted attributes, keyed by port id.
pub const COLLECTION: &str = "ports";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Fixed,
    Bool,
    Integer { min: i64 },
    Text { max_len: usize },
}

#[derive(Debug)]
pub struct AttrDef {
    pub name: &'static str,
    pub modifiable: bool,
    pub schema: Schema,
}

const fn fixed(name: &'static str) -> AttrDef {
    AttrDef {
        name,
        modifiable: false,
        schema: Schema::Fixed,
    }
}

const fn modifiable(name: &'static str, schema: Schema) -> AttrDef {
    AttrDef {
        name,
        modifiable: true,
        schema,
    }
}

static ATTRS: &[AttrDef] = &[
    fixed("id"),
    fixed("type"),
    fixed("writable"),
    fixed("virtual"),
    fixed("online"),
    modifiable("enabled", Schema::Bool),
    modifiable("display_name", Schema::Text { max_len: 64 }),
    modifiable("unit", Schema::Text { max_len: 64 }),
    modifiable("tag", Schema::Text { max_len: 64 }),
    modifiable("expression", Schema::Text { max_len: 1024 }),
    modifiable("history_interval", Schema::Integer { min: -1 }),
    modifiable("history_retention", Schema::Integer { min: 0 }),
    fixed("min"),
    fixed("max"),
    fixed("integer"),
    fixed("step"),
    fixed("choices"),
];

/// Attributes saved to [`COLLECTION`] after each patch.
pub const PERSISTED: &[&str] = &[
    "enabled",
    "display_name",
    "unit",
    "tag",
    "expression",
    "history_interval",
    "history_retention",
];

pub fn lookup(name: &str) -> Option<&'static AttrDef> {
    ATTRS.iter().find(|a| a.name == name)
}

/// A validated attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Integer(i64),
    /// `None` clears the attribute.
    Text(Option<String>),
}

impl AttrDef {
    fn parse(&self, value: &Value) -> Option<AttrValue> {
        match self.schema {
            Schema::Fixed => None,
            Schema::Bool => value.as_bool().map(AttrValue::Bool),
            Schema::Integer { min } => {
                let n = value.as_i64().or_else(|| {
                    value
                        .as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                        .map(|f| f as i64)
                })?;
                (n >= min).then_some(AttrValue::Integer(n))
            }
            Schema::Text { max_len } => match value {
                Value::Null => Some(AttrValue::Text(None)),
                Value::String(s) if s.chars().count() <= max_len => {
                    Some(AttrValue::Text((!s.is_empty()).then(|| s.clone())))
                }
                _ => None,
            },
        }
    }
}

/// Resolve and validate one attribute write for `port`.
///
/// Unknown names and known-but-frozen names fail differently so callers
/// can tell the two apart.
pub fn check(port: &Port, name: &str, value: &Value) -> Result<AttrValue> {
    let def = lookup(name).ok_or_else(|| Error::NoSuchAttribute(name.into()))?;
    if !def.modifiable || (name == "expression" && !port.is_writable()) {
        return Err(Error::AttributeNotModifiable(name.into()));
    }
    def.parse(value).ok_or_else(|| Error::InvalidField(name.into()))
}

/// Every attribute of `port`, plus its current value.
pub fn to_json(port: &Port) -> Value {
    let spec = port.spec();
    let state = port.state();
    let value = if state.enabled { state.value } else { None };
    let mut attrs = json!({
        "id": spec.id,
        "type": spec.port_type,
        "writable": spec.writable,
        "virtual": port.is_virtual(),
        "online": port.is_online(),
        "enabled": state.enabled,
        "display_name": state.display_name,
        "unit": state.unit,
        "tag": state.tag,
        "expression": state.expression.as_ref().map(|a| a.text.as_str()),
        "history_interval": state.history_interval,
        "history_retention": state.history_retention,
        "integer": spec.integer,
        "value": value,
    });
    if let Value::Object(map) = &mut attrs {
        for (key, v) in [("min", spec.min), ("max", spec.max), ("step", spec.step)] {
            if let Some(v) = v {
                map.insert(key.into(), json!(v));
            }
        }
        if let Some(choices) = &spec.choices {
            map.insert("choices".into(), json!(choices));
        }
    }
    attrs
}

/// Record stored in [`COLLECTION`] for `port`.
pub fn persisted_record(port: &Port) -> Record {
    let Value::Object(all) = to_json(port) else {
        return Record::new();
    };
    let mut record: Record = all
        .into_iter()
        .filter(|(k, _)| PERSISTED.contains(&k.as_str()))
        .collect();
    record.insert("id".into(), Value::String(port.id().into()));
    record
}
