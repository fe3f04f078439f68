//! Virtual port definitions and their persistence.
//!
//! A virtual port is defined entirely by its [`PortSpec`]; it is
//! stored in the `vports` collection under the port id and reloaded when
//! the core starts.

use log::warn;
use serde_json::Value;

use crate::app::ports::{Filter, Store};
use crate::error::{Error, Result, StorageError};
use crate::expr::parse::is_valid_port_id;

use super::PortSpec;

pub const COLLECTION: &str = "vports";

/// Reject definitions that could never hold a value.
pub fn validate(spec: &PortSpec) -> Result<()> {
    if !is_valid_port_id(&spec.id) {
        return Err(Error::InvalidField("id".into()));
    }
    if let (Some(min), Some(max)) = (spec.min, spec.max) {
        if min > max {
            return Err(Error::InvalidField("max".into()));
        }
    }
    if spec.step.is_some_and(|step| !step.is_finite() || step < 0.0) {
        return Err(Error::InvalidField("step".into()));
    }
    if spec.choices.as_ref().is_some_and(Vec::is_empty) {
        return Err(Error::InvalidField("choices".into()));
    }
    Ok(())
}

pub fn save(store: &mut dyn Store, spec: &PortSpec) -> Result<()> {
    let Ok(Value::Object(record)) = serde_json::to_value(spec) else {
        return Err(StorageError::Corrupted.into());
    };
    store.replace(COLLECTION, &spec.id, record)?;
    Ok(())
}

/// Every stored definition.  Records that no longer decode are skipped.
pub fn load(store: &dyn Store) -> Result<Vec<PortSpec>> {
    let records = store.query(COLLECTION, &Filter::new(), &[], None)?;
    Ok(records
        .into_iter()
        .filter_map(|record| {
            let id = record.get("id").cloned();
            match serde_json::from_value::<PortSpec>(Value::Object(record)) {
                Ok(spec) if validate(&spec).is_ok() => Some(spec),
                _ => {
                    warn!("VPorts: skipping unreadable definition {:?}", id);
                    None
                }
            }
        })
        .collect())
}

pub fn remove(store: &mut dyn Store, id: &str) -> Result<()> {
    store.remove(COLLECTION, &Filter::new().eq("id", id))?;
    Ok(())
}
