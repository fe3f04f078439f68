//! Port value history.
//!
//! Samples live in the `value_history` collection as `{pid, val, ts}`
//! records, `ts` in milliseconds since the Unix epoch.  Time ranges are
//! half-open: `from <= ts < to`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::ports::{Filter, Record, Sort, Store};
use crate::error::{Result, StorageError};

pub const COLLECTION: &str = "value_history";

/// One recorded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "pid")]
    pub port_id: String,
    #[serde(rename = "val")]
    pub value: Option<f64>,
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,
}

impl Sample {
    fn into_record(self) -> Result<Record> {
        match serde_json::to_value(self) {
            Ok(Value::Object(record)) => Ok(record),
            _ => Err(StorageError::Corrupted.into()),
        }
    }

    fn from_record(record: Record) -> Result<Self> {
        serde_json::from_value(Value::Object(record)).map_err(|_| StorageError::Corrupted.into())
    }
}

fn range_filter(port_id: &str, from_ms: Option<i64>, to_ms: Option<i64>) -> Filter {
    let mut filter = Filter::new().eq("pid", port_id);
    if let Some(from) = from_ms {
        filter = filter.ge("ts", from);
    }
    if let Some(to) = to_ms {
        filter = filter.lt("ts", to);
    }
    filter
}

pub fn save(store: &mut dyn Store, port_id: &str, value: Option<f64>, timestamp_ms: i64) -> Result<()> {
    let sample = Sample {
        port_id: port_id.into(),
        value,
        timestamp_ms,
    };
    store.insert(COLLECTION, sample.into_record()?)?;
    Ok(())
}

/// Samples of `port_id` in `[from_ms, to_ms)`, oldest first.
pub fn query(
    store: &dyn Store,
    port_id: &str,
    from_ms: Option<i64>,
    to_ms: Option<i64>,
    limit: Option<usize>,
) -> Result<Vec<Sample>> {
    store
        .query(
            COLLECTION,
            &range_filter(port_id, from_ms, to_ms),
            &[Sort::asc("ts")],
            limit,
        )?
        .into_iter()
        .map(Sample::from_record)
        .collect()
}

/// Delete samples of `port_id` in `[from_ms, to_ms)`.  Returns the count.
pub fn remove(
    store: &mut dyn Store,
    port_id: &str,
    from_ms: Option<i64>,
    to_ms: Option<i64>,
) -> Result<usize> {
    Ok(store.remove(COLLECTION, &range_filter(port_id, from_ms, to_ms))?)
}
