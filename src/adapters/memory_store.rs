//! In-memory record store.
//!
//! Implements [`Store`] over plain vectors, one per collection.  Used by
//! the host binary and by tests; a database-backed adapter implements the
//! same trait.

use std::collections::BTreeMap;

use core::cmp::Ordering;
use serde_json::Value;

use crate::app::ports::{Filter, Record, Sort, Store, compare};
use crate::error::StorageError;

type StoreResult<T> = core::result::Result<T, StorageError>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: BTreeMap<String, Vec<Record>>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }

    fn records_mut(&mut self, collection: &str) -> &mut Vec<Record> {
        self.collections.entry(collection.to_owned()).or_default()
    }

    fn assign_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn order_by(sort: &[Sort], a: &Record, b: &Record) -> Ordering {
    for key in sort {
        let ord = match (a.get(&key.field), b.get(&key.field)) {
            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ord = if key.desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl Store for MemoryStore {
    fn query(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[Sort],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        let Some(records) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut found: Vec<Record> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| order_by(sort, a, b));
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn insert(&mut self, collection: &str, mut record: Record) -> StoreResult<String> {
        let id = match record_id(&record) {
            Some(id) => id.to_owned(),
            None => {
                let id = self.assign_id();
                record.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        let records = self.records_mut(collection);
        if records.iter().any(|r| record_id(r) == Some(id.as_str())) {
            return Err(StorageError::Backend(format!("duplicate id {id} in {collection}")));
        }
        records.push(record);
        Ok(id)
    }

    fn update(&mut self, collection: &str, fields: Record, filter: &Filter) -> StoreResult<usize> {
        let mut count = 0;
        for record in self.records_mut(collection).iter_mut().filter(|r| filter.matches(r)) {
            for (k, v) in &fields {
                if k != "id" {
                    record.insert(k.clone(), v.clone());
                }
            }
            count += 1;
        }
        Ok(count)
    }

    fn replace(&mut self, collection: &str, id: &str, mut record: Record) -> StoreResult<bool> {
        record.insert("id".into(), Value::String(id.to_owned()));
        let records = self.records_mut(collection);
        match records.iter_mut().find(|r| record_id(r) == Some(id)) {
            Some(existing) => {
                *existing = record;
                Ok(true)
            }
            None => {
                records.push(record);
                Ok(false)
            }
        }
    }

    fn remove(&mut self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        let records = self.records_mut(collection);
        let before = records.len();
        records.retain(|r| !filter.matches(r));
        Ok(before - records.len())
    }
}
