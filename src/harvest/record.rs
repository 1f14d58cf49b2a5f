//! The per-item working record threaded through an extraction chain.
//!
//! The record is a write log: every update is kept together with the step
//! that produced it and the scope it targeted. Readers see the latest value;
//! the [`MergeResolver`](crate::harvest::MergeResolver) sees the full history
//! and decides precedence and conflicts. Keys are never removed.

use indexmap::IndexMap;
use std::collections::BTreeMap;

use crate::harvest::traits::{FieldUpdate, WriteTarget};
use crate::model::{Scope, Value};

/// Which part of the harvest produced a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSource {
    /// Seeded from the item descriptor before the first step
    Input,

    /// Written by the pipeline step at this index
    Step(usize),
}

/// A single recorded write.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub source: WriteSource,
    pub target: WriteTarget,
    pub value: Value,
}

/// All writes made to one key, in chain order.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    writes: Vec<Write>,
}

impl Field {
    /// Scope declared by the first write.
    pub fn scope(&self) -> Scope {
        self.writes[0].target.scope()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    fn latest_item(&self) -> Option<&Value> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.target == WriteTarget::Item)
            .map(|w| &w.value)
    }

    fn latest_for_asset(&self, ordinal: usize) -> Option<&Value> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.target == WriteTarget::Asset(ordinal))
            .map(|w| &w.value)
    }

    fn latest_per_asset(&self) -> BTreeMap<usize, &Value> {
        let mut per_asset = BTreeMap::new();
        for write in &self.writes {
            if let WriteTarget::Asset(ordinal) = write.target {
                per_asset.insert(ordinal, &write.value);
            }
        }
        per_asset
    }
}

/// Mutable key/value state for one item.
///
/// Fields iterate in first-write order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingRecord {
    fields: IndexMap<String, Field>,
}

impl WorkingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one update. Existing writes are kept.
    pub fn apply(&mut self, source: WriteSource, update: FieldUpdate) {
        let write = Write {
            source,
            target: update.target,
            value: update.value,
        };
        self.fields
            .entry(update.key)
            .or_insert_with(|| Field { writes: Vec::new() })
            .writes
            .push(write);
    }

    /// Current value of `key` as later steps observe it.
    ///
    /// Item-scoped keys yield the latest write. Asset-scoped keys yield the
    /// sequence of each asset's latest contribution in asset order.
    pub fn value(&self, key: &str) -> Option<Value> {
        let field = self.fields.get(key)?;
        match field.scope() {
            Scope::Item => field.latest_item().cloned(),
            Scope::Asset => Some(Value::Sequence(
                field.latest_per_asset().into_values().cloned().collect(),
            )),
        }
    }

    /// Latest contribution of `key` for the asset at `ordinal`.
    pub fn asset_value(&self, key: &str, ordinal: usize) -> Option<&Value> {
        self.fields.get(key)?.latest_for_asset(ordinal)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn into_fields(self) -> impl Iterator<Item = (String, Field)> {
        self.fields.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, value: impl Into<Value>) -> FieldUpdate {
        FieldUpdate {
            key: key.to_string(),
            value: value.into(),
            target: WriteTarget::Item,
        }
    }

    fn asset(key: &str, ordinal: usize, value: impl Into<Value>) -> FieldUpdate {
        FieldUpdate {
            key: key.to_string(),
            value: value.into(),
            target: WriteTarget::Asset(ordinal),
        }
    }

    #[test]
    fn test_item_value_is_latest_write() {
        let mut record = WorkingRecord::new();
        record.apply(WriteSource::Step(0), item("platform", "X"));
        record.apply(WriteSource::Step(1), item("platform", "S2A"));

        assert_eq!(record.value("platform"), Some(Value::from("S2A")));
        assert_eq!(record.field("platform").unwrap().writes().len(), 2);
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_asset_value_is_sequence_in_asset_order() {
        let mut record = WorkingRecord::new();
        record.apply(WriteSource::Step(0), asset("size", 1, 20i64));
        record.apply(WriteSource::Step(0), asset("size", 0, 10i64));
        record.apply(WriteSource::Step(1), asset("size", 1, 25i64));

        assert_eq!(
            record.value("size"),
            Some(Value::Sequence(vec![Value::Integer(10), Value::Integer(25)]))
        );
        assert_eq!(record.asset_value("size", 1), Some(&Value::Integer(25)));
        assert_eq!(record.field("size").unwrap().scope(), Scope::Asset);
    }

    #[test]
    fn test_keys_keep_first_write_order() {
        let mut record = WorkingRecord::new();
        record.apply(WriteSource::Input, item("uri", "/data/a.nc"));
        record.apply(WriteSource::Step(0), item("b", 1i64));
        record.apply(WriteSource::Step(1), item("a", 2i64));
        record.apply(WriteSource::Step(2), item("uri", "/data/b.nc"));

        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(keys, vec!["uri", "b", "a"]);
    }
}
