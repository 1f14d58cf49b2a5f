//! Merge / precedence resolution.
//!
//! Collapses a [`WorkingRecord`]'s write log into one value per key:
//! - item-scoped keys: the last write wins, so a chain ordered
//!   defaults → extraction → overrides yields the override
//! - asset-scoped keys: one value per contributing asset (its last write),
//!   as a sequence in asset enumeration order
//! - a key whose writes disagree on type fails with
//!   [`MergeError::TypeConflict`] unless a [`ConflictRule`] is configured
//! - a key written under two scopes always fails with
//!   [`MergeError::ScopeConflict`]

use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{ConflictRule, MergeConfig};
use crate::harvest::record::{Field, WorkingRecord};
use crate::harvest::traits::{MergeError, WriteTarget};
use crate::model::{Mapping, Scope, Value, ValueKind};

/// A working record after precedence has been applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedRecord {
    fields: Mapping,
}

impl MergedRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Fields in first-write order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for MergedRecord {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeResolver {
    rules: IndexMap<String, ConflictRule>,
}

impl MergeResolver {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            rules: config.rules.clone(),
        }
    }

    /// Resolves every key of `record`.
    ///
    /// # Errors
    ///
    /// Returns the first [`MergeError`] encountered, in key order. No partial
    /// record is produced.
    pub fn resolve(&self, record: WorkingRecord) -> Result<MergedRecord, MergeError> {
        let mut fields = Mapping::with_capacity(record.len());
        for (key, field) in record.into_fields() {
            let value = self.resolve_field(&key, field)?;
            fields.insert(key, value);
        }
        Ok(MergedRecord { fields })
    }

    fn resolve_field(&self, key: &str, field: Field) -> Result<Value, MergeError> {
        let scope = field.scope();
        if let Some(other) = field
            .writes()
            .iter()
            .map(|w| w.target.scope())
            .find(|s| *s != scope)
        {
            return Err(MergeError::ScopeConflict {
                key: key.to_string(),
                first: scope,
                second: other,
            });
        }

        let rule = self.rules.get(key).copied();
        let mut contributions = Vec::with_capacity(field.writes().len());
        for write in field.writes() {
            let value = match rule {
                Some(ConflictRule::Coerce(coercion)) => {
                    write
                        .value
                        .coerce(coercion)
                        .map_err(|error| MergeError::Coercion {
                            key: key.to_string(),
                            error,
                        })?
                }
                _ => write.value.clone(),
            };
            contributions.push((write.target, value));
        }

        if rule.is_none() {
            check_kinds(key, contributions.iter().map(|(_, v)| v.kind()))?;
        } else {
            debug!(key, ?rule, "Applying merge rule");
        }

        Ok(match scope {
            Scope::Item => contributions
                .pop()
                .map(|(_, value)| value)
                .unwrap_or_default(),
            Scope::Asset => {
                let mut per_asset = BTreeMap::new();
                for (target, value) in contributions {
                    if let WriteTarget::Asset(ordinal) = target {
                        per_asset.insert(ordinal, value);
                    }
                }
                Value::Sequence(per_asset.into_values().collect())
            }
        })
    }
}

/// Fails on the first write whose kind cannot share the key with the kind
/// established by earlier non-null writes.
fn check_kinds(key: &str, kinds: impl Iterator<Item = ValueKind>) -> Result<(), MergeError> {
    let mut established: Option<ValueKind> = None;
    for kind in kinds.filter(|k| *k != ValueKind::Null) {
        match established {
            Some(first) if !first.is_compatible_with(kind) => {
                return Err(MergeError::TypeConflict {
                    key: key.to_string(),
                    first,
                    second: kind,
                });
            }
            Some(_) => {}
            None => established = Some(kind),
        }
    }
    Ok(())
}
