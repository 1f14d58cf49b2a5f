//! Projection of merged records onto the target schema.
//!
//! The [`Mapper`] renames merged keys into dotted, namespaced schema fields
//! (`properties.datetime` becomes `{"properties": {"datetime": ...}}`),
//! applies per-field coercions and defaults, and enforces required fields.
//! Mapping is a pure function: either a complete [`StructuredRecord`] is
//! returned or an error, never a partial record.

use std::collections::HashSet;

use crate::config::{ConfigError, FieldMapping, MappingConfig};
use crate::harvest::merge::MergedRecord;
use crate::harvest::traits::MappingError;
use crate::model::{Mapping, StructuredRecord, Value};

#[derive(Debug, Clone)]
struct Rule {
    mapping: FieldMapping,
    path: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Mapper {
    constants: Vec<(Vec<String>, Value)>,
    rules: Vec<Rule>,
    passthrough: Option<Vec<String>>,
}

fn split(target: &str) -> Vec<String> {
    target.split('.').map(str::to_string).collect()
}

/// True when one path equals or is a strict prefix of the other.
fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

impl Mapper {
    /// Builds a mapper, rejecting tables whose targets would overwrite
    /// each other.
    pub fn new(config: &MappingConfig) -> Result<Self, ConfigError> {
        let constants: Vec<_> = config
            .constants
            .iter()
            .map(|(target, value)| (split(target), value.clone()))
            .collect();
        let rules: Vec<_> = config
            .fields
            .iter()
            .map(|mapping| Rule {
                path: split(&mapping.target),
                mapping: mapping.clone(),
            })
            .collect();
        let passthrough = config.passthrough.as_deref().map(split);

        let targets: Vec<&[String]> = constants
            .iter()
            .map(|(path, _)| path.as_slice())
            .chain(rules.iter().map(|r| r.path.as_slice()))
            .collect();

        for (i, a) in targets.iter().enumerate() {
            for b in &targets[i + 1..] {
                if overlaps(a, b) {
                    return Err(ConfigError::Invalid(format!(
                        "mapping targets '{}' and '{}' overlap",
                        a.join("."),
                        b.join(".")
                    )));
                }
            }
            if let Some(namespace) = &passthrough {
                // Targets inside the passthrough namespace are fine; the
                // namespace itself or any of its parents is not.
                if a.len() <= namespace.len() && overlaps(a, namespace) {
                    return Err(ConfigError::Invalid(format!(
                        "mapping target '{}' overlaps passthrough namespace '{}'",
                        a.join("."),
                        namespace.join(".")
                    )));
                }
            }
        }

        Ok(Self {
            constants,
            rules,
            passthrough,
        })
    }

    /// Projects `merged` into a structured record for `item_id`.
    ///
    /// A merged value of `null` counts as absent.
    ///
    /// # Errors
    ///
    /// - [`MappingError::MissingRequiredField`] if a required source key is
    ///   absent and no default is configured
    /// - [`MappingError::TypeMismatch`] if a coercion fails
    pub fn map(&self, item_id: &str, merged: &MergedRecord) -> Result<StructuredRecord, MappingError> {
        let mut root = Mapping::new();
        let mut consumed: HashSet<&str> = HashSet::with_capacity(self.rules.len());

        for (path, value) in &self.constants {
            insert_path(&mut root, path, value.clone());
        }

        for rule in &self.rules {
            let mapping = &rule.mapping;
            consumed.insert(mapping.source.as_str());

            let value = match merged.get(&mapping.source) {
                Some(value) if !value.is_null() => Some(value.clone()),
                _ => mapping.default.clone(),
            };
            let Some(value) = value else {
                if mapping.required {
                    return Err(MappingError::MissingRequiredField {
                        field: mapping.target.clone(),
                        source_key: mapping.source.clone(),
                    });
                }
                continue;
            };

            let value = match mapping.coerce {
                Some(coercion) => {
                    value
                        .coerce(coercion)
                        .map_err(|e| MappingError::TypeMismatch {
                            key: mapping.source.clone(),
                            source_type: e.from,
                            target_type: coercion,
                        })?
                }
                None => value,
            };
            insert_path(&mut root, &rule.path, value);
        }

        let passthrough = match &self.passthrough {
            Some(namespace) => namespace_mut(&mut root, namespace),
            None => None,
        };
        if let Some(target) = passthrough {
            for (key, value) in merged.iter() {
                if !consumed.contains(key) && !target.contains_key(key) {
                    target.insert(key.to_string(), value.clone());
                }
            }
        }

        Ok(StructuredRecord::new(item_id.to_string(), root))
    }
}

/// Walks (creating as needed) the nested mapping at `path`. Returns `None`
/// only if a non-mapping value sits on the path, which overlapping-target
/// rejection in [`Mapper::new`] rules out.
fn namespace_mut<'m>(root: &'m mut Mapping, path: &[String]) -> Option<&'m mut Mapping> {
    let Some((head, rest)) = path.split_first() else {
        return Some(root);
    };
    match root
        .entry(head.clone())
        .or_insert_with(|| Value::Mapping(Mapping::new()))
    {
        Value::Mapping(next) => namespace_mut(next, rest),
        _ => None,
    }
}

fn insert_path(root: &mut Mapping, path: &[String], value: Value) {
    if let Some((last, parents)) = path.split_last() {
        if let Some(namespace) = namespace_mut(root, parents) {
            namespace.insert(last.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coercion;

    fn merged(fields: &[(&str, Value)]) -> MergedRecord {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_renames_into_namespaces() {
        let mapper = Mapper::new(
            &MappingConfig::default()
                .with_constant("type", "Feature")
                .with_field(FieldMapping::new("item_id", "id").required())
                .with_field(FieldMapping::new("platform", "properties.platform"))
                .with_field(
                    FieldMapping::new("date", "properties.datetime")
                        .with_coercion(Coercion::Datetime),
                ),
        )
        .unwrap();

        let record = mapper
            .map(
                "a",
                &merged(&[
                    ("item_id", Value::from("abc")),
                    ("platform", Value::from("S2A")),
                    ("date", Value::from("2018-07-05")),
                ]),
            )
            .unwrap();

        assert_eq!(
            record.to_json().unwrap(),
            r#"{"type":"Feature","id":"abc","properties":{"platform":"S2A","datetime":"2018-07-05T00:00:00Z"}}"#
        );
    }

    #[test]
    fn test_missing_required_field() {
        let mapper = Mapper::new(
            &MappingConfig::default()
                .with_field(FieldMapping::new("platform", "properties.platform"))
                .with_field(FieldMapping::new("datetime", "properties.datetime").required()),
        )
        .unwrap();

        let err = mapper
            .map("a", &merged(&[("platform", Value::from("S2A"))]))
            .unwrap_err();
        match err {
            MappingError::MissingRequiredField { field, source_key } => {
                assert_eq!(field, "properties.datetime");
                assert_eq!(source_key, "datetime");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_fills_absent_and_null_sources() {
        let mapper = Mapper::new(
            &MappingConfig::default()
                .with_field(FieldMapping::new("license", "license").with_default("other").required())
                .with_field(FieldMapping::new("title", "title").with_default("untitled")),
        )
        .unwrap();

        let record = mapper
            .map("a", &merged(&[("title", Value::Null)]))
            .unwrap();
        assert_eq!(record.get("license"), Some(&Value::from("other")));
        assert_eq!(record.get("title"), Some(&Value::from("untitled")));
    }

    #[test]
    fn test_optional_field_omitted() {
        let mapper = Mapper::new(
            &MappingConfig::default().with_field(FieldMapping::new("cloud", "properties.eo:cloud_cover")),
        )
        .unwrap();
        let record = mapper.map("a", &merged(&[])).unwrap();
        assert!(record.fields().is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let mapper = Mapper::new(
            &MappingConfig::default().with_field(
                FieldMapping::new("size", "properties.size").with_coercion(Coercion::Integer),
            ),
        )
        .unwrap();
        let err = mapper
            .map("a", &merged(&[("size", Value::from("large"))]))
            .unwrap_err();
        assert!(matches!(
            err,
            MappingError::TypeMismatch {
                ref key,
                source_type: crate::model::ValueKind::String,
                target_type: Coercion::Integer,
            } if key == "size"
        ));
    }

    #[test]
    fn test_passthrough_collects_unmapped_keys() {
        let mapper = Mapper::new(
            &MappingConfig::default()
                .with_field(FieldMapping::new("item_id", "id"))
                .with_field(FieldMapping::new("platform", "properties.platform"))
                .with_passthrough("properties"),
        )
        .unwrap();

        let record = mapper
            .map(
                "a",
                &merged(&[
                    ("item_id", Value::from("abc")),
                    ("model", Value::from("HadGEM3")),
                    ("platform", Value::from("S2A")),
                ]),
            )
            .unwrap();
        assert_eq!(
            record.to_json().unwrap(),
            r#"{"id":"abc","properties":{"platform":"S2A","model":"HadGEM3"}}"#
        );
    }

    #[test]
    fn test_overlapping_targets_rejected() {
        let err = Mapper::new(
            &MappingConfig::default()
                .with_field(FieldMapping::new("a", "properties"))
                .with_field(FieldMapping::new("b", "properties.b")),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Mapper::new(
            &MappingConfig::default()
                .with_field(FieldMapping::new("a", "properties"))
                .with_passthrough("properties"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
