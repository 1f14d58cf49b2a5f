//! Name → factory table for extraction methods.
//!
//! The registry is filled once at startup (built-ins plus any methods an
//! embedding application registers) and then shared read-only. Pipeline
//! entries are resolved against it when a
//! [`PipelineRunner`](crate::harvest::PipelineRunner) is built, so unknown
//! method names and malformed parameters surface before any item is read.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::methods;
use crate::harvest::traits::ExtractionMethod;

/// Builds a configured method instance from its pipeline entry.
pub type MethodFactory =
    Arc<dyn Fn(&MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct MethodRegistry {
    factories: HashMap<String, MethodFactory>,
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}

impl MethodRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in extraction method.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, factory) in methods::builtin_factories() {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    /// Adds a method under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateMethod`] if the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), ConfigError>
    where
        F: Fn(&MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(ConfigError::DuplicateMethod { name });
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instantiates the method named by `descriptor`.
    pub fn build(
        &self,
        descriptor: &MethodDescriptor,
    ) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let factory =
            self.factories
                .get(&descriptor.method)
                .ok_or_else(|| ConfigError::UnknownMethod {
                    name: descriptor.method.clone(),
                })?;
        factory(descriptor)
    }
}

/// Deserializes a method's static parameters. A missing `params` block is
/// read as an empty object so that serde defaults apply.
pub fn parse_params<T: DeserializeOwned>(descriptor: &MethodDescriptor) -> Result<T, ConfigError> {
    let raw = if descriptor.params.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        descriptor.params.clone()
    };
    serde_json::from_value(raw).map_err(|e| ConfigError::InvalidParameters {
        method: descriptor.method.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::record::WorkingRecord;
    use crate::harvest::traits::{ExtractionError, StepContext, StepOutcome};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    struct Constant;

    #[async_trait]
    impl ExtractionMethod for Constant {
        fn method_name(&self) -> &'static str {
            "constant"
        }

        async fn extract(
            &self,
            _record: &WorkingRecord,
            ctx: &StepContext<'_>,
        ) -> Result<StepOutcome, ExtractionError> {
            Ok(StepOutcome::single(ctx.update("constant", 1i64)))
        }
    }

    #[test]
    fn test_builtin_names() {
        let registry = MethodRegistry::builtin();
        for name in [
            "default",
            "set_default",
            "regex",
            "regex_extract",
            "basename",
            "path_parts",
            "hash",
            "string_join",
            "point_geometry",
            "bbox",
            "iso_date",
            "datetime_centroid",
            "file_stats",
        ] {
            assert!(registry.contains(name), "missing built-in '{}'", name);
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = MethodRegistry::builtin();
        let err = registry
            .register("regex", |_d: &MethodDescriptor| {
                Ok(Arc::new(Constant) as Arc<dyn ExtractionMethod>)
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMethod { name } if name == "regex"));
    }

    #[test]
    fn test_register_and_build_custom_method() {
        let mut registry = MethodRegistry::new();
        registry
            .register("constant", |_d: &MethodDescriptor| {
                Ok(Arc::new(Constant) as Arc<dyn ExtractionMethod>)
            })
            .unwrap();

        let method = registry.build(&MethodDescriptor::new("constant")).unwrap();
        assert_eq!(method.method_name(), "constant");
        assert_eq!(registry.names(), vec!["constant"]);
    }

    #[test]
    fn test_unknown_method() {
        let registry = MethodRegistry::builtin();
        let err = registry.build(&MethodDescriptor::new("nope")).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownMethod { name } if name == "nope"));
    }

    #[test]
    fn test_parse_params_defaults_and_errors() {
        #[derive(Deserialize)]
        struct Params {
            #[serde(default)]
            skip: usize,
        }

        let parsed: Params = parse_params(&MethodDescriptor::new("x")).unwrap();
        assert_eq!(parsed.skip, 0);

        let bad = MethodDescriptor::new("x").with_params(json!({ "skip": "two" }));
        let err = parse_params::<Params>(&bad).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidParameters { method, .. } if method == "x"));
    }
}
