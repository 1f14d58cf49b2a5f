//! `default` — writes fixed facet values.
//!
//! Placed first in a chain it provides defaults that later extraction steps
//! overwrite; placed last it acts as an override. A string value starting
//! with the reference marker (`$` unless configured) copies another key:
//! `"$collection_id"` writes the current value of `collection_id`.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::record::WorkingRecord;
use crate::harvest::registry::parse_params;
use crate::harvest::traits::{ExtractionError, ExtractionMethod, StepContext, StepOutcome};
use crate::model::Value;

#[derive(Debug, Deserialize)]
struct DefaultParams {
    /// Target key for `value`; falls back to the entry's output key
    #[serde(default)]
    key: Option<String>,

    #[serde(default)]
    value: Option<Value>,

    #[serde(default)]
    defaults: IndexMap<String, Value>,

    #[serde(default = "default_marker")]
    reference_marker: String,
}

fn default_marker() -> String {
    "$".to_string()
}

#[derive(Debug)]
pub struct DefaultExtract {
    values: Vec<(String, Value)>,
    marker: String,
}

impl DefaultExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: DefaultParams = parse_params(descriptor)?;
        let mut values = Vec::with_capacity(params.defaults.len() + 1);

        if let Some(value) = params.value {
            let key = params
                .key
                .or_else(|| descriptor.output_key.clone())
                .ok_or_else(|| ConfigError::InvalidParameters {
                    method: descriptor.method.clone(),
                    reason: "`value` needs `key` or an output_key".to_string(),
                })?;
            values.push((key, value));
        }
        values.extend(params.defaults);

        if values.is_empty() {
            return Err(ConfigError::InvalidParameters {
                method: descriptor.method.clone(),
                reason: "no `value` or `defaults` given".to_string(),
            });
        }

        Ok(Arc::new(Self {
            values,
            marker: params.reference_marker,
        }))
    }

    fn resolve(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
        value: &Value,
    ) -> Result<Value, ExtractionError> {
        match value {
            Value::String(s) if s.len() > self.marker.len() && s.starts_with(&self.marker) => {
                ctx.require(record, &s[self.marker.len()..])
            }
            other => Ok(other.clone()),
        }
    }
}

#[async_trait]
impl ExtractionMethod for DefaultExtract {
    fn method_name(&self) -> &'static str {
        "default"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let mut updates = Vec::with_capacity(self.values.len());
        for (key, value) in &self.values {
            updates.push(ctx.update(key.clone(), self.resolve(record, ctx, value)?));
        }
        Ok(StepOutcome::Updated(updates))
    }
}
