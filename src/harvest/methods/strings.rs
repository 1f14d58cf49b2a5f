//! `string_join` — concatenates several facets into one.
//!
//! Source keys are left in place; the working record never loses keys.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::record::WorkingRecord;
use crate::harvest::registry::parse_params;
use crate::harvest::traits::{ExtractionError, ExtractionMethod, StepContext, StepOutcome};

#[derive(Debug, Deserialize)]
struct StringJoinParams {
    #[serde(alias = "key_list")]
    keys: Vec<String>,

    #[serde(default)]
    delimiter: String,

    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug)]
pub struct StringJoinExtract {
    keys: Vec<String>,
    delimiter: String,
    key: String,
}

impl StringJoinExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: StringJoinParams = parse_params(descriptor)?;
        let key = params
            .key
            .or_else(|| descriptor.output_key.clone())
            .ok_or_else(|| ConfigError::InvalidParameters {
                method: descriptor.method.clone(),
                reason: "no target key".to_string(),
            })?;
        Ok(Arc::new(Self {
            keys: params.keys,
            delimiter: params.delimiter,
            key,
        }))
    }
}

#[async_trait]
impl ExtractionMethod for StringJoinExtract {
    fn method_name(&self) -> &'static str {
        "string_join"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let mut parts = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let value = ctx.require(record, key)?;
            parts.push(value.to_text().ok_or_else(|| ExtractionError::InvalidInput {
                key: key.clone(),
                reason: format!("cannot join {} value", value.kind()),
            })?);
        }
        Ok(StepOutcome::single(
            ctx.update(self.key.clone(), parts.join(&self.delimiter)),
        ))
    }
}
