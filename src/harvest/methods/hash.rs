//! `hash` — md5 digest of one or more facets, typically used for ids.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::record::WorkingRecord;
use crate::harvest::registry::parse_params;
use crate::harvest::traits::{ExtractionError, ExtractionMethod, StepContext, StepOutcome};

#[derive(Debug, Deserialize)]
struct HashParams {
    /// Keys whose text values are joined and hashed, in order
    #[serde(default = "default_terms")]
    terms: Vec<String>,

    #[serde(default)]
    separator: String,

    #[serde(default)]
    key: Option<String>,
}

fn default_terms() -> Vec<String> {
    vec!["uri".to_string()]
}

#[derive(Debug)]
pub struct HashExtract {
    terms: Vec<String>,
    separator: String,
    key: String,
}

impl HashExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: HashParams = parse_params(descriptor)?;
        if params.terms.is_empty() {
            return Err(ConfigError::InvalidParameters {
                method: descriptor.method.clone(),
                reason: "`terms` must not be empty".to_string(),
            });
        }
        let key = params
            .key
            .or_else(|| descriptor.output_key.clone())
            .unwrap_or_else(|| "id".to_string());
        Ok(Arc::new(Self {
            terms: params.terms,
            separator: params.separator,
            key,
        }))
    }
}

#[async_trait]
impl ExtractionMethod for HashExtract {
    fn method_name(&self) -> &'static str {
        "hash"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let mut parts = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            let value = ctx.require(record, term)?;
            let text = value.to_text().ok_or_else(|| ExtractionError::InvalidInput {
                key: term.clone(),
                reason: format!("cannot hash {} value", value.kind()),
            })?;
            parts.push(text);
        }

        let digest = md5::compute(parts.join(&self.separator).as_bytes());
        Ok(StepOutcome::single(
            ctx.update(self.key.clone(), format!("{:x}", digest)),
        ))
    }
}
