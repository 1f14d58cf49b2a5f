//! `regex` — pulls facets out of a string field with a regular expression.
//!
//! With a target key (`key` parameter or the entry's output key) the first
//! participating capture group is written there, or the whole match if the
//! pattern has no groups. Without one, every named group that matched is
//! written under its own name. A non-matching input skips the step.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::record::WorkingRecord;
use crate::harvest::registry::parse_params;
use crate::harvest::traits::{ExtractionError, ExtractionMethod, StepContext, StepOutcome};

#[derive(Debug, Deserialize)]
struct RegexParams {
    #[serde(alias = "regex")]
    pattern: String,

    #[serde(default = "default_source")]
    from: String,

    #[serde(default)]
    key: Option<String>,
}

fn default_source() -> String {
    "uri".to_string()
}

#[derive(Debug)]
pub struct RegexExtract {
    regex: Regex,
    from: String,
    key: Option<String>,
}

impl RegexExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: RegexParams = parse_params(descriptor)?;
        let regex = Regex::new(&params.pattern).map_err(|e| ConfigError::InvalidParameters {
            method: descriptor.method.clone(),
            reason: e.to_string(),
        })?;
        let key = params.key.or_else(|| descriptor.output_key.clone());

        if key.is_none() && regex.capture_names().flatten().next().is_none() {
            return Err(ConfigError::InvalidParameters {
                method: descriptor.method.clone(),
                reason: "pattern has no named groups and no target key is set".to_string(),
            });
        }

        Ok(Arc::new(Self {
            regex,
            from: params.from,
            key,
        }))
    }
}

#[async_trait]
impl ExtractionMethod for RegexExtract {
    fn method_name(&self) -> &'static str {
        "regex"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let input = ctx.require_str(record, &self.from)?;

        let Some(captures) = self.regex.captures(&input) else {
            tracing::debug!(from = %self.from, "No matches found for regex extract");
            return Ok(StepOutcome::skipped(format!("no match in '{}'", self.from)));
        };

        if let Some(key) = &self.key {
            let matched = captures
                .iter()
                .skip(1)
                .flatten()
                .next()
                .or_else(|| captures.get(0))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Ok(StepOutcome::single(ctx.update(key.clone(), matched)));
        }

        let updates: Vec<_> = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| ctx.update(name.to_string(), m.as_str().to_string()))
            })
            .collect();
        Ok(StepOutcome::Updated(updates))
    }
}
