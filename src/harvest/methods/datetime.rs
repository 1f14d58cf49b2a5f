//! Date methods: `iso_date` and `datetime_centroid`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::record::WorkingRecord;
use crate::harvest::registry::parse_params;
use crate::harvest::traits::{ExtractionError, ExtractionMethod, StepContext, StepOutcome};
use crate::model::parse_datetime;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parses `input` with the first matching `strftime` format, or with the
/// generic ISO/RFC 3339 parser when no formats are configured.
fn parse_with(input: &str, formats: &[String]) -> Option<NaiveDateTime> {
    if formats.is_empty() {
        return parse_datetime(input).map(|dt| dt.naive_utc());
    }
    formats.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(input, format).ok().or_else(|| {
            NaiveDate::parse_from_str(input, format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
    })
}

fn parse_key(
    record: &WorkingRecord,
    ctx: &StepContext<'_>,
    key: &str,
    formats: &[String],
) -> Result<NaiveDateTime, ExtractionError> {
    let raw = ctx.require_str(record, key)?;
    parse_with(&raw, formats).ok_or_else(|| ExtractionError::InvalidInput {
        key: key.to_string(),
        reason: format!("unrecognised date '{}'", raw),
    })
}

// ============================================================================
// iso_date
// ============================================================================

#[derive(Debug, Deserialize)]
struct IsoDateParams {
    /// Keys rewritten in place; defaults to the entry's output key
    #[serde(default, alias = "date_keys")]
    keys: Vec<String>,

    /// `strftime` formats tried in order
    #[serde(default)]
    formats: Vec<String>,
}

/// Rewrites date strings as `YYYY-MM-DDTHH:MM:SS`.
#[derive(Debug)]
pub struct IsoDateExtract {
    keys: Vec<String>,
    formats: Vec<String>,
}

impl IsoDateExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let mut params: IsoDateParams = parse_params(descriptor)?;
        if params.keys.is_empty() {
            params.keys.extend(descriptor.output_key.clone());
        }
        if params.keys.is_empty() {
            return Err(ConfigError::InvalidParameters {
                method: descriptor.method.clone(),
                reason: "no date keys configured".to_string(),
            });
        }
        Ok(Arc::new(Self {
            keys: params.keys,
            formats: params.formats,
        }))
    }
}

#[async_trait]
impl ExtractionMethod for IsoDateExtract {
    fn method_name(&self) -> &'static str {
        "iso_date"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let mut updates = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let parsed = parse_key(record, ctx, key, &self.formats)?;
            updates.push(ctx.update(key.clone(), parsed.format(ISO_FORMAT).to_string()));
        }
        Ok(StepOutcome::Updated(updates))
    }
}

// ============================================================================
// datetime_centroid
// ============================================================================

#[derive(Debug, Deserialize)]
struct CentroidParams {
    #[serde(default = "default_start")]
    start: String,

    #[serde(default = "default_end")]
    end: String,

    #[serde(default)]
    formats: Vec<String>,

    #[serde(default)]
    key: Option<String>,
}

fn default_start() -> String {
    "start_datetime".to_string()
}

fn default_end() -> String {
    "end_datetime".to_string()
}

/// Writes the midpoint of a `start`/`end` interval.
#[derive(Debug)]
pub struct DatetimeCentroidExtract {
    start: String,
    end: String,
    formats: Vec<String>,
    key: String,
}

impl DatetimeCentroidExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: CentroidParams = parse_params(descriptor)?;
        let key = params
            .key
            .or_else(|| descriptor.output_key.clone())
            .unwrap_or_else(|| "datetime".to_string());
        Ok(Arc::new(Self {
            start: params.start,
            end: params.end,
            formats: params.formats,
            key,
        }))
    }
}

#[async_trait]
impl ExtractionMethod for DatetimeCentroidExtract {
    fn method_name(&self) -> &'static str {
        "datetime_centroid"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let start = parse_key(record, ctx, &self.start, &self.formats)?;
        let end = parse_key(record, ctx, &self.end, &self.formats)?;
        if end < start {
            return Err(ExtractionError::InvalidInput {
                key: self.end.clone(),
                reason: format!("interval ends before it starts ({} < {})", end, start),
            });
        }

        let centroid = start + (end - start) / 2;
        Ok(StepOutcome::single(
            ctx.update(self.key.clone(), centroid.format(ISO_FORMAT).to_string()),
        ))
    }
}
