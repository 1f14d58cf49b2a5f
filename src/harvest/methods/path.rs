//! Path based methods: `basename` and `path_parts`.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path};
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::record::WorkingRecord;
use crate::harvest::registry::parse_params;
use crate::harvest::traits::{ExtractionError, ExtractionMethod, StepContext, StepOutcome};

fn default_source() -> String {
    "uri".to_string()
}

// ============================================================================
// basename
// ============================================================================

#[derive(Debug, Deserialize)]
struct BasenameParams {
    #[serde(default = "default_source")]
    from: String,

    #[serde(default)]
    key: Option<String>,
}

/// Writes the final path component of `from` (default `uri`) to the target
/// key (default `filename`).
#[derive(Debug)]
pub struct BasenameExtract {
    from: String,
    key: String,
}

impl BasenameExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: BasenameParams = parse_params(descriptor)?;
        let key = params
            .key
            .or_else(|| descriptor.output_key.clone())
            .unwrap_or_else(|| "filename".to_string());
        Ok(Arc::new(Self {
            from: params.from,
            key,
        }))
    }
}

#[async_trait]
impl ExtractionMethod for BasenameExtract {
    fn method_name(&self) -> &'static str {
        "basename"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let path = ctx.require_str(record, &self.from)?;
        match Path::new(&path).file_name() {
            Some(name) => Ok(StepOutcome::single(
                ctx.update(self.key.clone(), name.to_string_lossy().into_owned()),
            )),
            None => Ok(StepOutcome::skipped(format!("'{}' has no file name", path))),
        }
    }
}

// ============================================================================
// path_parts
// ============================================================================

#[derive(Debug, Deserialize)]
struct PathPartsParams {
    #[serde(default = "default_source")]
    from: String,

    /// Number of leading directories to drop
    #[serde(default)]
    skip: usize,

    #[serde(default = "default_prefix")]
    prefix: String,
}

fn default_prefix() -> String {
    "dir".to_string()
}

/// Splits a path into `filename` plus one key per remaining directory
/// level: `dir1`, `dir2`, … counted from the top after `skip`.
#[derive(Debug)]
pub struct PathPartsExtract {
    from: String,
    skip: usize,
    prefix: String,
}

impl PathPartsExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: PathPartsParams = parse_params(descriptor)?;
        Ok(Arc::new(Self {
            from: params.from,
            skip: params.skip,
            prefix: params.prefix,
        }))
    }
}

#[async_trait]
impl ExtractionMethod for PathPartsExtract {
    fn method_name(&self) -> &'static str {
        "path_parts"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let path = ctx.require_str(record, &self.from)?;
        let mut parts: Vec<String> = Path::new(&path)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .skip(self.skip)
            .collect();

        let Some(filename) = parts.pop() else {
            return Ok(StepOutcome::skipped(format!(
                "'{}' has fewer than {} parts",
                path,
                self.skip + 1
            )));
        };

        let mut updates = Vec::with_capacity(parts.len() + 1);
        updates.push(ctx.update("filename", filename));
        for (level, part) in parts.into_iter().enumerate() {
            updates.push(ctx.update(format!("{}{}", self.prefix, level + 1), part));
        }
        Ok(StepOutcome::Updated(updates))
    }
}
