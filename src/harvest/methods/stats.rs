//! `file_stats` — file system metadata for a path.
//!
//! Writes `size`, `modified_time` and, when the path has one, `extension`.
//! A configured `prefix` is prepended to every key. Paths that do not exist
//! skip the step. Run at asset scope this yields one set of stats per asset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::record::WorkingRecord;
use crate::harvest::registry::parse_params;
use crate::harvest::traits::{ExtractionError, ExtractionMethod, StepContext, StepOutcome};
use crate::model::Value;

#[derive(Debug, Deserialize)]
struct FileStatsParams {
    #[serde(default = "default_source")]
    from: String,

    #[serde(default)]
    prefix: String,
}

fn default_source() -> String {
    "uri".to_string()
}

#[derive(Debug)]
pub struct FileStatsExtract {
    from: String,
    prefix: String,
}

impl FileStatsExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: FileStatsParams = parse_params(descriptor)?;
        Ok(Arc::new(Self {
            from: params.from,
            prefix: params.prefix,
        }))
    }
}

#[async_trait]
impl ExtractionMethod for FileStatsExtract {
    fn method_name(&self) -> &'static str {
        "file_stats"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let path = ctx.require_str(record, &self.from)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(StepOutcome::skipped(format!("'{}' does not exist", path)));
            }
            Err(e) => return Err(e.into()),
        };

        let key = |name: &str| format!("{}{}", self.prefix, name);
        let mut updates = vec![ctx.update(key("size"), Value::from(metadata.len()))];

        if let Ok(modified) = metadata.modified() {
            let modified: DateTime<Utc> = modified.into();
            updates.push(ctx.update(
                key("modified_time"),
                modified.format("%Y-%m-%dT%H:%M:%S").to_string(),
            ));
        }
        if let Some(extension) = Path::new(&path).extension() {
            updates.push(ctx.update(
                key("extension"),
                format!(".{}", extension.to_string_lossy()),
            ));
        }
        Ok(StepOutcome::Updated(updates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::methods::testing::{record_with, run_item, updates};
    use crate::model::ItemDescriptor;
    use serde_json::json;

    #[tokio::test]
    async fn test_stats_of_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tas.nc");
        std::fs::write(&path, b"0123456789").unwrap();
        let uri = path.to_string_lossy().into_owned();

        let item = ItemDescriptor::new(uri.clone());
        let record = record_with(&[("uri", Value::from(uri))]);
        let out = run_item("file_stats", json!({ "prefix": "file_" }), None, &item, &record)
            .await
            .unwrap();
        let written = updates(out);

        assert_eq!(written[0], ("file_size".to_string(), Value::Integer(10)));
        assert_eq!(written[1].0, "file_modified_time");
        assert_eq!(
            written[2],
            ("file_extension".to_string(), Value::from(".nc"))
        );
    }

    #[tokio::test]
    async fn test_missing_file_skips() {
        let item = ItemDescriptor::new("/definitely/not/here.nc");
        let record = record_with(&[("uri", Value::from(item.uri.clone()))]);
        let out = run_item("file_stats", json!(null), None, &item, &record)
            .await
            .unwrap();
        assert!(matches!(out, StepOutcome::Skipped(_)));
    }
}
