//! Reference outputs.
//!
//! - [`StdoutOutput`]: one compact JSON document per line on stdout
//! - [`JsonFileOutput`]: one pretty-printed file per record
//! - [`MemoryOutput`]: collects records in memory

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::config::OutputConfig;
use crate::model::StructuredRecord;
use crate::traits::{Output, OutputError};

/// Builds the output described by `config`.
pub fn from_config(config: &OutputConfig) -> Arc<dyn Output> {
    match config {
        OutputConfig::Stdout => Arc::new(StdoutOutput::new()),
        OutputConfig::JsonFile { dir } => Arc::new(JsonFileOutput::new(dir)),
    }
}

type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes one compact JSON document per line. Each line is written under the
/// lock, so concurrent records never interleave.
pub struct StdoutOutput {
    out: tokio::sync::Mutex<LineWriter>,
}

impl StdoutOutput {
    pub fn new() -> Self {
        Self::with_writer(Box::new(tokio::io::stdout()))
    }

    fn with_writer(out: LineWriter) -> Self {
        Self {
            out: tokio::sync::Mutex::new(out),
        }
    }
}

impl Default for StdoutOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdoutOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdoutOutput").finish_non_exhaustive()
    }
}

#[async_trait]
impl Output for StdoutOutput {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn export(&self, record: &StructuredRecord) -> Result<(), OutputError> {
        let mut line = record.to_json()?;
        line.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn finish(&self) -> Result<(), OutputError> {
        self.out.lock().await.flush().await?;
        Ok(())
    }
}

/// Writes one pretty-printed file per record into `dir`.
///
/// The file name is the id with slashes turned into dots, followed by the md5
/// of the full id, so `/badc/cmip6/tas.nc` lands in
/// `badc.cmip6.tas.nc-<md5>.json` and ids that read alike never share a file.
#[derive(Debug, Clone)]
pub struct JsonFileOutput {
    dir: PathBuf,
}

impl JsonFileOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(item_id: &str) -> String {
        let stem = item_id.trim_matches('/').replace(['/', '\\'], ".");
        format!("{}-{:x}.json", stem, md5::compute(item_id.as_bytes()))
    }
}

#[async_trait]
impl Output for JsonFileOutput {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn export(&self, record: &StructuredRecord) -> Result<(), OutputError> {
        if record.item_id().trim_matches('/').is_empty() {
            return Err(OutputError::Rejected("record has an empty id".to_string()));
        }
        let path = self.dir.join(Self::file_name(record.item_id()));
        let body = record.to_json_pretty()?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "Record written");
        Ok(())
    }
}

/// Keeps every exported record. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    records: Arc<Mutex<Vec<StructuredRecord>>>,
    finished: Arc<AtomicUsize>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StructuredRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the collected records, sorted by item id.
    pub fn records(&self) -> Vec<StructuredRecord> {
        let mut records = self.lock().clone();
        records.sort_by(|a, b| a.item_id().cmp(b.item_id()));
        records
    }

    pub fn get(&self, item_id: &str) -> Option<StructuredRecord> {
        self.lock().iter().find(|r| r.item_id() == item_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// How many times [`Output::finish`] has been called.
    pub fn finish_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Output for MemoryOutput {
    fn name(&self) -> &str {
        "memory"
    }

    async fn export(&self, record: &StructuredRecord) -> Result<(), OutputError> {
        self.lock().push(record.clone());
        Ok(())
    }

    async fn finish(&self) -> Result<(), OutputError> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mapping, Value};

    fn record(id: &str) -> StructuredRecord {
        let mut fields = Mapping::new();
        fields.insert("id".to_string(), Value::from(id));
        fields.insert("type".to_string(), Value::from("Feature"));
        StructuredRecord::new(id.to_string(), fields)
    }

    #[test]
    fn test_file_name_from_id() {
        let name = JsonFileOutput::file_name("/badc/cmip6/tas.nc");
        assert!(name.starts_with("badc.cmip6.tas.nc-"));
        assert!(name.ends_with(".json"));
        assert_eq!(
            name,
            format!("badc.cmip6.tas.nc-{:x}.json", md5::compute("/badc/cmip6/tas.nc"))
        );
    }

    #[test]
    fn test_file_names_do_not_collide() {
        let ids = ["/a/b.nc", "/a.b.nc", "a/b.nc", "a\\b.nc"];
        let names: std::collections::HashSet<String> =
            ids.iter().map(|id| JsonFileOutput::file_name(id)).collect();
        assert_eq!(names.len(), ids.len());
    }

    #[tokio::test]
    async fn test_json_file_output_writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let output = JsonFileOutput::new(dir.path().join("out"));

        output.export(&record("/data/a.nc")).await.unwrap();
        output.export(&record("/data.a.nc")).await.unwrap();

        let path = dir.path().join("out").join(JsonFileOutput::file_name("/data/a.nc"));
        let written = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["id"], "/data/a.nc");
        assert!(written.contains('\n'));
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_stdout_output_writes_one_line_per_record() {
        use tokio::io::AsyncReadExt;

        let (writer, mut reader) = tokio::io::duplex(4096);
        let output = StdoutOutput::with_writer(Box::new(writer));

        output.export(&record("a")).await.unwrap();
        output.export(&record("b")).await.unwrap();
        output.finish().await.unwrap();
        drop(output);

        let mut written = String::new();
        reader.read_to_string(&mut written).await.unwrap();
        let ids: Vec<String> = written
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["id"].to_string())
            .collect();
        assert_eq!(ids, vec!["\"a\"", "\"b\""]);
    }

    #[tokio::test]
    async fn test_json_file_output_rejects_empty_id() {
        let dir = tempfile::tempdir().unwrap();
        let output = JsonFileOutput::new(dir.path());
        let err = output.export(&record("/")).await.unwrap_err();
        assert!(matches!(err, OutputError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_memory_output_collects_and_counts_finish() {
        let output = MemoryOutput::new();
        let shared = output.clone();

        output.export(&record("b")).await.unwrap();
        output.export(&record("a")).await.unwrap();
        output.finish().await.unwrap();

        let ids: Vec<String> = shared
            .records()
            .iter()
            .map(|r| r.item_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(shared.finish_count(), 1);
        assert!(shared.get("a").is_some());
    }
}
