use crate::config::{ConfigError, HarvestConfig};
use crate::harvest::{
    ExtractionError, Mapper, MappingError, MergeError, MergeResolver, MethodRegistry,
    PipelineError, PipelineRunner, StepFailure,
};
use crate::model::ItemDescriptor;
use crate::traits::{Input, InputError, Output, OutputError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Input error: {0}")]
    Input(#[from] InputError),
    #[error("Worker pool closed: {0}")]
    PoolClosed(#[from] tokio::sync::AcquireError),
}

// ============================================================================
// Run Report
// ============================================================================

/// Part of the engine an item failed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Input,
    Extraction { step: usize, method: String },
    Merge,
    Mapping,
    Output { name: String },
    Generator,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Input => f.write_str("input"),
            Component::Extraction { step, method } => write!(f, "step {} ({})", step, method),
            Component::Merge => f.write_str("merge"),
            Component::Mapping => f.write_str("mapping"),
            Component::Output { name } => write!(f, "output {}", name),
            Component::Generator => f.write_str("generator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Extraction,
    MissingDependency,
    MergeConflict,
    MissingRequiredField,
    TypeMismatch,
    OutputFailure,
    InputFailure,
    Panic,
}

/// One failure attributed to one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub component: Component,
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemFailure {
    fn step(item_id: &str, failure: &StepFailure) -> Self {
        let kind = match failure.error {
            ExtractionError::MissingDependency { .. } => ErrorKind::MissingDependency,
            _ => ErrorKind::Extraction,
        };
        Self {
            item_id: item_id.to_string(),
            component: Component::Extraction {
                step: failure.step,
                method: failure.method.clone(),
            },
            kind,
            message: failure.error.to_string(),
        }
    }

    fn merge(item_id: &str, error: &MergeError) -> Self {
        Self {
            item_id: item_id.to_string(),
            component: Component::Merge,
            kind: ErrorKind::MergeConflict,
            message: error.to_string(),
        }
    }

    fn mapping(item_id: &str, error: &MappingError) -> Self {
        let kind = match error {
            MappingError::MissingRequiredField { .. } => ErrorKind::MissingRequiredField,
            MappingError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
        };
        Self {
            item_id: item_id.to_string(),
            component: Component::Mapping,
            kind,
            message: error.to_string(),
        }
    }

    fn output(item_id: &str, name: &str, error: &OutputError) -> Self {
        Self {
            item_id: item_id.to_string(),
            component: Component::Output {
                name: name.to_string(),
            },
            kind: ErrorKind::OutputFailure,
            message: error.to_string(),
        }
    }

    fn input(input: &str, position: usize, error: &InputError) -> Self {
        Self {
            item_id: format!("{}#{}", input, position),
            component: Component::Input,
            kind: ErrorKind::InputFailure,
            message: error.to_string(),
        }
    }

    fn panic(item_id: &str, message: String) -> Self {
        Self {
            item_id: item_id.to_string(),
            component: Component::Generator,
            kind: ErrorKind::Panic,
            message,
        }
    }
}

/// An output whose `finish` call failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlushFailure {
    pub output: String,
    pub message: String,
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub succeeded: usize,

    /// Published despite best-effort step failures
    pub degraded: usize,

    pub failed: usize,

    /// Discarded because the run was cancelled while they were in flight
    pub cancelled: usize,

    /// Failures of failed items, ordered by item id
    pub failures: Vec<ItemFailure>,

    /// Step failures of degraded items, ordered by item id
    pub warnings: Vec<ItemFailure>,

    pub flush_failures: Vec<FlushFailure>,

    pub duration_ms: u64,
}

impl RunReport {
    /// Items that reached a terminal state.
    pub fn total(&self) -> usize {
        self.succeeded + self.degraded + self.failed + self.cancelled
    }

    /// True when every item was published without any failed step and
    /// every output flushed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
            && self.cancelled == 0
            && self.warnings.is_empty()
            && self.flush_failures.is_empty()
    }

    /// Ids of items that need another run: failed items and degraded items
    /// whose steps failed under best effort. Sorted, each once.
    pub fn failed_items(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .failures
            .iter()
            .chain(&self.warnings)
            .map(|f| f.item_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Degraded(warnings) => {
                self.degraded += 1;
                self.warnings.extend(warnings);
            }
            ItemOutcome::Failed(failures) => {
                self.failed += 1;
                self.failures.extend(failures);
            }
            ItemOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Debug)]
enum ItemOutcome {
    Succeeded,
    Degraded(Vec<ItemFailure>),
    Failed(Vec<ItemFailure>),
    Cancelled,
}

// ============================================================================
// Generator
// ============================================================================

/// Read-only per-item machinery shared by every worker.
struct Stages {
    runner: PipelineRunner,
    resolver: MergeResolver,
    mapper: Mapper,
    outputs: Vec<Arc<dyn Output>>,
}

/// Drives items from an [`Input`] through extraction, merge and mapping and
/// hands the resulting records to every [`Output`].
///
/// Items run concurrently on a bounded pool (`run.concurrency`); the chain
/// for any one item is sequential. A failing item never stops the others
/// unless `run.fail_fast` is set.
pub struct Generator {
    stages: Arc<Stages>,
    concurrency: usize,
    fail_fast: bool,
    cancel: CancellationToken,
}

impl Generator {
    /// Validates `config` and resolves its pipeline against `registry`.
    pub fn new(
        config: &HarvestConfig,
        registry: &MethodRegistry,
        outputs: Vec<Arc<dyn Output>>,
    ) -> Result<Self, GeneratorError> {
        config.validate()?;
        let stages = Stages {
            runner: PipelineRunner::from_config(&config.pipeline, registry)?,
            resolver: MergeResolver::new(&config.merge),
            mapper: Mapper::new(&config.mapping)?,
            outputs,
        };
        Ok(Self {
            stages: Arc::new(stages),
            concurrency: config.run.concurrency,
            fail_fast: config.run.fail_fast,
            cancel: CancellationToken::new(),
        })
    }

    /// Uses `token` to stop the run from outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this generator's runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Harvests every item `input` yields.
    ///
    /// Per-item failures are collected in the returned [`RunReport`]; only
    /// failures to start the run are returned as errors.
    #[instrument(skip_all, fields(input = %input.name(), pipeline = %self.stages.runner.name()))]
    pub async fn run(&self, input: &dyn Input) -> Result<RunReport, GeneratorError> {
        let start = Instant::now();
        let items = input.items()?;
        let input_name = input.name().to_string();
        let cancel = self.cancel.child_token();

        // Enumeration may block on the file system; keep it off the workers.
        let (tx, mut rx) = mpsc::channel(self.concurrency);
        let producer_cancel = cancel.clone();
        let producer = tokio::task::spawn_blocking(move || {
            for item in items {
                if producer_cancel.is_cancelled() || tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut report = RunReport::default();
        let mut position = 0usize;

        info!(concurrency = self.concurrency, "Starting harvest run");

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit?,
            };
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => next,
            };
            let Some(next) = next else { break };
            position += 1;

            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    error!(position, error = %e, "Input failed");
                    report.record(ItemOutcome::Failed(vec![ItemFailure::input(
                        &input_name,
                        position,
                        &e,
                    )]));
                    if self.fail_fast {
                        cancel.cancel();
                    }
                    continue;
                }
            };

            let stages = Arc::clone(&self.stages);
            let cancel = cancel.clone();
            let fail_fast = self.fail_fast;
            tasks.spawn(async move {
                let _permit = permit;
                let item_id = item.id.clone();

                // A panicking method must not take its item's id with it.
                let outcome = match tokio::spawn(process_item(stages, item, cancel.clone())).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(item = %item_id, error = %e, "Item task panicked");
                        ItemOutcome::Failed(vec![ItemFailure::panic(&item_id, e.to_string())])
                    }
                };
                if fail_fast && matches!(outcome, ItemOutcome::Failed(_)) {
                    cancel.cancel();
                }
                outcome
            });
        }

        drop(rx);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!(error = %e, "Worker task failed");
                    report.record(ItemOutcome::Failed(vec![ItemFailure::panic(
                        "<unknown>",
                        e.to_string(),
                    )]));
                }
            }
        }
        if let Err(e) = producer.await {
            warn!(error = %e, "Input enumeration thread failed");
        }

        for output in &self.stages.outputs {
            if let Err(e) = output.finish().await {
                error!(output = output.name(), error = %e, "Output flush failed");
                report.flush_failures.push(FlushFailure {
                    output: output.name().to_string(),
                    message: e.to_string(),
                });
            }
        }

        report.failures.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        report.warnings.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            duration_ms = report.duration_ms,
            succeeded = report.succeeded,
            degraded = report.degraded,
            failed = report.failed,
            cancelled = report.cancelled,
            "Harvest run completed"
        );

        Ok(report)
    }
}

/// Runner, resolver, mapper and outputs for a single item.
#[instrument(skip_all, fields(item = %item.id))]
async fn process_item(
    stages: Arc<Stages>,
    item: ItemDescriptor,
    cancel: CancellationToken,
) -> ItemOutcome {
    let chain = match stages.runner.run(&item, &cancel).await {
        Ok(chain) => chain,
        Err(PipelineError::Cancelled { step }) => {
            debug!(step, "Item cancelled");
            return ItemOutcome::Cancelled;
        }
    };

    let step_failures: Vec<ItemFailure> = chain
        .failures
        .iter()
        .map(|f| ItemFailure::step(&item.id, f))
        .collect();
    if chain.aborted {
        error!(failures = step_failures.len(), "Extraction chain aborted");
        return ItemOutcome::Failed(step_failures);
    }

    let merged = match stages.resolver.resolve(chain.record) {
        Ok(merged) => merged,
        Err(e) => {
            error!(error = %e, "Merge failed");
            return ItemOutcome::Failed(vec![ItemFailure::merge(&item.id, &e)]);
        }
    };

    let record = match stages.mapper.map(&item.id, &merged) {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, "Mapping failed");
            return ItemOutcome::Failed(vec![ItemFailure::mapping(&item.id, &e)]);
        }
    };

    if cancel.is_cancelled() {
        debug!("Item cancelled before export");
        return ItemOutcome::Cancelled;
    }

    let mut output_failures = Vec::new();
    for output in &stages.outputs {
        if let Err(e) = output.export(&record).await {
            error!(output = output.name(), error = %e, "Export failed");
            output_failures.push(ItemFailure::output(&item.id, output.name(), &e));
        }
    }

    if !output_failures.is_empty() {
        ItemOutcome::Failed(output_failures)
    } else if step_failures.is_empty() {
        ItemOutcome::Succeeded
    } else {
        warn!(failures = step_failures.len(), "Item published with step failures");
        ItemOutcome::Degraded(step_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ConflictRule, FieldMapping, MappingConfig, MergeConfig, MethodDescriptor, PipelineConfig,
        StepPolicy,
    };
    use crate::harvest::{ExtractionMethod, StepContext, StepOutcome, WorkingRecord};
    use crate::inputs::{JsonLinesInput, StaticInput};
    use crate::model::{AssetDescriptor, Coercion, Scope, StructuredRecord, Value};
    use crate::outputs::MemoryOutput;
    use async_trait::async_trait;
    use serde_json::json;

    // Fails for items whose uri contains "bad", panics for "boom"
    struct Picky;

    #[async_trait]
    impl ExtractionMethod for Picky {
        fn method_name(&self) -> &'static str {
            "picky"
        }

        async fn extract(
            &self,
            record: &WorkingRecord,
            ctx: &StepContext<'_>,
        ) -> Result<StepOutcome, ExtractionError> {
            let uri = ctx.require_str(record, "uri")?;
            if uri.contains("boom") {
                panic!("unreadable header in {}", uri);
            }
            if uri.contains("bad") {
                return Err(ExtractionError::InvalidInput {
                    key: "uri".to_string(),
                    reason: "corrupt header".to_string(),
                });
            }
            Ok(StepOutcome::single(ctx.update("checked", true)))
        }
    }

    // Cancels the whole run from inside an item's chain
    struct Canceller(CancellationToken);

    #[async_trait]
    impl ExtractionMethod for Canceller {
        fn method_name(&self) -> &'static str {
            "canceller"
        }

        async fn extract(
            &self,
            _record: &WorkingRecord,
            ctx: &StepContext<'_>,
        ) -> Result<StepOutcome, ExtractionError> {
            self.0.cancel();
            Ok(StepOutcome::single(ctx.update("cancelled", true)))
        }
    }

    struct FailingOutput;

    #[async_trait]
    impl Output for FailingOutput {
        fn name(&self) -> &str {
            "failing"
        }

        async fn export(&self, _record: &StructuredRecord) -> Result<(), OutputError> {
            Err(OutputError::Rejected("index unavailable".to_string()))
        }

        async fn finish(&self) -> Result<(), OutputError> {
            Err(OutputError::Rejected("flush refused".to_string()))
        }
    }

    fn registry() -> MethodRegistry {
        let mut registry = MethodRegistry::builtin();
        registry
            .register("picky", |_d: &MethodDescriptor| {
                Ok(Arc::new(Picky) as Arc<dyn ExtractionMethod>)
            })
            .unwrap();
        registry
    }

    fn set_default(key: &str, value: serde_json::Value) -> MethodDescriptor {
        MethodDescriptor::new("set_default").with_params(json!({ "key": key, "value": value }))
    }

    fn mapping() -> MappingConfig {
        MappingConfig::default()
            .with_constant("type", "Feature")
            .with_field(FieldMapping::new("id", "id").required())
            .with_passthrough("properties")
    }

    fn config(steps: Vec<MethodDescriptor>) -> HarvestConfig {
        let pipeline = steps
            .into_iter()
            .fold(PipelineConfig::new("test").with_step(MethodDescriptor::new("hash")), |p, s| {
                p.with_step(s)
            });
        HarvestConfig::new(pipeline).with_mapping(mapping())
    }

    fn items(uris: &[&str]) -> Vec<ItemDescriptor> {
        uris.iter().map(|uri| ItemDescriptor::new(*uri)).collect()
    }

    async fn harvest(config: &HarvestConfig, items: Vec<ItemDescriptor>) -> (RunReport, MemoryOutput) {
        let memory = MemoryOutput::new();
        let generator = Generator::new(
            config,
            &registry(),
            vec![Arc::new(memory.clone()) as Arc<dyn Output>],
        )
        .unwrap();
        let report = generator.run(&StaticInput::new(items)).await.unwrap();
        (report, memory)
    }

    #[tokio::test]
    async fn test_runs_are_deterministic() {
        let config = config(vec![
            MethodDescriptor::new("basename"),
            MethodDescriptor::new("path_parts"),
            set_default("license", json!("other")),
        ])
        .with_concurrency(3);
        let uris = ["/badc/cmip6/tas.nc", "/badc/cmip6/pr.nc", "/neodc/s2/a.SAFE"];

        let (first, a) = harvest(&config, items(&uris)).await;
        let (second, b) = harvest(&config, items(&uris)).await;

        assert_eq!(first.succeeded, 3);
        assert_eq!(second.succeeded, 3);
        let render = |out: &MemoryOutput| -> Vec<String> {
            out.records().iter().map(|r| r.to_json().unwrap()).collect()
        };
        assert_eq!(render(&a), render(&b));
    }

    #[tokio::test]
    async fn test_later_step_wins() {
        let forward = config(vec![
            set_default("title", json!("first")),
            set_default("title", json!("second")),
        ]);
        let swapped = config(vec![
            set_default("title", json!("second")),
            set_default("title", json!("first")),
        ]);

        let (_, a) = harvest(&forward, items(&["/a.nc"])).await;
        let (_, b) = harvest(&swapped, items(&["/a.nc"])).await;

        assert_eq!(a.records()[0].get("properties.title"), Some(&Value::from("second")));
        assert_eq!(b.records()[0].get("properties.title"), Some(&Value::from("first")));
    }

    #[tokio::test]
    async fn test_asset_contributions_become_sequence() {
        let config = config(vec![MethodDescriptor::new("basename")
            .with_scope(Scope::Asset)
            .with_output_key("asset_name")]);
        let item = ItemDescriptor::new("/data/scene")
            .with_asset(AssetDescriptor::new("/data/scene/B02.tif"))
            .with_asset(AssetDescriptor::new("/data/scene/B03.tif"))
            .with_asset(AssetDescriptor::new("/data/scene/B04.tif"));

        let (report, out) = harvest(&config, vec![item]).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(
            out.records()[0].get("properties.asset_name"),
            Some(&Value::from(json!(["B02.tif", "B03.tif", "B04.tif"])))
        );
    }

    #[tokio::test]
    async fn test_failing_item_does_not_affect_others() {
        let config = config(vec![MethodDescriptor::new("picky")]);

        let (report, out) = harvest(&config, items(&["/data/good.nc", "/data/bad.nc"])).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_items(), vec!["/data/bad.nc"]);
        assert_eq!(
            report.failures[0].component,
            Component::Extraction {
                step: 1,
                method: "picky".to_string()
            }
        );
        assert_eq!(report.failures[0].kind, ErrorKind::Extraction);
        assert_eq!(out.len(), 1);
        assert!(out.get("/data/good.nc").is_some());
    }

    #[tokio::test]
    async fn test_best_effort_item_is_degraded() {
        let mut config = config(vec![
            MethodDescriptor::new("picky"),
            set_default("license", json!("other")),
        ]);
        config.pipeline = config.pipeline.with_policy(StepPolicy::BestEffort);

        let (report, out) = harvest(&config, items(&["/data/good.nc", "/data/bad.nc"])).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.degraded, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.failures.is_empty());
        assert_eq!(report.failed_items(), vec!["/data/bad.nc"]);
        assert!(!report.is_clean());
        let bad = out.get("/data/bad.nc").unwrap();
        assert_eq!(bad.get("properties.license"), Some(&Value::from("other")));
        assert_eq!(bad.get("properties.checked"), None);
    }

    #[tokio::test]
    async fn test_missing_required_field_publishes_nothing() {
        let config = config(vec![MethodDescriptor::new("basename")]).with_mapping(
            mapping().with_field(FieldMapping::new("datetime", "properties.datetime").required()),
        );

        let (report, out) = harvest(&config, items(&["/data/a.nc"])).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].kind, ErrorKind::MissingRequiredField);
        assert_eq!(report.failures[0].component, Component::Mapping);
        assert!(report.failures[0].message.contains("properties.datetime"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_number_vs_sequence_conflict() {
        let steps = vec![set_default("size", json!(3)), set_default("size", json!([4]))];

        let (report, out) = harvest(&config(steps.clone()), items(&["/a.nc"])).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].kind, ErrorKind::MergeConflict);
        assert!(out.is_empty());

        let with_rule = config(steps).with_merge(
            MergeConfig::default().with_rule("size", ConflictRule::Coerce(Coercion::Sequence)),
        );
        let (report, out) = harvest(&with_rule, items(&["/a.nc"])).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            out.records()[0].get("properties.size"),
            Some(&Value::Sequence(vec![Value::Integer(4)]))
        );
    }

    #[tokio::test]
    async fn test_platform_from_filename_overrides_default() {
        let config = config(vec![
            set_default("platform", json!("X")),
            MethodDescriptor::new("basename"),
            MethodDescriptor::new("regex_extract")
                .with_params(json!({ "pattern": r"^([^_]+)_", "from": "filename" }))
                .with_output_key("platform"),
        ]);

        let (report, out) =
            harvest(&config, items(&["/neodc/sentinel2a/S2A_20180705_T31UDQ.SAFE"])).await;

        assert!(report.is_clean());
        let record = &out.records()[0];
        assert_eq!(record.get("properties.platform"), Some(&Value::from("S2A")));
        assert_eq!(record.get("type"), Some(&Value::from("Feature")));
        assert_eq!(
            record.get("id").and_then(Value::as_str).map(str::len),
            Some(32)
        );
    }

    #[tokio::test]
    async fn test_fail_fast_stops_dispatch() {
        let config = config(vec![MethodDescriptor::new("picky")])
            .with_concurrency(1)
            .with_fail_fast(true);

        let (report, out) = harvest(
            &config,
            items(&["/data/bad.nc", "/data/good1.nc", "/data/good2.nc"]),
        )
        .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_still_flushes_outputs() {
        let memory = MemoryOutput::new();
        let token = CancellationToken::new();
        let generator = Generator::new(
            &config(vec![MethodDescriptor::new("basename")]),
            &registry(),
            vec![Arc::new(memory.clone()) as Arc<dyn Output>],
        )
        .unwrap()
        .with_cancellation(token.clone());

        token.cancel();
        let report = generator
            .run(&StaticInput::new(items(&["/a.nc", "/b.nc"])))
            .await
            .unwrap();

        assert_eq!(report.succeeded, 0);
        assert!(memory.is_empty());
        assert_eq!(memory.finish_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_mid_item_publishes_nothing() {
        let memory = MemoryOutput::new();
        let token = CancellationToken::new();
        let mut registry = registry();
        let step_token = token.clone();
        registry
            .register("canceller", move |_d: &MethodDescriptor| {
                Ok(Arc::new(Canceller(step_token.clone())) as Arc<dyn ExtractionMethod>)
            })
            .unwrap();
        let config = config(vec![
            set_default("title", json!("before")),
            MethodDescriptor::new("canceller"),
            set_default("license", json!("other")),
        ])
        .with_concurrency(1);
        let generator = Generator::new(
            &config,
            &registry,
            vec![Arc::new(memory.clone()) as Arc<dyn Output>],
        )
        .unwrap()
        .with_cancellation(token.clone());

        let report = generator
            .run(&StaticInput::new(items(&["/a.nc", "/b.nc"])))
            .await
            .unwrap();

        assert_eq!(report.cancelled, 1);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 0);
        assert!(!report.is_clean());
        assert!(memory.is_empty());
        assert_eq!(memory.finish_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_step_is_attributed_to_its_item() {
        let config = config(vec![MethodDescriptor::new("picky")]);

        let (report, out) = harvest(&config, items(&["/data/boom.nc", "/data/good.nc"])).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].item_id, "/data/boom.nc");
        assert_eq!(report.failures[0].kind, ErrorKind::Panic);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_output_failures_are_per_item() {
        let memory = MemoryOutput::new();
        let generator = Generator::new(
            &config(vec![MethodDescriptor::new("basename")]),
            &registry(),
            vec![
                Arc::new(FailingOutput) as Arc<dyn Output>,
                Arc::new(memory.clone()) as Arc<dyn Output>,
            ],
        )
        .unwrap();

        let report = generator
            .run(&StaticInput::new(items(&["/a.nc"])))
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].kind, ErrorKind::OutputFailure);
        assert_eq!(
            report.failures[0].component,
            Component::Output {
                name: "failing".to_string()
            }
        );
        assert_eq!(memory.len(), 1);
        assert_eq!(report.flush_failures.len(), 1);
        assert_eq!(report.flush_failures[0].output, "failing");
    }

    #[tokio::test]
    async fn test_bad_input_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        std::fs::write(&path, "{\"uri\": \"/data/a.nc\"}\n{oops\n").unwrap();

        let memory = MemoryOutput::new();
        let generator = Generator::new(
            &config(vec![MethodDescriptor::new("basename")]),
            &registry(),
            vec![Arc::new(memory.clone()) as Arc<dyn Output>],
        )
        .unwrap();
        let report = generator.run(&JsonLinesInput::new(&path)).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].component, Component::Input);
        assert_eq!(report.failures[0].item_id, "json_lines#2");
    }

    #[test]
    fn test_unknown_method_rejected_before_run() {
        let result = Generator::new(
            &config(vec![MethodDescriptor::new("no_such_method")]),
            &registry(),
            Vec::new(),
        );
        assert!(matches!(
            result,
            Err(GeneratorError::Config(ConfigError::UnknownMethod { .. }))
        ));
    }
}
