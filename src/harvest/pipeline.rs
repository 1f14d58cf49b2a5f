//! Extraction chain runner.
//!
//! This module provides the [`PipelineRunner`] that executes an ordered list
//! of extraction steps against one item with:
//! - A fresh [`WorkingRecord`] per item, threaded through every step
//! - Strict configured ordering (no reordering or dependency inference)
//! - Per-step failure isolation under a fail-fast or best-effort policy
//! - Optional per-step timeouts via `tokio::time::timeout`
//! - Cooperative cancellation checked before every step
//! - Structured logging via `tracing`

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, MethodDescriptor, PipelineConfig, StepPolicy};
use crate::harvest::record::{WorkingRecord, WriteSource};
use crate::harvest::registry::MethodRegistry;
use crate::harvest::traits::{
    ExtractionError, ExtractionMethod, FieldUpdate, StepContext, StepOutcome, WriteTarget,
};
use crate::model::{ItemDescriptor, Scope};

// ============================================================================
// Chain Types
// ============================================================================

/// A step that could not run for the current item.
#[derive(Debug)]
pub struct StepFailure {
    /// Position of the step in the pipeline
    pub step: usize,

    /// Registered method name from the pipeline entry
    pub method: String,

    pub error: ExtractionError,
}

/// Statistics about one chain execution.
#[derive(Debug, Default, Clone)]
pub struct ChainStats {
    /// Steps that were invoked (including skipped and failed ones)
    pub steps_run: usize,

    /// Steps that produced no update
    pub steps_skipped: usize,

    pub steps_failed: usize,

    /// Total updates applied to the working record
    pub updates_applied: usize,

    /// Time spent on the whole chain (milliseconds)
    pub duration_ms: u64,
}

/// Result of running the chain for one item.
#[derive(Debug)]
pub struct ChainOutcome {
    /// The completed working record
    pub record: WorkingRecord,

    /// Step failures, in step order. Empty on a clean run.
    pub failures: Vec<StepFailure>,

    /// Whether a failure stopped the chain early (fail-fast policy)
    pub aborted: bool,

    pub stats: ChainStats,
}

/// Errors that stop a chain without producing an outcome.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The run was cancelled before step `step` could start
    #[error("Cancelled before step {step}")]
    Cancelled { step: usize },
}

struct Step {
    index: usize,
    descriptor: MethodDescriptor,
    method: Arc<dyn ExtractionMethod>,
}

// ============================================================================
// Pipeline Runner
// ============================================================================

/// Executes a statically ordered chain of extraction methods.
///
/// Built once per pipeline definition and shared (read-only, `Send + Sync`)
/// by every worker. Each call to [`run`](Self::run) owns its own working
/// record, so concurrent runs never share mutable state.
///
/// # Example
///
/// ```ignore
/// let registry = MethodRegistry::builtin();
/// let runner = PipelineRunner::from_config(&config.pipeline, &registry)?;
///
/// let outcome = runner.run(&item, &CancellationToken::new()).await?;
/// for failure in &outcome.failures {
///     eprintln!("step {} ({}) failed: {}", failure.step, failure.method, failure.error);
/// }
/// ```
pub struct PipelineRunner {
    name: String,
    steps: Vec<Step>,
    policy: StepPolicy,
    step_timeout: Option<Duration>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("name", &self.name)
            .field(
                "steps",
                &self
                    .steps
                    .iter()
                    .map(|s| s.descriptor.method.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("policy", &self.policy)
            .field("step_timeout", &self.step_timeout)
            .finish()
    }
}

impl PipelineRunner {
    /// Resolves every pipeline entry against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown method names or parameters a
    /// method's factory rejects.
    pub fn from_config(
        config: &PipelineConfig,
        registry: &MethodRegistry,
    ) -> Result<Self, ConfigError> {
        let steps = config
            .steps
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                Ok(Step {
                    index,
                    descriptor: descriptor.clone(),
                    method: registry.build(descriptor)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            name: config.name.clone(),
            steps,
            policy: config.on_error,
            step_timeout: config.step_timeout_secs.map(Duration::from_secs),
        })
    }

    /// Sets the timeout applied to each step invocation.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.step_timeout = Some(limit);
        self
    }

    /// Sets the reaction to failing steps.
    pub fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Creates the initial working record for `item`: its `uri` plus any
    /// attributes supplied by the input.
    pub fn seed(item: &ItemDescriptor) -> WorkingRecord {
        let mut record = WorkingRecord::new();
        let seeds = std::iter::once(("uri".to_string(), item.uri.clone().into()))
            .chain(item.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (key, value) in seeds {
            record.apply(
                WriteSource::Input,
                FieldUpdate {
                    key,
                    value,
                    target: WriteTarget::Item,
                },
            );
        }
        record
    }

    /// Executes the chain for one item.
    ///
    /// Steps run strictly in configured order. Item-scoped steps are invoked
    /// once; asset-scoped steps once per asset in enumeration order. A step's
    /// updates are applied only if every invocation of that step succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if `cancel` fires between steps.
    /// The partial record is dropped.
    #[instrument(skip_all, fields(item = %item.id, pipeline = %self.name))]
    pub async fn run(
        &self,
        item: &ItemDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, PipelineError> {
        let start = Instant::now();
        let mut record = Self::seed(item);
        let mut failures = Vec::new();
        let mut stats = ChainStats::default();
        let mut aborted = false;

        debug!(steps = self.steps.len(), "Starting extraction chain");

        for step in &self.steps {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { step: step.index });
            }

            let step_start = Instant::now();
            stats.steps_run += 1;

            match self.run_step(step, item, &record, cancel).await? {
                Ok(outcomes) => {
                    let mut applied = 0;
                    let mut skipped = 0;
                    for outcome in outcomes {
                        match outcome {
                            StepOutcome::Updated(updates) => {
                                applied += updates.len();
                                for update in updates {
                                    record.apply(WriteSource::Step(step.index), update);
                                }
                            }
                            StepOutcome::Skipped(reason) => {
                                skipped += 1;
                                debug!(step = step.index, method = %step.descriptor.method, %reason, "Step skipped");
                            }
                        }
                    }
                    if applied == 0 && skipped > 0 {
                        stats.steps_skipped += 1;
                    }
                    stats.updates_applied += applied;
                    debug!(
                        step = step.index,
                        method = %step.descriptor.method,
                        updates = applied,
                        duration_ms = step_start.elapsed().as_millis() as u64,
                        "Step completed"
                    );
                }
                Err(error) => {
                    stats.steps_failed += 1;
                    warn!(
                        step = step.index,
                        method = %step.descriptor.method,
                        error = %error,
                        "Step failed"
                    );
                    failures.push(StepFailure {
                        step: step.index,
                        method: step.descriptor.method.clone(),
                        error,
                    });
                    if self.policy == StepPolicy::FailFast {
                        aborted = true;
                        break;
                    }
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.duration_ms,
            updates = stats.updates_applied,
            failed = stats.steps_failed,
            aborted,
            "Extraction chain completed"
        );

        Ok(ChainOutcome {
            record,
            failures,
            aborted,
            stats,
        })
    }

    /// Invokes one step at its declared scope. The outer `Result` carries
    /// cancellation, the inner one the step's own failure.
    async fn run_step(
        &self,
        step: &Step,
        item: &ItemDescriptor,
        record: &WorkingRecord,
        cancel: &CancellationToken,
    ) -> Result<Result<Vec<StepOutcome>, ExtractionError>, PipelineError> {
        let output_key = step.descriptor.output_key.as_deref();

        match step.descriptor.scope {
            Scope::Item => {
                let ctx = StepContext::for_item(item, output_key);
                Ok(self.invoke(step, record, &ctx).await.map(|o| vec![o]))
            }
            Scope::Asset => {
                let mut outcomes = Vec::with_capacity(item.assets.len());
                for (ordinal, asset) in item.assets.iter().enumerate() {
                    if cancel.is_cancelled() {
                        return Err(PipelineError::Cancelled { step: step.index });
                    }
                    let ctx = StepContext::for_asset(item, output_key, ordinal, asset);
                    match self.invoke(step, record, &ctx).await {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(error) => return Ok(Err(error)),
                    }
                }
                if outcomes.is_empty() {
                    outcomes.push(StepOutcome::skipped("item has no assets"));
                }
                Ok(Ok(outcomes))
            }
        }
    }

    async fn invoke(
        &self,
        step: &Step,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let extraction = step.method.extract(record, ctx);
        match self.step_timeout {
            Some(limit) => timeout(limit, extraction)
                .await
                .map_err(|_| ExtractionError::Timeout(limit))?,
            None => extraction.await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
