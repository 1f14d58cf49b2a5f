//! Run configuration.
//!
//! A [`HarvestConfig`] is loaded once at startup (JSON), validated, and then
//! passed explicitly to the [`Generator`](crate::executor::Generator). Nothing
//! in it changes for the duration of a run.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{Coercion, Scope, Value};

/// Errors raised while loading or validating configuration, or while
/// resolving pipeline entries against the method registry.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown extraction method '{name}'")]
    UnknownMethod { name: String },

    #[error("Extraction method '{name}' is already registered")]
    DuplicateMethod { name: String },

    #[error("Invalid parameters for '{method}': {reason}")]
    InvalidParameters { method: String, reason: String },
}

// ============================================================================
// Top level
// ============================================================================

/// Complete configuration for one harvest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub run: RunConfig,

    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub mapping: MappingConfig,

    /// Input used by the command line runner
    #[serde(default)]
    pub input: Option<InputConfig>,

    /// Outputs used by the command line runner
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

impl HarvestConfig {
    pub fn new(pipeline: PipelineConfig) -> Self {
        Self {
            run: RunConfig::default(),
            pipeline,
            merge: MergeConfig::default(),
            mapping: MappingConfig::default(),
            input: None,
            outputs: Vec::new(),
        }
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: HarvestConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.run.concurrency = concurrency;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.run.fail_fast = fail_fast;
        self
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_mapping(mut self, mapping: MappingConfig) -> Self {
        self.mapping = mapping;
        self
    }

    /// Structural checks that do not need the method registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "run.concurrency must be at least 1".to_string(),
            ));
        }
        self.pipeline.validate()?;
        self.mapping.validate()
    }
}

/// Worker pool and run-level failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum number of items processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Stop dispatching new items after the first item failure
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_concurrency() -> usize {
    4
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fail_fast: false,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// How a pipeline reacts to a failing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Abort the rest of the chain for that item
    #[default]
    FailFast,

    /// Record the failure and continue with the next step
    BestEffort,
}

/// Ordered extraction chain. Order of `steps` is execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    #[serde(default)]
    pub on_error: StepPolicy,

    /// Per-step timeout in seconds
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    pub steps: Vec<MethodDescriptor>,
}

fn default_pipeline_name() -> String {
    "default".to_string()
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_error: StepPolicy::default(),
            step_timeout_secs: None,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: MethodDescriptor) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn with_step_timeout(mut self, secs: u64) -> Self {
        self.step_timeout_secs = Some(secs);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }
        if let Some(position) = self.steps.iter().position(|s| s.method.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "pipeline '{}' step {} names no method",
                self.name, position
            )));
        }
        if self.step_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "pipeline.step_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One pipeline entry: a registered method, its static parameters, and
/// where and at which scope its output is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub method: String,

    #[serde(default)]
    pub params: serde_json::Value,

    #[serde(default)]
    pub output_key: Option<String>,

    #[serde(default)]
    pub scope: Scope,
}

impl MethodDescriptor {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: serde_json::Value::Null,
            output_key: None,
            scope: Scope::Item,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Explicit resolution for writes of different types at one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRule {
    /// Accept the type change; the later write wins as usual
    LastWins,

    /// Convert every contribution before precedence is applied
    Coerce(Coercion),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub rules: IndexMap<String, ConflictRule>,
}

impl MergeConfig {
    pub fn with_rule(mut self, key: impl Into<String>, rule: ConflictRule) -> Self {
        self.rules.insert(key.into(), rule);
        self
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Projection of merged keys onto the target schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub fields: Vec<FieldMapping>,

    /// Namespace receiving merged keys no entry consumed
    #[serde(default)]
    pub passthrough: Option<String>,

    /// Fixed values written to the given targets
    #[serde(default)]
    pub constants: IndexMap<String, Value>,
}

impl MappingConfig {
    pub fn with_field(mut self, field: FieldMapping) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_passthrough(mut self, namespace: impl Into<String>) -> Self {
        self.passthrough = Some(namespace.into());
        self
    }

    pub fn with_constant(mut self, target: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.insert(target.into(), value.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let targets = self
            .fields
            .iter()
            .map(|f| f.target.as_str())
            .chain(self.constants.keys().map(String::as_str))
            .chain(self.passthrough.as_deref());
        for target in targets {
            if target.split('.').any(|segment| segment.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "mapping target '{}' has an empty path segment",
                    target
                )));
            }
        }
        Ok(())
    }
}

/// One mapping table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Key in the merged working record
    pub source: String,

    /// Dotted schema field, e.g. `properties.datetime`
    pub target: String,

    #[serde(default)]
    pub coerce: Option<Coercion>,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            coerce: None,
            default: None,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_coercion(mut self, coercion: Coercion) -> Self {
        self.coerce = Some(coercion);
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputConfig {
    /// Recursive directory walk, one item per file
    FileSystem {
        path: PathBuf,
        /// Regex a path must match to be harvested
        #[serde(default)]
        filter: Option<String>,
        /// Descend into symbolically linked directories
        #[serde(default)]
        follow_links: bool,
    },

    /// One item descriptor per JSON line
    JsonLines { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputConfig {
    Stdout,
    JsonFile { dir: PathBuf },
}
