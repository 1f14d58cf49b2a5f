//! Core traits and types for the extraction chain.
//!
//! This module defines the plugin contract every extraction step satisfies:
//! - The [`ExtractionMethod`] trait and the [`StepContext`] it runs in
//! - Partial updates via [`FieldUpdate`] and [`StepOutcome`]
//! - Standardized error types for extraction, merging and mapping

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::harvest::record::WorkingRecord;
use crate::model::{
    AssetDescriptor, Coercion, CoercionError, ItemDescriptor, Scope, Value, ValueKind,
};

// ============================================================================
// Extraction Method Trait
// ============================================================================

/// A single pluggable step of an extraction chain.
///
/// A method reads whatever it needs from the working record (earlier steps'
/// writes are visible) and returns a partial update. Static parameters are
/// captured when the method is built by its registry factory, so one instance
/// is shared read-only by every item a pipeline processes.
///
/// # Side effects
///
/// Implementations must not write to outputs or external systems. Reading
/// files or remote metadata is allowed; the runner confines such blocking to
/// the step's own invocation.
///
/// # Examples
///
/// ```ignore
/// struct Constant(Value);
///
/// #[async_trait]
/// impl ExtractionMethod for Constant {
///     fn method_name(&self) -> &'static str {
///         "constant"
///     }
///
///     async fn extract(
///         &self,
///         _record: &WorkingRecord,
///         ctx: &StepContext<'_>,
///     ) -> Result<StepOutcome, ExtractionError> {
///         Ok(StepOutcome::single(ctx.update(ctx.output_key_or("constant"), self.0.clone())))
///     }
/// }
/// ```
#[async_trait]
pub trait ExtractionMethod: Send + Sync {
    /// Registered name of this method, used in logs.
    fn method_name(&self) -> &'static str;

    /// Produces updates for the current item (or asset).
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::MissingDependency`] when a key this method
    /// reads has not been written, or another [`ExtractionError`] when the
    /// source data cannot be processed.
    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError>;
}

// ============================================================================
// Step Context
// ============================================================================

/// Everything a method may see besides the working record.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// The item being harvested
    pub item: &'a ItemDescriptor,

    /// Output key declared on the pipeline entry, if any
    pub output_key: Option<&'a str>,

    /// Current asset (ordinal and descriptor) for asset-scoped steps
    pub asset: Option<(usize, &'a AssetDescriptor)>,
}

impl<'a> StepContext<'a> {
    pub fn for_item(item: &'a ItemDescriptor, output_key: Option<&'a str>) -> Self {
        Self {
            item,
            output_key,
            asset: None,
        }
    }

    pub fn for_asset(
        item: &'a ItemDescriptor,
        output_key: Option<&'a str>,
        ordinal: usize,
        asset: &'a AssetDescriptor,
    ) -> Self {
        Self {
            item,
            output_key,
            asset: Some((ordinal, asset)),
        }
    }

    pub fn scope(&self) -> Scope {
        match self.asset {
            Some(_) => Scope::Asset,
            None => Scope::Item,
        }
    }

    /// The declared output key, or `default` when the entry names none.
    pub fn output_key_or(&self, default: &'a str) -> &'a str {
        self.output_key.unwrap_or(default)
    }

    /// Resolves `key` as seen from this step.
    ///
    /// Asset-scoped steps see the asset's `href` (also as `uri`), the
    /// asset's own attributes and earlier contributions for the same asset
    /// before falling back to item-level fields.
    pub fn lookup(&self, record: &WorkingRecord, key: &str) -> Option<Value> {
        if let Some((ordinal, asset)) = self.asset {
            if key == "href" || key == "uri" {
                return Some(Value::String(asset.href.clone()));
            }
            if let Some(value) = asset.attributes.get(key) {
                return Some(value.clone());
            }
            if let Some(value) = record.asset_value(key, ordinal) {
                return Some(value.clone());
            }
        }
        record.value(key)
    }

    /// Like [`lookup`](Self::lookup) but fails with `MissingDependency`.
    pub fn require(&self, record: &WorkingRecord, key: &str) -> Result<Value, ExtractionError> {
        self.lookup(record, key)
            .ok_or_else(|| ExtractionError::MissingDependency {
                key: key.to_string(),
            })
    }

    /// Requires `key` to hold a string.
    pub fn require_str(&self, record: &WorkingRecord, key: &str) -> Result<String, ExtractionError> {
        match self.require(record, key)? {
            Value::String(s) => Ok(s),
            other => Err(ExtractionError::InvalidInput {
                key: key.to_string(),
                reason: format!("expected string, found {}", other.kind()),
            }),
        }
    }

    /// Builds an update targeted at this step's scope.
    pub fn update(&self, key: impl Into<String>, value: impl Into<Value>) -> FieldUpdate {
        let target = match self.asset {
            Some((ordinal, _)) => WriteTarget::Asset(ordinal),
            None => WriteTarget::Item,
        };
        FieldUpdate {
            key: key.into(),
            value: value.into(),
            target,
        }
    }
}

// ============================================================================
// Updates
// ============================================================================

/// Where a write lands: the item itself or one of its assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Item,
    /// Asset ordinal in input enumeration order
    Asset(usize),
}

impl WriteTarget {
    pub fn scope(self) -> Scope {
        match self {
            WriteTarget::Item => Scope::Item,
            WriteTarget::Asset(_) => Scope::Asset,
        }
    }
}

/// One key/value write produced by a step.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub key: String,
    pub value: Value,
    pub target: WriteTarget,
}

/// Result of a successful step invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Updates to apply, in order
    Updated(Vec<FieldUpdate>),

    /// The step intentionally produced nothing (not an error)
    Skipped(String),
}

impl StepOutcome {
    pub fn single(update: FieldUpdate) -> Self {
        StepOutcome::Updated(vec![update])
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped(reason.into())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by an extraction step.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// A key this step reads was never written
    #[error("Missing dependency: key '{key}' has not been extracted")]
    MissingDependency { key: String },

    /// Source data exists but cannot be processed
    #[error("Invalid input at '{key}': {reason}")]
    InvalidInput { key: String, reason: String },

    /// Step execution exceeded the pipeline's step timeout
    #[error("Step timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error while reading source data
    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while collapsing a working record.
#[derive(Error, Debug)]
pub enum MergeError {
    /// Two writes of incompatible types collided with no configured rule
    #[error("Merge conflict at '{key}': {first} vs {second}")]
    TypeConflict {
        key: String,
        first: ValueKind,
        second: ValueKind,
    },

    /// A key was written with a different scope than its first write
    #[error("Merge conflict at '{key}': scope changed from {first} to {second}")]
    ScopeConflict {
        key: String,
        first: Scope,
        second: Scope,
    },

    /// A configured coercion rule could not convert a contribution
    #[error("Merge coercion failed at '{key}': {error}")]
    Coercion {
        key: String,
        #[source]
        error: CoercionError,
    },
}

/// Errors raised while projecting a merged record onto the target schema.
#[derive(Error, Debug)]
pub enum MappingError {
    /// A mandatory schema field has no source value and no default
    #[error("Missing required field '{field}' (source key '{source_key}')")]
    MissingRequiredField { field: String, source_key: String },

    /// A value could not be coerced to the schema's type
    #[error("Type mismatch at '{key}': cannot convert {source_type} to {target_type}")]
    TypeMismatch {
        key: String,
        source_type: ValueKind,
        target_type: Coercion,
    },
}
