//! Harvest module - per-item extraction, merge and mapping.
//!
//! This module provides the core abstractions for turning one item into one
//! structured record:
//! - **Traits**: [`ExtractionMethod`] and the [`StepContext`] it runs in
//! - **Record**: The append-only [`WorkingRecord`] threaded through a chain
//! - **Registry**: Name to factory lookup via [`MethodRegistry`]
//! - **Pipeline**: Ordered chain execution via [`PipelineRunner`]
//! - **Merge**: Precedence and conflict resolution via [`MergeResolver`]
//! - **Mapping**: Schema projection via [`Mapper`]

pub mod mapping;
pub mod merge;
pub mod methods;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod traits;

// Re-export commonly used types
pub use traits::{
    ExtractionError, ExtractionMethod, FieldUpdate, MappingError, MergeError, StepContext,
    StepOutcome, WriteTarget,
};

pub use mapping::Mapper;
pub use merge::{MergeResolver, MergedRecord};
pub use pipeline::{ChainOutcome, ChainStats, PipelineError, PipelineRunner, StepFailure};
pub use record::{WorkingRecord, WriteSource};
pub use registry::{parse_params, MethodFactory, MethodRegistry};
