pub mod config;
pub mod executor;
pub mod harvest;
pub mod inputs;
pub mod model;
pub mod outputs;
pub mod traits;

// Re-export common types for convenience
pub use config::*;
pub use executor::*;
pub use harvest::{MethodRegistry, PipelineRunner};
pub use model::*;
pub use traits::*;
