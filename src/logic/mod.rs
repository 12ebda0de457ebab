pub mod blueprints;
pub mod board;
pub mod expander;
pub mod gdd;
pub mod optimizer;
pub mod pipeline;
pub mod prediction;
pub mod timeline;

pub use optimizer::GreedyAllocator;
pub use pipeline::{Coordinator, PipelineServices};
pub use prediction::ClimatologyPredictor;
