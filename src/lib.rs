pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod source;

pub use config::PipelineConfig;
pub use error::{PersistenceError, PipelineError, RunStage};
pub use models::{BoundingBox, CropOutcome, FilteredDetection, LabelMap, RawDetection};
pub use pipeline::{DetectionOutput, DetectionPipeline, DetectionRequest, PersistenceFailure};
pub use source::ImageInput;
