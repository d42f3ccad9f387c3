mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from platescan for tests
pub use platescan::core::db::{Detection, DetectionDb, DetectionRepository, NewDetection};
pub use platescan::core::storage::{ArtifactStore, FolderArtifactStore};
pub use platescan::detection::ocr::{TextRecognizer, TextRegion};
pub use platescan::{
    BoundingBox, CropOutcome, DetectionPipeline, DetectionRequest, ImageInput, PersistenceError,
    PersistenceFailure, PipelineConfig, PipelineError, RawDetection,
};
