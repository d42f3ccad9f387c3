pub mod crop;
pub mod ocr;
pub mod preprocessing;
pub mod rten_backend;
pub mod selector;
pub mod visualize;

use std::sync::Arc;

use image::DynamicImage;

use crate::error::Result;
use crate::models::{LabelMap, ModelDescriptor, RawDetection};

/// Object detector for a single loaded model
pub trait Detector: Send + Sync {
    fn descriptor(&self) -> &ModelDescriptor;

    /// Run inference. Detections come back in the model's own order.
    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Vec<RawDetection>>;

    fn label_map(&self) -> &LabelMap {
        &self.descriptor().labels
    }
}

/// Resolves a model identifier to a ready detector.
///
/// Unknown or incompatible identifiers fail with `PipelineError::ModelLoad`.
pub trait DetectorLoader: Send + Sync {
    fn load(&self, model_id: &str) -> Result<Arc<dyn Detector>>;
}
