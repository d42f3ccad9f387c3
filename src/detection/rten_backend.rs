use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use image::DynamicImage;
use rten::{Model, NodeId};
use rten_tensor::prelude::*;
use rten_tensor::NdTensor;
use serde::Deserialize;

use crate::detection::preprocessing::{extract_features, parse_feature_config};
use crate::detection::{Detector, DetectorLoader};
use crate::error::{PipelineError, Result};
use crate::models::{BoundingBox, LabelMap, ModelArch, ModelDescriptor, RawDetection};

const MODEL_FILE_NAME: &str = "model.rten";
const CONFIG_FILE_NAME: &str = "config.json";
const PREPROCESSOR_FILE_NAME: &str = "preprocessor_config.json";

/// Directory name for a model identifier (`org/name` becomes `org--name`)
pub fn model_dir_name(model_id: &str) -> String {
    model_id.replace('/', "--")
}

#[derive(Deserialize)]
struct ModelConfigFile {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

fn parse_label_map(json: &str) -> anyhow::Result<LabelMap> {
    let config: ModelConfigFile = serde_json::from_str(json)?;
    let labels = config
        .id2label
        .into_iter()
        .map(|(k, v)| {
            k.parse::<usize>()
                .map(|idx| (idx, v))
                .with_context(|| format!("Invalid class index {:?} in id2label", k))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(LabelMap::new(labels))
}

/// Convert DETR-style outputs into detections.
///
/// `logits` is `[queries, classes + 1]` with the trailing "no object"
/// class, `boxes` is `[queries, 4]` normalized `(cx, cy, w, h)`.
/// Detections keep query order.
pub fn post_process(
    logits: &[f32],
    boxes: &[f32],
    num_queries: usize,
    img_width: u32,
    img_height: u32,
) -> Vec<RawDetection> {
    if num_queries == 0 || logits.len() % num_queries != 0 || boxes.len() != num_queries * 4 {
        return Vec::new();
    }
    let stride = logits.len() / num_queries;
    if stride < 2 {
        return Vec::new();
    }

    let (w, h) = (img_width as f32, img_height as f32);
    let mut detections = Vec::with_capacity(num_queries);

    for q in 0..num_queries {
        let row = &logits[q * stride..(q + 1) * stride];
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
        let sum: f32 = exp.iter().sum();

        // softmax over all classes, then ignore "no object"
        let (label, prob) = exp[..stride - 1]
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &e)| {
                if e > best.1 { (i, e) } else { best }
            });
        let score = prob / sum;

        let b = &boxes[q * 4..q * 4 + 4];
        let (cx, cy, bw, bh) = (b[0], b[1], b[2], b[3]);
        detections.push(RawDetection {
            bbox: BoundingBox::new(
                (cx - 0.5 * bw) * w,
                (cy - 0.5 * bh) * h,
                (cx + 0.5 * bw) * w,
                (cy + 0.5 * bh) * h,
            ),
            label,
            score,
        });
    }

    detections
}

/// DETR / YOLOS detector running an exported model through rten
pub struct RtenDetector {
    descriptor: ModelDescriptor,
    model: Model,
    input_id: NodeId,
    logits_id: NodeId,
    boxes_id: NodeId,
}

impl std::fmt::Debug for RtenDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtenDetector")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl RtenDetector {
    /// Load a model directory containing the weights, label config and
    /// preprocessor config.
    pub fn load_dir<P: AsRef<Path>>(model_id: &str, dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let arch = ModelArch::from_model_id(model_id)
            .with_context(|| format!("Unsupported model architecture for {:?}", model_id))?;

        let labels_json = std::fs::read_to_string(dir.join(CONFIG_FILE_NAME))
            .with_context(|| format!("Failed to read {:?}", dir.join(CONFIG_FILE_NAME)))?;
        let labels = parse_label_map(&labels_json)?;

        let features_json = std::fs::read_to_string(dir.join(PREPROCESSOR_FILE_NAME))
            .with_context(|| format!("Failed to read {:?}", dir.join(PREPROCESSOR_FILE_NAME)))?;
        let features = parse_feature_config(&features_json)?;

        let model_path = dir.join(MODEL_FILE_NAME);
        let model = Model::load_file(&model_path)
            .map_err(|e| anyhow::anyhow!("Failed to load {:?}: {}", model_path, e))?;

        let input_id = model
            .input_ids()
            .first()
            .copied()
            .context("Model has no inputs")?;
        let logits_id = model
            .find_node("logits")
            .context("Model has no `logits` output")?;
        let boxes_id = model
            .find_node("pred_boxes")
            .context("Model has no `pred_boxes` output")?;

        Ok(Self {
            descriptor: ModelDescriptor {
                id: model_id.to_string(),
                arch,
                features,
                labels,
            },
            model,
            input_id,
            logits_id,
            boxes_id,
        })
    }
}

impl Detector for RtenDetector {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Vec<RawDetection>> {
        let (data, shape) = extract_features(image, &self.descriptor.features);
        let input = NdTensor::from_data(shape, data);

        let mut outputs = self
            .model
            .run(
                vec![(self.input_id, input.view().into())],
                &[self.logits_id, self.boxes_id],
                None,
            )
            .map_err(|e| anyhow::anyhow!("Model run failed: {}", e))?;

        let boxes: NdTensor<f32, 3> = outputs
            .pop()
            .context("Missing pred_boxes output")?
            .try_into()
            .map_err(|e| anyhow::anyhow!("Unexpected pred_boxes output: {:?}", e))?;
        let logits: NdTensor<f32, 3> = outputs
            .pop()
            .context("Missing logits output")?
            .try_into()
            .map_err(|e| anyhow::anyhow!("Unexpected logits output: {:?}", e))?;

        let num_queries = logits.shape()[1];
        Ok(post_process(
            &logits.to_vec(),
            &boxes.to_vec(),
            num_queries,
            image.width(),
            image.height(),
        ))
    }
}

/// Loads detectors from `<models_dir>/<org>--<name>/`, once per identifier
pub struct RtenDetectorLoader {
    models_dir: PathBuf,
    // Loaded models are shared between runs
    cache: Mutex<HashMap<String, Arc<RtenDetector>>>,
}

impl RtenDetectorLoader {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl DetectorLoader for RtenDetectorLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn Detector>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(detector) = cache.get(model_id) {
            return Ok(detector.clone());
        }

        let dir = self.models_dir.join(model_dir_name(model_id));
        if !dir.is_dir() {
            return Err(PipelineError::model_load(
                model_id,
                format!("model directory {:?} not found", dir),
            ));
        }

        tracing::info!(model = model_id, dir = ?dir, "loading detection model");
        let detector = Arc::new(
            RtenDetector::load_dir(model_id, &dir)
                .map_err(|e| PipelineError::model_load(model_id, format!("{:#}", e)))?,
        );
        tracing::debug!(
            model = model_id,
            arch = ?detector.descriptor.arch,
            classes = detector.descriptor.labels.len(),
            "detection model ready"
        );
        cache.insert(model_id.to_string(), detector.clone());
        Ok(detector)
    }
}
