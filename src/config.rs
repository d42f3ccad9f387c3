use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "nickmuchi/yolos-small-finetuned-license-plate-detection";

pub const KNOWN_MODELS: [&str; 3] = [
    "nickmuchi/yolos-small-finetuned-license-plate-detection",
    "nickmuchi/detr-resnet50-license-plate-detection",
    "nickmuchi/yolos-small-rego-plates-detection",
];

/// Runtime configuration for the detection pipeline.
///
/// Every field has a default, so a JSON file only needs the keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model used when a request does not name one
    pub default_model: String,
    pub known_models: Vec<String>,
    /// Root of exported models, one sub-directory per identifier
    pub models_dir: PathBuf,

    pub threshold: f32,
    /// Only detections with this label are drawn
    pub plate_label: String,
    /// Width of the visualization image in pixels
    pub target_width: u32,
    /// Box colors, cycled per detection
    pub palette: Vec<[u8; 3]>,
    /// TrueType font for box captions, replacing the bundled DejaVu Sans
    pub font_path: Option<PathBuf>,

    pub output_dir: PathBuf,
    pub database_path: PathBuf,

    pub enable_ocr: bool,
    /// Directory with `text-detection.rten` and `text-recognition.rten`;
    /// defaults to `~/.cache/ocrs`
    pub ocr_models_dir: Option<PathBuf>,

    /// Flip webcam frames horizontally
    pub mirror_webcam: bool,

    pub inference_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub persist_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            known_models: KNOWN_MODELS.iter().map(|m| m.to_string()).collect(),
            models_dir: PathBuf::from("models"),
            threshold: 0.5,
            plate_label: "license-plates".to_string(),
            target_width: 750,
            palette: vec![
                [0, 114, 189],
                [217, 83, 25],
                [237, 177, 32],
                [126, 47, 142],
                [119, 172, 48],
                [77, 190, 238],
            ],
            font_path: None,
            output_dir: PathBuf::from("results"),
            database_path: PathBuf::from("detections.db"),
            enable_ocr: false,
            ocr_models_dir: None,
            mirror_webcam: false,
            inference_timeout_secs: 60,
            fetch_timeout_secs: 30,
            persist_timeout_secs: 10,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("Invalid config file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.palette.is_empty() {
            anyhow::bail!("palette must contain at least one color");
        }
        if self.target_width == 0 {
            anyhow::bail!("target_width must be positive");
        }
        if !self.threshold.is_finite() {
            anyhow::bail!("threshold must be a finite number");
        }
        Ok(())
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_secs(self.persist_timeout_secs)
    }
}
