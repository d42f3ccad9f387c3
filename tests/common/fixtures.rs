#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use platescan::core::db::{Detection, DetectionDb, DetectionRepository, NewDetection};
use platescan::core::storage::FolderArtifactStore;
use platescan::detection::ocr::{TextRecognizer, TextRegion};
use platescan::detection::{Detector, DetectorLoader};
use platescan::models::{FeatureExtractorConfig, ModelArch, ModelDescriptor};
use platescan::source::ImageFetcher;
use platescan::{BoundingBox, LabelMap, PipelineConfig, PipelineError, RawDetection};
use reqwest::Url;

pub const YOLOS_SMALL: &str = "nickmuchi/yolos-small-finetuned-license-plate-detection";
pub const DETR: &str = "nickmuchi/detr-resnet50-license-plate-detection";

pub const PLATE: usize = 0;
pub const CAR: usize = 1;

/// Creates a 300x200 image with a white rectangle where a plate would be.
pub fn make_test_image() -> DynamicImage {
    let img = RgbImage::from_fn(300, 200, |x, y| {
        if (100..200).contains(&x) && (80..120).contains(&y) {
            Rgb([255, 255, 255])
        } else {
            Rgb([40, 40, 40])
        }
    });
    DynamicImage::ImageRgb8(img)
}

pub fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png)
        .expect("Failed to encode test image");
    bytes.into_inner()
}

pub fn plate(score: f32, bbox: BoundingBox) -> RawDetection {
    RawDetection { bbox, label: PLATE, score }
}

pub fn car(score: f32, bbox: BoundingBox) -> RawDetection {
    RawDetection { bbox, label: CAR, score }
}

pub fn plate_labels() -> LabelMap {
    LabelMap::new([(PLATE, "license-plates".to_string()), (CAR, "car".to_string())])
}

/// Detector returning canned detections
pub struct FakeDetector {
    descriptor: ModelDescriptor,
    detections: Vec<RawDetection>,
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeDetector {
    pub fn new(model_id: &str, detections: Vec<RawDetection>) -> Self {
        Self {
            descriptor: ModelDescriptor {
                id: model_id.to_string(),
                arch: ModelArch::from_model_id(model_id).unwrap_or(ModelArch::Yolos),
                features: FeatureExtractorConfig::default(),
                labels: plate_labels(),
            },
            detections,
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `detect` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Blocks the calling thread this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Detector for FakeDetector {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn detect(&self, _image: &DynamicImage) -> anyhow::Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            anyhow::bail!("tensor shape mismatch");
        }
        Ok(self.detections.clone())
    }
}

/// Loader serving a fixed set of detectors, counting loads per model
#[derive(Default)]
pub struct FakeLoader {
    detectors: HashMap<String, Arc<FakeDetector>>,
    loads: Mutex<Vec<String>>,
}

impl FakeLoader {
    pub fn with_detector(mut self, detector: Arc<FakeDetector>) -> Self {
        self.detectors.insert(detector.descriptor.id.clone(), detector);
        self
    }

    /// Model identifiers in the order they were requested
    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }
}

impl DetectorLoader for FakeLoader {
    fn load(&self, model_id: &str) -> platescan::error::Result<Arc<dyn Detector>> {
        self.loads.lock().unwrap().push(model_id.to_string());
        match self.detectors.get(model_id) {
            Some(detector) => Ok(detector.clone()),
            None => Err(PipelineError::model_load(model_id, "no such model")),
        }
    }
}

/// Serves the same bytes for every URL, or fails
#[derive(Default)]
pub struct StaticFetcher {
    bytes: Option<Vec<u8>>,
}

impl StaticFetcher {
    pub fn serving(img: &DynamicImage) -> Self {
        Self {
            bytes: Some(png_bytes(img)),
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }
}

impl ImageFetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> anyhow::Result<Vec<u8>> {
        match &self.bytes {
            Some(bytes) => Ok(bytes.clone()),
            None => anyhow::bail!("connection refused: {}", url),
        }
    }
}

/// Recognizer returning the same regions for every crop
pub struct FixedRecognizer(pub Vec<TextRegion>);

impl FixedRecognizer {
    pub fn reading(text: &str, score: f32) -> Self {
        Self(vec![TextRegion {
            text: text.to_string(),
            score,
        }])
    }
}

impl TextRecognizer for FixedRecognizer {
    fn recognize_text(&self, _image: &GrayImage) -> anyhow::Result<Vec<TextRegion>> {
        Ok(self.0.clone())
    }
}

/// Wraps a real store and can be made to fail or stall on writes
pub struct FlakyGateway {
    inner: DetectionDb,
    fail: bool,
    delay: Option<Duration>,
}

impl FlakyGateway {
    pub fn failing(inner: DetectionDb) -> Self {
        Self {
            inner,
            fail: true,
            delay: None,
        }
    }

    pub fn stalling(inner: DetectionDb, delay: Duration) -> Self {
        Self {
            inner,
            fail: false,
            delay: Some(delay),
        }
    }
}

impl DetectionRepository for FlakyGateway {
    async fn create_detection(&self, detection: &NewDetection) -> anyhow::Result<Detection> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("database is locked");
        }
        self.inner.create_detection(detection).await
    }

    async fn get_detection_by_id(&self, id: i64) -> anyhow::Result<Option<Detection>> {
        self.inner.get_detection_by_id(id).await
    }

    async fn get_detections(&self, limit: u32) -> anyhow::Result<Vec<Detection>> {
        self.inner.get_detections(limit).await
    }
}

/// Creates a DetectionDb in a temporary directory.
/// Returns both the database and the directory (which must be kept alive).
pub async fn create_test_db() -> (DetectionDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let db = open_test_db(&dir).await;
    (db, dir)
}

pub async fn open_test_db(dir: &tempfile::TempDir) -> DetectionDb {
    DetectionDb::new(dir.path().join("detections.db"))
        .await
        .expect("Failed to create test database")
}

/// Config pointing all outputs into `dir`
pub fn test_config(dir: &tempfile::TempDir) -> PipelineConfig {
    PipelineConfig {
        output_dir: dir.path().join("results"),
        database_path: dir.path().join("detections.db"),
        inference_timeout_secs: 5,
        persist_timeout_secs: 5,
        ..PipelineConfig::default()
    }
}

pub fn test_store(dir: &tempfile::TempDir) -> Arc<FolderArtifactStore> {
    Arc::new(FolderArtifactStore::new(dir.path().join("results")))
}
