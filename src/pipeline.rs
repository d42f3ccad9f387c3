use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::core::db::{DetectionDb, DetectionRepository, NewDetection};
use crate::core::storage::{ArtifactStore, FolderArtifactStore};
use crate::detection::ocr::{OcrsRecognizer, TextRecognizer, default_models_dir, read_plate};
use crate::detection::rten_backend::RtenDetectorLoader;
use crate::detection::selector::ModelSelector;
use crate::detection::visualize::{RenderStyle, Visualization, visualize};
use crate::detection::{Detector, DetectorLoader};
use crate::error::{PersistenceError, PipelineError, Result, RunStage};
use crate::models::{CropOutcome, FilteredDetection, RawDetection};
use crate::source::{HttpFetcher, ImageFetcher, ImageInput, SourceResolver};

/// Text payload stored when recognition is on but no plate was cropped
const NO_CROP_MARKER: &str = "ERROR:0";

/// One detection request
#[derive(Debug, Clone, Default)]
pub struct DetectionRequest {
    /// Model identifier. Empty keeps the current selection.
    pub model_id: String,
    pub input: ImageInput,
    /// Score threshold, falls back to the configured one
    pub threshold: Option<f32>,
}

impl DetectionRequest {
    pub fn new(input: ImageInput) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// What a successful run hands back to the caller
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    /// Annotated image at display width
    pub visualization: DynamicImage,
    /// The plate crop, or a copy of `visualization` when there is none
    pub crop: DynamicImage,
    pub outcome: CropOutcome,
    /// Model the run actually used
    pub model_id: String,
    pub drawn: Vec<FilteredDetection>,
    /// The record handed to the detection store
    pub record: NewDetection,
}

/// A record that could not be written. Delivered on the failure channel.
#[derive(Debug)]
pub struct PersistenceFailure {
    pub record: NewDetection,
    pub error: PersistenceError,
}

/// Runs model resolution, image resolution, inference, cropping,
/// optional text recognition and persistence for each request.
pub struct DetectionPipeline<F, G> {
    selector: ModelSelector,
    loader: Arc<dyn DetectorLoader>,
    resolver: SourceResolver<F>,
    style: RenderStyle,
    artifacts: Arc<dyn ArtifactStore>,
    gateway: Arc<G>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    threshold: f32,
    inference_timeout: Duration,
    persist_timeout: Duration,
    failures: Option<UnboundedSender<PersistenceFailure>>,
}

impl<F, G> DetectionPipeline<F, G>
where
    F: ImageFetcher,
    G: DetectionRepository + Send + Sync + 'static,
{
    pub fn new(
        config: &PipelineConfig,
        loader: Arc<dyn DetectorLoader>,
        fetcher: F,
        artifacts: Arc<dyn ArtifactStore>,
        gateway: G,
    ) -> Self {
        Self {
            selector: ModelSelector::from_config(config),
            loader,
            resolver: SourceResolver::new(fetcher).with_mirror_webcam(config.mirror_webcam),
            style: RenderStyle::from_config(config),
            artifacts,
            gateway: Arc::new(gateway),
            recognizer: None,
            threshold: config.threshold,
            inference_timeout: config.inference_timeout(),
            persist_timeout: config.persist_timeout(),
            failures: None,
        }
    }

    /// Enable plate text recognition
    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_style(mut self, style: RenderStyle) -> Self {
        self.style = style;
        self
    }

    /// Report persistence failures on `sender` in addition to the log
    pub fn with_failure_channel(mut self, sender: UnboundedSender<PersistenceFailure>) -> Self {
        self.failures = Some(sender);
        self
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn recognition_enabled(&self) -> bool {
        self.recognizer.is_some()
    }

    /// Run one request end to end.
    ///
    /// Persistence problems are logged and reported on the failure channel,
    /// never returned: the images come back whether or not the record was
    /// written.
    pub async fn run(&self, request: DetectionRequest) -> Result<DetectionOutput> {
        let model_id = self.selector.verify_model(&request.model_id);
        let threshold = request.threshold.unwrap_or(self.threshold);
        let span = tracing::info_span!("detect", model = %model_id, threshold);

        async {
            let mut stage = RunStage::Init;
            let result = self.execute(model_id, request.input, threshold, &mut stage).await;
            match &result {
                Ok(output) => {
                    tracing::info!(
                        outcome = %output.outcome,
                        code = output.outcome.code(),
                        wall_time = output.record.wall_time,
                        "run finished"
                    )
                }
                Err(e) => tracing::error!(last_stage = %stage, error = %e, "FAILED"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        model_id: String,
        input: ImageInput,
        threshold: f32,
        stage: &mut RunStage,
    ) -> Result<DetectionOutput> {
        *stage = RunStage::ModelResolved;
        tracing::debug!(stage = %stage);
        let start = Instant::now();

        let detector = self.load_detector(&model_id).await?;

        let image = self.resolver.resolve(input).await?;
        *stage = RunStage::ImageResolved;
        tracing::debug!(stage = %stage, width = image.width(), height = image.height());

        let (image, raw) = self.infer(detector.clone(), image).await?;
        *stage = RunStage::Inferred;
        tracing::debug!(stage = %stage, detections = raw.len());

        let vis = visualize(&image, &raw, threshold, detector.label_map(), &self.style);
        let outcome = vis.outcome();
        *stage = RunStage::Cropped;
        tracing::debug!(stage = %stage, %outcome, drawn = vis.drawn.len());

        self.artifacts
            .initialize_folders()
            .map_err(|e| PipelineError::Storage(format!("{:#}", e)))?;
        let (original_image_name, crop_image_name) = self
            .artifacts
            .save_results(&vis.image, vis.crop_image())
            .map_err(|e| PipelineError::Storage(format!("{:#}", e)))?;

        let license_plate_data = self.plate_text(&vis).await;

        let record = NewDetection {
            original_image_name,
            crop_image_name,
            license_plate_data,
            wall_time: start.elapsed().as_secs_f64(),
        };
        self.persist(record.clone()).await;
        *stage = RunStage::Persisted;
        tracing::debug!(stage = %stage);

        let drawn = vis.drawn.clone();
        let (visualization, crop) = vis.into_images();
        Ok(DetectionOutput {
            visualization,
            crop,
            outcome,
            model_id,
            drawn,
            record,
        })
    }

    async fn load_detector(&self, model_id: &str) -> Result<Arc<dyn Detector>> {
        let loader = self.loader.clone();
        let id = model_id.to_string();
        tokio::task::spawn_blocking(move || loader.load(&id))
            .await
            .map_err(|e| PipelineError::model_load(model_id, e))?
    }

    async fn infer(
        &self,
        detector: Arc<dyn Detector>,
        image: DynamicImage,
    ) -> Result<(DynamicImage, Vec<RawDetection>)> {
        let task = tokio::task::spawn_blocking(move || {
            let raw = detector.detect(&image);
            (image, raw)
        });

        match timeout(self.inference_timeout, task).await {
            Ok(Ok((image, Ok(raw)))) => Ok((image, raw)),
            Ok(Ok((_, Err(e)))) => Err(PipelineError::Inference(format!("{:#}", e))),
            Ok(Err(e)) => Err(PipelineError::Inference(e.to_string())),
            Err(_) => Err(PipelineError::Timeout {
                stage: RunStage::Inferred,
                after: self.inference_timeout,
            }),
        }
    }

    /// `TEXT:score` for a recognized plate, [`NO_CROP_MARKER`] when there is
    /// no plate crop to read, empty when recognition is off or finds nothing.
    async fn plate_text(&self, vis: &Visualization) -> String {
        let Some(recognizer) = &self.recognizer else {
            return String::new();
        };
        let Ok(crop) = &vis.crop else {
            return NO_CROP_MARKER.to_string();
        };

        let recognizer = recognizer.clone();
        let crop = crop.clone();
        let task = tokio::task::spawn_blocking(move || read_plate(recognizer.as_ref(), &crop));

        match timeout(self.inference_timeout, task).await {
            Ok(Ok(Some((text, score)))) => format!("{}:{}", text, score),
            Ok(Ok(None)) => String::new(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "text recognition task failed");
                String::new()
            }
            Err(_) => {
                tracing::warn!(after = ?self.inference_timeout, "text recognition timed out");
                String::new()
            }
        }
    }

    /// Write the record on a separate task, waiting at most the persist
    /// timeout. A write still in flight after that keeps running detached.
    async fn persist(&self, record: NewDetection) {
        let gateway = self.gateway.clone();
        let pending = record.clone();
        let task = tokio::spawn(async move { gateway.create_detection(&pending).await });

        let error = match timeout(self.persist_timeout, task).await {
            Ok(Ok(Ok(detection))) => {
                tracing::debug!(id = detection.id, "detection recorded");
                return;
            }
            Ok(Ok(Err(e))) => PersistenceError::Write(e),
            Ok(Err(e)) => PersistenceError::Aborted(e.to_string()),
            Err(_) => PersistenceError::Timeout(self.persist_timeout),
        };

        tracing::warn!(error = %error, original = %record.original_image_name, "failed to record detection");
        if let Some(failures) = &self.failures {
            // Nobody listening is fine
            let _ = failures.send(PersistenceFailure { record, error });
        }
    }
}

impl DetectionPipeline<HttpFetcher, DetectionDb> {
    /// Production wiring: rten detectors from `models_dir`, HTTP fetching,
    /// PNG folders under `output_dir` and the SQLite detection store.
    pub async fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let fetcher = HttpFetcher::new(config.fetch_timeout())?;
        let db = DetectionDb::new(&config.database_path).await?;
        let loader = Arc::new(RtenDetectorLoader::new(&config.models_dir));
        let artifacts = Arc::new(FolderArtifactStore::new(&config.output_dir));

        let mut style = RenderStyle::from_config(config);
        if let Some(font_path) = &config.font_path {
            style = style.with_font_file(font_path)?;
        }

        let mut pipeline = Self::new(config, loader, fetcher, artifacts, db).with_style(style);
        if config.enable_ocr {
            let models_dir = match &config.ocr_models_dir {
                Some(dir) => dir.clone(),
                None => default_models_dir()?,
            };
            pipeline = pipeline.with_recognizer(Arc::new(OcrsRecognizer::new(models_dir)));
        }
        Ok(pipeline)
    }
}
