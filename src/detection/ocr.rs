use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::{DynamicImage, GrayImage};
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;

/// ocrs does not report per-line confidence
const OCRS_LINE_SCORE: f32 = 0.9;

/// One piece of text found in an image
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub score: f32,
}

/// Text recognition capability. Regions come back in reading order.
pub trait TextRecognizer: Send + Sync {
    fn recognize_text(&self, image: &GrayImage) -> anyhow::Result<Vec<TextRegion>>;
}

/// Read the plate text from a crop.
///
/// Only the first region is used; its text is trimmed and upper-cased.
/// Returns `None` when nothing readable is found or recognition fails.
pub fn read_plate(recognizer: &dyn TextRecognizer, crop: &DynamicImage) -> Option<(String, f32)> {
    let gray = crop.to_luma8();
    let regions = match recognizer.recognize_text(&gray) {
        Ok(regions) => regions,
        Err(e) => {
            tracing::warn!(error = %e, "text recognition failed");
            return None;
        }
    };

    let first = regions.into_iter().next()?;
    let text = first.text.trim().to_uppercase();
    if text.is_empty() {
        None
    } else {
        Some((text, first.score))
    }
}

/// Default location of the ocrs models, `~/.cache/ocrs`
pub fn default_models_dir() -> anyhow::Result<PathBuf> {
    let home_dir = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
    Ok(Path::new(&home_dir).join(".cache/ocrs"))
}

/// Initialize an OCR engine from a directory holding the ocrs models
pub fn init_ocr_engine(models_dir: &Path) -> anyhow::Result<OcrEngine> {
    let detection_model_path = models_dir.join("text-detection.rten");
    let recognition_model_path = models_dir.join("text-recognition.rten");

    if !detection_model_path.exists() || !recognition_model_path.exists() {
        anyhow::bail!(
            "OCR models not found. Please run: ocrs-cli --help (or download models manually)\n\
             Expected locations:\n  - {}\n  - {}",
            detection_model_path.display(),
            recognition_model_path.display()
        );
    }

    let detection_model = Model::load_file(&detection_model_path)?;
    let recognition_model = Model::load_file(&recognition_model_path)?;

    let engine = OcrEngine::new(OcrEngineParams {
        detection_model: Some(detection_model),
        recognition_model: Some(recognition_model),
        ..Default::default()
    })?;

    Ok(engine)
}

/// ocrs-backed recognizer. The engine is loaded on first use and shared
/// for the rest of the process.
pub struct OcrsRecognizer {
    models_dir: PathBuf,
    engine: Mutex<Option<Arc<OcrEngine>>>,
}

impl OcrsRecognizer {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            engine: Mutex::new(None),
        }
    }

    fn engine(&self) -> anyhow::Result<Arc<OcrEngine>> {
        // Clone the Arc so the lock is not held during recognition
        let mut guard = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = guard.as_ref() {
            return Ok(engine.clone());
        }
        tracing::info!(dir = ?self.models_dir, "initializing OCR engine");
        let engine = Arc::new(init_ocr_engine(&self.models_dir)?);
        *guard = Some(engine.clone());
        Ok(engine)
    }
}

impl TextRecognizer for OcrsRecognizer {
    fn recognize_text(&self, image: &GrayImage) -> anyhow::Result<Vec<TextRegion>> {
        let engine = self.engine()?;

        let img = DynamicImage::ImageLuma8(image.clone()).to_rgb8();
        let img_source = ImageSource::from_bytes(img.as_raw(), img.dimensions())
            .map_err(|e| anyhow::anyhow!("Invalid OCR input: {:?}", e))?;
        let ocr_input = engine.prepare_input(img_source)?;
        let text = engine.get_text(&ocr_input)?;

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| TextRegion {
                text: line.to_string(),
                score: OCRS_LINE_SCORE,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct FixedRecognizer(anyhow::Result<Vec<TextRegion>>);

    impl TextRecognizer for FixedRecognizer {
        fn recognize_text(&self, _image: &GrayImage) -> anyhow::Result<Vec<TextRegion>> {
            match &self.0 {
                Ok(regions) => Ok(regions.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn crop() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 4, Rgb([200, 10, 10])))
    }

    #[test]
    fn first_region_wins() {
        let recognizer = FixedRecognizer(Ok(vec![
            TextRegion {
                text: " ab 123 ".to_string(),
                score: 0.75,
            },
            TextRegion {
                text: "ignored".to_string(),
                score: 0.99,
            },
        ]));
        assert_eq!(read_plate(&recognizer, &crop()), Some(("AB 123".to_string(), 0.75)));
    }

    #[test]
    fn no_text_or_failure_is_none() {
        assert_eq!(read_plate(&FixedRecognizer(Ok(vec![])), &crop()), None);
        assert_eq!(
            read_plate(&FixedRecognizer(Err(anyhow::anyhow!("engine down"))), &crop()),
            None
        );
    }

    #[test]
    fn recognizer_sees_single_channel_image() {
        struct ChannelCheck;
        impl TextRecognizer for ChannelCheck {
            fn recognize_text(&self, image: &GrayImage) -> anyhow::Result<Vec<TextRegion>> {
                assert_eq!(image.dimensions(), (8, 4));
                Ok(vec![TextRegion {
                    text: format!("{}", image.get_pixel(0, 0)[0]),
                    score: 1.0,
                }])
            }
        }
        let (text, _) = read_plate(&ChannelCheck, &crop()).unwrap();
        // luma of (200, 10, 10)
        assert!(text.parse::<u8>().unwrap() < 200);
    }

    #[test]
    fn missing_models_fail_to_initialize() {
        let dir = tempfile::TempDir::new().unwrap();
        let recognizer = OcrsRecognizer::new(dir.path());
        let gray = GrayImage::new(4, 4);
        assert!(recognizer.recognize_text(&gray).is_err());
    }
}
