use std::collections::BTreeMap;
use std::fmt;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    /// Integer pixel rectangle `(x, y, width, height)` covered by this box.
    ///
    /// Corners are rounded to the nearest pixel. Returns `None` when the
    /// rounded box is empty, inverted, not finite or leaves the
    /// `img_width` x `img_height` frame.
    pub fn pixel_rect(&self, img_width: u32, img_height: u32) -> Option<(u32, u32, u32, u32)> {
        let coords = [self.xmin, self.ymin, self.xmax, self.ymax];
        if coords.iter().any(|c| !c.is_finite()) {
            return None;
        }

        let [x0, y0, x1, y1] = coords.map(|c| c.round() as i64);
        if x0 < 0 || y0 < 0 || x1 > img_width as i64 || y1 > img_height as i64 {
            return None;
        }
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// One box as produced by the detector, before thresholding
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    /// Class index into the model's label map
    pub label: usize,
    /// Confidence in `[0, 1]`
    pub score: f32,
}

/// A detection that survived the confidence threshold, with its label resolved
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredDetection {
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f32,
}

impl FilteredDetection {
    /// Caption drawn next to the box, e.g. `license-plates: 0.91`
    pub fn caption(&self) -> String {
        format!("{}: {:.2}", self.label, self.score)
    }
}

/// Class index to human-readable name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap(BTreeMap<usize, String>);

impl LabelMap {
    pub fn new(labels: impl IntoIterator<Item = (usize, String)>) -> Self {
        Self(labels.into_iter().collect())
    }

    /// Resolve an index, falling back to `LABEL_<n>` for unknown classes
    pub fn name(&self, index: usize) -> String {
        self.0
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{}", index))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Input preparation parameters for a detection model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureExtractorConfig {
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    pub size: ResizeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResizeConfig {
    pub shortest_edge: u32,
    pub longest_edge: u32,
}

impl Default for FeatureExtractorConfig {
    fn default() -> Self {
        // ImageNet statistics, DETR default resize
        Self {
            do_normalize: true,
            image_mean: [0.485, 0.456, 0.406],
            image_std: [0.229, 0.224, 0.225],
            size: ResizeConfig {
                shortest_edge: 800,
                longest_edge: 1333,
            },
        }
    }
}

/// Detection model family, derived from the model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArch {
    Yolos,
    Detr,
}

impl ModelArch {
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        let lower = model_id.to_lowercase();
        if lower.contains("yolos") {
            Some(ModelArch::Yolos)
        } else if lower.contains("detr") {
            Some(ModelArch::Detr)
        } else {
            None
        }
    }
}

/// A resolved detection model: identifier, input preparation and labels
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub arch: ModelArch,
    pub features: FeatureExtractorConfig,
    pub labels: LabelMap,
}

/// Tri-state result of deriving the plate region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropOutcome {
    Success,
    CropError,
    NotFound,
}

impl CropOutcome {
    /// Numeric code used in logs: 0 success, 1 crop error, 2 not found
    pub fn code(&self) -> u8 {
        match self {
            CropOutcome::Success => 0,
            CropOutcome::CropError => 1,
            CropOutcome::NotFound => 2,
        }
    }
}

impl fmt::Display for CropOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CropOutcome::Success => "SUCCESS",
            CropOutcome::CropError => "CROP_ERROR",
            CropOutcome::NotFound => "NOT_FOUND",
        };
        f.write_str(s)
    }
}

/// Why no plate crop could be produced
#[derive(Debug, Clone, PartialEq)]
pub enum CropFailure {
    /// Boxes survived the threshold but could not be cropped
    CropError(String),
    /// Nothing survived the threshold
    NotFound,
}

impl CropFailure {
    pub fn outcome(&self) -> CropOutcome {
        match self {
            CropFailure::CropError(_) => CropOutcome::CropError,
            CropFailure::NotFound => CropOutcome::NotFound,
        }
    }
}

/// Result of the region extractor
pub type CropResult = Result<DynamicImage, CropFailure>;
