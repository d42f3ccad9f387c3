use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::config::PipelineConfig;
use crate::detection::crop::extract_region;
use crate::models::{BoundingBox, CropOutcome, CropResult, FilteredDetection, LabelMap, RawDetection};

const CAPTION_BACKGROUND: Rgb<u8> = Rgb([255, 255, 0]);
const CAPTION_ALPHA: f32 = 0.8;
const CAPTION_TEXT: Rgb<u8> = Rgb([0, 0, 0]);

/// DejaVu Sans, used for captions unless a font file is configured
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

fn bundled_font() -> Option<FontArc> {
    match FontArc::try_from_slice(BUNDLED_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "bundled caption font is unreadable");
            None
        }
    }
}

/// How detections are drawn
#[derive(Clone)]
pub struct RenderStyle {
    pub palette: Vec<Rgb<u8>>,
    /// Only detections carrying this label are drawn
    pub plate_label: String,
    pub target_width: u32,
    /// Caption font; captions are skipped when `None`
    pub font: Option<FontArc>,
}

impl std::fmt::Debug for RenderStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderStyle")
            .field("palette", &self.palette)
            .field("plate_label", &self.plate_label)
            .field("target_width", &self.target_width)
            .field("font", &self.font.is_some())
            .finish()
    }
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl RenderStyle {
    /// Style from config with the bundled caption font. A configured font
    /// file is loaded separately with [`RenderStyle::with_font_file`].
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            palette: config.palette.iter().map(|c| Rgb(*c)).collect(),
            plate_label: config.plate_label.clone(),
            target_width: config.target_width,
            font: bundled_font(),
        }
    }

    pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read font {:?}", path))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("Invalid font {:?}: {}", path, e))?;
        self.font = Some(font);
        Ok(self)
    }

    fn color(&self, index: usize) -> Rgb<u8> {
        self.palette
            .get(index % self.palette.len().max(1))
            .copied()
            .unwrap_or(Rgb([255, 0, 0]))
    }
}

/// Keep detections scoring strictly above `threshold`, in detector order,
/// and resolve their labels.
pub fn filter_detections(
    raw: &[RawDetection],
    threshold: f32,
    labels: &LabelMap,
) -> Vec<FilteredDetection> {
    raw.iter()
        .filter(|d| d.score > threshold)
        .map(|d| FilteredDetection {
            bbox: d.bbox,
            label: labels.name(d.label),
            score: d.score,
        })
        .collect()
}

/// Box corners clipped to the canvas, as `(x, y, width, height)`.
/// `None` for non-finite corners or a box with nothing inside the frame.
fn clip_to_canvas(bbox: &BoundingBox, width: u32, height: u32) -> Option<(i32, i32, u32, u32)> {
    let coords = [bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax];
    if coords.iter().any(|c| c.is_nan()) {
        return None;
    }
    let (w, h) = (width as f32, height as f32);
    let x0 = bbox.xmin.round().clamp(0.0, w);
    let y0 = bbox.ymin.round().clamp(0.0, h);
    let x1 = bbox.xmax.round().clamp(0.0, w);
    let y1 = bbox.ymax.round().clamp(0.0, h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
}

fn box_line_width(img: &RgbImage) -> i32 {
    (img.width().max(img.height()) as f32 / 350.0).ceil().max(2.0) as i32
}

fn caption_scale(img: &RgbImage) -> PxScale {
    PxScale::from((img.height().max(img.width()) as f32 / 30.0).max(16.0))
}

fn draw_caption(canvas: &mut RgbImage, font: &FontArc, scale: PxScale, x: i32, y: i32, text: &str) {
    let (text_w, text_h) = text_size(scale, font, text);
    let pad = (text_h / 4).max(2) as i32;
    let box_w = text_w as i32 + 2 * pad;
    let box_h = text_h as i32 + 2 * pad;
    // Sit on top of the box edge, but stay inside the frame
    let top = (y - box_h).max(0);
    let left = x.max(0);

    for py in top..(top + box_h).min(canvas.height() as i32) {
        for px in left..(left + box_w).min(canvas.width() as i32) {
            let pixel = canvas.get_pixel_mut(px as u32, py as u32);
            for c in 0..3 {
                let blended = CAPTION_ALPHA * CAPTION_BACKGROUND[c] as f32
                    + (1.0 - CAPTION_ALPHA) * pixel[c] as f32;
                pixel[c] = blended.round() as u8;
            }
        }
    }

    draw_text_mut(canvas, CAPTION_TEXT, left + pad, top + pad, scale, font, text);
}

/// Draw every plate detection onto a copy of `img`.
///
/// Colors cycle through the palette by position in `detections`, so a
/// skipped non-plate detection still consumes its color. Returns the
/// canvas and the detections that were actually drawn.
pub fn render_boxes(
    img: &DynamicImage,
    detections: &[FilteredDetection],
    style: &RenderStyle,
) -> (RgbImage, Vec<FilteredDetection>) {
    let mut canvas = img.to_rgb8();
    let line_width = box_line_width(&canvas);
    let scale = caption_scale(&canvas);
    let mut drawn = Vec::new();

    for (i, det) in detections.iter().enumerate() {
        if det.label != style.plate_label {
            continue;
        }
        let color = style.color(i);
        let Some((x, y, w, h)) = clip_to_canvas(&det.bbox, canvas.width(), canvas.height()) else {
            tracing::debug!(bbox = ?det.bbox, "box outside the frame, not drawn");
            continue;
        };

        for t in 0..line_width {
            let rect = Rect::at(x - t, y - t).of_size(w + 2 * t as u32, h + 2 * t as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        if let Some(font) = &style.font {
            draw_caption(&mut canvas, font, scale, x, y, &det.caption());
        }
        drawn.push(det.clone());
    }

    if style.font.is_none() && !drawn.is_empty() {
        tracing::warn!("no caption font available, box labels skipped");
    }

    (canvas, drawn)
}

/// Resize to `target_width`, keeping the aspect ratio
pub fn fit_width(img: &RgbImage, target_width: u32) -> RgbImage {
    let ratio = target_width as f32 / img.width().max(1) as f32;
    let height = ((img.height() as f32 * ratio) as u32).max(1);
    image::imageops::resize(img, target_width, height, FilterType::Lanczos3)
}

/// Output of the filter and visualizer stage
#[derive(Debug, Clone)]
pub struct Visualization {
    pub image: DynamicImage,
    pub crop: CropResult,
    /// Detections drawn on `image`
    pub drawn: Vec<FilteredDetection>,
}

impl Visualization {
    pub fn outcome(&self) -> CropOutcome {
        match &self.crop {
            Ok(_) => CropOutcome::Success,
            Err(failure) => failure.outcome(),
        }
    }

    /// The plate crop, or the visualization when there is none
    pub fn crop_image(&self) -> &DynamicImage {
        self.crop.as_ref().unwrap_or(&self.image)
    }

    /// `(visualization, crop)` with the fallback applied
    pub fn into_images(self) -> (DynamicImage, DynamicImage) {
        match self.crop {
            Ok(crop) => (self.image, crop),
            Err(_) => {
                let fallback = self.image.clone();
                (self.image, fallback)
            }
        }
    }
}

/// Threshold the raw detections, crop the plate region from the source
/// image and draw the plate boxes onto a display-width copy.
pub fn visualize(
    img: &DynamicImage,
    raw: &[RawDetection],
    threshold: f32,
    labels: &LabelMap,
    style: &RenderStyle,
) -> Visualization {
    let filtered = filter_detections(raw, threshold, labels);
    let crop = extract_region(img, &filtered);
    if let Err(failure) = &crop {
        tracing::debug!(?failure, "no plate crop");
    }

    let (canvas, drawn) = render_boxes(img, &filtered, style);
    let image = DynamicImage::ImageRgb8(fit_width(&canvas, style.target_width));

    Visualization { image, crop, drawn }
}
