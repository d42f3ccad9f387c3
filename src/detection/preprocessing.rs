use image::DynamicImage;
use image::imageops::FilterType;
use serde::Deserialize;

use crate::models::{FeatureExtractorConfig, ResizeConfig};

/// Output size `(width, height)` for a `width` x `height` image: the short
/// side becomes `shortest_edge` unless that would push the long side past
/// `longest_edge`.
pub fn resize_dimensions(width: u32, height: u32, size: ResizeConfig) -> (u32, u32) {
    let (short, long) = (width.min(height) as f32, width.max(height) as f32);
    let mut target = size.shortest_edge as f32;
    if long / short * target > size.longest_edge as f32 {
        target = (size.longest_edge as f32 * short / long).round_ties_even();
    }
    let target = target.max(1.0);

    if width <= height {
        if width as f32 == target {
            return (width, height);
        }
        (target as u32, ((target * height as f32 / width as f32) as u32).max(1))
    } else {
        if height as f32 == target {
            return (width, height);
        }
        (((target * width as f32 / height as f32) as u32).max(1), target as u32)
    }
}

/// Resize, rescale to `[0, 1]` and normalize an image into an NCHW buffer.
/// Returns the buffer and its `[1, 3, height, width]` shape.
pub fn extract_features(img: &DynamicImage, config: &FeatureExtractorConfig) -> (Vec<f32>, [usize; 4]) {
    let rgb = img.to_rgb8();
    let (w, h) = resize_dimensions(rgb.width(), rgb.height(), config.size);
    let resized = if (w, h) == rgb.dimensions() {
        rgb
    } else {
        image::imageops::resize(&rgb, w, h, FilterType::Triangle)
    };

    let (w, h) = (w as usize, h as usize);
    let plane = w * h;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = y as usize * w + x as usize;
        for c in 0..3 {
            let mut v = pixel[c] as f32 / 255.0;
            if config.do_normalize {
                v = (v - config.image_mean[c]) / config.image_std[c];
            }
            data[c * plane + offset] = v;
        }
    }

    (data, [1, 3, h, w])
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Edges {
        shortest_edge: u32,
        longest_edge: Option<u32>,
    },
    Scalar(u32),
}

#[derive(Deserialize)]
struct RawFeatureConfig {
    do_normalize: Option<bool>,
    image_mean: Option<[f32; 3]>,
    image_std: Option<[f32; 3]>,
    size: Option<RawSize>,
    max_size: Option<u32>,
}

/// Parse a `preprocessor_config.json` as written by model exporters.
/// Both the `{"shortest_edge", "longest_edge"}` and the older
/// `"size": n, "max_size": m` layouts are accepted.
pub fn parse_feature_config(json: &str) -> anyhow::Result<FeatureExtractorConfig> {
    let raw: RawFeatureConfig = serde_json::from_str(json)?;
    let defaults = FeatureExtractorConfig::default();

    let size = match raw.size {
        Some(RawSize::Edges {
            shortest_edge,
            longest_edge,
        }) => ResizeConfig {
            shortest_edge,
            longest_edge: longest_edge.or(raw.max_size).unwrap_or(defaults.size.longest_edge),
        },
        Some(RawSize::Scalar(shortest_edge)) => ResizeConfig {
            shortest_edge,
            longest_edge: raw.max_size.unwrap_or(defaults.size.longest_edge),
        },
        None => defaults.size,
    };
    if size.shortest_edge == 0 || size.longest_edge == 0 {
        anyhow::bail!("resize edges must be positive");
    }

    Ok(FeatureExtractorConfig {
        do_normalize: raw.do_normalize.unwrap_or(defaults.do_normalize),
        image_mean: raw.image_mean.unwrap_or(defaults.image_mean),
        image_std: raw.image_std.unwrap_or(defaults.image_std),
        size,
    })
}
