use image::DynamicImage;

use crate::models::{CropFailure, CropResult, FilteredDetection};

/// Cut the plate region out of `img`.
///
/// Every surviving detection is offered as crop coordinates. Nothing to
/// offer is `NotFound`; more than one box, or a single box with empty or
/// out-of-frame geometry, is a `CropError`.
pub fn extract_region(img: &DynamicImage, detections: &[FilteredDetection]) -> CropResult {
    let bbox = match detections {
        [] => return Err(CropFailure::NotFound),
        [only] => only.bbox,
        many => {
            return Err(CropFailure::CropError(format!(
                "expected one crop box, got {}",
                many.len()
            )));
        }
    };

    let (x, y, width, height) = bbox.pixel_rect(img.width(), img.height()).ok_or_else(|| {
        CropFailure::CropError(format!(
            "box ({:.1}, {:.1}, {:.1}, {:.1}) is outside the {}x{} image",
            bbox.xmin,
            bbox.ymin,
            bbox.xmax,
            bbox.ymax,
            img.width(),
            img.height()
        ))
    })?;

    Ok(img.crop_imm(x, y, width, height))
}
