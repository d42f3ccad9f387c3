use std::future::Future;

use time::OffsetDateTime;

/// A stored detection outcome
#[derive(Debug, Clone)]
pub struct Detection {
    pub id: i64,
    pub original_image_name: String,
    pub crop_image_name: String,
    pub license_plate_data: String,
    pub wall_time: f64,
    pub created_at: OffsetDateTime,
    pub(super) _guard: (),
}

/// Payload written once per pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub original_image_name: String,
    pub crop_image_name: String,
    /// `<text>:<score>`, or empty when no text was read
    pub license_plate_data: String,
    /// Seconds spent on the run
    pub wall_time: f64,
}

pub trait DetectionRepository {
    fn create_detection(
        &self,
        detection: &NewDetection,
    ) -> impl Future<Output = anyhow::Result<Detection>> + Send;
    fn get_detection_by_id(&self, id: i64) -> impl Future<Output = anyhow::Result<Option<Detection>>> + Send;
    /// Most recent first
    fn get_detections(&self, limit: u32) -> impl Future<Output = anyhow::Result<Vec<Detection>>> + Send;
}
