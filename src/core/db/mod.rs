mod detection;
mod state;

use std::{path::Path, sync::Arc};

use state::DbState;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub use detection::{Detection, DetectionRepository, NewDetection};

/// SQLite-backed record of detection runs
#[derive(Debug, Clone)]
pub struct DetectionDb {
    state: Arc<DbState>,
}

#[derive(sqlx::FromRow)]
struct DetectionRow {
    id: i64,
    original_image_name: String,
    crop_image_name: String,
    license_plate_data: String,
    wall_time: f64,
    created_at: String,
}

impl TryFrom<DetectionRow> for Detection {
    type Error = anyhow::Error;

    fn try_from(row: DetectionRow) -> Result<Self, Self::Error> {
        Ok(Detection {
            id: row.id,
            original_image_name: row.original_image_name,
            crop_image_name: row.crop_image_name,
            license_plate_data: row.license_plate_data,
            wall_time: row.wall_time,
            created_at: OffsetDateTime::parse(&row.created_at, &Rfc3339)?,
            _guard: (),
        })
    }
}

impl DetectionDb {
    pub async fn new<P: AsRef<Path>>(db_file: P) -> anyhow::Result<Self> {
        Ok(Self {
            state: Arc::new(DbState::new(db_file).await?),
        })
    }

    /// Checkpoint and close the database. Further use will fail.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.state.close().await
    }
}

impl DetectionRepository for DetectionDb {
    async fn create_detection(&self, detection: &NewDetection) -> anyhow::Result<Detection> {
        if !detection.wall_time.is_finite() || detection.wall_time < 0.0 {
            anyhow::bail!("Invalid wall time {}", detection.wall_time);
        }

        let mut conn = self.state.conn().await?;
        let created_at = OffsetDateTime::now_utc().format(&Rfc3339)?;
        let row: DetectionRow = sqlx::query_as(
            r#"INSERT INTO detection
                (original_image_name, crop_image_name, license_plate_data, wall_time, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, original_image_name, crop_image_name, license_plate_data, wall_time, created_at"#,
        )
        .bind(&detection.original_image_name)
        .bind(&detection.crop_image_name)
        .bind(&detection.license_plate_data)
        .bind(detection.wall_time)
        .bind(created_at)
        .fetch_one(&mut *conn)
        .await?;
        row.try_into()
    }

    async fn get_detection_by_id(&self, id: i64) -> anyhow::Result<Option<Detection>> {
        let mut conn = self.state.conn().await?;
        let row: Option<DetectionRow> = sqlx::query_as(
            r#"SELECT id, original_image_name, crop_image_name, license_plate_data, wall_time, created_at
            FROM detection WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(Detection::try_from).transpose()
    }

    async fn get_detections(&self, limit: u32) -> anyhow::Result<Vec<Detection>> {
        let mut conn = self.state.conn().await?;
        let rows: Vec<DetectionRow> = sqlx::query_as(
            r#"SELECT id, original_image_name, crop_image_name, license_plate_data, wall_time, created_at
            FROM detection ORDER BY id DESC LIMIT $1"#,
        )
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(Detection::try_from).collect()
    }
}
