//! Integration tests for the SQLite detection store.

mod common;

use common::*;

fn make_record(name: &str, plate: &str, wall_time: f64) -> NewDetection {
    NewDetection {
        original_image_name: format!("{}.png", name),
        crop_image_name: format!("{}-crop.png", name),
        license_plate_data: plate.to_string(),
        wall_time,
    }
}

#[tokio::test]
async fn test_empty_store() -> anyhow::Result<()> {
    let (db, _dir) = create_test_db().await;
    assert!(db.get_detections(10).await?.is_empty());
    assert!(db.get_detection_by_id(1).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_create_and_fetch_detection() -> anyhow::Result<()> {
    let (db, _dir) = create_test_db().await;

    let created = db.create_detection(&make_record("a", "AB123:0.9", 1.25)).await?;
    assert!(created.id > 0);
    assert_eq!(created.original_image_name, "a.png");
    assert_eq!(created.crop_image_name, "a-crop.png");
    assert_eq!(created.license_plate_data, "AB123:0.9");
    assert_eq!(created.wall_time, 1.25);

    let fetched = db
        .get_detection_by_id(created.id)
        .await?
        .expect("detection should exist");
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.license_plate_data, "AB123:0.9");
    assert_eq!(fetched.created_at, created.created_at);

    Ok(())
}

#[tokio::test]
async fn test_detections_are_listed_newest_first() -> anyhow::Result<()> {
    let (db, _dir) = create_test_db().await;
    for name in ["first", "second", "third"] {
        db.create_detection(&make_record(name, "", 0.5)).await?;
    }

    let all = db.get_detections(10).await?;
    let names: Vec<_> = all.iter().map(|d| d.original_image_name.as_str()).collect();
    assert_eq!(names, ["third.png", "second.png", "first.png"]);

    let latest = db.get_detections(2).await?;
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].original_image_name, "third.png");

    Ok(())
}

#[tokio::test]
async fn test_invalid_wall_time_is_rejected() -> anyhow::Result<()> {
    let (db, _dir) = create_test_db().await;

    assert!(db.create_detection(&make_record("neg", "", -1.0)).await.is_err());
    assert!(db.create_detection(&make_record("nan", "", f64::NAN)).await.is_err());
    assert!(db.get_detections(10).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_records_survive_reopen() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("detections.db");

    let db = DetectionDb::new(&path).await?;
    db.create_detection(&make_record("kept", "", 0.1)).await?;
    db.close().await?;

    let reopened = DetectionDb::new(&path).await?;
    let all = reopened.get_detections(10).await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].original_image_name, "kept.png");

    Ok(())
}

#[tokio::test]
async fn test_missing_parent_directory_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = DetectionDb::new(dir.path().join("missing/detections.db")).await;
    assert!(result.is_err());
}
