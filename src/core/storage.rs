use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::DynamicImage;
use uuid::Uuid;

const ORIGINAL_DIR_NAME: &str = "original";
const CROP_DIR_NAME: &str = "crop";

/// Where the visualization and crop images of a run end up
pub trait ArtifactStore: Send + Sync {
    /// Create the output folders. Safe to call before every run.
    fn initialize_folders(&self) -> anyhow::Result<()>;

    /// Persist both images, returning `(original_name, crop_name)`
    fn save_results(
        &self,
        visualization: &DynamicImage,
        crop: &DynamicImage,
    ) -> anyhow::Result<(String, String)>;
}

/// Stores PNGs under `<root>/original` and `<root>/crop`
#[derive(Debug, Clone)]
pub struct FolderArtifactStore {
    root: PathBuf,
}

impl FolderArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn original_path(&self, name: &str) -> PathBuf {
        self.root.join(ORIGINAL_DIR_NAME).join(name)
    }

    pub fn crop_path(&self, name: &str) -> PathBuf {
        self.root.join(CROP_DIR_NAME).join(name)
    }

    fn save_png(img: &DynamicImage, path: &Path) -> anyhow::Result<()> {
        img.save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("Failed to save image {:?}", path))
    }
}

impl ArtifactStore for FolderArtifactStore {
    fn initialize_folders(&self) -> anyhow::Result<()> {
        for dir in [ORIGINAL_DIR_NAME, CROP_DIR_NAME] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create output folder {:?}", path))?;
        }
        Ok(())
    }

    fn save_results(
        &self,
        visualization: &DynamicImage,
        crop: &DynamicImage,
    ) -> anyhow::Result<(String, String)> {
        let original_name = format!("{}.png", Uuid::new_v4());
        let crop_name = format!("{}.png", Uuid::new_v4());

        let original_path = self.original_path(&original_name);
        Self::save_png(visualization, &original_path)?;
        if let Err(e) = Self::save_png(crop, &self.crop_path(&crop_name)) {
            // Leave no half-saved pair behind
            if let Err(cleanup) = fs::remove_file(&original_path) {
                tracing::warn!(path = ?original_path, error = %cleanup, "failed to remove orphaned image");
            }
            return Err(e);
        }

        Ok((original_name, crop_name))
    }
}
