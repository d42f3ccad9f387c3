use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Position of a pipeline run in its stage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Init,
    ModelResolved,
    ImageResolved,
    Inferred,
    Cropped,
    Persisted,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStage::Init => "INIT",
            RunStage::ModelResolved => "MODEL_RESOLVED",
            RunStage::ImageResolved => "IMAGE_RESOLVED",
            RunStage::Inferred => "INFERRED",
            RunStage::Cropped => "CROPPED",
            RunStage::Persisted => "PERSISTED",
        };
        f.write_str(s)
    }
}

/// Fatal errors that abort a detection run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no image source available")]
    NoSourceAvailable,

    #[error("failed to fetch image from {url}: {reason}")]
    SourceFetch { url: String, reason: String },

    #[error("failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("inference error: {0}")]
    Inference(String),

    #[error("artifact storage error: {0}")]
    Storage(String),

    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: RunStage, after: Duration },
}

impl PipelineError {
    pub fn model_load(model: impl Into<String>, reason: impl fmt::Display) -> Self {
        PipelineError::ModelLoad {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    pub fn source_fetch(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        PipelineError::SourceFetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure to durably record a detection. Never aborts a run.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database write failed: {0}")]
    Write(#[from] anyhow::Error),

    #[error("database write timed out after {0:?}")]
    Timeout(Duration),

    #[error("persistence task aborted: {0}")]
    Aborted(String),
}
