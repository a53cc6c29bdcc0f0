use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Construction-time failures. These are fatal: without a template, masks
/// and a coordinate map there is no pipeline to run.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to load template image {path:?}: {source}")]
    Template {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to load alignment mask {path:?}: {source}")]
    AlignmentMask {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to load manual mask {path:?}: {source}")]
    ManualMask {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("coordinate map file not found: {path:?}")]
    CoordinatesMissing { path: PathBuf },

    #[error("failed to read coordinate map {path:?}: {source}")]
    CoordinatesUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid coordinate map {path:?}: {source}")]
    CoordinatesInvalid {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Field-scoped extraction failures. The orchestrator records a null outcome
/// for the region and moves on; these never abort a document.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unknown region {0:?}")]
    UnknownRegion(String),

    #[error("region {name:?} clamps to an empty crop")]
    EmptyCrop { name: String },
}

/// Field-scoped recognition failures, also recovered to a null outcome.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RecognitionFailure {
    #[error("recognizer backend failed: {0}")]
    Backend(String),

    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("recognizer stopped before replying")]
    Disconnected,
}

/// Where in the document flow a fatal error occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Load,
    Align,
    Mask,
    Extract,
    Classify,
    Assemble,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            ProcessingStage::Load => "load",
            ProcessingStage::Align => "align",
            ProcessingStage::Mask => "mask",
            ProcessingStage::Extract => "extract",
            ProcessingStage::Classify => "classify",
            ProcessingStage::Assemble => "assemble",
        };
        f.write_str(tag)
    }
}

/// Document-scoped failure: a precondition that must hold before any
/// per-region work could start was violated. Field-scoped failures are
/// never promoted to this.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("pipeline failed at {stage} stage: {message}")]
pub struct PipelineError {
    pub stage: ProcessingStage,
    pub message: String,
}

impl PipelineError {
    pub fn new(stage: ProcessingStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}
