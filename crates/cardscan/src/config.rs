//! Coordinate-map and pipeline configuration.
//!
//! The coordinate map is the schema contract between this pipeline and its
//! consumers: a JSON document mapping region names to rectangles in template
//! pixel space, each optionally tagged with a capability kind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::align::AlignmentParams;
use crate::classify::ClassifierParams;
use crate::error::ConfigError;
use crate::mask::MaskParams;
use crate::recognize::RecognitionPolicy;

/// What a region holds, and therefore how its crop is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Free text; empty-checked and then dispatched to the recognizer.
    #[default]
    Text,
    /// Blood-antigen reaction cell; classified by ink density, never
    /// sent to the recognizer.
    PhenotypeCell,
}

/// Axis-aligned rectangle in template pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A named region's geometry and capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    #[serde(flatten)]
    pub rect: RegionRect,
    #[serde(default)]
    pub kind: RegionKind,
}

/// Named rectangular fields in template pixel space.
///
/// Region names are unique; rectangles are non-overlapping by convention
/// (not enforced). Loaded once at pipeline construction and immutable
/// afterwards.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoordinateMap {
    pub regions: BTreeMap<String, RegionSpec>,
}

impl CoordinateMap {
    /// Parse the `{"regions": {...}}` JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load the coordinate document from disk. A missing file is a distinct
    /// error from an unreadable or unparsable one.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::CoordinatesMissing {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::CoordinatesUnreadable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::CoordinatesInvalid {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self, name: &str) -> Option<&RegionSpec> {
        self.regions.get(name)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Builder-style insertion, mostly for tests and programmatic setups.
    pub fn with_region(mut self, name: impl Into<String>, rect: RegionRect, kind: RegionKind) -> Self {
        self.regions.insert(name.into(), RegionSpec { rect, kind });
        self
    }
}

/// Tunable pipeline parameters.
///
/// Every threshold in here is an empirically calibrated value tied to a
/// scanner/paper profile; the defaults reproduce the reference calibration
/// and deployments are expected to override them through configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub alignment: AlignmentParams,
    pub mask: MaskParams,
    pub classifier: ClassifierParams,
    pub recognition: RecognitionPolicy,
}

/// Filesystem inputs for [`crate::FormPipeline::new`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub template_path: PathBuf,
    pub alignment_mask_path: PathBuf,
    pub manual_mask_path: PathBuf,
    pub coordinates_path: PathBuf,
    #[serde(default)]
    pub params: PipelineParams,
}
