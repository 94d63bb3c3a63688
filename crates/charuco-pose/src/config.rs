//! Run configuration loaded from a JSON document.
//!
//! Keys follow the historical ChArUco pose tool layout (`BoardSize_Width`,
//! `Images_xml`, ...). Reading is lenient: every key is optional and a
//! missing key leaves the zero/empty default in place. Only an unreadable
//! file or malformed JSON is an error.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Length of the drawn pose axes when `Axis_Length` is not configured.
pub const DEFAULT_AXIS_LENGTH: f32 = 50.0;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Physical description of the ChArUco board.
///
/// `grid_width`/`grid_height` are **square counts**, sizes are in the
/// caller's board unit (millimetres, points, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    #[serde(rename = "BoardSize_Width")]
    pub grid_width: u32,
    #[serde(rename = "BoardSize_Height")]
    pub grid_height: u32,
    #[serde(rename = "Square_Size")]
    pub square_size: f32,
    #[serde(rename = "Marker_Size")]
    pub marker_size: f32,
    #[serde(rename = "ArUco_Dict_Name")]
    pub dictionary_name: String,
}

/// Everything the pose tool reads from its configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    #[serde(flatten)]
    pub board: BoardConfig,
    /// Image list document.
    #[serde(rename = "Images_xml")]
    pub images_path: PathBuf,
    /// Pose output document.
    #[serde(rename = "Write_outputFileName")]
    pub output_path: PathBuf,
    /// Camera intrinsics document.
    #[serde(rename = "Calib_Filename")]
    pub calibration_path: PathBuf,
    /// Length of the drawn pose axes, in board units.
    #[serde(rename = "Axis_Length")]
    pub axis_length: f32,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            board: BoardConfig::default(),
            images_path: PathBuf::new(),
            output_path: PathBuf::new(),
            calibration_path: PathBuf::new(),
            axis_length: DEFAULT_AXIS_LENGTH,
        }
    }
}

impl PoseConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
