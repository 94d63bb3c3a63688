//! ChArUco board pose estimation over an ordered list of images.
//!
//! A run loads a JSON configuration (board geometry, dictionary, image list,
//! calibration and output paths), then for every listed image:
//! - detects the board's ArUco markers,
//! - interpolates ChArUco corners from them,
//! - estimates the board pose against the calibrated camera,
//! - draws overlays for the preview,
//! - appends `rvec`/`tvec` to the output document when the pose is valid.
//!
//! ## Quickstart
//!
//! ```no_run
//! use charuco_pose::{run, CalibTargetsVision, NoPreview, RunOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vision = CalibTargetsVision::new();
//! let options = RunOptions { headless: true, ..RunOptions::default() };
//! let report = run(Path::new("config.json"), &options, &vision, &mut NoPreview)?;
//! println!("{} pose(s) written to {}", report.records, report.output_path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - [`config`]: run configuration (`BoardSize_Width`, `Images_xml`, ...).
//! - [`image_list`]: the ordered image path list.
//! - [`camera`]: intrinsics and distortion on the `vision-calibration-core` pinhole model.
//! - [`board`]: the ChArUco board and its board-frame geometry.
//! - [`vision`]: the detection seam ([`CharucoVision`]) and its `calib-targets` backend.
//! - [`pose`]: planar pose from corner correspondences.
//! - [`pipeline`]: the per-image loop and its summary.
//! - [`draw`], [`preview`]: overlays and where annotated frames go.
//! - `window` (feature `window`): the interactive preview window.
//! - [`writer`]: the pose output document.

pub mod app;
pub mod board;
pub mod camera;
pub mod config;
pub mod draw;
pub mod image_list;
pub mod pipeline;
pub mod pose;
pub mod preview;
pub mod vision;
#[cfg(feature = "window")]
pub mod window;
pub mod writer;

#[cfg(feature = "window")]
pub use app::run_with_window;
pub use app::{build_preview, run, RunError, RunOptions, RunReport};
pub use board::{build_board, BoardError, PoseBoard};
pub use camera::{CalibrationError, CameraParameters, Distortion};
pub use config::{BoardConfig, ConfigError, PoseConfig};
pub use image_list::{read_image_list, ImageListError};
pub use pipeline::{ImageOutcome, ImageStatus, Pipeline, RunSummary};
pub use preview::{DirectoryPreview, NoPreview, PausingPreview, PreviewError, PreviewSink};
pub use vision::{
    CalibTargetsVision, CharucoCorners, CharucoVision, ImageDetection, MarkerDetections, Pose,
};
#[cfg(feature = "window")]
pub use window::{preview_window, PreviewFrame, PreviewWindow, WindowPreview};
pub use writer::{PoseDocument, PoseRecord, PoseWriter, WriterError};
