//! End-to-end run: config, board, camera, image list, pipeline, output.

use crate::board::{build_board, BoardError};
use crate::camera::{CalibrationError, CameraParameters};
use crate::config::{ConfigError, PoseConfig};
use crate::image_list::read_image_list;
use crate::pipeline::{Pipeline, RunSummary};
use crate::preview::{DirectoryPreview, PausingPreview, PreviewError, PreviewSink};
use crate::vision::CharucoVision;
#[cfg(feature = "window")]
use crate::window::preview_window;
use crate::writer::{PoseWriter, WriterError};
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Output(#[from] WriterError),
    #[error(transparent)]
    Preview(#[from] PreviewError),
}

impl RunError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Preview(_) => 1,
            RunError::Config(_) => 2,
            RunError::Board(_) => 3,
            RunError::Calibration(_) => 4,
            RunError::Output(_) => 5,
        }
    }
}

/// Command-line switches that shape a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOptions {
    /// No operator gate.
    pub headless: bool,
    /// Write annotated frames here.
    pub preview_dir: Option<PathBuf>,
    /// Fail instead of warning when the calibration cannot be loaded.
    pub require_calibration: bool,
    /// Worker threads; only used when the preview does not block.
    pub jobs: usize,
    /// Overrides `Axis_Length` from the config.
    pub axis_length: Option<f32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            headless: false,
            preview_dir: None,
            require_calibration: false,
            jobs: 1,
            axis_length: None,
        }
    }
}

/// What a finished run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub summary: RunSummary,
    pub output_path: PathBuf,
    pub records: usize,
}

fn directory_preview(options: &RunOptions) -> Result<Option<DirectoryPreview>, PreviewError> {
    options
        .preview_dir
        .as_ref()
        .map(DirectoryPreview::create)
        .transpose()
}

/// Build the preview sink selected by `options`.
///
/// Interactive runs read operator confirmations from `input`.
pub fn build_preview<'a, R: BufRead + 'a>(
    options: &RunOptions,
    input: R,
) -> Result<Box<dyn PreviewSink + 'a>, PreviewError> {
    let inner = directory_preview(options)?;
    if options.headless {
        Ok(Box::new(inner))
    } else {
        Ok(Box::new(PausingPreview::new(inner, input)))
    }
}

/// Interactive run gated by the preview window.
///
/// The pipeline runs on a worker thread while the window owns the calling
/// thread. If the window cannot be opened the run continues unpaused.
#[cfg(feature = "window")]
pub fn run_with_window(
    config_path: &Path,
    options: &RunOptions,
    vision: &dyn CharucoVision,
) -> Result<RunReport, RunError> {
    let (mut sink, window) = preview_window(directory_preview(options)?);
    std::thread::scope(|scope| {
        let worker = scope.spawn(move || run(config_path, options, vision, &mut sink));
        if let Err(err) = window.run() {
            log::warn!("{err}; continuing without the preview window");
        }
        worker
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    })
}

/// Load everything named by the config at `config_path` and run the pipeline.
pub fn run(
    config_path: &Path,
    options: &RunOptions,
    vision: &dyn CharucoVision,
    preview: &mut dyn PreviewSink,
) -> Result<RunReport, RunError> {
    let config = PoseConfig::load_json(config_path)?;
    log::info!("config loaded from {}", config_path.display());

    let board = build_board(&config.board)?;
    log::info!(
        "board {}x{} squares, square {} / marker {}, {}",
        board.squares_x(),
        board.squares_y(),
        board.square_size(),
        board.marker_size(),
        board.dictionary_name()
    );

    let camera = match CameraParameters::load_json(&config.calibration_path) {
        Ok(camera) => camera,
        Err(err) if options.require_calibration => return Err(err.into()),
        Err(err) => {
            log::warn!("{err}; poses will not be estimated");
            CameraParameters::unavailable()
        }
    };

    let images = read_image_list(&config.images_path).unwrap_or_else(|err| {
        log::warn!("{err}; no images will be processed");
        Vec::new()
    });
    log::info!("{} image(s) listed", images.len());

    let mut writer = PoseWriter::create(&config.output_path)?;
    let axis_length = options.axis_length.unwrap_or(config.axis_length);
    let pipeline = Pipeline::new(board, camera, vision, axis_length);
    let summary = pipeline.run(&images, &mut writer, preview, options.jobs.max(1))?;
    let doc = writer.finish()?;

    log::info!(
        "{} of {} image(s) posed ({} unreadable, {} without markers, {} without corners, {} invalid pose)",
        summary.posed,
        summary.images,
        summary.unreadable,
        summary.no_markers,
        summary.no_corners,
        summary.invalid_pose
    );

    Ok(RunReport {
        summary,
        output_path: config.output_path,
        records: doc.poses.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn exit_codes_are_distinct_per_failure_class() {
        let config = RunError::Config(ConfigError::Open {
            path: "c.json".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        let board = RunError::Board(BoardError::InvalidSquareSize(0.0));
        let calib = RunError::Calibration(CalibrationError::BadCameraMatrix(3));
        let output = RunError::Output(WriterError::Create {
            path: "o.json".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        let codes = [config, board, calib, output].map(|e| e.exit_code());
        assert_eq!(codes, [2, 3, 4, 5]);
    }

    #[test]
    fn preview_selection_follows_options() {
        let headless = RunOptions {
            headless: true,
            ..RunOptions::default()
        };
        let sink = build_preview(&headless, Cursor::new("")).expect("sink");
        assert!(!sink.wants_frames());
        assert!(!sink.blocks());

        let interactive = RunOptions::default();
        let sink = build_preview(&interactive, Cursor::new("")).expect("sink");
        assert!(sink.wants_frames());
        assert!(sink.blocks());
    }

    #[test]
    fn preview_directory_is_created_up_front() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = RunOptions {
            headless: true,
            preview_dir: Some(dir.path().join("frames")),
            ..RunOptions::default()
        };
        let sink = build_preview(&options, Cursor::new("")).expect("sink");
        assert!(sink.wants_frames());
        assert!(!sink.blocks());
        assert!(dir.path().join("frames").is_dir());
    }
}
