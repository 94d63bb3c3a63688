//! Per-image pipeline: load, detect, interpolate, estimate, annotate, record.
//!
//! A bad image never fails the run. Missing markers, missing corners or an
//! invalid pose only mean the image contributes no record.

use crate::board::PoseBoard;
use crate::camera::CameraParameters;
use crate::draw::{draw_detected_corners, draw_detected_markers, draw_frame_axes};
use crate::preview::{PreviewError, PreviewSink};
use crate::vision::{CharucoVision, ImageDetection};
use crate::writer::PoseWriter;
use image::{DynamicImage, GrayImage, ImageReader, RgbImage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Images decoded ahead of the in-order commit step, per worker thread.
const BATCH_PER_JOB: usize = 4;

/// How far one image got through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageStatus {
    Posed,
    Unreadable,
    NoMarkers,
    NoCorners,
    InvalidPose,
}

/// Result of processing one image.
#[derive(Clone, Debug)]
pub struct ImageOutcome {
    pub index: usize,
    pub path: PathBuf,
    pub status: ImageStatus,
    pub detection: ImageDetection,
    /// Annotated display copy, present when the preview wants frames.
    pub frame: Option<RgbImage>,
}

/// Per-status image counts for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub images: usize,
    pub posed: usize,
    pub unreadable: usize,
    pub no_markers: usize,
    pub no_corners: usize,
    pub invalid_pose: usize,
}

impl RunSummary {
    pub fn record(&mut self, status: ImageStatus) {
        self.images += 1;
        match status {
            ImageStatus::Posed => self.posed += 1,
            ImageStatus::Unreadable => self.unreadable += 1,
            ImageStatus::NoMarkers => self.no_markers += 1,
            ImageStatus::NoCorners => self.no_corners += 1,
            ImageStatus::InvalidPose => self.invalid_pose += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.images - self.posed
    }
}

/// Board, camera and detector shared by every image of a run.
pub struct Pipeline<'v> {
    board: PoseBoard,
    camera: CameraParameters,
    vision: &'v dyn CharucoVision,
    axis_length: f32,
}

impl<'v> Pipeline<'v> {
    pub fn new(
        board: PoseBoard,
        camera: CameraParameters,
        vision: &'v dyn CharucoVision,
        axis_length: f32,
    ) -> Self {
        Self {
            board,
            camera,
            vision,
            axis_length,
        }
    }

    /// Run one image through detection and pose estimation.
    ///
    /// An unreadable image is treated as empty: it reaches the detector,
    /// which reports zero markers.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(index = index, path = %path.display()))
    )]
    pub fn process_image(&self, index: usize, path: &Path, annotate: bool) -> ImageOutcome {
        let (gray, rgb, readable) = match load_image(path) {
            Ok(img) => (img.to_luma8(), img.to_rgb8(), true),
            Err(err) => {
                log::warn!("[{index}] cannot read {}: {err}", path.display());
                (GrayImage::new(0, 0), RgbImage::new(0, 0), false)
            }
        };
        let mut frame = annotate.then_some(rgb);
        let mut detection = ImageDetection {
            markers: self.vision.detect_markers(&gray, &self.board),
            ..ImageDetection::default()
        };

        let status = if detection.markers.is_empty() {
            if readable {
                ImageStatus::NoMarkers
            } else {
                ImageStatus::Unreadable
            }
        } else {
            if let Some(frame) = frame.as_mut() {
                draw_detected_markers(frame, &detection.markers);
            }
            detection.charuco = self.vision.interpolate_corners(
                &gray,
                &detection.markers,
                &self.board,
                &self.camera,
            );
            if detection.charuco.is_empty() {
                ImageStatus::NoCorners
            } else {
                if let Some(frame) = frame.as_mut() {
                    draw_detected_corners(frame, &detection.charuco);
                }
                detection.pose =
                    self.vision
                        .estimate_pose(&detection.charuco, &self.board, &self.camera);
                match (&detection.pose, frame.as_mut()) {
                    (Some(pose), Some(frame)) => {
                        draw_frame_axes(frame, &self.camera, pose, self.axis_length);
                        ImageStatus::Posed
                    }
                    (Some(_), None) => ImageStatus::Posed,
                    (None, _) => ImageStatus::InvalidPose,
                }
            }
        };

        log::debug!(
            "[{index}] {}: {} markers, {} corners, {:?}",
            path.display(),
            detection.markers.len(),
            detection.charuco.len(),
            status
        );

        ImageOutcome {
            index,
            path: path.to_path_buf(),
            status,
            detection,
            frame,
        }
    }

    /// Process `images` in order, appending valid poses to `writer` and
    /// passing annotated frames to `preview`.
    ///
    /// With `jobs > 1` and a non-blocking preview, images are processed on a
    /// rayon pool; records and frames are still committed in list order.
    pub fn run(
        &self,
        images: &[PathBuf],
        writer: &mut PoseWriter,
        preview: &mut dyn PreviewSink,
        jobs: usize,
    ) -> Result<RunSummary, PreviewError> {
        let annotate = preview.wants_frames();
        let mut summary = RunSummary::default();

        if jobs > 1 && !preview.blocks() {
            match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
                Ok(pool) => {
                    log::info!("processing {} image(s) on {jobs} threads", images.len());
                    let batch = jobs * BATCH_PER_JOB;
                    for (chunk_idx, chunk) in images.chunks(batch).enumerate() {
                        let base = chunk_idx * batch;
                        let outcomes: Vec<ImageOutcome> = pool.install(|| {
                            chunk
                                .par_iter()
                                .enumerate()
                                .map(|(i, path)| self.process_image(base + i, path, annotate))
                                .collect()
                        });
                        for outcome in outcomes {
                            commit(outcome, writer, preview, &mut summary)?;
                        }
                    }
                    return Ok(summary);
                }
                Err(err) => log::warn!("cannot build thread pool ({err}), running sequentially"),
            }
        } else if jobs > 1 {
            log::info!("interactive preview, ignoring --jobs {jobs}");
        }

        for (index, path) in images.iter().enumerate() {
            let outcome = self.process_image(index, path, annotate);
            commit(outcome, writer, preview, &mut summary)?;
        }
        Ok(summary)
    }
}

fn commit(
    outcome: ImageOutcome,
    writer: &mut PoseWriter,
    preview: &mut dyn PreviewSink,
    summary: &mut RunSummary,
) -> Result<(), PreviewError> {
    summary.record(outcome.status);
    match &outcome.detection.pose {
        Some(pose) => {
            log::info!(
                "[{}] {}: pose from {} corners, rvec=({:.4}, {:.4}, {:.4}) tvec=({:.2}, {:.2}, {:.2})",
                outcome.index,
                outcome.path.display(),
                outcome.detection.charuco.len(),
                pose.rvec.x,
                pose.rvec.y,
                pose.rvec.z,
                pose.tvec.x,
                pose.tvec.y,
                pose.tvec.z
            );
            writer.append(&outcome.path, pose);
        }
        None => log::info!(
            "[{}] {}: no pose ({:?})",
            outcome.index,
            outcome.path.display(),
            outcome.status
        ),
    }
    if let Some(frame) = &outcome.frame {
        preview.show(outcome.index, &outcome.path, frame)?;
    }
    Ok(())
}

fn load_image(path: &Path) -> Result<DynamicImage, image::ImageError> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}
