//! Planar board pose from image correspondences.
//!
//! The board lies on `Z = 0`. Pixels are undistorted into normalized image
//! coordinates, a DLT homography is fitted between the board plane and those
//! coordinates, and the homography is decomposed into `R|t` with identity
//! intrinsics. The RMS pixel error is measured with the full distortion model.

use crate::board::PoseBoard;
use crate::camera::CameraParameters;
use nalgebra::{Isometry3, Matrix3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use vision_calibration_linear::prelude::{dlt_homography, estimate_planar_pose_from_h};

/// Minimal number of correspondences for a pose.
pub const MIN_POSE_POINTS: usize = 4;

/// Board pose in the camera frame: `X_cam = R(rvec) * X_board + tvec`.
///
/// `rvec` is an axis-angle (Rodrigues) vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

/// A pose and its RMS pixel reprojection error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseFit {
    pub pose: Pose,
    pub rms_px: f64,
}

impl Pose {
    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self {
            rvec: iso.rotation.scaled_axis(),
            tvec: iso.translation.vector,
        }
    }

    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.tvec),
            UnitQuaternion::from_scaled_axis(self.rvec),
        )
    }

    /// Board point expressed in the camera frame.
    pub fn transform(&self, p: &Point3<f64>) -> Vector3<f64> {
        self.isometry().transform_point(p).coords
    }

    fn is_finite(&self) -> bool {
        self.rvec.iter().chain(self.tvec.iter()).all(|v| v.is_finite())
    }
}

/// Estimate the board pose from ChArUco corners.
///
/// Needs at least [`MIN_POSE_POINTS`] corners, not all on a single board row
/// or column. The pose is rejected if any corner ends up behind the camera.
pub fn estimate_board_pose(
    board: &PoseBoard,
    ids: &[u32],
    corners: &[Point2<f32>],
    camera: &CameraParameters,
) -> Option<PoseFit> {
    if ids.len() != corners.len() || ids.len() < MIN_POSE_POINTS {
        return None;
    }
    if !spans_the_plane(board, ids) {
        log::debug!("charuco corners are collinear; skipping pose");
        return None;
    }

    let mut object = Vec::with_capacity(ids.len());
    let mut image = Vec::with_capacity(ids.len());
    for (&id, c) in ids.iter().zip(corners) {
        let xy = board.charuco_corner_xy(id)?;
        object.push(xy);
        image.push(Point2::new(c.x as f64, c.y as f64));
    }
    solve_planar_pose(&object, &image, camera)
}

/// Solve for the pose of points on the `Z = 0` plane.
pub fn solve_planar_pose(
    object_xy: &[Point2<f64>],
    image: &[Point2<f64>],
    camera: &CameraParameters,
) -> Option<PoseFit> {
    if object_xy.len() != image.len() || object_xy.len() < MIN_POSE_POINTS {
        return None;
    }
    if !camera.is_usable() {
        return None;
    }

    let normalized: Vec<Point2<f64>> = image
        .iter()
        .map(|px| camera.normalize(px).map(Point2::from))
        .collect::<Option<_>>()?;
    let h = dlt_homography(object_xy, &normalized).ok()?;
    let pose = Pose::from_isometry(&estimate_planar_pose_from_h(&Matrix3::identity(), &h).ok()?);
    if !pose.is_finite() {
        return None;
    }

    let mut sq_sum = 0.0;
    for (o, obs) in object_xy.iter().zip(image) {
        let p_cam = pose.transform(&Point3::new(o.x, o.y, 0.0));
        if p_cam.z <= 0.0 {
            return None;
        }
        let proj = camera.project(&p_cam)?;
        sq_sum += (proj - obs).norm_squared();
    }
    let rms_px = (sq_sum / object_xy.len() as f64).sqrt();
    rms_px.is_finite().then_some(PoseFit { pose, rms_px })
}

/// True when the ids cover at least two board rows and two board columns.
fn spans_the_plane(board: &PoseBoard, ids: &[u32]) -> bool {
    let mut cells = ids.iter().filter_map(|&id| board.charuco_corner_cell(id));
    let Some((c0, r0)) = cells.next() else {
        return false;
    };
    let (mut other_col, mut other_row) = (false, false);
    for (c, r) in cells {
        other_col |= c != c0;
        other_row |= r != r0;
    }
    other_col && other_row
}
