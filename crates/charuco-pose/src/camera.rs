//! Camera intrinsics and distortion, loaded from OpenCV-style JSON.
//!
//! Calibration files are JSON objects with `camera_matrix` and
//! `distortion_coefficients`. Each matrix may be written as nested rows, a
//! flat array, or an OpenCV-style `{ "rows", "cols", "data" }` object.
//!
//! Projection and back-projection go through the `vision-calibration-core`
//! pinhole camera with Brown-Conrady distortion.

use nalgebra::{Matrix3, Point2, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use vision_calibration_core::{make_pinhole_camera, BrownConrady5, FxFyCxCySkew, PinholeCamera};

const UNDISTORT_ITERS: u32 = 20;
const INTRINSICS_EPS: f64 = 1e-9;

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("failed to open calibration {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse calibration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("camera_matrix must have 9 entries, got {0}")]
    BadCameraMatrix(usize),
    #[error("matrix declares {rows}x{cols} but carries {len} values")]
    ShapeMismatch { rows: usize, cols: usize, len: usize },
    #[error("unsupported distortion vector length {0} (expected 0, 4, 5 or 8)")]
    UnsupportedDistortion(usize),
    #[error("rational distortion terms k4..k6 are not supported")]
    RationalDistortion,
}

/// A matrix node as written by the various calibration tools.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum MatrixNode {
    Rows(Vec<Vec<f64>>),
    Flat(Vec<f64>),
    Mat {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    },
}

impl MatrixNode {
    fn into_flat(self) -> Result<Vec<f64>, CalibrationError> {
        match self {
            MatrixNode::Rows(rows) => Ok(rows.into_iter().flatten().collect()),
            MatrixNode::Flat(data) => Ok(data),
            MatrixNode::Mat { rows, cols, data } => {
                if rows * cols != data.len() {
                    return Err(CalibrationError::ShapeMismatch {
                        rows,
                        cols,
                        len: data.len(),
                    });
                }
                Ok(data)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationFile {
    camera_matrix: MatrixNode,
    #[serde(default)]
    distortion_coefficients: Option<MatrixNode>,
}

/// OpenCV distortion coefficients `k1 k2 p1 p2 [k3]`.
///
/// Missing trailing terms are zero. An 8-element vector is accepted only
/// when its rational terms `k4 k5 k6` are all zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn from_coefficients(coeffs: &[f64]) -> Result<Self, CalibrationError> {
        if !matches!(coeffs.len(), 0 | 4 | 5 | 8) {
            return Err(CalibrationError::UnsupportedDistortion(coeffs.len()));
        }
        if coeffs.iter().skip(5).any(|&k| k != 0.0) {
            return Err(CalibrationError::RationalDistortion);
        }
        let at = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Ok(Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    fn brown_conrady(&self) -> BrownConrady5<f64> {
        BrownConrady5 {
            k1: self.k1,
            k2: self.k2,
            k3: self.k3,
            p1: self.p1,
            p2: self.p2,
            iters: UNDISTORT_ITERS,
        }
    }
}

/// Intrinsic matrix plus distortion.
///
/// The placeholder used when no calibration could be loaded carries no
/// camera model; pose estimation refuses to run against it.
#[derive(Clone, Debug)]
pub struct CameraParameters {
    camera_matrix: Matrix3<f64>,
    distortion: Distortion,
    model: Option<PinholeCamera>,
}

impl CameraParameters {
    pub fn new(camera_matrix: Matrix3<f64>, distortion: Distortion) -> Self {
        let model = pinhole_intrinsics(&camera_matrix)
            .map(|k| make_pinhole_camera(k, distortion.brown_conrady()));
        Self {
            camera_matrix,
            distortion,
            model,
        }
    }

    /// Placeholder for a missing or unreadable calibration.
    pub fn unavailable() -> Self {
        Self {
            camera_matrix: Matrix3::zeros(),
            distortion: Distortion::default(),
            model: None,
        }
    }

    /// Load a calibration JSON document.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CalibrationError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CalibrationFile =
            serde_json::from_str(&raw).map_err(|source| CalibrationError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let k = file.camera_matrix.into_flat()?;
        if k.len() != 9 {
            return Err(CalibrationError::BadCameraMatrix(k.len()));
        }
        let coeffs = match file.distortion_coefficients {
            Some(node) => node.into_flat()?,
            None => Vec::new(),
        };
        Ok(Self::new(
            Matrix3::from_row_slice(&k),
            Distortion::from_coefficients(&coeffs)?,
        ))
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    /// True when the parameters can drive projection and pose estimation.
    pub fn is_usable(&self) -> bool {
        self.model.is_some()
    }

    /// Project a camera-frame point to pixels. `None` behind the camera.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        let px = self.model.as_ref()?.project_point_c(p)?;
        (px.x.is_finite() && px.y.is_finite()).then_some(px)
    }

    /// Map a pixel to undistorted normalized image coordinates.
    pub fn normalize(&self, px: &Point2<f64>) -> Option<Vector2<f64>> {
        let ray = self.model.as_ref()?.backproject_pixel(px);
        let n = Vector2::new(ray.point.x, ray.point.y);
        (n.x.is_finite() && n.y.is_finite()).then_some(n)
    }
}

/// Pinhole intrinsics from an upper-triangular `K`, scaled so `K[2,2] == 1`.
fn pinhole_intrinsics(k: &Matrix3<f64>) -> Option<FxFyCxCySkew<f64>> {
    if !k.iter().all(|v| v.is_finite()) || k[(2, 2)].abs() <= INTRINSICS_EPS {
        return None;
    }
    let k = k / k[(2, 2)];
    let lower = [k[(1, 0)], k[(2, 0)], k[(2, 1)]];
    if lower.iter().any(|v| v.abs() > INTRINSICS_EPS) || k[(0, 0)] <= 0.0 || k[(1, 1)] <= 0.0 {
        return None;
    }
    Some(FxFyCxCySkew {
        fx: k[(0, 0)],
        fy: k[(1, 1)],
        cx: k[(0, 2)],
        cy: k[(1, 2)],
        skew: k[(0, 1)],
    })
}
