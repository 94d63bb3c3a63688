//! Detection collaborator: markers, ChArUco corners and board pose.
//!
//! [`CharucoVision`] is the seam between the per-image pipeline and the
//! detector. [`CalibTargetsVision`] is the production implementation; tests
//! plug in scripted fakes.

mod detector;

pub use self::detector::CalibTargetsVision;

use crate::board::PoseBoard;
use crate::camera::CameraParameters;
use crate::pose::{estimate_board_pose, solve_planar_pose};
pub use crate::pose::Pose;
use calib_targets::core::estimate_homography_rect_to_img;
use image::GrayImage;
use nalgebra::{Point2, Point3};

/// Minimal number of detected markers touching a ChArUco corner before the
/// corner is interpolated.
pub const MIN_ADJACENT_MARKERS: usize = 2;

/// Detected markers as parallel id/quad arrays.
///
/// Quads are in image pixels, TL, TR, BR, BL in the marker's own frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkerDetections {
    ids: Vec<u32>,
    corners: Vec<[Point2<f32>; 4]>,
}

impl MarkerDetections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: u32, quad: [Point2<f32>; 4]) {
        self.ids.push(id);
        self.corners.push(quad);
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn corners(&self) -> &[[Point2<f32>; 4]] {
        &self.corners
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[Point2<f32>; 4])> + '_ {
        self.ids.iter().copied().zip(self.corners.iter())
    }

    /// Mean side length of the detected quads, in pixels.
    pub fn mean_side_px(&self) -> Option<f32> {
        if self.corners.is_empty() {
            return None;
        }
        let total: f32 = self
            .corners
            .iter()
            .map(|q| (0..4).map(|k| (q[(k + 1) % 4] - q[k]).norm()).sum::<f32>() / 4.0)
            .sum();
        Some(total / self.corners.len() as f32)
    }
}

impl FromIterator<(u32, [Point2<f32>; 4])> for MarkerDetections {
    fn from_iter<I: IntoIterator<Item = (u32, [Point2<f32>; 4])>>(iter: I) -> Self {
        let mut out = Self::new();
        for (id, quad) in iter {
            out.push(id, quad);
        }
        out
    }
}

/// Interpolated ChArUco corners as parallel id/point arrays, ids ascending.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CharucoCorners {
    ids: Vec<u32>,
    points: Vec<Point2<f32>>,
}

impl CharucoCorners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: u32, point: Point2<f32>) {
        self.ids.push(id);
        self.points.push(point);
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn points(&self) -> &[Point2<f32>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Point2<f32>)> + '_ {
        self.ids.iter().copied().zip(self.points.iter().copied())
    }
}

impl FromIterator<(u32, Point2<f32>)> for CharucoCorners {
    fn from_iter<I: IntoIterator<Item = (u32, Point2<f32>)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (id, p) in iter {
            out.push(id, p);
        }
        out
    }
}

/// Everything found in one image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageDetection {
    pub markers: MarkerDetections,
    pub charuco: CharucoCorners,
    pub pose: Option<Pose>,
}

/// Marker detection, corner interpolation and pose estimation.
pub trait CharucoVision: Send + Sync {
    /// Detect board markers. An empty image yields no markers.
    fn detect_markers(&self, image: &GrayImage, board: &PoseBoard) -> MarkerDetections;

    /// Interpolate ChArUco corners from detected markers.
    fn interpolate_corners(
        &self,
        image: &GrayImage,
        markers: &MarkerDetections,
        board: &PoseBoard,
        camera: &CameraParameters,
    ) -> CharucoCorners;

    /// Estimate the board pose. `None` means the pose is not valid.
    fn estimate_pose(
        &self,
        corners: &CharucoCorners,
        board: &PoseBoard,
        camera: &CameraParameters,
    ) -> Option<Pose> {
        estimate_board_pose(board, corners.ids(), corners.points(), camera).map(|fit| {
            log::debug!("pose rms {:.3}px over {} corners", fit.rms_px, corners.len());
            fit.pose
        })
    }
}

/// Predict ChArUco corner positions from detected marker quads.
///
/// Only corners touched by at least [`MIN_ADJACENT_MARKERS`] detected
/// markers and falling inside the `width x height` image are returned.
pub fn predict_charuco_corners(
    markers: &MarkerDetections,
    board: &PoseBoard,
    camera: &CameraParameters,
    width: u32,
    height: u32,
) -> CharucoCorners {
    let mut object = Vec::with_capacity(markers.len() * 4);
    let mut image = Vec::with_capacity(markers.len() * 4);
    let mut support = vec![0usize; board.charuco_corner_count()];

    for (id, quad) in markers.iter() {
        let (Some(xy), Some(neighbors)) = (
            board.marker_corners_xy(id),
            board.marker_neighbor_corners(id),
        ) else {
            log::debug!("marker {id} is not on the board");
            continue;
        };
        for (o, p) in xy.iter().zip(quad) {
            object.push(*o);
            image.push(Point2::new(p.x as f64, p.y as f64));
        }
        for cid in neighbors.into_iter().flatten() {
            if let Some(count) = support.get_mut(cid as usize) {
                *count += 1;
            }
        }
    }
    if object.len() < 4 {
        return CharucoCorners::new();
    }

    let Some(predict) = board_to_image(&object, &image, camera) else {
        return CharucoCorners::new();
    };

    let (w, h) = (width as f32, height as f32);
    support
        .iter()
        .enumerate()
        .filter(|(_, &count)| count >= MIN_ADJACENT_MARKERS)
        .filter_map(|(cid, _)| {
            let cid = cid as u32;
            let p = predict(board.charuco_corner_xy(cid)?)?;
            let inside = p.x >= 0.0 && p.y >= 0.0 && p.x < w && p.y < h;
            inside.then_some((cid, p))
        })
        .collect()
}

type Projector<'a> = Box<dyn Fn(Point2<f64>) -> Option<Point2<f32>> + 'a>;

/// Board-plane to image mapping: camera projection when calibrated,
/// plain homography otherwise.
fn board_to_image<'a>(
    object: &[Point2<f64>],
    image: &[Point2<f64>],
    camera: &'a CameraParameters,
) -> Option<Projector<'a>> {
    if camera.is_usable() {
        if let Some(fit) = solve_planar_pose(object, image, camera) {
            let pose = fit.pose;
            return Some(Box::new(move |xy| {
                let p = camera.project(&pose.transform(&Point3::new(xy.x, xy.y, 0.0)))?;
                Some(Point2::new(p.x as f32, p.y as f32))
            }));
        }
        log::debug!("marker pose failed, falling back to homography");
    }

    let src: Vec<Point2<f32>> = object
        .iter()
        .map(|p| Point2::new(p.x as f32, p.y as f32))
        .collect();
    let dst: Vec<Point2<f32>> = image
        .iter()
        .map(|p| Point2::new(p.x as f32, p.y as f32))
        .collect();
    let h = estimate_homography_rect_to_img(&src, &dst)?;
    Some(Box::new(move |xy| {
        let p = h.apply(Point2::new(xy.x as f32, xy.y as f32));
        (p.x.is_finite() && p.y.is_finite()).then_some(p)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::build_board;
    use crate::config::BoardConfig;

    fn board() -> PoseBoard {
        build_board(&BoardConfig {
            grid_width: 5,
            grid_height: 7,
            square_size: 40.0,
            marker_size: 30.0,
            dictionary_name: "DICT_4X4_50".into(),
        })
        .expect("board")
    }

    /// Fronto-parallel view: board unit -> 2 px, offset (20, 10).
    fn quad(board: &PoseBoard, id: u32) -> [Point2<f32>; 4] {
        board
            .marker_corners_xy(id)
            .expect("marker")
            .map(|p| Point2::new((p.x * 2.0 + 20.0) as f32, (p.y * 2.0 + 10.0) as f32))
    }

    #[test]
    fn marker_detections_stay_parallel() {
        let b = board();
        let markers: MarkerDetections = [0u32, 3].iter().map(|&id| (id, quad(&b, id))).collect();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers.ids(), &[0, 3]);
        assert_eq!(markers.corners().len(), 2);
        let side = markers.mean_side_px().expect("side");
        assert!((side - 60.0).abs() < 1e-3);
    }

    #[test]
    fn corners_need_two_adjacent_markers() {
        let b = board();
        // Markers 0 and 2 are the first white squares of rows 0 and 1 and
        // share corner 0 only.
        let markers: MarkerDetections = [0u32, 2].iter().map(|&id| (id, quad(&b, id))).collect();
        let corners =
            predict_charuco_corners(&markers, &b, &CameraParameters::unavailable(), 640, 480);
        assert_eq!(corners.ids(), &[0]);
        let p = corners.points()[0];
        assert!((p.x - 100.0).abs() < 1e-2, "{p:?}");
        assert!((p.y - 90.0).abs() < 1e-2, "{p:?}");
    }

    #[test]
    fn single_marker_predicts_nothing() {
        let b = board();
        let markers: MarkerDetections = std::iter::once((0u32, quad(&b, 0))).collect();
        let corners =
            predict_charuco_corners(&markers, &b, &CameraParameters::unavailable(), 640, 480);
        assert!(corners.is_empty());
    }

    #[test]
    fn corners_outside_the_image_are_dropped() {
        let b = board();
        let markers: MarkerDetections = [0u32, 2].iter().map(|&id| (id, quad(&b, id))).collect();
        let corners =
            predict_charuco_corners(&markers, &b, &CameraParameters::unavailable(), 90, 480);
        assert!(corners.is_empty());
    }

    #[test]
    fn unknown_marker_ids_are_ignored() {
        let b = board();
        let mut markers = MarkerDetections::new();
        markers.push(40, quad(&b, 0));
        let corners =
            predict_charuco_corners(&markers, &b, &CameraParameters::unavailable(), 640, 480);
        assert!(corners.is_empty());
    }
}
