use super::{predict_charuco_corners, CharucoCorners, CharucoVision, MarkerDetections};
use crate::board::PoseBoard;
use crate::camera::CameraParameters;
use calib_targets::charuco::{CharucoDetectionResult, CharucoParams};
use calib_targets::core::estimate_homography_rect_to_img;
use calib_targets::detect::{default_chess_config, detect_charuco, detect_corners, ChessConfig};
use image::GrayImage;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Snap radius as a fraction of the local square size in pixels.
pub const DEFAULT_SNAP_RADIUS_REL: f32 = 0.25;
const MIN_SNAP_RADIUS_PX: f32 = 2.0;

/// [`CharucoVision`] backed by the `calib-targets` ChArUco detector and the
/// ChESS corner detector.
#[derive(Clone, Debug)]
pub struct CalibTargetsVision {
    /// ChESS settings for corner snapping. Marker detection runs the
    /// detector's own ChESS defaults.
    pub chess: ChessConfig,
    /// Overrides the detector's minimal marker inlier count.
    pub min_marker_inliers: Option<usize>,
    /// See [`DEFAULT_SNAP_RADIUS_REL`].
    pub snap_radius_rel: f32,
}

impl Default for CalibTargetsVision {
    fn default() -> Self {
        Self {
            chess: default_chess_config(),
            min_marker_inliers: None,
            snap_radius_rel: DEFAULT_SNAP_RADIUS_REL,
        }
    }
}

impl CalibTargetsVision {
    pub fn new() -> Self {
        Self::default()
    }

    fn detector_params(&self, board: &PoseBoard) -> CharucoParams {
        let mut params = CharucoParams::for_board(&board.spec());
        if let Some(n) = self.min_marker_inliers {
            params.min_marker_inliers = n;
        }
        params
    }
}

impl CharucoVision for CalibTargetsVision {
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip_all,
            fields(width = image.width(), height = image.height())
        )
    )]
    fn detect_markers(&self, image: &GrayImage, board: &PoseBoard) -> MarkerDetections {
        if image.width() == 0 || image.height() == 0 {
            return MarkerDetections::new();
        }
        match detect_charuco(image, &self.detector_params(board)) {
            Ok(res) => markers_from_detection(&res, board),
            Err(err) => {
                log::debug!("charuco detection failed: {err}");
                MarkerDetections::new()
            }
        }
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(markers = markers.len()))
    )]
    fn interpolate_corners(
        &self,
        image: &GrayImage,
        markers: &MarkerDetections,
        board: &PoseBoard,
        camera: &CameraParameters,
    ) -> CharucoCorners {
        let predicted =
            predict_charuco_corners(markers, board, camera, image.width(), image.height());
        if predicted.is_empty() {
            return predicted;
        }
        let Some(side_px) = markers.mean_side_px() else {
            return CharucoCorners::new();
        };
        let square_px = side_px * board.square_size() / board.marker_size();
        let radius = (self.snap_radius_rel * square_px).max(MIN_SNAP_RADIUS_PX);

        let candidates: Vec<(Point2<f32>, f32)> = detect_corners(image, &self.chess)
            .into_iter()
            .map(|c| (c.position, c.strength))
            .collect();
        let snapped = snap_to_corners(&predicted, &candidates, radius);
        log::debug!(
            "{} of {} predicted corners snapped (radius {radius:.1}px)",
            snapped.len(),
            predicted.len()
        );
        snapped
    }
}

fn markers_from_detection(res: &CharucoDetectionResult, board: &PoseBoard) -> MarkerDetections {
    log::debug!(
        "{} marker(s) decoded, {} labelled corner(s)",
        res.markers.len(),
        res.detection.corners.len()
    );
    let labelled: Vec<(u32, Point2<f32>)> = res
        .detection
        .corners
        .iter()
        .filter_map(|c| Some((c.id?, c.position)))
        .collect();
    markers_from_labelled(&labelled, res.markers.iter().map(|m| m.id), board)
}

/// Marker quads projected through the board-to-image homography of the
/// labelled ChArUco corners. Duplicate ids keep their first occurrence.
fn markers_from_labelled(
    labelled: &[(u32, Point2<f32>)],
    marker_ids: impl IntoIterator<Item = u32>,
    board: &PoseBoard,
) -> MarkerDetections {
    let mut src = Vec::with_capacity(labelled.len());
    let mut dst = Vec::with_capacity(labelled.len());
    for &(id, position) in labelled {
        let Some(xy) = board.charuco_corner_xy(id) else {
            continue;
        };
        src.push(Point2::new(xy.x as f32, xy.y as f32));
        dst.push(position);
    }
    let Some(h) = estimate_homography_rect_to_img(&src, &dst) else {
        log::debug!("too few labelled corners ({}) to place markers", src.len());
        return MarkerDetections::new();
    };

    let mut out = MarkerDetections::new();
    for id in marker_ids {
        if out.ids().contains(&id) {
            continue;
        }
        let Some(quad) = board.marker_corners_xy(id) else {
            continue;
        };
        let quad = quad.map(|p| h.apply(Point2::new(p.x as f32, p.y as f32)));
        if quad.iter().all(|p| p.x.is_finite() && p.y.is_finite()) {
            out.push(id, quad);
        }
    }
    out
}

/// Replace each prediction with the strongest candidate inside `radius`.
/// Predictions without a candidate are dropped.
fn snap_to_corners(
    predicted: &CharucoCorners,
    candidates: &[(Point2<f32>, f32)],
    radius: f32,
) -> CharucoCorners {
    let r2 = radius * radius;
    predicted
        .iter()
        .filter_map(|(id, p)| {
            candidates
                .iter()
                .filter(|(c, _)| (c - p).norm_squared() <= r2)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(c, _)| (id, *c))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::build_board;
    use crate::camera::Distortion;
    use crate::config::BoardConfig;
    use image::Luma;
    use imageproc::filter::gaussian_blur_f32;
    use nalgebra::Matrix3;

    /// Pixels per board unit and board origin offset of the rendered view.
    const SCALE: f64 = 1.0;
    const ORIGIN_PX: f64 = 39.5;

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

    fn to_px(p: Point2<f64>) -> Point2<f32> {
        Point2::new(
            (ORIGIN_PX + SCALE * p.x) as f32,
            (ORIGIN_PX + SCALE * p.y) as f32,
        )
    }

    /// Fronto-parallel 5x7 checkerboard, 40 px squares, 40 px white margin.
    fn render_checkerboard() -> GrayImage {
        let (margin, square, cols, rows) = (40u32, 40u32, 5u32, 7u32);
        let (width, height) = (cols * square + 2 * margin, rows * square + 2 * margin);
        let img = GrayImage::from_fn(width, height, |x, y| {
            let inside = x >= margin
                && y >= margin
                && x < width - margin
                && y < height - margin;
            if !inside {
                return Luma([230]);
            }
            let (i, j) = ((x - margin) / square, (y - margin) / square);
            if (i + j) % 2 == 0 {
                Luma([25])
            } else {
                Luma([230])
            }
        });
        gaussian_blur_f32(&img, 1.0)
    }

    fn camera_for(img: &GrayImage) -> CameraParameters {
        let (cx, cy) = (img.width() as f64 / 2.0, img.height() as f64 / 2.0);
        CameraParameters::new(
            Matrix3::new(800.0, 0.0, cx, 0.0, 800.0, cy, 0.0, 0.0, 1.0),
            Distortion::default(),
        )
    }

    #[test]
    fn empty_image_has_no_markers() {
        let vision = CalibTargetsVision::new();
        let markers = vision.detect_markers(&GrayImage::new(0, 0), &board());
        assert!(markers.is_empty());
    }

    #[test]
    fn blank_image_has_no_markers() {
        let vision = CalibTargetsVision::new();
        let blank = GrayImage::from_pixel(64, 48, Luma([128]));
        let markers = vision.detect_markers(&blank, &board());
        assert!(markers.is_empty());
    }

    #[test]
    fn labelled_corners_place_marker_quads() {
        let b = board();
        let labelled: Vec<(u32, Point2<f32>)> = (0..b.charuco_corner_count() as u32)
            .map(|id| (id, to_px(b.charuco_corner_xy(id).expect("xy"))))
            .collect();

        let markers = markers_from_labelled(&labelled, [3, 0, 3, 99], &b);
        assert_eq!(markers.ids(), &[3, 0]);
        for (id, quad) in markers.iter() {
            let expected = b.marker_corners_xy(id).expect("marker").map(to_px);
            for (got, want) in quad.iter().zip(expected) {
                assert!((got - want).norm() < 1e-2, "marker {id}: {got:?} vs {want:?}");
            }
        }
    }

    #[test]
    fn too_few_labelled_corners_place_nothing() {
        let b = board();
        let labelled: Vec<(u32, Point2<f32>)> = (0..3u32)
            .map(|id| (id, to_px(b.charuco_corner_xy(id).expect("xy"))))
            .collect();
        assert!(markers_from_labelled(&labelled, [0, 1], &b).is_empty());
    }

    #[test]
    fn snapping_prefers_the_strongest_nearby_corner() {
        let predicted: CharucoCorners =
            [(0u32, Point2::new(10.0, 10.0)), (4, Point2::new(50.0, 50.0))]
                .into_iter()
                .collect();
        let candidates = [
            (Point2::new(11.0, 10.0), 0.5),
            (Point2::new(9.0, 11.5), 0.9),
            (Point2::new(30.0, 30.0), 5.0),
        ];
        let snapped = snap_to_corners(&predicted, &candidates, 3.0);
        assert_eq!(snapped.ids(), &[0]);
        assert_eq!(snapped.points()[0], Point2::new(9.0, 11.5));
    }

    #[test]
    fn no_chess_support_drops_every_corner() {
        let b = board();
        let markers: MarkerDetections = [0u32, 2]
            .iter()
            .map(|&id| {
                let q = b
                    .marker_corners_xy(id)
                    .expect("marker")
                    .map(|p| Point2::new(p.x as f32 * 2.0, p.y as f32 * 2.0));
                (id, q)
            })
            .collect();
        let img = GrayImage::from_pixel(400, 400, Luma([200]));
        let corners = CalibTargetsVision::new().interpolate_corners(
            &img,
            &markers,
            &b,
            &CameraParameters::unavailable(),
        );
        assert!(corners.is_empty());
    }

    #[test]
    fn chess_corners_snap_and_pose_a_rendered_board() {
        let b = board();
        let img = render_checkerboard();
        let camera = camera_for(&img);
        let markers: MarkerDetections = (0..b.marker_count() as u32)
            .map(|id| (id, b.marker_corners_xy(id).expect("marker").map(to_px)))
            .collect();
        assert!(!markers.is_empty());

        let vision = CalibTargetsVision::new();
        let corners = vision.interpolate_corners(&img, &markers, &b, &camera);
        assert!(
            corners.len() >= 20,
            "only {} of {} corners snapped",
            corners.len(),
            b.charuco_corner_count()
        );
        for (id, p) in corners.iter() {
            let truth = to_px(b.charuco_corner_xy(id).expect("xy"));
            assert!((p - truth).norm() < 1.0, "corner {id}: {p:?} vs {truth:?}");
        }

        let pose = vision
            .estimate_pose(&corners, &b, &camera)
            .expect("pose from snapped corners");
        let (cx, cy) = (img.width() as f64 / 2.0, img.height() as f64 / 2.0);
        assert!(pose.rvec.norm() < 0.01, "rvec {:?}", pose.rvec);
        assert!((pose.tvec.x - (ORIGIN_PX - cx)).abs() < 2.0, "tvec {:?}", pose.tvec);
        assert!((pose.tvec.y - (ORIGIN_PX - cy)).abs() < 2.0, "tvec {:?}", pose.tvec);
        assert!((pose.tvec.z - 800.0 / SCALE).abs() < 16.0, "tvec {:?}", pose.tvec);
    }
}
