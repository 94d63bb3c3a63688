//! Detection overlays on the RGB display copy.

use crate::camera::CameraParameters;
use crate::vision::{CharucoCorners, MarkerDetections, Pose};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use nalgebra::Point3;

pub const MARKER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const MARKER_FIRST_CORNER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const CORNER_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const AXIS_COLORS: [Rgb<u8>; 3] = [Rgb([255, 0, 0]), Rgb([0, 255, 0]), Rgb([0, 0, 255])];

const CORNER_BOX_HALF: i32 = 2;

fn draw_box(img: &mut RgbImage, x: f32, y: f32, color: Rgb<u8>) {
    if !x.is_finite() || !y.is_finite() {
        return;
    }
    let side = (2 * CORNER_BOX_HALF + 1) as u32;
    let rect = Rect::at(x.round() as i32 - CORNER_BOX_HALF, y.round() as i32 - CORNER_BOX_HALF)
        .of_size(side, side);
    draw_hollow_rect_mut(img, rect, color);
}

/// Marker outlines, with each marker's first corner boxed.
pub fn draw_detected_markers(img: &mut RgbImage, markers: &MarkerDetections) {
    for (_, quad) in markers.iter() {
        for k in 0..4 {
            let a = quad[k];
            let b = quad[(k + 1) % 4];
            draw_line_segment_mut(img, (a.x, a.y), (b.x, b.y), MARKER_COLOR);
        }
        draw_box(img, quad[0].x, quad[0].y, MARKER_FIRST_CORNER_COLOR);
    }
}

pub fn draw_detected_corners(img: &mut RgbImage, corners: &CharucoCorners) {
    for (_, p) in corners.iter() {
        draw_box(img, p.x, p.y, CORNER_COLOR);
    }
}

/// Board frame axes of `length` board units: X red, Y green, Z blue.
///
/// Returns `false` when the origin or an axis tip is behind the camera, in
/// which case nothing is drawn.
pub fn draw_frame_axes(
    img: &mut RgbImage,
    camera: &CameraParameters,
    pose: &Pose,
    length: f32,
) -> bool {
    let l = length as f64;
    let points = [
        Point3::origin(),
        Point3::new(l, 0.0, 0.0),
        Point3::new(0.0, l, 0.0),
        Point3::new(0.0, 0.0, l),
    ];
    let projected: Option<Vec<_>> = points
        .iter()
        .map(|p| camera.project(&pose.transform(p)))
        .collect();
    let Some(projected) = projected else {
        return false;
    };

    let o = projected[0];
    for (tip, color) in projected[1..].iter().zip(AXIS_COLORS) {
        draw_line_segment_mut(
            img,
            (o.x as f32, o.y as f32),
            (tip.x as f32, tip.y as f32),
            color,
        );
    }
    true
}
