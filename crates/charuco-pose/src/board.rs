//! ChArUco board construction and board-frame geometry.
//!
//! The board frame has its origin at the top-left board corner, X along the
//! square columns, Y along the rows, and the board plane at `Z = 0`.

use crate::config::BoardConfig;
use calib_targets::aruco::builtins;
use calib_targets::charuco::{CharucoBoard, CharucoBoardError, CharucoBoardSpec, MarkerLayout};
use nalgebra::{Point2, Point3};

/// Dictionary used when the configuration does not name one.
pub const DEFAULT_DICTIONARY: &str = "DICT_5X5_100";

#[derive(thiserror::Error, Debug)]
pub enum BoardError {
    #[error("unknown ArUco dictionary {0:?}")]
    UnknownDictionary(String),
    #[error("square size must be > 0 (got {0})")]
    InvalidSquareSize(f32),
    #[error("marker size {marker} must be in (0, square size {square}]")]
    InvalidMarkerSize { marker: f32, square: f32 },
    #[error(transparent)]
    Geometry(#[from] CharucoBoardError),
}

/// Validated board plus physical sizes.
#[derive(Clone, Debug)]
pub struct PoseBoard {
    board: CharucoBoard,
    square_size: f32,
    marker_size: f32,
    dictionary_name: String,
}

/// Build the board described by `cfg`.
///
/// An empty dictionary name selects [`DEFAULT_DICTIONARY`].
pub fn build_board(cfg: &BoardConfig) -> Result<PoseBoard, BoardError> {
    let dictionary_name = if cfg.dictionary_name.trim().is_empty() {
        log::info!("no ArUco dictionary configured, using {DEFAULT_DICTIONARY}");
        DEFAULT_DICTIONARY.to_string()
    } else {
        cfg.dictionary_name.trim().to_string()
    };
    let dictionary = builtins::builtin_dictionary(&dictionary_name)
        .ok_or_else(|| BoardError::UnknownDictionary(dictionary_name.clone()))?;

    if !cfg.square_size.is_finite() || cfg.square_size <= 0.0 {
        return Err(BoardError::InvalidSquareSize(cfg.square_size));
    }
    if !cfg.marker_size.is_finite()
        || cfg.marker_size <= 0.0
        || cfg.marker_size > cfg.square_size
    {
        return Err(BoardError::InvalidMarkerSize {
            marker: cfg.marker_size,
            square: cfg.square_size,
        });
    }

    let board = CharucoBoard::new(CharucoBoardSpec {
        rows: cfg.grid_height,
        cols: cfg.grid_width,
        cell_size: cfg.square_size,
        marker_size_rel: cfg.marker_size / cfg.square_size,
        dictionary,
        marker_layout: MarkerLayout::OpenCvCharuco,
    })?;

    log::debug!(
        "board {}x{} squares, square={}, marker={}, dictionary={}, markers={}",
        cfg.grid_width,
        cfg.grid_height,
        cfg.square_size,
        cfg.marker_size,
        dictionary_name,
        board.marker_count()
    );

    Ok(PoseBoard {
        board,
        square_size: cfg.square_size,
        marker_size: cfg.marker_size,
        dictionary_name,
    })
}

impl PoseBoard {
    /// Board description handed to the calib-targets detector.
    pub fn spec(&self) -> CharucoBoardSpec {
        self.board.spec()
    }

    pub fn squares_x(&self) -> u32 {
        self.board.spec().cols
    }

    pub fn squares_y(&self) -> u32 {
        self.board.spec().rows
    }

    pub fn square_size(&self) -> f32 {
        self.square_size
    }

    pub fn marker_size(&self) -> f32 {
        self.marker_size
    }

    pub fn dictionary_name(&self) -> &str {
        &self.dictionary_name
    }

    pub fn marker_count(&self) -> usize {
        self.board.marker_count()
    }

    /// Number of inner (ChArUco) corners.
    pub fn charuco_corner_count(&self) -> usize {
        (self.squares_x().saturating_sub(1) * self.squares_y().saturating_sub(1)) as usize
    }

    /// Board-plane position of a ChArUco corner.
    pub fn charuco_corner_xy(&self, id: u32) -> Option<Point2<f64>> {
        let p = self.board.charuco_object_xy(id)?;
        Some(Point2::new(p.x as f64, p.y as f64))
    }

    /// 3D object point (`Z = 0`) of a ChArUco corner.
    pub fn charuco_object_point(&self, id: u32) -> Option<Point3<f64>> {
        let p = self.charuco_corner_xy(id)?;
        Some(Point3::new(p.x, p.y, 0.0))
    }

    /// Board-plane marker corners in TL, TR, BR, BL order.
    pub fn marker_corners_xy(&self, marker_id: u32) -> Option<[Point2<f64>; 4]> {
        let cell = self.board.marker_position(marker_id)?;
        let (sx, sy) = (cell.i, cell.j);
        let s = self.square_size as f64;
        let m = self.marker_size as f64;
        let x0 = sx as f64 * s + (s - m) * 0.5;
        let y0 = sy as f64 * s + (s - m) * 0.5;
        Some([
            Point2::new(x0, y0),
            Point2::new(x0 + m, y0),
            Point2::new(x0 + m, y0 + m),
            Point2::new(x0, y0 + m),
        ])
    }

    /// ChArUco corner ids at the four corners of the square holding a marker
    /// (TL, TR, BR, BL). Board-border corners carry no id and are `None`.
    pub fn marker_neighbor_corners(&self, marker_id: u32) -> Option<[Option<u32>; 4]> {
        let cell = self.board.marker_position(marker_id)?;
        let (sx, sy) = (cell.i, cell.j);
        let id = |i: i32, j: i32| self.board.charuco_corner_id_from_board_corner(i, j);
        Some([
            id(sx, sy),
            id(sx + 1, sy),
            id(sx + 1, sy + 1),
            id(sx, sy + 1),
        ])
    }

    /// Board row/column of a ChArUco corner id.
    pub fn charuco_corner_cell(&self, id: u32) -> Option<(u32, u32)> {
        let inner_cols = self.squares_x().checked_sub(1)?;
        if inner_cols == 0 || id as usize >= self.charuco_corner_count() {
            return None;
        }
        Some((id % inner_cols, id / inner_cols))
    }
}
