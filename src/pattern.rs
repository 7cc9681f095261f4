//! Planar calibration target geometry.
//!
//! A pattern is described by the number of inner corners along each axis and
//! the physical size of one cell in meters. Reference points lie on the
//! `Z = 0` plane of the target.

use nalgebra::Point3;
use std::fmt;
use std::sync::Arc;

/// Shared, read-only reference points of one observation.
pub type ReferencePoints = Arc<[Point3<f64>]>;

/// Inner-corner grid dimensions handed to the presence check and the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    /// Number of corners in the grid.
    pub fn corner_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Errors raised when building a [`PatternSpec`] from untrusted values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern grid must be at least 1x1, got {width}x{height}")]
    EmptyGrid { width: u32, height: u32 },

    #[error("pattern cell size must be a positive number of meters, got {0}")]
    InvalidCellSize(f64),
}

/// Immutable description of the calibration target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternSpec {
    grid: GridSize,
    cell_size: f64,
}

impl PatternSpec {
    /// Create a pattern, rejecting empty grids and non-positive cell sizes.
    pub fn new(width: u32, height: u32, cell_size: f64) -> Result<Self, PatternError> {
        if width == 0 || height == 0 {
            return Err(PatternError::EmptyGrid { width, height });
        }
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(PatternError::InvalidCellSize(cell_size));
        }
        Ok(Self {
            grid: GridSize { width, height },
            cell_size,
        })
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    pub fn width(&self) -> u32 {
        self.grid.width
    }

    pub fn height(&self) -> u32 {
        self.grid.height
    }

    /// Cell size in meters.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Corners per observation (`width * height`).
    pub fn corner_count(&self) -> usize {
        self.grid.corner_count()
    }

    /// Reference points for one observation, ready to be shared.
    pub fn reference_points(&self) -> ReferencePoints {
        generate_reference_points(self.grid.width, self.grid.height, self.cell_size).into()
    }
}

/// Build the 3D corner positions of a planar grid.
///
/// Ordering is width-major: the point at grid index `(i, j)` lives at
/// position `i * height + j` and equals `(i * cell_size, j * cell_size, 0)`.
/// Detectors must emit corners in the same order.
pub fn generate_reference_points(width: u32, height: u32, cell_size: f64) -> Vec<Point3<f64>> {
    let mut points = Vec::with_capacity(width as usize * height as usize);
    for i in 0..width {
        for j in 0..height {
            points.push(Point3::new(
                i as f64 * cell_size,
                j as f64 * cell_size,
                0.0,
            ));
        }
    }
    points
}

/// Index of grid corner `(i, j)` in a reference or corner sequence.
pub fn corner_index(grid: GridSize, i: u32, j: u32) -> usize {
    i as usize * grid.height as usize + j as usize
}
