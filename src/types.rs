use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Radar polarization channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

/// Radar acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

/// Canonical optical band identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    Blue,
    Green,
    Red,
    RedEdge,
    NearInfrared,
    ShortwaveInfrared,
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Band::Blue => "blue",
            Band::Green => "green",
            Band::Red => "red",
            Band::RedEdge => "red-edge",
            Band::NearInfrared => "nir",
            Band::ShortwaveInfrared => "swir",
        };
        write!(f, "{}", name)
    }
}

/// Half-open acquisition window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        *time >= self.start && *time < self.end
    }
}

/// Geospatial bounding box in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Affine placement of a north-up grid.
///
/// Rotation terms are carried for completeness; every grid handled by the
/// engine is expected to have them at zero (no reprojection is performed).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square cells of `cell_size` map units
    pub fn north_up(top_left_x: f64, top_left_y: f64, cell_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: cell_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -cell_size,
        }
    }

    /// Reject zero or non-finite cell spacing
    pub fn validate(&self) -> GeoRiskResult<()> {
        for (name, size) in [("pixel_width", self.pixel_width), ("pixel_height", self.pixel_height)] {
            if !size.is_finite() || size == 0.0 {
                return Err(GeoRiskError::InvalidGeometry(format!(
                    "{} must be a non-zero finite cell size, got {}",
                    name, size
                )));
            }
        }
        Ok(())
    }

    /// Cell spacing as (x, y), always positive
    pub fn cell_size(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    /// Map coordinates of the centre of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.top_left_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.top_left_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    /// Transform of the sub-window whose first cell is (row, col)
    pub fn offset(&self, row: usize, col: usize) -> Self {
        Self {
            top_left_x: self.top_left_x + col as f64 * self.pixel_width,
            top_left_y: self.top_left_y + row as f64 * self.pixel_height,
            ..*self
        }
    }

    /// Extent covered by a grid of `dims` cells
    pub fn extent(&self, dims: (usize, usize)) -> BoundingBox {
        let (rows, cols) = dims;
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + cols as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + rows as f64 * self.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    /// Equality within a relative tolerance of the cell size
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let tol = 1e-9 * self.pixel_width.abs().max(self.pixel_height.abs()).max(1.0);
        (self.top_left_x - other.top_left_x).abs() <= tol
            && (self.top_left_y - other.top_left_y).abs() <= tol
            && (self.pixel_width - other.pixel_width).abs() <= tol
            && (self.pixel_height - other.pixel_height).abs() <= tol
            && (self.rotation_x - other.rotation_x).abs() <= tol
            && (self.rotation_y - other.rotation_y).abs() <= tol
    }
}

/// Error types for susceptibility processing
#[derive(Debug, thiserror::Error)]
pub enum GeoRiskError {
    #[error("Insufficient source data for {layer}: {found} acquisition(s), {required} required")]
    InsufficientSourceData {
        layer: String,
        found: usize,
        required: usize,
    },

    #[error("Misaligned grids: expected {expected}, found {found}")]
    MisalignedGrids { expected: String, found: String },

    #[error("Invalid weight set: {0}")]
    InvalidWeightSet(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for susceptibility operations
pub type GeoRiskResult<T> = Result<T, GeoRiskError>;
