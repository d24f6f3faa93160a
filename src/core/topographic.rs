//! Topographic Position Index over circular neighborhoods.
//!
//! TPI = z_center - mean(z within radius). Positive values are ridge-like,
//! negative values valley-like. Two radii are computed: the generic index
//! and the adjusted one that feeds the susceptibility model.

use crate::core::tiling::{map_tiled, ProcessingParams};
use crate::grid::Grid;
use crate::types::{GeoRiskError, GeoRiskResult};
use serde::{Deserialize, Serialize};

/// Neighborhood radii in map units (meters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionParams {
    pub radius_m: f64,
    pub adjusted_radius_m: f64,
}

impl Default for PositionParams {
    fn default() -> Self {
        Self {
            radius_m: 100.0,
            adjusted_radius_m: 40.0,
        }
    }
}

impl PositionParams {
    pub fn validate(&self) -> GeoRiskResult<()> {
        for (name, r) in [("radius_m", self.radius_m), ("adjusted_radius_m", self.adjusted_radius_m)] {
            if !r.is_finite() || r <= 0.0 {
                return Err(GeoRiskError::InvalidConfig(format!(
                    "{} must be a positive distance, got {}",
                    name, r
                )));
            }
        }
        Ok(())
    }
}

/// Relief grids at both radii
#[derive(Debug, Clone)]
pub struct TopographicPosition {
    pub tpi: Grid<f64>,
    pub tpi_adjusted: Grid<f64>,
}

/// Cell offsets whose centres lie within `radius` of the centre cell
#[derive(Debug, Clone)]
pub struct CircularFootprint {
    offsets: Vec<(isize, isize)>,
    reach: usize,
}

impl CircularFootprint {
    pub fn new(radius: f64, cell_size: (f64, f64)) -> GeoRiskResult<Self> {
        let (dx, dy) = cell_size;
        if !(dx.is_finite() && dy.is_finite() && dx > 0.0 && dy > 0.0) {
            return Err(GeoRiskError::InvalidGeometry(format!(
                "footprint needs positive cell spacing, got {}x{}",
                dx, dy
            )));
        }
        if !radius.is_finite() || radius < 0.0 {
            return Err(GeoRiskError::InvalidConfig(format!(
                "footprint radius must be a non-negative distance, got {}",
                radius
            )));
        }
        let rx = (radius / dx).floor() as isize;
        let ry = (radius / dy).floor() as isize;
        let r2 = radius * radius;

        let mut offsets = Vec::new();
        for dr in -ry..=ry {
            for dc in -rx..=rx {
                let ox = dc as f64 * dx;
                let oy = dr as f64 * dy;
                if ox * ox + oy * oy <= r2 {
                    offsets.push((dr, dc));
                }
            }
        }

        Ok(Self {
            offsets,
            reach: rx.max(ry).max(0) as usize,
        })
    }

    /// Largest row/col distance of any offset
    pub fn reach(&self) -> usize {
        self.reach
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Circular focal mean; masked neighbors and cells past the edge are skipped
pub fn focal_mean(dem: &Grid<f64>, footprint: &CircularFootprint) -> Grid<f64> {
    let (rows, cols) = dem.dim();
    Grid::from_fn_par((rows, cols), *dem.transform(), |row, col| {
        dem.get(row, col)?;
        let mut sum = 0.0;
        let mut count = 0usize;
        for &(dr, dc) in &footprint.offsets {
            let r = row as isize + dr;
            let c = col as isize + dc;
            if r < 0 || c < 0 {
                continue;
            }
            if let Some(v) = dem.get(r as usize, c as usize) {
                sum += v;
                count += 1;
            }
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    })
}

/// Elevation minus its circular neighborhood mean
pub fn relative_relief(dem: &Grid<f64>, footprint: &CircularFootprint) -> GeoRiskResult<Grid<f64>> {
    let mean = focal_mean(dem, footprint);
    dem.zip_map(&mean, |z, m| Some(z - m))
}

/// Topographic position processor
pub struct TopographicAnalyzer {
    params: PositionParams,
    processing: ProcessingParams,
}

impl TopographicAnalyzer {
    pub fn new(params: PositionParams, processing: ProcessingParams) -> Self {
        Self { params, processing }
    }

    pub fn standard() -> Self {
        Self::new(PositionParams::default(), ProcessingParams::default())
    }

    pub fn compute(&self, dem: &Grid<f64>) -> GeoRiskResult<TopographicPosition> {
        self.params.validate()?;
        log::info!(
            "Computing topographic position at {} m and {} m radii",
            self.params.radius_m,
            self.params.adjusted_radius_m
        );

        Ok(TopographicPosition {
            tpi: self.tpi(dem, self.params.radius_m)?,
            tpi_adjusted: self.tpi(dem, self.params.adjusted_radius_m)?,
        })
    }

    /// TPI at an arbitrary radius
    pub fn tpi(&self, dem: &Grid<f64>, radius_m: f64) -> GeoRiskResult<Grid<f64>> {
        dem.transform().validate()?;
        let footprint = CircularFootprint::new(radius_m, dem.transform().cell_size())?;
        log::debug!(
            "TPI footprint at {} m: {} cells, reach {}",
            radius_m,
            footprint.len(),
            footprint.reach()
        );

        match self.processing.tile_size {
            Some(tile_size) => map_tiled(dem, tile_size, footprint.reach(), |g| relative_relief(g, &footprint)),
            None => relative_relief(dem, &footprint),
        }
    }
}
