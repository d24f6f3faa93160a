use crate::core::tiling::{map_tiled, ProcessingParams};
use crate::grid::Grid;
use crate::types::{GeoRiskError, GeoRiskResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Horizontal directional-gradient kernel (east minus west)
const KERNEL_X: [[f64; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];

/// Vertical directional-gradient kernel (lower row minus upper row)
const KERNEL_Y: [[f64; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Slope and aspect read one neighbor ring
const DERIVATIVE_HALO: usize = 1;

/// Curvature chains two 3x3 passes
const CURVATURE_HALO: usize = 2;

/// Parameters for terrain derivative computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainParams {
    /// Elevation scale relative to horizontal units
    pub z_factor: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self { z_factor: 1.0 }
    }
}

impl TerrainParams {
    pub fn validate(&self) -> GeoRiskResult<()> {
        if !self.z_factor.is_finite() || self.z_factor <= 0.0 {
            return Err(GeoRiskError::InvalidConfig(format!(
                "z_factor must be positive, got {}",
                self.z_factor
            )));
        }
        Ok(())
    }
}

/// Slope, aspect and curvature of one elevation grid
#[derive(Debug, Clone)]
pub struct TerrainDerivatives {
    /// Steepest-descent gradient in degrees
    pub slope: Grid<f64>,
    /// Downslope direction in degrees clockwise from north, [0, 360)
    pub aspect: Grid<f64>,
    /// Unsigned second-derivative magnitude
    pub curvature: Grid<f64>,
}

/// Terrain derivative processor
pub struct TerrainAnalyzer {
    params: TerrainParams,
    processing: ProcessingParams,
}

impl TerrainAnalyzer {
    pub fn new(params: TerrainParams, processing: ProcessingParams) -> Self {
        Self { params, processing }
    }

    /// Create a processor with standard parameters
    pub fn standard() -> Self {
        Self::new(TerrainParams::default(), ProcessingParams::default())
    }

    /// Compute all three derivatives of `dem`
    pub fn derive(&self, dem: &Grid<f64>) -> GeoRiskResult<TerrainDerivatives> {
        let (rows, cols) = dem.dim();
        log::info!("Computing terrain derivatives for {}x{} elevation grid", rows, cols);
        log::debug!("Terrain parameters: {:?}", self.params);

        let derivatives = TerrainDerivatives {
            slope: self.slope(dem)?,
            aspect: self.aspect(dem)?,
            curvature: self.curvature(dem)?,
        };

        log::info!(
            "Terrain derivatives completed: {} valid slope cells, {} valid curvature cells",
            derivatives.slope.valid_count(),
            derivatives.curvature.valid_count()
        );
        Ok(derivatives)
    }

    pub fn slope(&self, dem: &Grid<f64>) -> GeoRiskResult<Grid<f64>> {
        let z = self.params.z_factor;
        self.run(dem, DERIVATIVE_HALO, |g| Ok(slope_degrees(g, z)))
    }

    pub fn aspect(&self, dem: &Grid<f64>) -> GeoRiskResult<Grid<f64>> {
        let z = self.params.z_factor;
        self.run(dem, DERIVATIVE_HALO, |g| Ok(aspect_degrees(g, z)))
    }

    pub fn curvature(&self, dem: &Grid<f64>) -> GeoRiskResult<Grid<f64>> {
        let z = self.params.z_factor;
        self.run(dem, CURVATURE_HALO, |g| Ok(curvature_magnitude(g, z)))
    }

    fn run<F>(&self, dem: &Grid<f64>, halo: usize, op: F) -> GeoRiskResult<Grid<f64>>
    where
        F: Fn(&Grid<f64>) -> GeoRiskResult<Grid<f64>> + Sync + Send,
    {
        dem.transform().validate()?;
        match self.processing.tile_size {
            Some(tile_size) => map_tiled(dem, tile_size, halo, op),
            None => op(dem),
        }
    }
}

/// Horn (1981) gradient at (row, col) as (dz/dx east, dz/dy north).
///
/// ```text
/// a b c
/// d e f
/// g h i
/// ```
/// `None` on the grid border or when any of the nine cells is masked.
fn horn_gradient(dem: &Grid<f64>, row: usize, col: usize, z_factor: f64) -> Option<(f64, f64)> {
    let (rows, cols) = dem.dim();
    if row == 0 || col == 0 || row + 1 >= rows || col + 1 >= cols {
        return None;
    }
    dem.get(row, col)?;

    let a = dem.get(row - 1, col - 1)?;
    let b = dem.get(row - 1, col)?;
    let c = dem.get(row - 1, col + 1)?;
    let d = dem.get(row, col - 1)?;
    let f = dem.get(row, col + 1)?;
    let g = dem.get(row + 1, col - 1)?;
    let h = dem.get(row + 1, col)?;
    let i = dem.get(row + 1, col + 1)?;

    let (dx, dy) = dem.transform().cell_size();
    let dz_dx = ((c + 2.0 * f + i) - (a + 2.0 * d + g)) * z_factor / (8.0 * dx);
    let dz_dy = ((a + 2.0 * b + c) - (g + 2.0 * h + i)) * z_factor / (8.0 * dy);
    Some((dz_dx, dz_dy))
}

/// Slope in degrees; border and masked-neighbor cells are masked
pub fn slope_degrees(dem: &Grid<f64>, z_factor: f64) -> Grid<f64> {
    Grid::from_fn_par(dem.dim(), *dem.transform(), |row, col| {
        let (gx, gy) = horn_gradient(dem, row, col, z_factor)?;
        Some((gx * gx + gy * gy).sqrt().atan().to_degrees())
    })
}

/// Downslope azimuth in degrees [0, 360); flat cells are masked
pub fn aspect_degrees(dem: &Grid<f64>, z_factor: f64) -> Grid<f64> {
    Grid::from_fn_par(dem.dim(), *dem.transform(), |row, col| {
        let (gx, gy) = horn_gradient(dem, row, col, z_factor)?;
        if gx == 0.0 && gy == 0.0 {
            return None;
        }
        let mut azimuth = (-gx).atan2(-gy).to_degrees();
        if azimuth < 0.0 {
            azimuth += 360.0;
        }
        if azimuth >= 360.0 {
            azimuth -= 360.0;
        }
        Some(azimuth)
    })
}

/// Curvature magnitude `|d2z/dx2 + d2z/dy2|` from two chained kernel passes.
///
/// The sign of the bending is discarded: the absolute value is taken of the
/// summed second derivatives, not summed per component. First derivatives
/// on the outer ring are read from a linearly extrapolated elevation border,
/// so the output is masked on the same one-cell border as slope.
pub fn curvature_magnitude(dem: &Grid<f64>, z_factor: f64) -> Grid<f64> {
    let (rows, cols) = dem.dim();
    if rows < 3 || cols < 3 {
        return Grid::masked((rows, cols), *dem.transform());
    }

    let padded = extrapolated_border(dem);
    let first_x = correlate(&padded, &KERNEL_X, rows, cols);
    let first_y = correlate(&padded, &KERNEL_Y, rows, cols);

    Grid::from_fn_par((rows, cols), *dem.transform(), |row, col| {
        if row == 0 || col == 0 || row + 1 >= rows || col + 1 >= cols {
            return None;
        }
        let d2x = kernel_at(&first_x, &KERNEL_X, row - 1, col - 1)?;
        let d2y = kernel_at(&first_y, &KERNEL_Y, row - 1, col - 1)?;
        Some(((d2x + d2y) * z_factor).abs())
    })
}

/// Elevation padded by one cell on every side, extrapolating linearly
fn extrapolated_border(dem: &Grid<f64>) -> Array2<Option<f64>> {
    let (rows, cols) = dem.dim();
    let mut padded: Array2<Option<f64>> = Array2::from_elem((rows + 2, cols + 2), None);

    for row in 0..rows {
        for col in 0..cols {
            padded[[row + 1, col + 1]] = dem.get(row, col);
        }
    }

    let extend = |inner: Option<f64>, next: Option<f64>| match (inner, next) {
        (Some(a), Some(b)) => Some(2.0 * a - b),
        _ => None,
    };

    for row in 1..=rows {
        padded[[row, 0]] = extend(padded[[row, 1]], padded[[row, 2]]);
        padded[[row, cols + 1]] = extend(padded[[row, cols]], padded[[row, cols - 1]]);
    }
    for col in 0..cols + 2 {
        padded[[0, col]] = extend(padded[[1, col]], padded[[2, col]]);
        padded[[rows + 1, col]] = extend(padded[[rows, col]], padded[[rows - 1, col]]);
    }

    padded
}

/// Apply `kernel` to every cell of a one-cell padded field
fn correlate(padded: &Array2<Option<f64>>, kernel: &[[f64; 3]; 3], rows: usize, cols: usize) -> Array2<Option<f64>> {
    let mut out: Array2<Option<f64>> = Array2::from_elem((rows, cols), None);
    #[cfg(feature = "parallel")]
    ndarray::Zip::indexed(&mut out).par_for_each(|(row, col), cell| {
        *cell = kernel_at(padded, kernel, row, col);
    });
    #[cfg(not(feature = "parallel"))]
    ndarray::Zip::indexed(&mut out).for_each(|(row, col), cell| {
        *cell = kernel_at(padded, kernel, row, col);
    });
    out
}

/// Kernel response over the 3x3 block whose top-left corner is (row, col)
fn kernel_at(field: &Array2<Option<f64>>, kernel: &[[f64; 3]; 3], row: usize, col: usize) -> Option<f64> {
    let mut acc = 0.0;
    for (i, weights) in kernel.iter().enumerate() {
        for (j, &w) in weights.iter().enumerate() {
            let v = (*field.get((row + i, col + j))?)?;
            acc += w * v;
        }
    }
    Some(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn grid_from(values: Array2<f64>, cell_size: f64) -> Grid<f64> {
        Grid::new(values, GeoTransform::north_up(0.0, 0.0, cell_size))
    }

    fn tilted_plane(rows: usize, cols: usize) -> Grid<f64> {
        grid_from(
            Array2::from_shape_fn((rows, cols), |(r, c)| 500.0 + 3.0 * r as f64 - 7.5 * c as f64),
            30.0,
        )
    }

    #[test]
    fn test_flat_grid_has_zero_slope_and_curvature() {
        let dem = grid_from(Array2::from_elem((3, 3), 100.0), 30.0);
        let analyzer = TerrainAnalyzer::standard();
        let result = analyzer.derive(&dem);
        assert!(result.is_ok());

        let d = result.unwrap();
        assert_eq!(d.slope.get(1, 1), Some(0.0));
        assert_eq!(d.curvature.get(1, 1), Some(0.0));
        // Flat terrain has no downslope direction
        assert_eq!(d.aspect.get(1, 1), None);
        // Edges are masked, not zero
        assert_eq!(d.slope.get(0, 0), None);
        assert_eq!(d.curvature.get(2, 1), None);
    }

    #[test]
    fn test_planar_curvature_is_zero_on_interior() {
        let dem = tilted_plane(8, 9);
        let curvature = curvature_magnitude(&dem, 1.0);

        for row in 1..7 {
            for col in 1..8 {
                let v = curvature.get(row, col);
                assert!(v.is_some(), "interior cell ({}, {}) masked", row, col);
                assert_abs_diff_eq!(v.unwrap(), 0.0, epsilon = 1e-9);
            }
        }
        assert_eq!(curvature.valid_count(), 6 * 7);
    }

    #[test]
    fn test_curvature_uses_abs_of_sum() {
        // Bowl along x, dome along y with equal magnitude: components cancel
        let saddle = grid_from(
            Array2::from_shape_fn((7, 7), |(r, c)| {
                let x = c as f64 - 3.0;
                let y = r as f64 - 3.0;
                x * x - y * y
            }),
            1.0,
        );
        let c = curvature_magnitude(&saddle, 1.0);
        assert_abs_diff_eq!(c.get(3, 3).unwrap(), 0.0, epsilon = 1e-9);

        // Bowl in both directions: components add
        let bowl = grid_from(
            Array2::from_shape_fn((7, 7), |(r, c)| {
                let x = c as f64 - 3.0;
                let y = r as f64 - 3.0;
                x * x + y * y
            }),
            1.0,
        );
        let c = curvature_magnitude(&bowl, 1.0);
        // Two chained passes give 16x then 128 per axis on a unit-spaced x^2
        assert_abs_diff_eq!(c.get(3, 3).unwrap(), 256.0, epsilon = 1e-9);
    }

    #[test]
    fn test_slope_of_known_gradient() {
        // Rises 30 m per 30 m cell eastward -> 45 degrees, facing west
        let dem = grid_from(Array2::from_shape_fn((5, 5), |(_, c)| 30.0 * c as f64), 30.0);
        let slope = slope_degrees(&dem, 1.0);
        let aspect = aspect_degrees(&dem, 1.0);

        assert_abs_diff_eq!(slope.get(2, 2).unwrap(), 45.0, epsilon = 1e-9);
        assert_abs_diff_eq!(aspect.get(2, 2).unwrap(), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_aspect_north_facing() {
        // Elevation grows with row index (southward), so the slope faces north
        let dem = grid_from(Array2::from_shape_fn((4, 4), |(r, _)| 10.0 * r as f64), 10.0);
        let aspect = aspect_degrees(&dem, 1.0);
        let v = aspect.get(1, 1).unwrap();
        assert!(v < 1e-9 || (360.0 - v) < 1e-9);
    }

    #[test]
    fn test_masked_elevation_propagates() {
        let values = array![
            [10.0, 11.0, 12.0, 13.0],
            [10.0, 11.0, 12.0, 13.0],
            [10.0, 11.0, 12.0, 13.0],
            [10.0, 11.0, 12.0, 13.0]
        ];
        let mut valid = Array2::from_elem((4, 4), true);
        valid[[0, 0]] = false;
        let dem = Grid::with_mask(values, valid, GeoTransform::north_up(0.0, 0.0, 1.0)).unwrap();

        let slope = slope_degrees(&dem, 1.0);
        assert_eq!(slope.get(1, 1), None);
        assert!(slope.get(2, 2).is_some());

        let curvature = curvature_magnitude(&dem, 1.0);
        assert_eq!(curvature.get(1, 1), None);
        assert_eq!(curvature.get(2, 2), None);
    }

    #[test]
    fn test_tiled_derivatives_match_single_pass() {
        let dem = grid_from(
            Array2::from_shape_fn((23, 17), |(r, c)| {
                let x = c as f64 * 0.4;
                let y = r as f64 * 0.3;
                200.0 + 40.0 * x.sin() * y.cos() + 3.0 * r as f64
            }),
            30.0,
        );
        let tiled = TerrainAnalyzer::new(TerrainParams::default(), ProcessingParams { tile_size: Some(5) });
        let whole = TerrainAnalyzer::new(TerrainParams::default(), ProcessingParams { tile_size: None });

        let a = tiled.derive(&dem).unwrap();
        let b = whole.derive(&dem).unwrap();
        assert_eq!(a.slope, b.slope);
        assert_eq!(a.aspect, b.aspect);
        assert_eq!(a.curvature, b.curvature);
    }

    #[test]
    fn test_zero_cell_size_rejected() {
        let dem = grid_from(Array2::from_elem((4, 4), 10.0), 0.0);
        assert!(matches!(
            TerrainAnalyzer::standard().derive(&dem),
            Err(GeoRiskError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_nan_elevation_is_nodata() {
        let mut values = Array2::from_elem((5, 5), 100.0);
        values[[2, 2]] = f64::NAN;
        let dem = grid_from(values, 30.0);
        assert_eq!(dem.get(2, 2), None);

        let slope = slope_degrees(&dem, 1.0);
        for row in 1..=3 {
            for col in 1..=3 {
                assert_eq!(slope.get(row, col), None, "cell ({}, {})", row, col);
            }
        }
    }
}
