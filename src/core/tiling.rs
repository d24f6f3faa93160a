//! Spatial tile partitioning for neighborhood operators.
//!
//! Each tile owns a core block of cells and reads a halo of `halo` cells
//! around it. An operator whose reach does not exceed the halo produces the
//! same core values on the padded tile as on the whole grid, so stitched
//! tiles reproduce the single-pass result without seams.

use crate::grid::{Grid, Sample};
use crate::types::{GeoRiskError, GeoRiskResult};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// Execution layout shared by the neighborhood operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingParams {
    /// Core tile edge in cells; `None` processes the grid in one pass
    pub tile_size: Option<usize>,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            tile_size: Some(1024),
        }
    }
}

impl ProcessingParams {
    pub fn validate(&self) -> GeoRiskResult<()> {
        if self.tile_size == Some(0) {
            return Err(GeoRiskError::InvalidConfig("tile_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// A core block plus the padded window it is computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// First row/col of the padded window in the source grid
    pub pad_row: usize,
    pub pad_col: usize,
    pub pad_rows: usize,
    pub pad_cols: usize,
    /// First row/col of the core block in the source grid
    pub core_row: usize,
    pub core_col: usize,
    pub core_rows: usize,
    pub core_cols: usize,
}

impl Tile {
    /// Position of the core block inside the padded window
    pub fn core_offset(&self) -> (usize, usize) {
        (self.core_row - self.pad_row, self.core_col - self.pad_col)
    }
}

/// Tiles covering a grid of `dims` cells
pub fn tile_layout(dims: (usize, usize), tile_size: usize, halo: usize) -> Vec<Tile> {
    let (rows, cols) = dims;
    let step = tile_size.max(1);
    let mut tiles = Vec::new();

    for core_row in (0..rows).step_by(step) {
        for core_col in (0..cols).step_by(step) {
            let core_rows = step.min(rows - core_row);
            let core_cols = step.min(cols - core_col);
            let pad_row = core_row.saturating_sub(halo);
            let pad_col = core_col.saturating_sub(halo);
            let pad_end_row = (core_row + core_rows + halo).min(rows);
            let pad_end_col = (core_col + core_cols + halo).min(cols);

            tiles.push(Tile {
                pad_row,
                pad_col,
                pad_rows: pad_end_row - pad_row,
                pad_cols: pad_end_col - pad_col,
                core_row,
                core_col,
                core_rows,
                core_cols,
            });
        }
    }

    tiles
}

type TileOutput<U> = GeoRiskResult<(Tile, Array2<Option<U>>)>;

/// Run a neighborhood operator tile by tile and stitch the cores together
pub fn map_tiled<T, U, F>(grid: &Grid<T>, tile_size: usize, halo: usize, op: F) -> GeoRiskResult<Grid<U>>
where
    T: Sample,
    U: Sample,
    F: Fn(&Grid<T>) -> GeoRiskResult<Grid<U>> + Sync + Send,
{
    let dims = grid.dim();
    let tiles = tile_layout(dims, tile_size, halo);
    log::debug!(
        "Processing {}x{} grid as {} tiles (size {}, halo {})",
        dims.0,
        dims.1,
        tiles.len(),
        tile_size,
        halo
    );

    let process = |tile: &Tile| -> TileOutput<U> {
        let window = grid.window(tile.pad_row, tile.pad_col, tile.pad_rows, tile.pad_cols);
        let result = op(&window)?;
        if result.dim() != window.dim() {
            return Err(GeoRiskError::Processing(format!(
                "Tile operator changed dimensions from {:?} to {:?}",
                window.dim(),
                result.dim()
            )));
        }
        let (r0, c0) = tile.core_offset();
        let core = result
            .to_options()
            .slice(s![r0..r0 + tile.core_rows, c0..c0 + tile.core_cols])
            .to_owned();
        Ok((*tile, core))
    };

    let outputs = run_tiles(&tiles, process);

    let mut cells: Array2<Option<U>> = Array2::from_elem(dims, None);
    for output in outputs {
        let (tile, core) = output?;
        cells
            .slice_mut(s![
                tile.core_row..tile.core_row + tile.core_rows,
                tile.core_col..tile.core_col + tile.core_cols
            ])
            .assign(&core);
    }

    Ok(Grid::from_options(cells, *grid.transform()))
}

#[cfg(feature = "parallel")]
fn run_tiles<U, P>(tiles: &[Tile], process: P) -> Vec<TileOutput<U>>
where
    U: Send,
    P: Fn(&Tile) -> TileOutput<U> + Sync + Send,
{
    use rayon::prelude::*;
    tiles.par_iter().map(process).collect()
}

#[cfg(not(feature = "parallel"))]
fn run_tiles<U, P>(tiles: &[Tile], process: P) -> Vec<TileOutput<U>>
where
    P: Fn(&Tile) -> TileOutput<U>,
{
    tiles.iter().map(process).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;

    #[test]
    fn test_layout_covers_every_cell_once() {
        let tiles = tile_layout((10, 7), 4, 2);
        let mut hits = Array2::<u32>::zeros((10, 7));
        for t in &tiles {
            for r in t.core_row..t.core_row + t.core_rows {
                for c in t.core_col..t.core_col + t.core_cols {
                    hits[[r, c]] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
        assert_eq!(tiles.len(), 6);
    }

    #[test]
    fn test_halo_is_clipped_at_grid_edges() {
        let tiles = tile_layout((10, 10), 5, 2);
        let first = tiles[0];
        assert_eq!((first.pad_row, first.pad_col), (0, 0));
        assert_eq!((first.pad_rows, first.pad_cols), (7, 7));

        let last = tiles[tiles.len() - 1];
        assert_eq!((last.pad_row, last.pad_col), (3, 3));
        assert_eq!(last.core_offset(), (2, 2));
    }

    #[test]
    fn test_cellwise_operator_survives_tiling() {
        let gt = GeoTransform::north_up(0.0, 0.0, 1.0);
        let grid = Grid::new(Array2::from_shape_fn((9, 11), |(r, c)| (r * 11 + c) as f64), gt);
        let tiled = map_tiled(&grid, 4, 1, |g| Ok(g.map(|v| Some(v * 2.0)))).unwrap();
        let direct = grid.map(|v| Some(v * 2.0));
        assert_eq!(tiled, direct);
    }

    #[test]
    fn test_operator_errors_propagate() {
        let gt = GeoTransform::north_up(0.0, 0.0, 1.0);
        let grid = Grid::new(Array2::<f64>::zeros((4, 4)), gt);
        let result: GeoRiskResult<Grid<f64>> =
            map_tiled(&grid, 2, 0, |_| Err(GeoRiskError::Processing("boom".to_string())));
        assert!(result.is_err());
    }
}
