//! Single-band raster grid with an explicit per-cell validity mask.
//!
//! Masked cells carry a placeholder value that is never handed out: every
//! accessor goes through the validity mask, so an invalid cell cannot be
//! silently read as zero. Non-finite samples (NaN, ±inf) are nodata and
//! are masked on the way in.

use crate::types::{GeoRiskError, GeoRiskResult, GeoTransform};
use ndarray::{s, Array2, Zip};

/// Cell value type a grid can hold
pub trait Sample: Copy + Default + Send + Sync {
    /// `false` for values that stand for nodata
    fn is_usable(&self) -> bool {
        true
    }
}

impl Sample for f64 {
    fn is_usable(&self) -> bool {
        self.is_finite()
    }
}

impl Sample for f32 {
    fn is_usable(&self) -> bool {
        self.is_finite()
    }
}

impl Sample for u8 {}
impl Sample for u16 {}
impl Sample for i32 {}

/// Regular 2-D grid of samples placed by a `GeoTransform`
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    values: Array2<T>,
    valid: Array2<bool>,
    transform: GeoTransform,
}

impl<T> Grid<T>
where
    T: Sample,
{
    /// Grid where every usable sample is valid
    pub fn new(values: Array2<T>, transform: GeoTransform) -> Self {
        let valid = values.map(|v| v.is_usable());
        Self { values, valid, transform }
    }

    /// Grid with an explicit validity mask (`true` = valid)
    pub fn with_mask(
        values: Array2<T>,
        valid: Array2<bool>,
        transform: GeoTransform,
    ) -> GeoRiskResult<Self> {
        if values.dim() != valid.dim() {
            return Err(GeoRiskError::Processing(format!(
                "Mask dimensions {:?} do not match value dimensions {:?}",
                valid.dim(),
                values.dim()
            )));
        }
        let valid = Zip::from(&valid)
            .and(&values)
            .map_collect(|&ok, v| ok && v.is_usable());
        Ok(Self { values, valid, transform })
    }

    /// Build a grid from optional cells; `None` becomes a masked cell
    pub fn from_options(cells: Array2<Option<T>>, transform: GeoTransform) -> Self {
        let valid = cells.map(|c| c.map_or(false, |v| v.is_usable()));
        let values = cells.map(|c| c.unwrap_or_default());
        Self { values, valid, transform }
    }

    /// Grid computed cell by cell in parallel; `None` becomes a masked cell
    pub fn from_fn_par<F>(dims: (usize, usize), transform: GeoTransform, f: F) -> Self
    where
        F: Fn(usize, usize) -> Option<T> + Sync + Send,
    {
        let mut cells: Array2<Option<T>> = Array2::from_elem(dims, None);
        #[cfg(feature = "parallel")]
        Zip::indexed(&mut cells).par_for_each(|(row, col), cell| *cell = f(row, col));
        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut cells).for_each(|(row, col), cell| *cell = f(row, col));
        Self::from_options(cells, transform)
    }

    /// Grid with every cell masked
    pub fn masked(dims: (usize, usize), transform: GeoTransform) -> Self {
        Self {
            values: Array2::from_elem(dims, T::default()),
            valid: Array2::from_elem(dims, false),
            transform,
        }
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Raw sample array, including placeholders under masked cells
    pub fn values(&self) -> &Array2<T> {
        &self.values
    }

    pub fn validity(&self) -> &Array2<bool> {
        &self.valid
    }

    /// Value at (row, col), `None` when masked or out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        match self.valid.get((row, col)) {
            Some(true) => Some(self.values[[row, col]]),
            _ => None,
        }
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.valid.get((row, col)).copied().unwrap_or(false)
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Area of one cell in squared map units (m² for metric grids)
    pub fn cell_area(&self) -> f64 {
        let (dx, dy) = self.transform.cell_size();
        dx * dy
    }

    /// Iterator over the values of valid cells in row-major order
    pub fn iter_valid(&self) -> impl Iterator<Item = T> + '_ {
        self.values
            .iter()
            .zip(self.valid.iter())
            .filter_map(|(&v, &ok)| if ok { Some(v) } else { None })
    }

    /// Cells as options, masked cells as `None`
    pub fn to_options(&self) -> Array2<Option<T>> {
        Zip::from(&self.values)
            .and(&self.valid)
            .map_collect(|&v, &ok| if ok { Some(v) } else { None })
    }

    pub fn is_aligned<U>(&self, other: &Grid<U>) -> bool {
        self.values.dim() == other.values.dim() && self.transform.approx_eq(&other.transform)
    }

    /// Fail with `MisalignedGrids` unless both grids share extent and resolution
    pub fn ensure_aligned<U>(&self, other: &Grid<U>) -> GeoRiskResult<()> {
        if self.is_aligned(other) {
            return Ok(());
        }
        Err(GeoRiskError::MisalignedGrids {
            expected: describe(self.values.dim(), &self.transform),
            found: describe(other.values.dim(), &other.transform),
        })
    }

    /// Cell-wise transform; masked cells stay masked, `None` or a
    /// non-finite result masks a cell
    pub fn map<U, F>(&self, f: F) -> Grid<U>
    where
        U: Sample,
        F: Fn(T) -> Option<U> + Sync + Send,
    {
        let cell = |&v: &T, &ok: &bool| if ok { f(v) } else { None };
        #[cfg(feature = "parallel")]
        let cells = Zip::from(&self.values).and(&self.valid).par_map_collect(cell);
        #[cfg(not(feature = "parallel"))]
        let cells = Zip::from(&self.values).and(&self.valid).map_collect(cell);
        Grid::from_options(cells, self.transform)
    }

    /// Cell-wise combination of two aligned grids with mask union
    pub fn zip_map<U, V, F>(&self, other: &Grid<U>, f: F) -> GeoRiskResult<Grid<V>>
    where
        U: Sample,
        V: Sample,
        F: Fn(T, U) -> Option<V> + Sync + Send,
    {
        self.ensure_aligned(other)?;
        let cell = |&a: &T, &ok_a: &bool, &b: &U, &ok_b: &bool| if ok_a && ok_b { f(a, b) } else { None };
        let zip = Zip::from(&self.values)
            .and(&self.valid)
            .and(&other.values)
            .and(&other.valid);
        #[cfg(feature = "parallel")]
        let cells = zip.par_map_collect(cell);
        #[cfg(not(feature = "parallel"))]
        let cells = zip.map_collect(cell);
        Ok(Grid::from_options(cells, self.transform))
    }

    /// Copy of this grid with cells outside `keep` masked
    pub fn restrict(&self, keep: &Array2<bool>) -> GeoRiskResult<Grid<T>> {
        if keep.dim() != self.values.dim() {
            return Err(GeoRiskError::MisalignedGrids {
                expected: format!("{:?} cells", self.values.dim()),
                found: format!("{:?} mask cells", keep.dim()),
            });
        }
        let valid = Zip::from(&self.valid).and(keep).map_collect(|&a, &b| a && b);
        Ok(Self {
            values: self.values.clone(),
            valid,
            transform: self.transform,
        })
    }

    /// Sub-window starting at (row, col); the window is clipped to the grid
    pub fn window(&self, row: usize, col: usize, rows: usize, cols: usize) -> Grid<T> {
        let (nrows, ncols) = self.values.dim();
        let r0 = row.min(nrows);
        let c0 = col.min(ncols);
        let r1 = (row + rows).min(nrows);
        let c1 = (col + cols).min(ncols);
        Self {
            values: self.values.slice(s![r0..r1, c0..c1]).to_owned(),
            valid: self.valid.slice(s![r0..r1, c0..c1]).to_owned(),
            transform: self.transform.offset(r0, c0),
        }
    }
}

fn describe(dims: (usize, usize), gt: &GeoTransform) -> String {
    let (dx, dy) = gt.cell_size();
    format!(
        "{}x{} cells at ({}, {}) with {}x{} spacing",
        dims.0, dims.1, gt.top_left_x, gt.top_left_y, dx, dy
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn test_transform() -> GeoTransform {
        GeoTransform::north_up(0.0, 90.0, 30.0)
    }

    #[test]
    fn test_masked_cells_are_never_read() {
        let values = array![[1.0, 2.0], [3.0, 4.0]];
        let valid = array![[true, false], [true, true]];
        let grid = Grid::with_mask(values, valid, test_transform()).unwrap();

        assert_eq!(grid.get(0, 0), Some(1.0));
        assert_eq!(grid.get(0, 1), None);
        assert_eq!(grid.get(5, 5), None);
        assert_eq!(grid.valid_count(), 3);
        assert_eq!(grid.iter_valid().collect::<Vec<_>>(), vec![1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zip_map_takes_mask_union() {
        let a = Grid::from_options(array![[Some(1.0), None], [Some(2.0), Some(3.0)]], test_transform());
        let b = Grid::from_options(array![[Some(1.0), Some(1.0)], [None, Some(1.0)]], test_transform());

        let sum = a.zip_map(&b, |x, y| Some(x + y)).unwrap();
        assert_eq!(sum.get(0, 0), Some(2.0));
        assert_eq!(sum.get(0, 1), None);
        assert_eq!(sum.get(1, 0), None);
        assert_eq!(sum.get(1, 1), Some(4.0));
    }

    #[test]
    fn test_misaligned_grids_rejected() {
        let a = Grid::new(Array2::<f64>::zeros((3, 3)), test_transform());
        let shifted = Grid::new(Array2::<f64>::zeros((3, 3)), test_transform().offset(1, 0));
        let bigger = Grid::new(Array2::<f64>::zeros((4, 3)), test_transform());

        assert!(matches!(
            a.zip_map(&shifted, |x, y| Some(x + y)),
            Err(GeoRiskError::MisalignedGrids { .. })
        ));
        assert!(a.ensure_aligned(&bigger).is_err());
        assert!(a.ensure_aligned(&a.clone()).is_ok());
    }

    #[test]
    fn test_window_offsets_transform() {
        let grid = Grid::new(Array2::from_shape_fn((5, 5), |(r, c)| (r * 5 + c) as f64), test_transform());
        let win = grid.window(1, 2, 10, 2);

        assert_eq!(win.dim(), (4, 2));
        assert_eq!(win.get(0, 0), Some(7.0));
        assert_eq!(win.transform().top_left_x, 60.0);
        assert_eq!(win.transform().top_left_y, 60.0);
    }

    #[test]
    fn test_map_preserves_mask() {
        let grid = Grid::from_options(array![[Some(-2.0), None]], test_transform());
        let abs = grid.map(|v: f64| Some(v.abs()));
        assert_eq!(abs.get(0, 0), Some(2.0));
        assert_eq!(abs.get(0, 1), None);
        assert_eq!(grid.cell_area(), 900.0);
    }

    #[test]
    fn test_non_finite_samples_are_masked() {
        let grid = Grid::new(array![[1.0, f64::NAN], [f64::INFINITY, 4.0]], test_transform());
        assert_eq!(grid.valid_count(), 2);
        assert_eq!(grid.get(0, 1), None);

        let ratio = grid.map(|v: f64| Some(v / 0.0));
        assert_eq!(ratio.valid_count(), 0);

        let bytes = Grid::new(array![[0u8, 255]], test_transform());
        assert_eq!(bytes.valid_count(), 2);
    }
}
