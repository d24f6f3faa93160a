//! Study region geometry: area, containment and rasterization to a cell mask.

use crate::grid::{Grid, Sample};
use crate::types::{BoundingBox, GeoRiskError, GeoRiskResult, GeoTransform};
use geo::{Area, BoundingRect, Intersects, LineString, MultiPolygon, Point, Polygon};
use ndarray::{Array2, Zip};

const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

/// Area of interest used for clipping and as the zonal reduction domain
#[derive(Debug, Clone)]
pub struct StudyRegion {
    geometry: MultiPolygon<f64>,
    bounds: BoundingBox,
}

impl StudyRegion {
    /// Region from a polygon collection in the grids' (metric) map units
    pub fn new(geometry: MultiPolygon<f64>) -> GeoRiskResult<Self> {
        let rect = geometry.bounding_rect().ok_or_else(|| {
            GeoRiskError::InvalidGeometry("study region has no polygons".to_string())
        })?;
        if geometry.unsigned_area() <= 0.0 {
            return Err(GeoRiskError::InvalidGeometry(
                "study region has zero area".to_string(),
            ));
        }
        let bounds = BoundingBox {
            min_x: rect.min().x,
            max_x: rect.max().x,
            min_y: rect.min().y,
            max_y: rect.max().y,
        };
        Ok(Self { geometry, bounds })
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> GeoRiskResult<Self> {
        Self::new(MultiPolygon(vec![polygon]))
    }

    /// Axis-aligned rectangle region
    pub fn from_bbox(bbox: &BoundingBox) -> GeoRiskResult<Self> {
        let ring = LineString::from(vec![
            (bbox.min_x, bbox.min_y),
            (bbox.max_x, bbox.min_y),
            (bbox.max_x, bbox.max_y),
            (bbox.min_x, bbox.max_y),
            (bbox.min_x, bbox.min_y),
        ]);
        Self::from_polygon(Polygon::new(ring, vec![]))
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Planar area in squared map units
    pub fn area_m2(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    pub fn area_ha(&self) -> f64 {
        self.area_m2() / SQUARE_METERS_PER_HECTARE
    }

    /// Points on the region boundary count as inside
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if x < self.bounds.min_x || x > self.bounds.max_x || y < self.bounds.min_y || y > self.bounds.max_y {
            return false;
        }
        self.geometry.intersects(&Point::new(x, y))
    }

    /// Cell mask (`true` = cell centre inside the region) for a grid layout
    pub fn rasterize(&self, transform: &GeoTransform, dims: (usize, usize)) -> Array2<bool> {
        let mut mask = Array2::from_elem(dims, false);
        let mark = |(row, col): (usize, usize), inside: &mut bool| {
            let (x, y) = transform.cell_center(row, col);
            *inside = self.contains(x, y);
        };
        #[cfg(feature = "parallel")]
        Zip::indexed(&mut mask).par_for_each(mark);
        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut mask).for_each(mark);
        mask
    }

    /// Mask every cell of `grid` whose centre falls outside the region
    pub fn clip<T>(&self, grid: &Grid<T>) -> GeoRiskResult<Grid<T>>
    where
        T: Sample,
    {
        let mask = self.rasterize(grid.transform(), grid.dim());
        grid.restrict(&mask)
    }
}
