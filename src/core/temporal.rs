use crate::grid::Grid;
use crate::types::{AcquisitionMode, Band, DateRange, GeoRiskError, GeoRiskResult, Polarization};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One radar acquisition: a single-polarization backscatter grid
#[derive(Debug, Clone)]
pub struct RadarScene {
    pub acquired: DateTime<Utc>,
    pub mode: AcquisitionMode,
    pub polarization: Polarization,
    pub backscatter: Grid<f64>,
}

/// One optical acquisition with its bands split into single-band grids
#[derive(Debug, Clone)]
pub struct OpticalScene {
    pub acquired: DateTime<Utc>,
    /// Scene cloud cover in percent
    pub cloud_pct: f64,
    pub bands: HashMap<Band, Grid<f64>>,
}

/// Radar stack selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarFilter {
    pub range: DateRange,
    pub mode: AcquisitionMode,
    pub polarization: Polarization,
}

impl Default for RadarFilter {
    fn default() -> Self {
        Self {
            range: DateRange::new(utc_date(2020, 1, 1), utc_date(2024, 1, 1)),
            mode: AcquisitionMode::IW,
            polarization: Polarization::VV,
        }
    }
}

impl RadarFilter {
    pub fn validate(&self) -> GeoRiskResult<()> {
        validate_range("radar", &self.range)
    }

    pub fn accepts(&self, scene: &RadarScene) -> bool {
        self.range.contains(&scene.acquired)
            && scene.mode == self.mode
            && scene.polarization == self.polarization
    }
}

/// Optical stack selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpticalFilter {
    pub range: DateRange,
    /// Scenes must be strictly below this cloud percentage
    pub max_cloud_pct: f64,
}

impl Default for OpticalFilter {
    fn default() -> Self {
        Self {
            range: DateRange::new(utc_date(2023, 1, 1), utc_date(2023, 12, 31)),
            max_cloud_pct: 20.0,
        }
    }
}

impl OpticalFilter {
    pub fn validate(&self) -> GeoRiskResult<()> {
        validate_range("optical", &self.range)?;
        if !(self.max_cloud_pct > 0.0 && self.max_cloud_pct <= 100.0) {
            return Err(GeoRiskError::InvalidConfig(format!(
                "max_cloud_pct must lie in (0, 100], got {}",
                self.max_cloud_pct
            )));
        }
        Ok(())
    }

    pub fn accepts(&self, scene: &OpticalScene) -> bool {
        self.range.contains(&scene.acquired) && scene.cloud_pct < self.max_cloud_pct
    }
}

/// Per-band median composite of a filtered optical stack
#[derive(Debug, Clone)]
pub struct OpticalComposite {
    pub bands: HashMap<Band, Grid<f64>>,
    pub scene_count: usize,
}

impl OpticalComposite {
    pub fn band(&self, band: Band) -> GeoRiskResult<&Grid<f64>> {
        self.bands.get(&band).ok_or_else(|| GeoRiskError::InsufficientSourceData {
            layer: format!("{} band", band),
            found: 0,
            required: 1,
        })
    }

    /// NDWI: (green - nir) / (green + nir)
    pub fn moisture_index(&self) -> GeoRiskResult<Grid<f64>> {
        normalized_difference(self.band(Band::Green)?, self.band(Band::NearInfrared)?)
    }

    /// NDVI: (nir - red) / (nir + red)
    pub fn vegetation_index(&self) -> GeoRiskResult<Grid<f64>> {
        normalized_difference(self.band(Band::NearInfrared)?, self.band(Band::Red)?)
    }
}

/// Temporal stack reducer
pub struct TemporalAggregator {
    radar: RadarFilter,
    optical: OpticalFilter,
}

impl TemporalAggregator {
    pub fn new(radar: RadarFilter, optical: OpticalFilter) -> Self {
        Self { radar, optical }
    }

    pub fn standard() -> Self {
        Self::new(RadarFilter::default(), OpticalFilter::default())
    }

    /// Per-cell temporal standard deviation of the filtered backscatter.
    ///
    /// An empty selection is an error. Cells with fewer than two valid
    /// observations are masked, so a single qualifying scene yields a fully
    /// masked grid.
    pub fn deformation_proxy(&self, stack: &[RadarScene]) -> GeoRiskResult<Grid<f64>> {
        let selected: Vec<&Grid<f64>> = stack
            .iter()
            .filter(|scene| self.radar.accepts(scene))
            .map(|scene| &scene.backscatter)
            .collect();

        log::info!(
            "Radar stack: {} of {} acquisitions match {:?}/{} in range",
            selected.len(),
            stack.len(),
            self.radar.mode,
            self.radar.polarization
        );

        if selected.is_empty() {
            return Err(GeoRiskError::InsufficientSourceData {
                layer: "deformation".to_string(),
                found: 0,
                required: 2,
            });
        }
        if selected.len() < 2 {
            log::warn!("Only one radar acquisition qualifies; deformation layer will be fully masked");
        }

        reduce_stack(&selected, population_std_dev)
    }

    /// Per-band median of the filtered optical stack
    pub fn optical_composite(&self, stack: &[OpticalScene]) -> GeoRiskResult<OpticalComposite> {
        let selected: Vec<&OpticalScene> = stack.iter().filter(|scene| self.optical.accepts(scene)).collect();

        log::info!(
            "Optical stack: {} of {} acquisitions below {}% cloud in range",
            selected.len(),
            stack.len(),
            self.optical.max_cloud_pct
        );

        if selected.is_empty() {
            return Err(GeoRiskError::InsufficientSourceData {
                layer: "optical composite".to_string(),
                found: 0,
                required: 1,
            });
        }

        let mut per_band: HashMap<Band, Vec<&Grid<f64>>> = HashMap::new();
        for scene in &selected {
            for (band, grid) in &scene.bands {
                per_band.entry(*band).or_default().push(grid);
            }
        }

        let mut bands = HashMap::with_capacity(per_band.len());
        for (band, grids) in per_band {
            log::debug!("Compositing {} band from {} scenes", band, grids.len());
            bands.insert(band, reduce_stack(&grids, median)?);
        }

        Ok(OpticalComposite {
            bands,
            scene_count: selected.len(),
        })
    }
}

fn validate_range(stack: &str, range: &DateRange) -> GeoRiskResult<()> {
    if range.start >= range.end {
        return Err(GeoRiskError::InvalidConfig(format!(
            "{} date range is empty: {} to {}",
            stack, range.start, range.end
        )));
    }
    Ok(())
}

/// `(a - b) / (a + b)`, masked where `a + b` is zero
pub fn normalized_difference(a: &Grid<f64>, b: &Grid<f64>) -> GeoRiskResult<Grid<f64>> {
    a.zip_map(b, |x, y| {
        let sum = x + y;
        if sum == 0.0 {
            None
        } else {
            Some((x - y) / sum)
        }
    })
}

/// Reduce the valid observations of each cell across aligned grids
fn reduce_stack<F>(grids: &[&Grid<f64>], reducer: F) -> GeoRiskResult<Grid<f64>>
where
    F: Fn(&mut [f64]) -> Option<f64> + Sync + Send,
{
    let first = grids.first().ok_or_else(|| {
        GeoRiskError::Processing("cannot reduce an empty stack".to_string())
    })?;
    for grid in &grids[1..] {
        first.ensure_aligned(grid)?;
    }

    Ok(Grid::from_fn_par(first.dim(), *first.transform(), |row, col| {
        let mut observations: Vec<f64> = grids.iter().filter_map(|g| g.get(row, col)).collect();
        reducer(&mut observations)
    }))
}

/// Population standard deviation; undefined below two observations
fn population_std_dev(values: &mut [f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    Some(variance.sqrt())
}

/// Median; the mean of the two middle values for even counts
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn utc_date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default();
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn gt() -> GeoTransform {
        GeoTransform::north_up(0.0, 60.0, 30.0)
    }

    fn radar(day: u32, mode: AcquisitionMode, pol: Polarization, value: f64) -> RadarScene {
        RadarScene {
            acquired: utc_date(2021, 3, day),
            mode,
            polarization: pol,
            backscatter: Grid::new(Array2::from_elem((2, 2), value), gt()),
        }
    }

    fn optical(day: u32, cloud: f64, green: f64, red: f64, nir: f64) -> OpticalScene {
        let mut bands = HashMap::new();
        bands.insert(Band::Green, Grid::new(Array2::from_elem((2, 2), green), gt()));
        bands.insert(Band::Red, Grid::new(Array2::from_elem((2, 2), red), gt()));
        bands.insert(Band::NearInfrared, Grid::new(Array2::from_elem((2, 2), nir), gt()));
        OpticalScene {
            acquired: utc_date(2023, 5, day),
            cloud_pct: cloud,
            bands,
        }
    }

    #[test]
    fn test_deformation_std_dev_over_filtered_stack() {
        let stack = vec![
            radar(1, AcquisitionMode::IW, Polarization::VV, 0.1),
            radar(13, AcquisitionMode::IW, Polarization::VV, 0.3),
            // Filtered out: wrong polarization and wrong mode
            radar(14, AcquisitionMode::IW, Polarization::VH, 9.0),
            radar(15, AcquisitionMode::EW, Polarization::VV, 9.0),
        ];
        let result = TemporalAggregator::standard().deformation_proxy(&stack);
        assert!(result.is_ok());

        let proxy = result.unwrap();
        assert_relative_eq!(proxy.get(0, 0).unwrap(), 0.1, epsilon = 1e-12);
        assert_eq!(proxy.valid_count(), 4);
    }

    #[test]
    fn test_single_acquisition_is_masked_not_zero() {
        let stack = vec![radar(1, AcquisitionMode::IW, Polarization::VV, 0.2)];
        let proxy = TemporalAggregator::standard().deformation_proxy(&stack).unwrap();
        assert_eq!(proxy.valid_count(), 0);
        assert_eq!(proxy.get(0, 0), None);
    }

    #[test]
    fn test_empty_selection_is_insufficient_data() {
        let stack = vec![radar(1, AcquisitionMode::SM, Polarization::VV, 0.2)];
        let result = TemporalAggregator::standard().deformation_proxy(&stack);
        assert!(matches!(
            result,
            Err(GeoRiskError::InsufficientSourceData { found: 0, .. })
        ));
    }

    #[test]
    fn test_per_cell_observation_count() {
        let mut partial = radar(2, AcquisitionMode::IW, Polarization::VV, 0.5);
        partial.backscatter = Grid::from_options(array![[Some(0.5), None], [Some(0.5), Some(0.5)]], gt());
        let stack = vec![radar(1, AcquisitionMode::IW, Polarization::VV, 0.1), partial];

        let proxy = TemporalAggregator::standard().deformation_proxy(&stack).unwrap();
        assert_eq!(proxy.get(0, 1), None);
        assert_relative_eq!(proxy.get(1, 1).unwrap(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_optical_median_and_cloud_filter() {
        let stack = vec![
            optical(1, 5.0, 0.10, 0.05, 0.30),
            optical(2, 10.0, 0.20, 0.05, 0.30),
            optical(3, 15.0, 0.60, 0.05, 0.30),
            // Exactly at the threshold: rejected
            optical(4, 20.0, 9.0, 9.0, 9.0),
        ];
        let composite = TemporalAggregator::standard().optical_composite(&stack).unwrap();
        assert_eq!(composite.scene_count, 3);
        assert_relative_eq!(composite.band(Band::Green).unwrap().get(0, 0).unwrap(), 0.20);

        let ndwi = composite.moisture_index().unwrap();
        assert_relative_eq!(ndwi.get(0, 0).unwrap(), (0.2 - 0.3) / (0.2 + 0.3), epsilon = 1e-12);
        let ndvi = composite.vegetation_index().unwrap();
        assert_relative_eq!(ndvi.get(1, 1).unwrap(), 0.25 / 0.35, epsilon = 1e-12);
    }

    #[test]
    fn test_optical_empty_selection_and_missing_band() {
        let stack = vec![optical(1, 80.0, 0.1, 0.1, 0.1)];
        assert!(matches!(
            TemporalAggregator::standard().optical_composite(&stack),
            Err(GeoRiskError::InsufficientSourceData { .. })
        ));

        let mut scene = optical(1, 0.0, 0.1, 0.1, 0.1);
        scene.bands.remove(&Band::Red);
        let composite = TemporalAggregator::standard().optical_composite(&[scene]).unwrap();
        assert!(composite.moisture_index().is_ok());
        assert!(composite.vegetation_index().is_err());
    }

    #[test]
    fn test_normalized_difference_masks_zero_sum() {
        let a = Grid::new(array![[0.0, 0.4], [-0.2, 1.0]], gt());
        let b = Grid::new(array![[0.0, 0.0], [0.2, 1.0]], gt());
        let nd = normalized_difference(&a, &b).unwrap();
        assert_eq!(nd.get(0, 0), None);
        assert_eq!(nd.get(0, 1), Some(1.0));
        assert_eq!(nd.get(1, 0), None);
        assert_eq!(nd.get(1, 1), Some(0.0));
    }

    #[test]
    fn test_even_median_averages_middle_pair() {
        let mut v = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut v), Some(2.5));
        assert_eq!(median(&mut []), None);
    }
}
