//! Zonal statistics over a study region.
//!
//! Reductions run tile by tile and merge their partial results, so the
//! outcome does not depend on how the grid was partitioned. A reduction over
//! zero contributing cells yields `Reduction::Empty`, which is only turned
//! into a number through an explicit `or_zero` step.

use crate::core::classify::RiskClass;
use crate::core::tiling::{tile_layout, ProcessingParams, Tile};
use crate::grid::{Grid, Sample};
use crate::region::StudyRegion;
use crate::types::{GeoRiskError, GeoRiskResult};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

const M2_PER_HECTARE: f64 = 10_000.0;

/// Zonal statistics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonalParams {
    /// Cells strictly steeper than this count as steep terrain
    pub slope_threshold_deg: f64,
    /// Percentile ranks in [0, 100] reported for slope
    pub percentiles: Vec<f64>,
    /// Bucket width of the composite index histogram
    pub histogram_bucket_width: f64,
    /// Bucket width of the slope histogram in degrees
    pub slope_bucket_width_deg: f64,
}

impl Default for ZonalParams {
    fn default() -> Self {
        Self {
            slope_threshold_deg: 30.0,
            percentiles: vec![5.0, 25.0, 50.0, 75.0, 95.0],
            histogram_bucket_width: 0.05,
            slope_bucket_width_deg: 2.0,
        }
    }
}

impl ZonalParams {
    pub fn validate(&self) -> GeoRiskResult<()> {
        if let Some(p) = self.percentiles.iter().find(|p| !(0.0..=100.0).contains(*p)) {
            return Err(GeoRiskError::InvalidConfig(format!(
                "percentile {} outside [0, 100]",
                p
            )));
        }
        for (name, width) in [
            ("histogram_bucket_width", self.histogram_bucket_width),
            ("slope_bucket_width_deg", self.slope_bucket_width_deg),
        ] {
            if !width.is_finite() || width <= 0.0 {
                return Err(GeoRiskError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, width
                )));
            }
        }
        if !self.slope_threshold_deg.is_finite() {
            return Err(GeoRiskError::InvalidConfig("slope threshold must be finite".to_string()));
        }
        Ok(())
    }
}

/// Outcome of a masked reduction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reduction {
    Value(f64),
    /// No cell contributed
    Empty,
}

impl Reduction {
    pub fn is_empty(&self) -> bool {
        matches!(self, Reduction::Empty)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Reduction::Value(v) => Some(*v),
            Reduction::Empty => None,
        }
    }

    /// Absent means zero: an empty reduction becomes 0.0 before any arithmetic
    pub fn or_zero(self, label: &str) -> f64 {
        match self {
            Reduction::Value(v) => v,
            Reduction::Empty => {
                log::debug!("Empty reduction for {}, coerced to 0", label);
                0.0
            }
        }
    }
}

impl From<Option<f64>> for Reduction {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Reduction::Empty, Reduction::Value)
    }
}

/// Mergeable running statistics (count, mean, M2, min, max)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialStats {
    count: usize,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for PartialStats {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl PartialStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Chan's pairwise combination
    pub fn merge(self, other: PartialStats) -> PartialStats {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let weight = other.count as f64 / count as f64;
        PartialStats {
            count,
            mean: self.mean + delta * weight,
            m2: self.m2 + other.m2 + delta * delta * self.count as f64 * weight,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn reduce(&self, value: f64) -> Reduction {
        if self.count == 0 {
            Reduction::Empty
        } else {
            Reduction::Value(value)
        }
    }

    pub fn min(&self) -> Reduction {
        self.reduce(self.min)
    }

    pub fn max(&self) -> Reduction {
        self.reduce(self.max)
    }

    pub fn mean(&self) -> Reduction {
        self.reduce(self.mean)
    }

    /// Population standard deviation
    pub fn std_dev(&self) -> Reduction {
        self.reduce((self.m2 / self.count.max(1) as f64).sqrt())
    }

    pub fn sum(&self) -> Reduction {
        self.reduce(self.mean * self.count as f64)
    }
}

/// Descriptive statistics of the valid cells of any numeric grid
pub fn describe<T>(grid: &Grid<T>, processing: &ProcessingParams) -> PartialStats
where
    T: Sample + ToPrimitive,
{
    reduce_tiles(grid, processing, |tile| {
        let mut stats = PartialStats::default();
        for_each_valid(grid, tile, |v| {
            if let Some(x) = v.to_f64() {
                stats.push(x);
            }
        });
        stats
    })
    .into_iter()
    .fold(PartialStats::default(), PartialStats::merge)
}

/// Exact percentiles by linear interpolation between closest ranks.
///
/// Raw values of every tile are merged before ranking.
pub fn percentiles<T>(grid: &Grid<T>, ranks: &[f64], processing: &ProcessingParams) -> Vec<(f64, Reduction)>
where
    T: Sample + ToPrimitive,
{
    let mut values: Vec<f64> = reduce_tiles(grid, processing, |tile| {
        let mut part = Vec::new();
        for_each_valid(grid, tile, |v| part.extend(v.to_f64()));
        part
    })
    .into_iter()
    .flatten()
    .collect();
    values.sort_by(|a, b| a.total_cmp(b));

    ranks.iter().map(|&p| (p, percentile_of_sorted(&values, p))).collect()
}

fn percentile_of_sorted(sorted: &[f64], p: f64) -> Reduction {
    if sorted.is_empty() {
        return Reduction::Empty;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Reduction::Value(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Area in hectares of valid cells satisfying `predicate`
pub fn masked_area_ha<T, F>(grid: &Grid<T>, processing: &ProcessingParams, predicate: F) -> Reduction
where
    T: Sample,
    F: Fn(T) -> bool + Sync + Send,
{
    let count: usize = reduce_tiles(grid, processing, |tile| {
        let mut n = 0usize;
        for_each_valid(grid, tile, |v| {
            if predicate(v) {
                n += 1;
            }
        });
        n
    })
    .into_iter()
    .sum();

    if count == 0 {
        Reduction::Empty
    } else {
        Reduction::Value(count as f64 * grid.cell_area() / M2_PER_HECTARE)
    }
}

/// Area in hectares classified as `class`
pub fn class_area(classes: &Grid<u8>, class: RiskClass, processing: &ProcessingParams) -> Reduction {
    let code = class.code();
    masked_area_ha(classes, processing, move |c| c == code)
}

/// Area in hectares where the grid is strictly above `threshold`
pub fn threshold_area(grid: &Grid<f64>, threshold: f64, processing: &ProcessingParams) -> Reduction {
    masked_area_ha(grid, processing, move |v| v > threshold)
}

/// `part / total * 100`, zero when the total is not positive
pub fn percentage_of(part_ha: f64, total_ha: f64) -> f64 {
    if total_ha > 0.0 {
        part_ha / total_ha * 100.0
    } else {
        0.0
    }
}

/// Share of the region in the High and Very High classes
pub fn high_risk_percentage(high_risk_ha: f64, total_ha: f64) -> f64 {
    percentage_of(high_risk_ha, total_ha)
}

/// Fixed-width frequency counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    /// Lower edge of the first bucket
    pub start: f64,
    pub bucket_width: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// (lower edge, count) per bucket
    pub fn buckets(&self) -> impl Iterator<Item = (f64, usize)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(move |(i, &n)| (self.start + i as f64 * self.bucket_width, n))
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Upper bound on the bucket count of one histogram
pub const MAX_HISTOGRAM_BUCKETS: usize = 100_000;

/// Histogram of the valid cells with buckets aligned on multiples of `bucket_width`
pub fn histogram(grid: &Grid<f64>, bucket_width: f64, processing: &ProcessingParams) -> GeoRiskResult<Histogram> {
    if !bucket_width.is_finite() || bucket_width <= 0.0 {
        return Err(GeoRiskError::InvalidConfig(format!(
            "histogram bucket width must be positive, got {}",
            bucket_width
        )));
    }

    let stats = describe(grid, processing);
    let (min, max) = match (stats.min().value(), stats.max().value()) {
        (Some(min), Some(max)) => (min, max),
        _ => {
            return Ok(Histogram {
                start: 0.0,
                bucket_width,
                counts: Vec::new(),
            })
        }
    };

    let start = (min / bucket_width).floor() * bucket_width;
    let span = ((max - start) / bucket_width).floor();
    if !span.is_finite() || span >= MAX_HISTOGRAM_BUCKETS as f64 {
        return Err(GeoRiskError::Processing(format!(
            "values {}..{} need more than {} buckets of width {}",
            min, max, MAX_HISTOGRAM_BUCKETS, bucket_width
        )));
    }
    let len = span.max(0.0) as usize + 1;
    let bucket_of = |v: f64| ((v - start) / bucket_width).floor() as usize;

    let partials = reduce_tiles(grid, processing, |tile| {
        let mut counts = vec![0usize; len];
        for_each_valid(grid, tile, |v| {
            if v.is_finite() {
                counts[bucket_of(v).min(len - 1)] += 1;
            }
        });
        counts
    });
    let mut counts = vec![0usize; len];
    for part in partials {
        for (total, n) in counts.iter_mut().zip(part) {
            *total += n;
        }
    }

    Ok(Histogram {
        start,
        bucket_width,
        counts,
    })
}

/// One reported percentile
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: f64,
}

/// Zonal summary of one model run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZonalSummary {
    pub total_area_ha: f64,
    pub area_very_low_ha: f64,
    pub area_low_ha: f64,
    pub area_medium_ha: f64,
    pub area_high_ha: f64,
    pub area_very_high_ha: f64,
    pub high_risk_area_ha: f64,
    pub high_risk_pct: f64,
    pub elevation_min: f64,
    pub elevation_max: f64,
    pub elevation_mean: f64,
    pub elevation_std_dev: f64,
    pub slope_mean: f64,
    pub slope_percentiles: Vec<PercentileValue>,
    pub steep_area_ha: f64,
    pub steep_area_pct: f64,
}

impl ZonalSummary {
    pub fn class_area_ha(&self, class: RiskClass) -> f64 {
        match class {
            RiskClass::VeryLow => self.area_very_low_ha,
            RiskClass::Low => self.area_low_ha,
            RiskClass::Medium => self.area_medium_ha,
            RiskClass::High => self.area_high_ha,
            RiskClass::VeryHigh => self.area_very_high_ha,
        }
    }

    /// Flat named fields for tabular export
    pub fn to_record(&self) -> Vec<(String, f64)> {
        let mut record = vec![
            ("total_area_ha".to_string(), self.total_area_ha),
            ("area_very_low_ha".to_string(), self.area_very_low_ha),
            ("area_low_ha".to_string(), self.area_low_ha),
            ("area_medium_ha".to_string(), self.area_medium_ha),
            ("area_high_ha".to_string(), self.area_high_ha),
            ("area_very_high_ha".to_string(), self.area_very_high_ha),
            ("high_risk_area_ha".to_string(), self.high_risk_area_ha),
            ("high_risk_pct".to_string(), self.high_risk_pct),
            ("elevation_min".to_string(), self.elevation_min),
            ("elevation_max".to_string(), self.elevation_max),
            ("elevation_mean".to_string(), self.elevation_mean),
            ("elevation_std_dev".to_string(), self.elevation_std_dev),
            ("slope_mean".to_string(), self.slope_mean),
        ];
        for p in &self.slope_percentiles {
            record.push((format!("slope_p{}", p.percentile), p.value));
        }
        record.push(("steep_area_ha".to_string(), self.steep_area_ha));
        record.push(("steep_area_pct".to_string(), self.steep_area_pct));
        record
    }
}

/// Zonal statistics processor
pub struct ZonalAnalyzer {
    params: ZonalParams,
    processing: ProcessingParams,
}

impl ZonalAnalyzer {
    pub fn new(params: ZonalParams, processing: ProcessingParams) -> Self {
        Self { params, processing }
    }

    pub fn standard() -> Self {
        Self::new(ZonalParams::default(), ProcessingParams::default())
    }

    /// Summarize classes, elevation and slope inside `region`
    pub fn summarize(
        &self,
        region: &StudyRegion,
        classes: &Grid<u8>,
        dem: &Grid<f64>,
        slope: &Grid<f64>,
    ) -> GeoRiskResult<ZonalSummary> {
        self.params.validate()?;
        classes.ensure_aligned(dem)?;
        classes.ensure_aligned(slope)?;

        let classes = region.clip(classes)?;
        let dem = region.clip(dem)?;
        let slope = region.clip(slope)?;
        let total_area_ha = region.area_ha();
        log::info!("Computing zonal summary over {:.1} ha", total_area_ha);

        let area = |class: RiskClass| {
            class_area(&classes, class, &self.processing).or_zero(&format!("{} class area", class))
        };
        let area_very_low_ha = area(RiskClass::VeryLow);
        let area_low_ha = area(RiskClass::Low);
        let area_medium_ha = area(RiskClass::Medium);
        let area_high_ha = area(RiskClass::High);
        let area_very_high_ha = area(RiskClass::VeryHigh);
        let high_risk_area_ha = area_high_ha + area_very_high_ha;

        let elevation = describe(&dem, &self.processing);
        let slope_stats = describe(&slope, &self.processing);
        let slope_percentiles = percentiles(&slope, &self.params.percentiles, &self.processing)
            .into_iter()
            .map(|(p, r)| PercentileValue {
                percentile: p,
                value: r.or_zero(&format!("slope p{}", p)),
            })
            .collect();

        let steep_area_ha = threshold_area(&slope, self.params.slope_threshold_deg, &self.processing)
            .or_zero("steep slope area");

        let summary = ZonalSummary {
            total_area_ha,
            area_very_low_ha,
            area_low_ha,
            area_medium_ha,
            area_high_ha,
            area_very_high_ha,
            high_risk_area_ha,
            high_risk_pct: high_risk_percentage(high_risk_area_ha, total_area_ha),
            elevation_min: elevation.min().or_zero("elevation min"),
            elevation_max: elevation.max().or_zero("elevation max"),
            elevation_mean: elevation.mean().or_zero("elevation mean"),
            elevation_std_dev: elevation.std_dev().or_zero("elevation std dev"),
            slope_mean: slope_stats.mean().or_zero("slope mean"),
            slope_percentiles,
            steep_area_ha,
            steep_area_pct: percentage_of(steep_area_ha, total_area_ha),
        };

        log::info!(
            "High risk area {:.1} ha ({:.1}%), steep area {:.1} ha",
            summary.high_risk_area_ha,
            summary.high_risk_pct,
            summary.steep_area_ha
        );
        Ok(summary)
    }

    /// Index and slope histograms inside `region`
    pub fn histograms(
        &self,
        region: &StudyRegion,
        index: &Grid<f64>,
        slope: &Grid<f64>,
    ) -> GeoRiskResult<(Histogram, Histogram)> {
        let index = region.clip(index)?;
        let slope = region.clip(slope)?;
        Ok((
            histogram(&index, self.params.histogram_bucket_width, &self.processing)?,
            histogram(&slope, self.params.slope_bucket_width_deg, &self.processing)?,
        ))
    }
}

fn for_each_valid<T, F>(grid: &Grid<T>, tile: &Tile, mut f: F)
where
    T: Sample,
    F: FnMut(T),
{
    for row in tile.core_row..tile.core_row + tile.core_rows {
        for col in tile.core_col..tile.core_col + tile.core_cols {
            if let Some(v) = grid.get(row, col) {
                f(v);
            }
        }
    }
}

fn reduce_tiles<T, R, F>(grid: &Grid<T>, processing: &ProcessingParams, per_tile: F) -> Vec<R>
where
    T: Sample,
    R: Send,
    F: Fn(&Tile) -> R + Sync + Send,
{
    let (rows, cols) = grid.dim();
    let tile_size = processing.tile_size.unwrap_or(rows.max(cols));
    let tiles = tile_layout((rows, cols), tile_size, 0);
    run_reduction(&tiles, per_tile)
}

#[cfg(feature = "parallel")]
fn run_reduction<R, F>(tiles: &[Tile], per_tile: F) -> Vec<R>
where
    R: Send,
    F: Fn(&Tile) -> R + Sync + Send,
{
    use rayon::prelude::*;
    tiles.par_iter().map(per_tile).collect()
}

#[cfg(not(feature = "parallel"))]
fn run_reduction<R, F>(tiles: &[Tile], per_tile: F) -> Vec<R>
where
    F: Fn(&Tile) -> R,
{
    tiles.iter().map(per_tile).collect()
}
