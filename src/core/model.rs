//! Model configuration and the end-to-end susceptibility pipeline.
//!
//! raw grids -> derivatives/aggregates -> normalized layers -> composite
//! index -> classification -> zonal statistics. Every stage returns new
//! grids; nothing upstream is modified.

use crate::core::classify::{classify, ClassBreaks};
use crate::core::composite::{composite_index, Layer, WeightSet};
use crate::core::normalize::{normalize, normalize_magnitude, NormalizationAnchors};
use crate::core::temporal::{
    OpticalComposite, OpticalFilter, OpticalScene, RadarFilter, RadarScene, TemporalAggregator,
};
use crate::core::terrain::{TerrainAnalyzer, TerrainDerivatives, TerrainParams};
use crate::core::tiling::ProcessingParams;
use crate::core::topographic::{PositionParams, TopographicAnalyzer, TopographicPosition};
use crate::core::zonal::{Histogram, ZonalAnalyzer, ZonalParams, ZonalSummary};
use crate::grid::Grid;
use crate::region::StudyRegion;
use crate::types::{GeoRiskError, GeoRiskResult};
use serde::{Deserialize, Serialize};

/// Immutable configuration of one susceptibility model.
///
/// Weights, anchors and breaks define what the index means; `version` is
/// echoed into every output so published results can be traced back to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub version: String,
    pub weights: WeightSet,
    pub anchors: NormalizationAnchors,
    pub breaks: ClassBreaks,
    pub terrain: TerrainParams,
    pub position: PositionParams,
    pub radar: RadarFilter,
    pub optical: OpticalFilter,
    pub zonal: ZonalParams,
    pub processing: ProcessingParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            version: "ahp-5-layer/1".to_string(),
            weights: WeightSet::default(),
            anchors: NormalizationAnchors::default(),
            breaks: ClassBreaks::default(),
            terrain: TerrainParams::default(),
            position: PositionParams::default(),
            radar: RadarFilter::default(),
            optical: OpticalFilter::default(),
            zonal: ZonalParams::default(),
            processing: ProcessingParams::default(),
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> GeoRiskResult<()> {
        if self.version.trim().is_empty() {
            return Err(GeoRiskError::InvalidConfig("model version must not be empty".to_string()));
        }
        self.weights.validate()?;
        self.anchors.validate()?;
        self.breaks.validate()?;
        self.terrain.validate()?;
        self.position.validate()?;
        self.radar.validate()?;
        self.optical.validate()?;
        self.zonal.validate()?;
        self.processing.validate()
    }

    /// Parse and validate a JSON configuration; missing sections take defaults
    pub fn from_json(json: &str) -> GeoRiskResult<Self> {
        let config: ModelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> GeoRiskResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What to do when a data-sparse layer has no usable cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseLayerPolicy {
    /// Fail the run with `InsufficientSourceData`
    Abort,
    /// Drop the layer and rescale the remaining weights
    ExcludeLayer,
}

/// Source grids of one run, all on the elevation grid's layout
#[derive(Debug, Clone, Copy)]
pub struct ModelInputs<'a> {
    pub dem: &'a Grid<f64>,
    pub radar: &'a [RadarScene],
    pub optical: &'a [OpticalScene],
}

/// Layers on the common [0, 1] scale; excluded layers are `None`
#[derive(Debug, Clone)]
pub struct NormalizedLayers {
    pub slope: Grid<f64>,
    pub deformation: Option<Grid<f64>>,
    pub curvature: Grid<f64>,
    pub moisture: Option<Grid<f64>>,
    /// Adjusted-radius relief, the weighted position layer
    pub position: Grid<f64>,
    /// Generic-radius relief, exported only
    pub relief: Grid<f64>,
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct SusceptibilityOutput {
    pub config_version: String,
    /// Weights actually applied, after any exclusion
    pub weights: WeightSet,
    pub excluded_layers: Vec<Layer>,
    pub index: Grid<f64>,
    /// Class codes 1..5, masked outside the region
    pub classes: Grid<u8>,
    pub terrain: TerrainDerivatives,
    pub position: TopographicPosition,
    pub deformation: Option<Grid<f64>>,
    pub ndwi: Option<Grid<f64>>,
    pub ndvi: Option<Grid<f64>>,
    pub normalized: NormalizedLayers,
    pub summary: ZonalSummary,
    pub index_histogram: Histogram,
    pub slope_histogram: Histogram,
}

/// Weighted overlay susceptibility model
pub struct SusceptibilityModel {
    config: ModelConfig,
}

impl SusceptibilityModel {
    /// Validates the configuration before any grid is touched
    pub fn new(config: ModelConfig) -> GeoRiskResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn standard() -> GeoRiskResult<Self> {
        Self::new(ModelConfig::default())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn run(
        &self,
        inputs: &ModelInputs<'_>,
        region: &StudyRegion,
        policy: SparseLayerPolicy,
    ) -> GeoRiskResult<SusceptibilityOutput> {
        let config = &self.config;
        let (rows, cols) = inputs.dem.dim();
        log::info!(
            "Running susceptibility model {} on {}x{} grid ({:?} on sparse layers)",
            config.version,
            rows,
            cols,
            policy
        );

        inputs.dem.transform().validate()?;
        check_alignment(inputs)?;

        let terrain = TerrainAnalyzer::new(config.terrain.clone(), config.processing.clone()).derive(inputs.dem)?;
        let position =
            TopographicAnalyzer::new(config.position.clone(), config.processing.clone()).compute(inputs.dem)?;

        let mut excluded = Vec::new();
        let temporal = TemporalAggregator::new(config.radar.clone(), config.optical.clone());

        let deformation = match temporal.deformation_proxy(inputs.radar) {
            Ok(grid) if grid.valid_count() == 0 => Err(GeoRiskError::InsufficientSourceData {
                layer: Layer::Deformation.to_string(),
                found: inputs.radar.iter().filter(|s| config.radar.accepts(s)).count(),
                required: 2,
            }),
            other => other,
        };
        let deformation = resolve_sparse(Layer::Deformation, deformation, policy, &mut excluded)?;

        let composite = resolve_sparse(Layer::Moisture, temporal.optical_composite(inputs.optical), policy, &mut excluded)?;
        let ndwi = match &composite {
            Some(c) => resolve_sparse(Layer::Moisture, moisture_layer(c), policy, &mut excluded)?,
            None => None,
        };
        let ndvi = match composite.as_ref().map(|c| c.vegetation_index()) {
            Some(Ok(grid)) => Some(grid),
            Some(Err(e)) => {
                log::warn!("Vegetation index not exported: {}", e);
                None
            }
            None => None,
        };

        let anchors = &config.anchors;
        let normalized = NormalizedLayers {
            slope: normalize(&terrain.slope, &anchors.slope),
            deformation: deformation.as_ref().map(|g| normalize(g, &anchors.deformation)),
            curvature: normalize(&terrain.curvature, &anchors.curvature),
            moisture: ndwi.as_ref().map(|g| normalize(g, &anchors.moisture)),
            position: normalize_magnitude(&position.tpi_adjusted, &anchors.relief_adjusted),
            relief: normalize_magnitude(&position.tpi, &anchors.relief),
        };

        let weights = if excluded.is_empty() {
            config.weights
        } else {
            config.weights.without(&excluded)?
        };
        log::debug!("Applied weights: {:?}", weights);

        let candidates = [
            (Layer::Slope, Some(&normalized.slope)),
            (Layer::Deformation, normalized.deformation.as_ref()),
            (Layer::Curvature, Some(&normalized.curvature)),
            (Layer::Moisture, normalized.moisture.as_ref()),
            (Layer::Position, Some(&normalized.position)),
        ];
        let layers: Vec<(f64, &Grid<f64>)> = candidates
            .iter()
            .filter_map(|(layer, grid)| grid.map(|g| (weights.get(*layer), g)))
            .collect();

        let index = composite_index(&layers)?;
        let classes = region.clip(&classify(&index, &config.breaks))?;

        let zonal = ZonalAnalyzer::new(config.zonal.clone(), config.processing.clone());
        let summary = zonal.summarize(region, &classes, inputs.dem, &terrain.slope)?;
        let (index_histogram, slope_histogram) = zonal.histograms(region, &index, &terrain.slope)?;

        log::info!(
            "Susceptibility model finished: {} classified cells, {} layer(s) excluded",
            classes.valid_count(),
            excluded.len()
        );

        Ok(SusceptibilityOutput {
            config_version: config.version.clone(),
            weights,
            excluded_layers: excluded,
            index,
            classes,
            terrain,
            position,
            deformation,
            ndwi,
            ndvi,
            normalized,
            summary,
            index_histogram,
            slope_histogram,
        })
    }
}

/// Every source grid must share the elevation grid's layout
fn check_alignment(inputs: &ModelInputs<'_>) -> GeoRiskResult<()> {
    for scene in inputs.radar {
        inputs.dem.ensure_aligned(&scene.backscatter)?;
    }
    for scene in inputs.optical {
        for grid in scene.bands.values() {
            inputs.dem.ensure_aligned(grid)?;
        }
    }
    Ok(())
}

/// NDWI of the composite; a grid without a single valid cell counts as missing
fn moisture_layer(composite: &OpticalComposite) -> GeoRiskResult<Grid<f64>> {
    let ndwi = composite.moisture_index()?;
    if ndwi.valid_count() == 0 {
        return Err(GeoRiskError::InsufficientSourceData {
            layer: Layer::Moisture.to_string(),
            found: composite.scene_count,
            required: 1,
        });
    }
    Ok(ndwi)
}

/// Apply the sparse-layer policy; structural errors always propagate
fn resolve_sparse<T>(
    layer: Layer,
    result: GeoRiskResult<T>,
    policy: SparseLayerPolicy,
    excluded: &mut Vec<Layer>,
) -> GeoRiskResult<Option<T>> {
    match result {
        Ok(grid) => Ok(Some(grid)),
        Err(err @ GeoRiskError::InsufficientSourceData { .. }) => match policy {
            SparseLayerPolicy::Abort => Err(err),
            SparseLayerPolicy::ExcludeLayer => {
                log::warn!("Excluding {} layer from the composite: {}", layer, err);
                excluded.push(layer);
                Ok(None)
            }
        },
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ModelConfig::default().validate().is_ok());
        assert!(SusceptibilityModel::standard().is_ok());
    }

    #[test]
    fn test_invalid_weights_rejected_before_run() {
        let config = ModelConfig {
            weights: WeightSet {
                position: 0.20,
                ..WeightSet::default()
            },
            ..ModelConfig::default()
        };
        assert!(matches!(
            SusceptibilityModel::new(config),
            Err(GeoRiskError::InvalidWeightSet(_))
        ));
    }

    #[test]
    fn test_json_config_with_defaults() {
        let json = r#"{
            "version": "recalibrated-2",
            "weights": {"slope": 0.4, "deformation": 0.2, "curvature": 0.2, "moisture": 0.1, "position": 0.1},
            "zonal": {"slope_threshold_deg": 25.0, "percentiles": [50.0],
                      "histogram_bucket_width": 0.1, "slope_bucket_width_deg": 5.0}
        }"#;
        let config = ModelConfig::from_json(json).unwrap();
        assert_eq!(config.version, "recalibrated-2");
        assert_eq!(config.weights.slope, 0.4);
        assert_eq!(config.zonal.slope_threshold_deg, 25.0);
        assert_eq!(config.anchors, NormalizationAnchors::default());
        assert_eq!(config.breaks, ClassBreaks::default());

        let back = ModelConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back.weights, config.weights);
    }

    #[test]
    fn test_json_errors_surface() {
        assert!(matches!(ModelConfig::from_json("{not json"), Err(GeoRiskError::Json(_))));
        let bad = r#"{"weights": {"slope": 0.9, "deformation": 0.25, "curvature": 0.2, "moisture": 0.1, "position": 0.1}}"#;
        assert!(matches!(ModelConfig::from_json(bad), Err(GeoRiskError::InvalidWeightSet(_))));
    }

    #[test]
    fn test_sparse_policy_resolution() {
        let sparse = || -> GeoRiskResult<Grid<f64>> {
            Err(GeoRiskError::InsufficientSourceData {
                layer: "deformation".to_string(),
                found: 1,
                required: 2,
            })
        };
        let mut excluded = Vec::new();
        assert!(resolve_sparse(Layer::Deformation, sparse(), SparseLayerPolicy::Abort, &mut excluded).is_err());
        assert!(excluded.is_empty());

        let kept = resolve_sparse(Layer::Deformation, sparse(), SparseLayerPolicy::ExcludeLayer, &mut excluded);
        assert!(matches!(kept, Ok(None)));
        assert_eq!(excluded, vec![Layer::Deformation]);

        let structural: GeoRiskResult<Grid<f64>> = Err(GeoRiskError::MisalignedGrids {
            expected: "a".to_string(),
            found: "b".to_string(),
        });
        assert!(resolve_sparse(Layer::Moisture, structural, SparseLayerPolicy::ExcludeLayer, &mut excluded).is_err());
    }
}
