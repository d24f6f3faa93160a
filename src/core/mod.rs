//! Core susceptibility engine modules

pub mod tiling;
pub mod terrain;
pub mod temporal;
pub mod topographic;
pub mod normalize;
pub mod composite;
pub mod classify;
pub mod zonal;
pub mod model;

// Re-export main types
pub use tiling::{map_tiled, ProcessingParams};
pub use terrain::{TerrainAnalyzer, TerrainDerivatives, TerrainParams};
pub use temporal::{OpticalComposite, OpticalFilter, OpticalScene, RadarFilter, RadarScene, TemporalAggregator};
pub use topographic::{PositionParams, TopographicAnalyzer, TopographicPosition};
pub use normalize::{AnchorRange, NormalizationAnchors};
pub use composite::{composite_index, Layer, WeightSet};
pub use classify::{classify, ClassBreaks, RiskClass};
pub use zonal::{Histogram, Reduction, ZonalAnalyzer, ZonalParams, ZonalSummary};
pub use model::{ModelConfig, ModelInputs, SparseLayerPolicy, SusceptibilityModel, SusceptibilityOutput};
