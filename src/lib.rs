//! georisk: A Multicriteria Raster Susceptibility Engine
//!
//! This library fuses elevation-derived terrain metrics, radar backscatter
//! time series and optical reflectance indices into a weighted landslide
//! susceptibility index, classifies it into five risk tiers and summarizes
//! the result over a study region.

pub mod types;
pub mod grid;
pub mod region;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    AcquisitionMode, Band, BoundingBox, DateRange, GeoRiskError, GeoRiskResult, GeoTransform, Polarization,
};

pub use grid::{Grid, Sample};
pub use region::StudyRegion;
pub use crate::core::{
    ClassBreaks, Layer, ModelConfig, ModelInputs, RiskClass, SparseLayerPolicy, SusceptibilityModel,
    SusceptibilityOutput, WeightSet, ZonalSummary,
};
