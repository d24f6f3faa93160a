//! Weighted linear overlay of normalized layers.

use crate::grid::Grid;
use crate::types::{GeoRiskError, GeoRiskResult};
use serde::{Deserialize, Serialize};

/// Allowed deviation of the weight sum from 1.0
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// The five weighted criteria of the susceptibility model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    Slope,
    Deformation,
    Curvature,
    Moisture,
    Position,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::Slope,
        Layer::Deformation,
        Layer::Curvature,
        Layer::Moisture,
        Layer::Position,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Slope => "slope",
            Layer::Deformation => "deformation",
            Layer::Curvature => "curvature",
            Layer::Moisture => "moisture",
            Layer::Position => "position",
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// AHP weights of the five criteria
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    pub slope: f64,
    pub deformation: f64,
    pub curvature: f64,
    pub moisture: f64,
    pub position: f64,
}

impl Default for WeightSet {
    fn default() -> Self {
        Self {
            slope: 0.35,
            deformation: 0.25,
            curvature: 0.20,
            moisture: 0.10,
            position: 0.10,
        }
    }
}

impl WeightSet {
    pub fn get(&self, layer: Layer) -> f64 {
        match layer {
            Layer::Slope => self.slope,
            Layer::Deformation => self.deformation,
            Layer::Curvature => self.curvature,
            Layer::Moisture => self.moisture,
            Layer::Position => self.position,
        }
    }

    fn set(&mut self, layer: Layer, weight: f64) {
        match layer {
            Layer::Slope => self.slope = weight,
            Layer::Deformation => self.deformation = weight,
            Layer::Curvature => self.curvature = weight,
            Layer::Moisture => self.moisture = weight,
            Layer::Position => self.position = weight,
        }
    }

    pub fn sum(&self) -> f64 {
        Layer::ALL.iter().map(|&l| self.get(l)).sum()
    }

    /// Reject negative or non-finite weights and sums away from 1.0
    pub fn validate(&self) -> GeoRiskResult<()> {
        for layer in Layer::ALL {
            let w = self.get(layer);
            if !w.is_finite() || w < 0.0 {
                return Err(GeoRiskError::InvalidWeightSet(format!(
                    "{} weight must be a non-negative number, got {}",
                    layer, w
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(GeoRiskError::InvalidWeightSet(format!(
                "weights sum to {:.6}, expected 1.0",
                sum
            )));
        }
        Ok(())
    }

    /// Weights as percentages, in layer order
    pub fn as_percentages(&self) -> Vec<(Layer, f64)> {
        Layer::ALL.iter().map(|&l| (l, self.get(l) * 100.0)).collect()
    }

    /// Zero the excluded layers and rescale the rest to sum to 1
    pub fn without(&self, excluded: &[Layer]) -> GeoRiskResult<WeightSet> {
        let mut reduced = *self;
        for &layer in excluded {
            reduced.set(layer, 0.0);
        }
        let remaining = reduced.sum();
        if remaining <= 0.0 {
            return Err(GeoRiskError::InvalidWeightSet(format!(
                "no weight left after excluding {:?}",
                excluded
            )));
        }
        for layer in Layer::ALL {
            reduced.set(layer, reduced.get(layer) / remaining);
        }
        Ok(reduced)
    }
}

/// Weighted sum of aligned normalized layers.
///
/// Every layer must share the first layer's extent and resolution, and the
/// weights must sum to 1. A cell masked in any layer is masked in the index.
pub fn composite_index(layers: &[(f64, &Grid<f64>)]) -> GeoRiskResult<Grid<f64>> {
    let (_, first) = layers
        .first()
        .ok_or_else(|| GeoRiskError::InvalidWeightSet("no layers to combine".to_string()))?;

    for (weight, grid) in layers {
        first.ensure_aligned(*grid)?;
        if !weight.is_finite() || *weight < 0.0 {
            return Err(GeoRiskError::InvalidWeightSet(format!(
                "layer weight must be non-negative, got {}",
                weight
            )));
        }
    }
    let total: f64 = layers.iter().map(|(w, _)| w).sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(GeoRiskError::InvalidWeightSet(format!(
            "layer weights sum to {:.6}, expected 1.0",
            total
        )));
    }

    log::debug!("Combining {} layers into composite index", layers.len());

    let index = Grid::from_fn_par(first.dim(), *first.transform(), |row, col| {
        let mut acc = 0.0;
        for (weight, grid) in layers {
            acc += weight * grid.get(row, col)?;
        }
        // Rounding in the weight sum can leave the result a hair outside [0, 1]
        Some(acc.clamp(0.0, 1.0))
    });
    Ok(index)
}
