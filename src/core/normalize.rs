use crate::grid::Grid;
use crate::types::{GeoRiskError, GeoRiskResult};
use serde::{Deserialize, Serialize};

/// Reference range mapped onto [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorRange {
    pub lower: f64,
    pub upper: f64,
}

impl AnchorRange {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn validate(&self, name: &str) -> GeoRiskResult<()> {
        if !self.lower.is_finite() || !self.upper.is_finite() || self.upper <= self.lower {
            return Err(GeoRiskError::InvalidConfig(format!(
                "anchor range for {} must satisfy lower < upper, got ({}, {})",
                name, self.lower, self.upper
            )));
        }
        Ok(())
    }

    /// Linear clamp transform; out-of-range values saturate
    pub fn normalize(&self, raw: f64) -> f64 {
        ((raw - self.lower) / (self.upper - self.lower)).clamp(0.0, 1.0)
    }
}

/// Physically expected dynamic range of each raw indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationAnchors {
    /// Slope in degrees
    pub slope: AnchorRange,
    /// Temporal backscatter standard deviation
    pub deformation: AnchorRange,
    /// Curvature magnitude
    pub curvature: AnchorRange,
    /// NDWI; the default (-0.3, 1.0) is the +0.3 shift over a 1.3 span
    pub moisture: AnchorRange,
    /// |TPI| at the generic radius
    pub relief: AnchorRange,
    /// |TPI| at the adjusted radius
    pub relief_adjusted: AnchorRange,
}

impl Default for NormalizationAnchors {
    fn default() -> Self {
        Self {
            slope: AnchorRange::new(0.0, 50.0),
            deformation: AnchorRange::new(0.0, 0.3),
            curvature: AnchorRange::new(0.0, 0.2),
            moisture: AnchorRange::new(-0.3, 1.0),
            relief: AnchorRange::new(0.0, 50.0),
            relief_adjusted: AnchorRange::new(0.0, 40.0),
        }
    }
}

impl NormalizationAnchors {
    pub fn validate(&self) -> GeoRiskResult<()> {
        self.slope.validate("slope")?;
        self.deformation.validate("deformation")?;
        self.curvature.validate("curvature")?;
        self.moisture.validate("moisture")?;
        self.relief.validate("relief")?;
        self.relief_adjusted.validate("relief_adjusted")
    }
}

/// Normalize every valid cell of `raw` onto [0, 1]
pub fn normalize(raw: &Grid<f64>, anchors: &AnchorRange) -> Grid<f64> {
    let anchors = *anchors;
    raw.map(move |v| Some(anchors.normalize(v)))
}

/// Normalize the absolute value of each cell (relief magnitude)
pub fn normalize_magnitude(raw: &Grid<f64>, anchors: &AnchorRange) -> Grid<f64> {
    let anchors = *anchors;
    raw.map(move |v| Some(anchors.normalize(v.abs())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_reference_ranges() {
        let a = NormalizationAnchors::default();
        assert_relative_eq!(a.slope.normalize(25.0), 0.5);
        assert_relative_eq!(a.deformation.normalize(0.15), 0.5);
        assert_relative_eq!(a.curvature.normalize(0.05), 0.25);
        // NDWI 0.35 -> (0.35 + 0.3) / 1.3
        assert_relative_eq!(a.moisture.normalize(0.35), 0.5, epsilon = 1e-12);
        assert_relative_eq!(a.relief_adjusted.normalize(10.0), 0.25);
    }

    #[test]
    fn test_clamping_saturates() {
        let slope = AnchorRange::new(0.0, 50.0);
        assert_eq!(slope.normalize(75.0), 1.0);
        assert_eq!(slope.normalize(-3.0), 0.0);
    }

    #[test]
    fn test_idempotent_on_unit_range() {
        let unit = AnchorRange::new(0.0, 1.0);
        for v in [0.0, 0.125, 0.5, 0.73, 1.0] {
            assert_eq!(unit.normalize(v), v);
            assert_eq!(unit.normalize(unit.normalize(v)), unit.normalize(v));
        }
    }

    #[test]
    fn test_invalid_anchors_rejected() {
        assert!(AnchorRange::new(1.0, 1.0).validate("x").is_err());
        assert!(AnchorRange::new(2.0, 1.0).validate("x").is_err());
        assert!(AnchorRange::new(0.0, f64::NAN).validate("x").is_err());

        let mut anchors = NormalizationAnchors::default();
        assert!(anchors.validate().is_ok());
        anchors.curvature = AnchorRange::new(0.2, 0.0);
        assert!(matches!(anchors.validate(), Err(GeoRiskError::InvalidConfig(_))));
    }

    #[test]
    fn test_grid_normalization_keeps_mask() {
        let gt = GeoTransform::north_up(0.0, 0.0, 30.0);
        let tpi = Grid::from_options(array![[Some(-20.0), None], [Some(60.0), Some(10.0)]], gt);
        let n = normalize_magnitude(&tpi, &AnchorRange::new(0.0, 40.0));

        assert_relative_eq!(n.get(0, 0).unwrap(), 0.5);
        assert_eq!(n.get(0, 1), None);
        assert_eq!(n.get(1, 0), Some(1.0));

        let plain = normalize(&tpi, &AnchorRange::new(0.0, 40.0));
        assert_eq!(plain.get(0, 0), Some(0.0));
    }
}
