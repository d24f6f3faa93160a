//! Discretization of the composite index into ordered risk tiers.

use crate::grid::Grid;
use crate::types::{GeoRiskError, GeoRiskResult};
use serde::{Deserialize, Serialize};

/// Ordered risk tiers with fixed codes 1..5
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskClass {
    VeryLow = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    VeryHigh = 5,
}

impl RiskClass {
    pub const ALL: [RiskClass; 5] = [
        RiskClass::VeryLow,
        RiskClass::Low,
        RiskClass::Medium,
        RiskClass::High,
        RiskClass::VeryHigh,
    ];

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<RiskClass> {
        match code {
            1 => Some(RiskClass::VeryLow),
            2 => Some(RiskClass::Low),
            3 => Some(RiskClass::Medium),
            4 => Some(RiskClass::High),
            5 => Some(RiskClass::VeryHigh),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskClass::VeryLow => "Very Low",
            RiskClass::Low => "Low",
            RiskClass::Medium => "Medium",
            RiskClass::High => "High",
            RiskClass::VeryHigh => "Very High",
        }
    }

    /// Legend colour, green to red
    pub fn color(&self) -> &'static str {
        match self {
            RiskClass::VeryLow => "#1a9641",
            RiskClass::Low => "#a6d96a",
            RiskClass::Medium => "#ffffbf",
            RiskClass::High => "#fdae61",
            RiskClass::VeryHigh => "#d7191c",
        }
    }

    /// High and Very High
    pub fn is_high_risk(&self) -> bool {
        *self >= RiskClass::High
    }
}

impl std::fmt::Display for RiskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Lower bounds of classes 2..5
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassBreaks(pub [f64; 4]);

impl Default for ClassBreaks {
    fn default() -> Self {
        Self([0.2, 0.4, 0.6, 0.8])
    }
}

impl ClassBreaks {
    pub fn validate(&self) -> GeoRiskResult<()> {
        let b = &self.0;
        if b.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0) {
            return Err(GeoRiskError::InvalidConfig(format!(
                "class breaks must lie within [0, 1], got {:?}",
                b
            )));
        }
        if b.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GeoRiskError::InvalidConfig(format!(
                "class breaks must be strictly ascending, got {:?}",
                b
            )));
        }
        Ok(())
    }

    /// Boundaries belong to the higher class
    pub fn classify_value(&self, index: f64) -> RiskClass {
        let above = self.0.iter().filter(|&&b| index >= b).count();
        RiskClass::ALL[above]
    }
}

/// Map every valid index cell to its class code; masked cells stay masked
pub fn classify(index: &Grid<f64>, breaks: &ClassBreaks) -> Grid<u8> {
    let breaks = *breaks;
    let classes = index.map(move |v| Some(breaks.classify_value(v).code()));
    log::debug!("Classified {} cells into risk tiers", classes.valid_count());
    classes
}
