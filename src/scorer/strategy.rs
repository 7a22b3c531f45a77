//! Pluggable mappings the source rubric only defines qualitatively:
//! how mention age discounts demand, and how CPC converts to intent points.
//! Injected into the scorer so either can be swapped without touching the
//! component arithmetic.

use crate::config::scoring::{CPC_CAP, CPC_SATURATION_DOLLARS};

/// Weight of a mention given its age. Must stay within [0, 1] and be
/// monotone non-increasing in age.
pub trait DecayCurve: Send + Sync {
    fn weight(&self, age_days: f64) -> f64;
}

/// Every mention counts in full, regardless of age.
pub struct NoDecay;

impl DecayCurve for NoDecay {
    fn weight(&self, _age_days: f64) -> f64 {
        1.0
    }
}

/// Linear falloff across a recency window, never dropping below `floor` —
/// old evidence counts less but is not erased.
pub struct LinearDecay {
    pub window_days: f64,
    pub floor: f64,
}

impl Default for LinearDecay {
    fn default() -> Self {
        Self { window_days: 30.0, floor: 0.25 }
    }
}

impl DecayCurve for LinearDecay {
    fn weight(&self, age_days: f64) -> f64 {
        let w = 1.0 - age_days / self.window_days;
        w.clamp(self.floor, 1.0)
    }
}

/// Half-life falloff, for deployments that want a longer memory tail.
pub struct ExponentialDecay {
    pub half_life_days: f64,
}

impl DecayCurve for ExponentialDecay {
    fn weight(&self, age_days: f64) -> f64 {
        0.5f64.powf(age_days / self.half_life_days)
    }
}

/// Maps CPC dollars to intent points. Must be monotone non-decreasing and
/// capped at CPC_CAP.
pub trait CpcCurve: Send + Sync {
    fn points(&self, cpc: f64) -> f64;
}

/// Linear ramp saturating at the "$3+ CPC = high intent" mark.
pub struct LinearRamp {
    pub saturation_dollars: f64,
    pub max_points: f64,
}

impl Default for LinearRamp {
    fn default() -> Self {
        Self {
            saturation_dollars: CPC_SATURATION_DOLLARS,
            max_points: CPC_CAP,
        }
    }
}

impl CpcCurve for LinearRamp {
    fn points(&self, cpc: f64) -> f64 {
        (cpc / self.saturation_dollars).min(1.0) * self.max_points
    }
}
