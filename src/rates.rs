use std::fmt;

use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Gamma, Uniform};

use crate::error::{DltError, DltResult};

/// Relaxed-clock density over per-edge substitution rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeRateDensity {
    /// Gamma with the given mean and coefficient of variation.
    Gamma { mean: f64, cv: f64 },
    Uniform { low: f64, high: f64 },
}

impl Default for EdgeRateDensity {
    fn default() -> Self {
        EdgeRateDensity::Gamma { mean: 1.0, cv: 1.0 }
    }
}

impl fmt::Display for EdgeRateDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeRateDensity::Gamma { mean, cv } => write!(f, "Gamma(mean={mean}, cv={cv})"),
            EdgeRateDensity::Uniform { low, high } => write!(f, "Uniform({low}, {high})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Dist {
    Gamma(Gamma),
    Uniform(Uniform),
}

/// A validated `EdgeRateDensity` ready for evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePdf {
    params: EdgeRateDensity,
    dist: Dist,
}

impl RatePdf {
    pub fn new(params: EdgeRateDensity) -> DltResult<Self> {
        let dist = match params {
            EdgeRateDensity::Gamma { mean, cv } => {
                if !(mean > 0.0 && cv > 0.0 && mean.is_finite() && cv.is_finite()) {
                    return Err(DltError::InvalidRateDensity(format!(
                        "gamma needs mean > 0 and cv > 0, got mean={mean}, cv={cv}"
                    )));
                }
                let shape = 1.0 / (cv * cv);
                let scale = mean * cv * cv;
                let g = Gamma::new(shape, 1.0 / scale)
                    .map_err(|e| DltError::InvalidRateDensity(e.to_string()))?;
                Dist::Gamma(g)
            }
            EdgeRateDensity::Uniform { low, high } => {
                if !(low >= 0.0) {
                    return Err(DltError::InvalidRateDensity(format!(
                        "uniform lower bound must be >= 0, got {low}"
                    )));
                }
                let u = Uniform::new(low, high)
                    .map_err(|e| DltError::InvalidRateDensity(e.to_string()))?;
                Dist::Uniform(u)
            }
        };
        Ok(Self { params, dist })
    }

    pub fn params(&self) -> EdgeRateDensity {
        self.params
    }

    pub fn pdf(&self, rate: f64) -> f64 {
        if rate.is_nan() || rate < 0.0 {
            return 0.0;
        }
        match &self.dist {
            Dist::Gamma(g) => g.pdf(rate),
            Dist::Uniform(u) => u.pdf(rate),
        }
    }

    /// Density of the rate that turns `length` into `elapsed` time.
    pub fn pdf_for(&self, length: f64, elapsed: f64) -> f64 {
        self.pdf(length / elapsed)
    }
}
