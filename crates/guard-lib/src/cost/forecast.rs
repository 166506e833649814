//! Linear cost trend forecast
//!
//! Fits a least-squares line through recent cluster utilization samples and
//! scales the current monthly cost by the projected utilization growth. The
//! residual spread of the fit gives the low and high bands.

use crate::models::UtilizationSample;
use serde::{Deserialize, Serialize};

/// Fewest samples a trend can be fitted through
pub const MIN_HISTORY_SAMPLES: usize = 2;

/// How far ahead the trend is extrapolated
pub const FORECAST_HORIZON_DAYS: f64 = 30.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Forecast {
    InsufficientHistory { samples: usize },
    Projected(CostForecast),
}

impl Forecast {
    pub fn projected(&self) -> Option<&CostForecast> {
        match self {
            Forecast::Projected(f) => Some(f),
            Forecast::InsufficientHistory { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostForecast {
    pub samples: usize,
    /// Utilization change per day
    pub slope_per_day: f64,
    pub current_utilization: f64,
    pub projected_utilization: f64,
    pub low_monthly: f64,
    pub expected_monthly: f64,
    pub high_monthly: f64,
}

/// Project monthly cost `FORECAST_HORIZON_DAYS` ahead
pub fn forecast(history: &[UtilizationSample], current_monthly: f64) -> Forecast {
    if history.len() < MIN_HISTORY_SAMPLES {
        return Forecast::InsufficientHistory {
            samples: history.len(),
        };
    }

    let mut samples = history.to_vec();
    samples.sort_by_key(|s| s.timestamp);

    let t0 = samples[0].timestamp;
    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| ((s.timestamp - t0).num_seconds() as f64 / SECONDS_PER_DAY, s.utilization))
        .collect();

    let (slope, intercept) = linear_fit(&points);
    let spread = residual_std_dev(&points, slope, intercept);
    let last_x = points.last().map(|(x, _)| *x).unwrap_or(0.0);
    let current = points.last().map(|(_, y)| *y).unwrap_or(0.0);
    let projected = (intercept + slope * (last_x + FORECAST_HORIZON_DAYS)).max(0.0);

    let scale = |utilization: f64| {
        if current > f64::EPSILON {
            current_monthly * utilization.max(0.0) / current
        } else {
            current_monthly
        }
    };

    Forecast::Projected(CostForecast {
        samples: points.len(),
        slope_per_day: slope,
        current_utilization: current,
        projected_utilization: projected,
        low_monthly: scale(projected - spread),
        expected_monthly: scale(projected),
        high_monthly: scale(projected + spread),
    })
}

/// Least-squares slope and intercept
fn linear_fit(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (x, y) in points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return (0.0, sum_y / n);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

fn residual_std_dev(points: &[(f64, f64)], slope: f64, intercept: f64) -> f64 {
    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    (ss_res / points.len() as f64).sqrt()
}
