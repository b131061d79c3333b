//! # Direction Estimation
//!
//! Turns per-degree signal support into a single bearing guess.
//!
//! The estimator fits a 1-D interpolant over the aggregated series —
//! circularly extended when the sweep covers a full revolution — evaluates
//! it at every integer degree of the compass, and reports the arg-max
//! degree together with the interpolation method that produced it.

pub mod aggregate;
pub mod interpolate;

pub use aggregate::{aggregate, dbm_to_mw, mw_to_dbm, SignalSeries};

use crate::error::{Result, RotodfError};
use interpolate::{Linear, Pchip};

/// Interpolation method actually used for an estimate.
///
/// Selection is by support size: two sampled degrees only admit a linear
/// fit, three or more get the shape-preserving cubic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Linear,
    Pchip,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Linear => "linear",
            Method::Pchip => "pchip",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one estimation run.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionEstimate {
    /// Arg-max bearing, integer-valued degrees in `[0, 360)`.
    pub bearing_deg: f64,
    /// Interpolation method used.
    pub method: Method,
}

/// Estimate the bearing of maximum signal from an aggregated series.
///
/// The fitted curve is sampled at every integer degree `0..=359` that lies
/// inside the support hull; degrees outside the hull stay missing and can
/// never win the arg-max. Ties go to the lowest degree.
///
/// # Errors
///
/// Returns [`RotodfError::InsufficientData`] when fewer than two degrees
/// survived aggregation.
pub fn estimate(series: &SignalSeries) -> Result<DirectionEstimate> {
    let support = series.len();
    if support < 2 {
        return Err(RotodfError::InsufficientData { points: support });
    }

    let points = series.extended_points();
    let method = if support == 2 {
        Method::Linear
    } else {
        Method::Pchip
    };

    let best = match method {
        Method::Linear => argmax_over_compass(&Linear::fit(&points), Linear::eval),
        Method::Pchip => argmax_over_compass(&Pchip::fit(&points), Pchip::eval),
    };

    match best {
        Some(degree) => Ok(DirectionEstimate {
            bearing_deg: degree as f64,
            method,
        }),
        None => Err(RotodfError::InsufficientData { points: support }),
    }
}

fn argmax_over_compass<I>(interp: &I, eval: fn(&I, f64) -> Option<f64>) -> Option<u32> {
    let mut best: Option<(u32, f64)> = None;
    for degree in 0..360u32 {
        if let Some(value) = eval(interp, degree as f64) {
            let better = match best {
                Some((_, best_value)) => value > best_value,
                None => true,
            };
            if better {
                best = Some((degree, value));
            }
        }
    }
    best.map(|(degree, _)| degree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_series_is_insufficient() {
        let series = aggregate(&[], 360.0);
        match estimate(&series) {
            Err(RotodfError::InsufficientData { points }) => assert_eq!(points, 0),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_single_degree_is_insufficient() {
        // Two raw readings collapsing onto one degree still cannot be fit
        let series = aggregate(&[(10.0, -40.0), (10.2, -42.0)], 360.0);
        match estimate(&series) {
            Err(RotodfError::InsufficientData { points }) => assert_eq!(points, 1),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_two_degrees_use_linear() {
        let series = aggregate(&[(10.0, -50.0), (20.0, -40.0)], 180.0);
        let guess = estimate(&series).unwrap();
        assert_eq!(guess.method, Method::Linear);
        assert_eq!(guess.bearing_deg, 20.0);
    }

    #[test]
    fn test_three_degrees_use_pchip() {
        let series = aggregate(&[(100.0, -60.0), (120.0, -40.0), (140.0, -55.0)], 180.0);
        let guess = estimate(&series).unwrap();
        assert_eq!(guess.method, Method::Pchip);
        assert_eq!(guess.bearing_deg, 120.0);
    }

    #[test]
    fn test_unambiguous_peak_is_exact() {
        // Signal falls away monotonically on both sides of 180°; the
        // shape-preserving fit must not displace the peak.
        let samples: Vec<(f64, f64)> = (0..12)
            .map(|i| {
                let deg = i as f64 * 30.0;
                let dbm = -40.0 - (deg - 180.0).abs() / 10.0;
                (deg, dbm)
            })
            .collect();
        let series = aggregate(&samples, 360.0);
        let guess = estimate(&series).unwrap();
        assert_eq!(guess.method, Method::Pchip);
        assert_eq!(guess.bearing_deg, 180.0);
    }

    #[test]
    fn test_peak_at_wrap_seam() {
        // Peak sampled at 359° with neighbours across the seam; the circular
        // extension keeps the fitted curve from treating 359° as an edge.
        let series = aggregate(&[(355.0, -45.0), (359.0, -40.0), (5.0, -50.0)], 360.0);
        assert!(series.wraps());
        let guess = estimate(&series).unwrap();
        assert_eq!(guess.bearing_deg, 359.0);
    }

    #[test]
    fn test_degrees_outside_hull_never_win() {
        // Sub-circle sweep: nothing below 100° or above 140° was sampled,
        // so the guess must come from within the hull.
        let series = aggregate(&[(100.0, -40.0), (120.0, -45.0), (140.0, -50.0)], 90.0);
        let guess = estimate(&series).unwrap();
        assert_eq!(guess.bearing_deg, 100.0);
    }

    #[test]
    fn test_tie_goes_to_lowest_degree() {
        let series = aggregate(&[(10.0, -40.0), (20.0, -40.0)], 90.0);
        let guess = estimate(&series).unwrap();
        assert_eq!(guess.bearing_deg, 10.0);
    }

    #[test]
    fn test_method_names() {
        assert_eq!(Method::Linear.as_str(), "linear");
        assert_eq!(Method::Pchip.as_str(), "pchip");
        assert_eq!(Method::Pchip.to_string(), "pchip");
    }
}
