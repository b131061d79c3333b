//! Per-degree signal aggregation.
//!
//! Raw bearing observations arrive as (fractional degree, dBm) pairs, often
//! with several readings landing on the same integer degree and most degrees
//! never sampled at all. Aggregation reduces them to at most one linear-power
//! value per integer degree with a peak-hold policy: the estimator models
//! the antenna's peak response, so the strongest reading wins, not the mean.

use std::collections::BTreeMap;

/// Convert a dBm reading to linear milliwatts.
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert linear milliwatts back to dBm.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

/// Degree-indexed signal support produced by [`aggregate`].
///
/// Unsampled degrees are absent, not zero: interpolation must treat them as
/// missing data rather than measured nulls.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSeries {
    values: BTreeMap<i32, f64>,
    sweep_degrees: f64,
}

impl SignalSeries {
    /// Number of sampled degrees.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no degree was sampled.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Linear signal value at one integer degree, if sampled.
    pub fn get(&self, degree: i32) -> Option<f64> {
        self.values.get(&degree).copied()
    }

    /// Sweep the series was aggregated for.
    pub fn sweep_degrees(&self) -> f64 {
        self.sweep_degrees
    }

    /// Whether the sweep covers at least a full circle, making bearing a
    /// genuinely circular quantity for this series.
    pub fn wraps(&self) -> bool {
        self.sweep_degrees >= 360.0
    }

    /// Sampled (degree, linear value) support, ascending by degree.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.values
            .iter()
            .map(|(&deg, &val)| (deg as f64, val))
            .collect()
    }

    /// Support extended for interpolation.
    ///
    /// When the sweep covers a full circle the series is replicated at
    /// offsets −360, 0, and +360 so an interpolant near the 0°/360° seam
    /// sees the wrapped neighbours instead of an open interval edge.
    /// Sub-circle sweeps return the plain support.
    pub fn extended_points(&self) -> Vec<(f64, f64)> {
        let mid = self.points();
        if !self.wraps() {
            return mid;
        }
        let mut extended = Vec::with_capacity(mid.len() * 3);
        for offset in [-360.0, 0.0, 360.0] {
            extended.extend(mid.iter().map(|&(deg, val)| (deg + offset, val)));
        }
        extended
    }
}

/// Reduce raw (bearing, dBm) samples to one peak-hold linear value per
/// integer degree in `0..=359`.
///
/// Bearings are rounded to the nearest degree; readings that round outside
/// `0..=359` — the extrapolated tail past the sweep end — are dropped, since
/// the dense index only spans one compass revolution. Duplicate degrees keep
/// the larger linear value regardless of input order.
pub fn aggregate(samples: &[(f64, f64)], sweep_degrees: f64) -> SignalSeries {
    let mut values: BTreeMap<i32, f64> = BTreeMap::new();

    for &(bearing, dbm) in samples {
        if !bearing.is_finite() || !dbm.is_finite() {
            continue;
        }
        let degree = bearing.round() as i64;
        if !(0..=359).contains(&degree) {
            continue;
        }
        let mw = dbm_to_mw(dbm);
        values
            .entry(degree as i32)
            .and_modify(|current| {
                if mw > *current {
                    *current = mw;
                }
            })
            .or_insert(mw);
    }

    SignalSeries {
        values,
        sweep_degrees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conversions() {
        assert!((dbm_to_mw(0.0) - 1.0).abs() < 1e-12);
        assert!((dbm_to_mw(-30.0) - 0.001).abs() < 1e-12);
        assert!((mw_to_dbm(1.0) - 0.0).abs() < 1e-12);
        assert!((mw_to_dbm(dbm_to_mw(-47.5)) - -47.5).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_degree_keeps_peak() {
        // -40 dBm is the larger linear value and must win at degree 10
        let series = aggregate(&[(10.0, -40.0), (10.2, -55.0), (20.0, -60.0)], 360.0);
        assert_eq!(series.len(), 2);
        assert!((series.get(10).unwrap() - dbm_to_mw(-40.0)).abs() < 1e-15);
        assert!((series.get(20).unwrap() - dbm_to_mw(-60.0)).abs() < 1e-15);
    }

    #[test]
    fn test_peak_hold_is_order_independent() {
        let forward = aggregate(&[(90.0, -70.0), (90.0, -50.0), (90.0, -65.0)], 180.0);
        let reverse = aggregate(&[(90.0, -65.0), (90.0, -50.0), (90.0, -70.0)], 180.0);
        assert_eq!(forward, reverse);
        assert!((forward.get(90).unwrap() - dbm_to_mw(-50.0)).abs() < 1e-15);
    }

    #[test]
    fn test_rounding_to_nearest_degree() {
        let series = aggregate(&[(12.4, -40.0), (12.6, -45.0)], 360.0);
        assert!(series.get(12).is_some());
        assert!(series.get(13).is_some());
    }

    #[test]
    fn test_out_of_range_degrees_dropped() {
        // 359.6 rounds to 360 and falls off the dense index; negatives too
        let series = aggregate(&[(359.6, -40.0), (-0.6, -40.0), (396.0, -35.0)], 360.0);
        assert!(series.is_empty());
    }

    #[test]
    fn test_absent_degrees_stay_absent() {
        let series = aggregate(&[(0.0, -40.0), (180.0, -50.0)], 360.0);
        assert_eq!(series.len(), 2);
        assert!(series.get(90).is_none());
    }

    #[test]
    fn test_idempotent_on_aggregated_input() {
        let first = aggregate(&[(10.0, -40.0), (10.0, -55.0), (350.7, -60.0)], 360.0);
        let replay: Vec<(f64, f64)> = first
            .points()
            .iter()
            .map(|&(deg, mw)| (deg, mw_to_dbm(mw)))
            .collect();
        let second = aggregate(&replay, 360.0);
        for (&(d1, v1), &(d2, v2)) in first.points().iter().zip(second.points().iter()) {
            assert_eq!(d1, d2);
            assert!((v1 - v2).abs() < 1e-12);
        }
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn test_circular_extension_replicates_at_both_offsets() {
        let series = aggregate(&[(5.0, -40.0), (120.0, -52.0), (300.0, -47.0)], 360.0);
        let extended = series.extended_points();
        assert_eq!(extended.len(), series.len() * 3);
        for &(deg, val) in &series.points() {
            for offset in [-360.0, 0.0, 360.0] {
                assert!(
                    extended
                        .iter()
                        .any(|&(d, v)| d == deg + offset && (v - val).abs() < 1e-15),
                    "missing replica of {}° at offset {}",
                    deg,
                    offset
                );
            }
        }
    }

    #[test]
    fn test_no_extension_below_full_circle() {
        let series = aggregate(&[(5.0, -40.0), (120.0, -52.0)], 180.0);
        assert!(!series.wraps());
        assert_eq!(series.extended_points(), series.points());
    }
}
