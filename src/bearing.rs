//! # Bearing Correlation
//!
//! Maps packet capture timestamps onto antenna bearings.
//!
//! During a session the antenna sweeps at a constant angular rate from
//! `start_bearing` through `sweep_degrees` between two wall-clock instants.
//! Where in that window a frame arrived therefore determines where the
//! antenna was pointing when it was received.

use crate::error::{Result, RotodfError};

/// Immutable description of one completed antenna rotation.
///
/// Built by the session coordinator from the rotation worker's *actual*
/// start and stop instants (not the requested ones), and serialized into
/// the session metadata row.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationSchedule {
    /// Compass bearing the sweep started from, degrees in `[0, 360)`.
    pub start_bearing: f64,
    /// Total angular travel over the window, degrees, `>= 0`.
    pub sweep_degrees: f64,
    /// Nominal run window length in seconds.
    pub duration_secs: u64,
    /// Actual rotation start, UNIX epoch seconds.
    pub rotation_start_time: f64,
    /// Actual rotation end, UNIX epoch seconds.
    pub rotation_end_time: f64,
}

impl RotationSchedule {
    /// Build a schedule, enforcing `rotation_end_time > rotation_start_time`.
    pub fn new(
        start_bearing: f64,
        sweep_degrees: f64,
        duration_secs: u64,
        rotation_start_time: f64,
        rotation_end_time: f64,
    ) -> Result<Self> {
        if rotation_end_time <= rotation_start_time {
            return Err(RotodfError::Antenna(format!(
                "rotation window is empty or inverted ({} .. {})",
                rotation_start_time, rotation_end_time
            )));
        }
        Ok(Self {
            start_bearing,
            sweep_degrees,
            duration_secs,
            rotation_start_time,
            rotation_end_time,
        })
    }

    /// Length of the actual rotation window in seconds.
    pub fn span_secs(&self) -> f64 {
        self.rotation_end_time - self.rotation_start_time
    }
}

/// Estimate the antenna bearing at the instant a packet was captured.
///
/// Progress through the rotation window is floor-clamped at 0 — frames
/// timestamped at or before the rotation start are pinned to the start
/// bearing — but deliberately not ceiling-clamped at 1: the capture
/// subprocess runs one second past the nominal window, so a late frame
/// extrapolates past `start_bearing + sweep_degrees`. Downstream
/// aggregation decides what to do with out-of-range degrees.
pub fn estimate_bearing(packet_time: f64, schedule: &RotationSchedule) -> f64 {
    let mut elapsed = packet_time - schedule.rotation_start_time;
    if elapsed <= 0.0 {
        elapsed = 0.0;
    }
    let progress = elapsed / schedule.span_secs();
    progress * schedule.sweep_degrees + schedule.start_bearing
}
