//! # Antenna Rotation
//!
//! Collaborator seam for the antenna rotator.
//!
//! The session only needs two things from the rotator: that it sweeps at a
//! constant angular rate once released, and the *actual* wall-clock window
//! the sweep occupied. The window, not the requested duration, is what the
//! bearing correlator divides packet times against.

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, Duration};
use tracing::info;

use crate::error::Result;

/// Actual wall-clock window of one completed sweep, UNIX epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationWindow {
    pub started_at: f64,
    pub ended_at: f64,
}

/// Trait for antenna rotator hardware
#[async_trait]
pub trait AntennaDriver: Send + Sync {
    /// Rotate from `start_bearing` through `sweep_degrees` over `duration`,
    /// returning the instants the rotation actually started and stopped.
    async fn sweep(
        &self,
        start_bearing: f64,
        sweep_degrees: f64,
        duration: Duration,
    ) -> Result<RotationWindow>;
}

/// Current wall clock as fractional UNIX epoch seconds.
pub fn epoch_secs_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6
}

/// Driver for rotators that follow an externally configured constant rate.
///
/// The motor controller holds the rate; this driver contributes the precise
/// window timing the session records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockedSweep;

#[async_trait]
impl AntennaDriver for ClockedSweep {
    async fn sweep(
        &self,
        start_bearing: f64,
        sweep_degrees: f64,
        duration: Duration,
    ) -> Result<RotationWindow> {
        let rate = sweep_degrees / duration.as_secs_f64();
        info!(
            start_bearing,
            sweep_degrees,
            rate_deg_per_sec = rate,
            "sweep running"
        );

        let started_at = epoch_secs_now();
        sleep(duration).await;
        let ended_at = epoch_secs_now();

        Ok(RotationWindow {
            started_at,
            ended_at,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clocked_sweep_covers_duration() {
        let driver = ClockedSweep;
        let window = driver
            .sweep(0.0, 360.0, Duration::from_millis(120))
            .await
            .unwrap();
        let span = window.ended_at - window.started_at;
        assert!(span >= 0.1, "window too short: {}", span);
        assert!(span < 2.0, "window implausibly long: {}", span);
    }

    #[tokio::test]
    async fn test_epoch_secs_now_is_recent() {
        // After 2023 and monotone-ish across two calls.
        let a = epoch_secs_now();
        let b = epoch_secs_now();
        assert!(a > 1.6e9);
        assert!(b >= a);
    }
}
