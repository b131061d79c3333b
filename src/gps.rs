//! # GPS Collaborator
//!
//! Position fixes for session metadata, sourced from a gpsd daemon.
//!
//! The session needs two things from GPS: a pre-flight answer to "do we
//! have a 3-D fix yet", and — once released alongside the other workers —
//! a raw log of everything the receiver said during the run plus one
//! averaged position with per-axis error margins.

use std::path::Path;

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, warn};

use crate::antenna::epoch_secs_now;
use crate::error::{Result, RotodfError};
use crate::storage::FixRecord;

/// gpsd fix mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    Unknown,
    NoFix,
    TwoD,
    ThreeD,
}

impl FixMode {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => FixMode::NoFix,
            2 => FixMode::TwoD,
            3 => FixMode::ThreeD,
            _ => FixMode::Unknown,
        }
    }

    pub fn is_three_d(&self) -> bool {
        matches!(self, FixMode::ThreeD)
    }
}

/// Averaged session position with per-axis error margins.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub lat_err: f64,
    pub lon_err: f64,
    pub alt_err: f64,
}

/// Trait for GPS receivers
#[async_trait]
pub trait GpsSource: Send + Sync {
    /// Current fix mode, for the pre-session 3-D fix wait.
    async fn current_mode(&self) -> Result<FixMode>;

    /// Log the receiver's raw output and per-fix rows for `duration`,
    /// then return the averaged position.
    async fn record(
        &self,
        duration: Duration,
        nmea_path: &Path,
        coords_path: &Path,
    ) -> Result<PositionFix>;
}

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// One TPV (time-position-velocity) report from gpsd.
#[derive(Debug, Clone, Deserialize)]
struct TpvReport {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    #[serde(rename = "altHAE")]
    alt_hae: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    epv: Option<f64>,
    time: Option<String>,
}

impl TpvReport {
    /// Height above ellipsoid when the receiver reports it, else the
    /// legacy altitude field.
    fn altitude(&self) -> Option<f64> {
        self.alt_hae.or(self.alt)
    }

    fn epoch_secs(&self) -> f64 {
        self.time
            .as_deref()
            .and_then(|stamp| DateTime::parse_from_rfc3339(stamp).ok())
            .map(|parsed| parsed.timestamp() as f64 + f64::from(parsed.timestamp_subsec_micros()) / 1e6)
            .unwrap_or_else(epoch_secs_now)
    }
}

fn parse_tpv(line: &str) -> Option<TpvReport> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    if value.get("class")?.as_str()? != "TPV" {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Average the positions of every usable fix.
///
/// A fix is usable once it has both coordinates; altitude and the error
/// estimates are averaged over the reports that carried them.
fn average_fixes(reports: &[TpvReport]) -> Option<PositionFix> {
    let mut fix = PositionFix::default();
    let mut used = 0usize;
    let (mut alts, mut epxs, mut epys, mut epvs) = (0usize, 0usize, 0usize, 0usize);

    for report in reports {
        let (Some(lat), Some(lon)) = (report.lat, report.lon) else {
            continue;
        };
        fix.lat += lat;
        fix.lon += lon;
        used += 1;
        if let Some(alt) = report.altitude() {
            fix.alt += alt;
            alts += 1;
        }
        if let Some(epy) = report.epy {
            fix.lat_err += epy;
            epys += 1;
        }
        if let Some(epx) = report.epx {
            fix.lon_err += epx;
            epxs += 1;
        }
        if let Some(epv) = report.epv {
            fix.alt_err += epv;
            epvs += 1;
        }
    }

    if used == 0 {
        return None;
    }

    fix.lat /= used as f64;
    fix.lon /= used as f64;
    if alts > 0 {
        fix.alt /= alts as f64;
    }
    if epys > 0 {
        fix.lat_err /= epys as f64;
    }
    if epxs > 0 {
        fix.lon_err /= epxs as f64;
    }
    if epvs > 0 {
        fix.alt_err /= epvs as f64;
    }
    Some(fix)
}

/// gpsd-backed GPS source.
#[derive(Debug, Clone)]
pub struct GpsdSource {
    addr: String,
}

impl GpsdSource {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
        }
    }

    async fn watch_stream(&self) -> Result<BufReader<TcpStream>> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| RotodfError::Gps(format!("cannot reach gpsd at {}: {}", self.addr, e)))?;
        stream
            .write_all(WATCH_COMMAND)
            .await
            .map_err(|e| RotodfError::Gps(format!("gpsd watch command failed: {}", e)))?;
        Ok(BufReader::new(stream))
    }
}

#[async_trait]
impl GpsSource for GpsdSource {
    async fn current_mode(&self) -> Result<FixMode> {
        let mut stream = self.watch_stream().await?;
        let mut line = String::new();

        let deadline = Instant::now() + REPORT_TIMEOUT;
        loop {
            line.clear();
            let remaining = deadline.saturating_duration_since(Instant::now());
            let read = timeout(remaining, stream.read_line(&mut line))
                .await
                .map_err(|_| RotodfError::Gps("no TPV report from gpsd".to_string()))?
                .map_err(|e| RotodfError::Gps(format!("gpsd read failed: {}", e)))?;
            if read == 0 {
                return Err(RotodfError::Gps("gpsd closed the connection".to_string()));
            }
            if let Some(report) = parse_tpv(line.trim_end()) {
                return Ok(FixMode::from_raw(report.mode));
            }
        }
    }

    async fn record(
        &self,
        duration: Duration,
        nmea_path: &Path,
        coords_path: &Path,
    ) -> Result<PositionFix> {
        let mut stream = self.watch_stream().await?;
        let mut raw_log = tokio::fs::File::create(nmea_path).await?;
        let mut coords = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_path(coords_path)?;

        let started = Instant::now();
        let mut reports: Vec<TpvReport> = Vec::new();
        let mut line = String::new();

        while started.elapsed() < duration {
            line.clear();
            let remaining = duration.saturating_sub(started.elapsed());
            let read = match timeout(remaining, stream.read_line(&mut line)).await {
                Ok(Ok(read)) => read,
                Ok(Err(e)) => {
                    warn!(error = %e, "gpsd read failed mid-session");
                    break;
                }
                Err(_) => break, // window elapsed mid-read
            };
            if read == 0 {
                warn!("gpsd closed the connection mid-session");
                break;
            }

            raw_log.write_all(line.as_bytes()).await?;

            if let Some(report) = parse_tpv(line.trim_end()) {
                if matches!(FixMode::from_raw(report.mode), FixMode::TwoD | FixMode::ThreeD) {
                    if let (Some(lat), Some(lon)) = (report.lat, report.lon) {
                        coords.serialize(FixRecord {
                            timestamp: report.epoch_secs(),
                            lat,
                            lon,
                            alt: report.altitude().unwrap_or(0.0),
                        })?;
                        reports.push(report);
                    }
                }
            }
        }

        raw_log.flush().await?;
        coords.flush()?;
        debug!(fixes = reports.len(), "gps recording window closed");

        average_fixes(&reports)
            .ok_or_else(|| RotodfError::Gps("no position fixes recorded during session".to_string()))
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock GPS source with a scripted fix-mode sequence.
    pub struct MockGps {
        pub modes: Mutex<VecDeque<FixMode>>,
        pub fix: PositionFix,
    }

    impl MockGps {
        pub fn three_d(fix: PositionFix) -> Self {
            Self {
                modes: Mutex::new(VecDeque::new()),
                fix,
            }
        }

        pub fn with_modes(modes: Vec<FixMode>, fix: PositionFix) -> Self {
            Self {
                modes: Mutex::new(modes.into()),
                fix,
            }
        }
    }

    #[async_trait]
    impl GpsSource for MockGps {
        async fn current_mode(&self) -> Result<FixMode> {
            Ok(self
                .modes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(FixMode::ThreeD))
        }

        async fn record(
            &self,
            duration: Duration,
            nmea_path: &Path,
            coords_path: &Path,
        ) -> Result<PositionFix> {
            tokio::time::sleep(duration).await;
            tokio::fs::write(nmea_path, b"$GPGGA,mock\n").await?;
            tokio::fs::write(coords_path, b"\"timestamp\",\"lat\",\"lon\",\"alt\"\n").await?;
            Ok(self.fix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TPV_3D: &str = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":3,"time":"2026-08-06T12:00:05.250Z","lat":47.6097,"lon":-122.3331,"altHAE":56.2,"epx":4.5,"epy":3.5,"epv":9.0}"#;

    #[test]
    fn test_parse_tpv_report() {
        let report = parse_tpv(TPV_3D).unwrap();
        assert_eq!(report.mode, 3);
        assert_eq!(report.lat, Some(47.6097));
        assert_eq!(report.lon, Some(-122.3331));
        assert_eq!(report.altitude(), Some(56.2));
        assert!((report.epoch_secs() - 1_786_017_605.25).abs() < 1.0);
    }

    #[test]
    fn test_parse_tpv_ignores_other_classes() {
        assert!(parse_tpv(r#"{"class":"SKY","satellites":[]}"#).is_none());
        assert!(parse_tpv(r#"{"class":"VERSION","release":"3.25"}"#).is_none());
        assert!(parse_tpv("not json").is_none());
    }

    #[test]
    fn test_fix_mode_mapping() {
        assert_eq!(FixMode::from_raw(0), FixMode::Unknown);
        assert_eq!(FixMode::from_raw(1), FixMode::NoFix);
        assert_eq!(FixMode::from_raw(2), FixMode::TwoD);
        assert_eq!(FixMode::from_raw(3), FixMode::ThreeD);
        assert!(FixMode::ThreeD.is_three_d());
        assert!(!FixMode::TwoD.is_three_d());
    }

    #[test]
    fn test_average_fixes() {
        let reports: Vec<TpvReport> = [
            r#"{"class":"TPV","mode":3,"lat":10.0,"lon":20.0,"altHAE":100.0,"epx":2.0,"epy":1.0,"epv":4.0}"#,
            r#"{"class":"TPV","mode":3,"lat":12.0,"lon":22.0,"altHAE":110.0,"epx":4.0,"epy":3.0,"epv":6.0}"#,
            r#"{"class":"TPV","mode":1}"#,
        ]
        .iter()
        .filter_map(|line| parse_tpv(line))
        .collect();

        let fix = average_fixes(&reports).unwrap();
        assert!((fix.lat - 11.0).abs() < 1e-12);
        assert!((fix.lon - 21.0).abs() < 1e-12);
        assert!((fix.alt - 105.0).abs() < 1e-12);
        assert!((fix.lat_err - 2.0).abs() < 1e-12);
        assert!((fix.lon_err - 3.0).abs() < 1e-12);
        assert!((fix.alt_err - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_fixes_requires_coordinates() {
        let reports: Vec<TpvReport> =
            [r#"{"class":"TPV","mode":1}"#, r#"{"class":"TPV","mode":2,"lat":1.0}"#]
                .iter()
                .filter_map(|line| parse_tpv(line))
                .collect();
        assert!(average_fixes(&reports).is_none());
    }
}
