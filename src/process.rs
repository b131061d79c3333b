//! # Capture Processing
//!
//! Replays a session's decoded frames through the bearing correlator and
//! writes the per-packet results table.
//!
//! Frame decoding itself is a collaborator: the default implementation
//! shells out to `tshark` for the heavy 802.11 parsing and consumes its
//! field output line by line. A frame that cannot be decoded is counted
//! and skipped; it never aborts the batch.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::bearing::{estimate_bearing, RotationSchedule};
use crate::error::{Result, RotodfError};
use crate::storage::{self, MetaRecord, ObservationRecord, SUFFIX_RESULTS};

/// One decoded 802.11 frame with the fields bearing estimation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Capture timestamp, UNIX epoch seconds.
    pub timestamp: f64,
    /// Transmitter identifier (BSSID).
    pub transmitter: String,
    /// Received signal strength, dBm.
    pub signal_dbm: i32,
    /// Channel center frequency, MHz.
    pub channel_mhz: u32,
}

/// One read from a frame source.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRead {
    /// A fully decoded frame.
    Frame(DecodedFrame),
    /// A frame the decoder could not make sense of; counted, not fatal.
    Malformed,
}

/// Trait for decoded-frame streams
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the capture is exhausted.
    async fn next_read(&mut self) -> Result<Option<FrameRead>>;
}

/// `tshark`-backed frame source filtering for beacon frames.
pub struct TsharkFrameSource {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl TsharkFrameSource {
    /// Spawn the decoder over a capture file.
    pub fn open(bin: &str, pcap: &Path) -> Result<Self> {
        let mut child = Command::new(bin)
            .arg("-r")
            .arg(pcap)
            .args(["-Y", "wlan.fc.type_subtype == 0x0008"])
            .args(["-T", "fields"])
            .args(["-e", "frame.time_epoch"])
            .args(["-e", "wlan.bssid"])
            .args(["-e", "radiotap.dbm_antsignal"])
            .args(["-e", "radiotap.channel.freq"])
            .args(["-E", "separator=/t"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let Some(stdout) = child.stdout.take() else {
            return Err(RotodfError::CaptureResult(
                "frame decoder exposed no output stream".to_string(),
            ));
        };
        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

/// Parse one tab-separated tshark field line.
fn parse_field_line(line: &str) -> Option<DecodedFrame> {
    let mut fields = line.split('\t');
    let timestamp: f64 = fields.next()?.trim().parse().ok()?;
    let transmitter = fields.next()?.trim();
    if transmitter.is_empty() {
        return None;
    }
    // Some radiotap captures report several antenna readings; the first is
    // the combined one.
    let signal_field = fields.next()?.trim();
    let signal_dbm: i32 = signal_field.split(',').next()?.trim().parse().ok()?;
    let channel_mhz: u32 = fields.next()?.trim().parse().ok()?;
    Some(DecodedFrame {
        timestamp,
        transmitter: transmitter.to_string(),
        signal_dbm,
        channel_mhz,
    })
}

#[async_trait]
impl FrameSource for TsharkFrameSource {
    async fn next_read(&mut self) -> Result<Option<FrameRead>> {
        match self.lines.next_line().await? {
            Some(line) if line.trim().is_empty() => Ok(Some(FrameRead::Malformed)),
            Some(line) => Ok(Some(match parse_field_line(&line) {
                Some(frame) => FrameRead::Frame(frame),
                None => FrameRead::Malformed,
            })),
            None => {
                let status = self.child.wait().await?;
                if !status.success() {
                    warn!(%status, "frame decoder exited with failure status");
                }
                Ok(None)
            }
        }
    }
}

/// Outcome of processing one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Observation rows written.
    pub written: u64,
    /// Frames skipped because they could not be decoded.
    pub failed: u64,
}

/// Replay a session's frames into a `-results.csv` table next to its
/// other artifacts. Returns the summary and writes the table exactly once.
pub async fn process_session<S: FrameSource>(
    dir: &Path,
    meta: &MetaRecord,
    mut source: S,
) -> Result<ProcessSummary> {
    let schedule = RotationSchedule::new(
        meta.bearing,
        meta.degrees,
        meta.duration,
        meta.start,
        meta.end,
    )?;

    let results_path = dir.join(format!("{}{}", storage::timestamp_base(), SUFFIX_RESULTS));
    let mut writer = storage::results_writer(&results_path)?;

    info!(dir = %dir.display(), "processing capture");
    let mut summary = ProcessSummary {
        written: 0,
        failed: 0,
    };

    while let Some(read) = source.next_read().await? {
        match read {
            FrameRead::Frame(frame) => {
                let bearing = estimate_bearing(frame.timestamp, &schedule);
                writer.serialize(ObservationRecord {
                    timestamp: frame.timestamp,
                    bssid: frame.transmitter,
                    ssi: frame.signal_dbm,
                    channel: frame.channel_mhz,
                    bearing,
                    lat: meta.pos_lat,
                    lon: meta.pos_lon,
                    alt: meta.pos_alt,
                    lat_err: meta.pos_lat_err,
                    lon_err: meta.pos_lon_err,
                    alt_err: meta.pos_alt_err,
                })?;
                summary.written += 1;
            }
            FrameRead::Malformed => summary.failed += 1,
        }
    }
    writer.flush()?;

    info!(
        written = summary.written,
        failed = summary.failed,
        results = %results_path.display(),
        "capture processed"
    );
    Ok(summary)
}

/// Process every unprocessed, valid session directory one level below
/// `root`, up to `limit`. Returns the number of directories processed.
///
/// The frame source is created per session via `open_source`, so the
/// decoder subprocess only runs for directories that need it.
pub async fn process_root<S, F>(root: &Path, limit: usize, mut open_source: F) -> Result<usize>
where
    S: FrameSource,
    F: FnMut(&Path) -> Result<S>,
{
    let mut processed = 0usize;

    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if processed >= limit {
            break;
        }
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        if !storage::is_session_dir(&dir) {
            debug!(dir = %dir.display(), "not a session directory, skipping");
            continue;
        }
        if storage::is_processed(&dir) {
            debug!(dir = %dir.display(), "already processed, skipping");
            continue;
        }
        let Some(meta_path) = storage::find_meta(&dir) else {
            continue;
        };
        let meta = storage::read_meta(&meta_path)?;

        let pcap = dir.join(
            Path::new(&meta.pcap)
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new(&meta.pcap)),
        );
        let source = open_source(&pcap)?;
        process_session(&dir, &meta, source).await?;
        processed += 1;
    }

    Ok(processed)
}
