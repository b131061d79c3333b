//! # Session Storage
//!
//! On-disk layout of capture sessions and the CSV records written into it.
//!
//! Every artifact of a session shares one timestamp-derived base name with a
//! fixed suffix per role. A directory is a valid session once all four
//! capture-time files exist, and counts as processed once a results table
//! has been written next to them.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RotodfError};

/// Raw GPS log suffix
pub const SUFFIX_NMEA: &str = ".nmea";
/// Raw packet capture suffix
pub const SUFFIX_PCAP: &str = ".pcapng";
/// Session metadata table suffix
pub const SUFFIX_META: &str = "-test.csv";
/// Derived GPS fix table suffix
pub const SUFFIX_COORDS: &str = "-gps.csv";
/// Processed per-packet results suffix
pub const SUFFIX_RESULTS: &str = "-results.csv";

/// Files a directory must contain to be processable.
pub const REQUIRED_SUFFIXES: [&str; 4] = [SUFFIX_NMEA, SUFFIX_PCAP, SUFFIX_META, SUFFIX_COORDS];

/// Timestamp-derived base name shared by one session's artifacts.
pub fn timestamp_base() -> String {
    Local::now().format("%Y%m%d-%H-%M-%S").to_string()
}

/// Absolute locations of one session's capture-time artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub pcap: PathBuf,
    pub nmea: PathBuf,
    pub coords: PathBuf,
    pub meta: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: &Path, base: &str) -> Self {
        Self {
            pcap: dir.join(format!("{}{}", base, SUFFIX_PCAP)),
            nmea: dir.join(format!("{}{}", base, SUFFIX_NMEA)),
            coords: dir.join(format!("{}{}", base, SUFFIX_COORDS)),
            meta: dir.join(format!("{}{}", base, SUFFIX_META)),
        }
    }
}

/// Create a session directory under `root` and prove it is writable.
///
/// The directory name is the timestamp base, prefixed with the session
/// label when one is set. Returns the directory and the base name used for
/// the artifact files.
///
/// # Errors
///
/// Returns [`RotodfError::Storage`] if the directory cannot be created or a
/// probe file cannot be written into it.
pub fn create_session_dir(root: &Path, label: Option<&str>) -> Result<(PathBuf, String)> {
    let base = timestamp_base();
    let dir_name = match label {
        Some(label) => format!("{}-{}", label, base),
        None => base.clone(),
    };
    let dir = root.join(dir_name);

    fs::create_dir_all(&dir).map_err(|source| RotodfError::Storage {
        path: dir.clone(),
        source,
    })?;

    // Creating the directory is not proof we can write into it.
    let probe = dir.join(".write-probe");
    fs::write(&probe, b"probe")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|source| RotodfError::Storage {
            path: dir.clone(),
            source,
        })?;

    debug!(dir = %dir.display(), "session directory ready");
    Ok((dir, base))
}

/// One row of the append-only session metadata log. Field order is the
/// on-disk column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub name: String,
    pub path: String,
    pub iface: String,
    pub duration: u64,
    pub pos_lat: f64,
    pub pos_lon: f64,
    pub pos_alt: f64,
    pub pos_lat_err: f64,
    pub pos_lon_err: f64,
    pub pos_alt_err: f64,
    pub start: f64,
    pub end: f64,
    pub degrees: f64,
    pub bearing: f64,
    pub pcap: String,
    pub nmea: String,
    pub coords: String,
}

/// One row of a processed results table: a decoded frame with its derived
/// bearing and the session's position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub timestamp: f64,
    pub bssid: String,
    pub ssi: i32,
    pub channel: u32,
    pub bearing: f64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub lat_err: f64,
    pub lon_err: f64,
    pub alt_err: f64,
}

/// One row of the derived GPS fix table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub timestamp: f64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

fn csv_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    let file = fs::File::create(path)?;
    Ok(csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(file))
}

/// Write the session metadata table: a header and exactly one row.
pub fn write_meta(path: &Path, record: &MetaRecord) -> Result<()> {
    let mut writer = csv_writer(path)?;
    writer.serialize(record)?;
    writer.flush()?;
    Ok(())
}

/// Read a session metadata table back for reprocessing.
pub fn read_meta(path: &Path) -> Result<MetaRecord> {
    let mut reader = csv::Reader::from_path(path)?;
    let record = reader
        .deserialize()
        .next()
        .ok_or_else(|| RotodfError::Storage {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "metadata table has no rows"),
        })??;
    Ok(record)
}

/// Open a results table for writing.
pub fn results_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    csv_writer(path)
}

/// Read every observation row from a results table.
pub fn read_results(path: &Path) -> Result<Vec<ObservationRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

fn dir_has_suffix(dir: &Path, suffix: &str) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        })
        .unwrap_or(false)
}

/// Whether the directory holds a complete capture session (all four
/// required artifacts present).
pub fn is_session_dir(dir: &Path) -> bool {
    REQUIRED_SUFFIXES
        .iter()
        .all(|suffix| dir_has_suffix(dir, suffix))
}

/// Whether the session has already been processed into a results table.
pub fn is_processed(dir: &Path) -> bool {
    dir_has_suffix(dir, SUFFIX_RESULTS)
}

fn find_with_suffix(dir: &Path, suffix: &str) -> Option<PathBuf> {
    fs::read_dir(dir).ok()?.flatten().find_map(|entry| {
        let path = entry.path();
        if path.file_name()?.to_string_lossy().ends_with(suffix) {
            Some(path)
        } else {
            None
        }
    })
}

/// Locate the metadata table inside a session directory.
pub fn find_meta(dir: &Path) -> Option<PathBuf> {
    find_with_suffix(dir, SUFFIX_META)
}

/// Locate the results table inside a session directory.
pub fn find_results(dir: &Path) -> Option<PathBuf> {
    find_with_suffix(dir, SUFFIX_RESULTS)
}
