//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RotodfError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
}

/// Capture session parameters
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Wireless interface to capture on; must already exist and support
    /// monitor mode
    #[serde(default)]
    pub interface: String,

    /// Length of the synchronized run window, in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// Total angular travel of the antenna over one run window
    #[serde(default = "default_sweep_degrees")]
    pub sweep_degrees: f64,

    /// Compass bearing the sweep starts from
    #[serde(default)]
    pub start_bearing: f64,

    /// Dwell time per channel for the channel hopper
    #[serde(default = "default_hop_interval_ms")]
    pub hop_interval_ms: u64,

    /// Channel cycle for the hopper
    #[serde(default = "default_hop_channels")]
    pub hop_channels: Vec<u32>,

    /// Optional label prefixed to the session directory name
    #[serde(default)]
    pub label: Option<String>,

    /// Process the capture into a results table right after the session
    #[serde(default)]
    pub process: bool,

    /// Extra seconds allowed for each worker to report after the run window
    #[serde(default = "default_result_margin_secs")]
    pub result_margin_secs: u64,
}

/// Storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory that session directories are created under
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

/// External tool configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    /// Packet capture binary; must emit a `File:` line on stderr once live
    #[serde(default = "default_capture_bin")]
    pub capture_bin: String,

    /// Frame decoding binary used during processing
    #[serde(default = "default_decode_bin")]
    pub decode_bin: String,

    /// Wireless configuration binary
    #[serde(default = "default_iw_bin")]
    pub iw_bin: String,

    /// Interface admin binary (link up/down around mode switches)
    #[serde(default = "default_ip_bin")]
    pub ip_bin: String,

    /// gpsd daemon address
    #[serde(default = "default_gpsd_addr")]
    pub gpsd_addr: String,
}

// Default value functions
fn default_duration_secs() -> u64 { 30 }
fn default_sweep_degrees() -> f64 { 360.0 }
fn default_hop_interval_ms() -> u64 { 100 }
fn default_hop_channels() -> Vec<u32> {
    // 2.4 GHz channels in a spread order so adjacent dwells do not overlap
    vec![1, 6, 11, 2, 7, 12, 3, 8, 13, 4, 9, 14, 5, 10]
}
fn default_result_margin_secs() -> u64 { 5 }
fn default_storage_root() -> PathBuf { PathBuf::from("./captures") }
fn default_capture_bin() -> String { "dumpcap".to_string() }
fn default_decode_bin() -> String { "tshark".to_string() }
fn default_iw_bin() -> String { "iw".to_string() }
fn default_ip_bin() -> String { "ip".to_string() }
fn default_gpsd_addr() -> String { "127.0.0.1:2947".to_string() }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| RotodfError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `RotodfError::Config` if any value is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.session.interface.is_empty() {
            return Err(RotodfError::Config(
                "session interface must be set".to_string(),
            ));
        }

        if self.session.duration_secs == 0 || self.session.duration_secs > 86_400 {
            return Err(RotodfError::Config(
                "duration_secs must be between 1 and 86400".to_string(),
            ));
        }

        if !self.session.sweep_degrees.is_finite()
            || self.session.sweep_degrees < 0.0
            || self.session.sweep_degrees > 1080.0
        {
            return Err(RotodfError::Config(
                "sweep_degrees must be between 0 and 1080".to_string(),
            ));
        }

        if !self.session.start_bearing.is_finite()
            || self.session.start_bearing < 0.0
            || self.session.start_bearing >= 360.0
        {
            return Err(RotodfError::Config(
                "start_bearing must be in [0, 360)".to_string(),
            ));
        }

        if self.session.hop_interval_ms == 0 || self.session.hop_interval_ms > 60_000 {
            return Err(RotodfError::Config(
                "hop_interval_ms must be between 1 and 60000".to_string(),
            ));
        }

        if self.session.hop_channels.is_empty() {
            return Err(RotodfError::Config(
                "hop_channels cannot be empty".to_string(),
            ));
        }

        for &channel in &self.session.hop_channels {
            if channel == 0 || channel > 196 {
                return Err(RotodfError::Config(format!(
                    "hop channel {} is out of range (1-196)",
                    channel
                )));
            }
        }

        if self.session.result_margin_secs == 0 {
            return Err(RotodfError::Config(
                "result_margin_secs must be greater than 0".to_string(),
            ));
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(RotodfError::Config(
                "storage root cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("capture_bin", &self.tools.capture_bin),
            ("decode_bin", &self.tools.decode_bin),
            ("iw_bin", &self.tools.iw_bin),
            ("ip_bin", &self.tools.ip_bin),
            ("gpsd_addr", &self.tools.gpsd_addr),
        ] {
            if value.is_empty() {
                return Err(RotodfError::Config(format!("{} cannot be empty", name)));
            }
        }

        Ok(())
    }
}
