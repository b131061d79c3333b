//! # Error Types
//!
//! Custom error types for rotodf using `thiserror`.
//!
//! Session failures split into two families: pre-barrier errors
//! (`Config`, `Storage`, `StartupTimeout`, `Wifi`) abort before any worker
//! is released, and post-barrier errors (`CaptureResult`, `WorkerTimeout`)
//! surface at result-collection time after the run window has elapsed.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for rotodf
#[derive(Debug, Error)]
pub enum RotodfError {
    /// Invalid session parameters; nothing has been started
    #[error("configuration error: {0}")]
    Config(String),

    /// Session directory could not be created or written to
    #[error("session storage unusable at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Capture subprocess never proved it was writing frames
    #[error("capture process emitted no startup marker within {waited:?}")]
    StartupTimeout { waited: Duration },

    /// Capture subprocess exited without parseable statistics
    #[error("could not parse capture statistics: {0}")]
    CaptureResult(String),

    /// A worker failed to report its result within the expected window
    #[error("{worker} worker did not report within the expected window")]
    WorkerTimeout { worker: &'static str },

    /// Too few aggregated samples to fit an interpolant
    #[error("not enough aggregated samples to estimate a bearing ({points} available, 2 required)")]
    InsufficientData { points: usize },

    /// Operator interrupt before the session started
    #[error("session canceled by operator")]
    Interrupted,

    /// GPS collaborator errors
    #[error("gps error: {0}")]
    Gps(String),

    /// Antenna collaborator errors
    #[error("antenna error: {0}")]
    Antenna(String),

    /// Wireless interface control errors
    #[error("wifi control error: {0}")]
    Wifi(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CSV read/write errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for rotodf
pub type Result<T> = std::result::Result<T, RotodfError>;
