//! # Packet Capture Worker
//!
//! Owns the external packet-capture subprocess for one session.
//!
//! The worker is the only participant allowed to fire the shared start
//! gate, and it does so only after the subprocess has observably begun
//! writing frames — it prints a `File:` line on its diagnostic stream once
//! the capture file is open and live. Releasing the other workers on that
//! proof, rather than on process launch, keeps every elapsed-time window in
//! the session anchored to the instant frames actually started flowing,
//! independent of subprocess startup latency.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, RotodfError};
use crate::session::gate::{Gate, GateWait, Trigger};

/// Diagnostic-stream prefix proving the capture file is open and live.
pub const STARTUP_MARKER: &str = "File:";

/// How long the subprocess gets to prove liveness after spawn.
pub const DEFAULT_STARTUP_BUDGET: Duration = Duration::from_secs(5);

/// Final capture statistics parsed from the subprocess diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub captured: u64,
    pub dropped: u64,
}

/// Supervises one capture subprocess for the length of a session.
#[derive(Debug, Clone)]
pub struct CaptureWorker {
    bin: String,
    interface: String,
    duration_secs: u64,
    output: PathBuf,
    startup_budget: Duration,
}

impl CaptureWorker {
    pub fn new(bin: &str, interface: &str, duration_secs: u64, output: PathBuf) -> Self {
        Self {
            bin: bin.to_string(),
            interface: interface.to_string(),
            duration_secs,
            output,
            startup_budget: DEFAULT_STARTUP_BUDGET,
        }
    }

    /// Override the liveness budget (tests use a short one).
    pub fn with_startup_budget(mut self, budget: Duration) -> Self {
        self.startup_budget = budget;
        self
    }

    /// Run the capture: wait for the init signal, spawn the subprocess,
    /// prove liveness, fire the start gate, then wait out the capture and
    /// parse its final statistics.
    ///
    /// The subprocess is bounded to `duration + 1` seconds so the nominal
    /// window is fully covered. On any failure before the start gate fires,
    /// `start` is dropped unfired and every gate waiter aborts.
    ///
    /// # Errors
    ///
    /// [`RotodfError::StartupTimeout`] if the liveness marker never appears,
    /// [`RotodfError::CaptureResult`] if the final statistics are missing or
    /// unparseable.
    pub async fn run(self, mut init: Gate, start: Trigger) -> Result<CaptureStats> {
        if init.wait().await == GateWait::Abandoned {
            return Err(RotodfError::Interrupted);
        }

        info!(bin = %self.bin, interface = %self.interface, "spawning capture process");
        let mut child = Command::new(&self.bin)
            .arg("-i")
            .arg(&self.interface)
            .arg("-B")
            .arg("12")
            .arg("-q")
            .arg("-a")
            .arg(format!("duration:{}", self.duration_secs + 1))
            .arg("-w")
            .arg(&self.output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(stderr) = child.stderr.take() else {
            return Err(RotodfError::CaptureResult(
                "capture process exposed no diagnostic stream".to_string(),
            ));
        };
        let mut lines = BufReader::new(stderr).lines();

        let spawned_at = Instant::now();
        match timeout(self.startup_budget, wait_for_marker(&mut lines)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                // Subprocess died or closed its stream before proving
                // liveness; the marker can no longer appear.
                let _ = child.start_kill();
                let _ = child.wait().await;
                warn!(error = %err, "capture process failed before liveness marker");
                return Err(RotodfError::StartupTimeout {
                    waited: spawned_at.elapsed(),
                });
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(RotodfError::StartupTimeout {
                    waited: self.startup_budget,
                });
            }
        }

        let run_started = Instant::now();
        start.release();

        let mut tail = Vec::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tail.push(line),
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "capture diagnostic stream read failed");
                    break;
                }
            }
        }

        let status = child.wait().await?;
        info!(
            elapsed_secs = run_started.elapsed().as_secs_f64(),
            expected_secs = self.duration_secs,
            %status,
            "capture process exited"
        );

        match parse_stats(&tail) {
            Some(stats) => {
                info!(stats.captured, stats.dropped, "capture statistics");
                Ok(stats)
            }
            None => Err(RotodfError::CaptureResult(format!(
                "no frame statistics in capture diagnostics (exit status {})",
                status
            ))),
        }
    }
}

async fn wait_for_marker(
    lines: &mut tokio::io::Lines<BufReader<tokio::process::ChildStderr>>,
) -> std::io::Result<()> {
    loop {
        match lines.next_line().await? {
            Some(line) => {
                if line.trim_start().starts_with(STARTUP_MARKER) {
                    return Ok(());
                }
                debug!(line = %line, "capture diagnostics before startup");
            }
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "diagnostic stream closed before startup marker",
                ));
            }
        }
    }
}

/// Find the `captured/dropped` counts in the subprocess's final
/// diagnostics. The counts follow the first colon after the
/// `dropped on interface` phrase, e.g.
/// `Packets received/dropped on interface 'wlan0': 42/3 (pcap:0/...)`.
pub fn parse_stats(lines: &[String]) -> Option<CaptureStats> {
    lines.iter().rev().find_map(|line| parse_stats_line(line))
}

fn parse_stats_line(line: &str) -> Option<CaptureStats> {
    let at = line.find("dropped on interface")?;
    let rest = &line[at..];
    let colon = rest.find(':')?;
    let counts = rest[colon + 1..].split_whitespace().next()?;
    let (captured, dropped) = counts.split_once('/')?;
    Some(CaptureStats {
        captured: captured.parse().ok()?,
        dropped: dropped.parse().ok()?,
    })
}
