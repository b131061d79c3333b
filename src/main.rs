//! # rotodf
//!
//! Radio direction finding with a rotating directional antenna.
//!
//! One `capture` run coordinates four workers — antenna rotation, GPS
//! logging, channel hopping, packet capture — behind a synchronized start
//! gate, then records where the antenna was pointing when each frame
//! arrived. `process` and `batch` turn captures into per-packet bearing
//! tables; `locate` fits the aggregated signal curve and reports the
//! bearing of maximum response.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use rotodf::antenna::ClockedSweep;
use rotodf::config::Config;
use rotodf::gps::GpsdSource;
use rotodf::locate;
use rotodf::process::{process_root, process_session, TsharkFrameSource};
use rotodf::session::{run_session, Collaborators};
use rotodf::storage;
use rotodf::wifi::IwControl;

#[derive(Parser)]
#[command(name = "rotodf", version, about = "Rotational-antenna radio direction finding")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "rotodf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one synchronized capture session
    Capture {
        /// Label prefixed to the session directory name
        #[arg(long)]
        label: Option<String>,

        /// Process the capture into a results table right afterwards
        #[arg(long)]
        process: bool,
    },

    /// Process one captured session into a results table
    Process {
        /// Session directory
        dir: PathBuf,
    },

    /// Process every unprocessed session one level below a directory
    Batch {
        /// Root directory; defaults to the configured storage root
        root: Option<PathBuf>,

        /// Stop after this many sessions
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Estimate a bearing from a processed results table
    Locate {
        /// Results table (…-results.csv)
        results: PathBuf,

        /// Only use frames from this transmitter (BSSID)
        #[arg(long)]
        transmitter: Option<String>,

        /// Sweep degrees override when no session metadata sits alongside
        #[arg(long)]
        sweep: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    std::fs::create_dir_all(&config.storage.root)
        .with_context(|| format!("creating storage root {}", config.storage.root.display()))?;

    // Log to stderr and to a rolling file under the storage root.
    let file_appender = tracing_appender::rolling::daily(&config.storage.root, "rotodf.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    info!("rotodf v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Capture { label, process } => capture(config, label, process).await,
        Command::Process { dir } => process_one(config, dir).await,
        Command::Batch { root, limit } => batch(config, root, limit).await,
        Command::Locate {
            results,
            transmitter,
            sweep,
        } => locate_results(results, transmitter, sweep),
    }
}

async fn capture(mut config: Config, label: Option<String>, process: bool) -> Result<()> {
    if label.is_some() {
        config.session.label = label;
    }
    if process {
        config.session.process = true;
    }

    let collab = Collaborators::new(
        Arc::new(GpsdSource::new(&config.tools.gpsd_addr)),
        Arc::new(ClockedSweep),
        Arc::new(IwControl::new(&config.tools.iw_bin, &config.tools.ip_bin)),
        &config.tools.capture_bin,
    );

    let session = run_session(&config.session, &config.storage.root, collab).await?;
    println!(
        "Captured {} frames ({} dropped) into {}",
        session.stats.captured,
        session.stats.dropped,
        session.dir.display()
    );

    if config.session.process {
        let source = TsharkFrameSource::open(&config.tools.decode_bin, &session.paths.pcap)?;
        let summary = process_session(&session.dir, &session.meta_record(), source).await?;
        println!(
            "Processed {} frames into results table ({} failed to decode)",
            summary.written, summary.failed
        );
    }

    Ok(())
}

async fn process_one(config: Config, dir: PathBuf) -> Result<()> {
    if !storage::is_session_dir(&dir) {
        bail!("{} is not a complete session directory", dir.display());
    }
    let meta_path = storage::find_meta(&dir)
        .with_context(|| format!("no session metadata in {}", dir.display()))?;
    let meta = storage::read_meta(&meta_path)?;

    let pcap = dir.join(
        std::path::Path::new(&meta.pcap)
            .file_name()
            .with_context(|| format!("metadata names no capture file in {}", dir.display()))?,
    );
    let source = TsharkFrameSource::open(&config.tools.decode_bin, &pcap)?;
    let summary = process_session(&dir, &meta, source).await?;
    println!(
        "Processed {} frames ({} failed to decode)",
        summary.written, summary.failed
    );
    Ok(())
}

async fn batch(config: Config, root: Option<PathBuf>, limit: Option<usize>) -> Result<()> {
    let root = root.unwrap_or_else(|| config.storage.root.clone());
    let decode_bin = config.tools.decode_bin.clone();
    let processed = process_root(&root, limit.unwrap_or(usize::MAX), |pcap| {
        TsharkFrameSource::open(&decode_bin, pcap)
    })
    .await?;
    println!("Processed {} captures", processed);
    Ok(())
}

fn locate_results(
    results: PathBuf,
    transmitter: Option<String>,
    sweep: Option<f64>,
) -> Result<()> {
    let rows = storage::read_results(&results)?;

    let sweep_degrees = match sweep {
        Some(sweep) => sweep,
        None => {
            // The session metadata sits next to the results table.
            let dir = results
                .parent()
                .with_context(|| format!("{} has no parent directory", results.display()))?;
            match storage::find_meta(dir) {
                Some(meta_path) => storage::read_meta(&meta_path)?.degrees,
                None => bail!(
                    "no session metadata next to {}; pass --sweep",
                    results.display()
                ),
            }
        }
    };

    let samples: Vec<(f64, f64)> = rows
        .iter()
        .filter(|row| {
            transmitter
                .as_deref()
                .map_or(true, |wanted| row.bssid.eq_ignore_ascii_case(wanted))
        })
        .map(|row| (row.bearing, f64::from(row.ssi)))
        .collect();

    let series = locate::aggregate(&samples, sweep_degrees);
    let guess = locate::estimate(&series)?;
    println!(
        "Estimated bearing: {:.0}° (method: {}, {} aggregated degrees)",
        guess.bearing_deg,
        guess.method,
        series.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_capture_with_overrides() {
        let cli = Cli::parse_from(["rotodf", "capture", "--label", "roof", "--process"]);
        match cli.command {
            Command::Capture { label, process } => {
                assert_eq!(label.as_deref(), Some("roof"));
                assert!(process);
            }
            _ => panic!("expected capture command"),
        }
    }

    #[test]
    fn test_cli_parses_locate_with_sweep() {
        let cli = Cli::parse_from([
            "rotodf",
            "locate",
            "run-results.csv",
            "--transmitter",
            "aa:bb:cc:dd:ee:ff",
            "--sweep",
            "720",
        ]);
        match cli.command {
            Command::Locate {
                transmitter, sweep, ..
            } => {
                assert_eq!(transmitter.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
                assert_eq!(sweep, Some(720.0));
            }
            _ => panic!("expected locate command"),
        }
    }
}
