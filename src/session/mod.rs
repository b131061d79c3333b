//! # Session Coordinator
//!
//! Creates and supervises the four capture-session workers, runs the
//! two-phase synchronization barrier, aggregates their results, and
//! persists the session metadata.
//!
//! The barrier has two phases. Phase one: once a 3-D GPS fix exists, the
//! coordinator fires the *init* gate, telling the capture worker to spawn
//! its subprocess. Phase two: the capture worker alone fires the shared
//! *start* gate, and only after its subprocess has observably begun
//! writing frames. Antenna rotation, GPS logging, and channel hopping all
//! begin their own `duration` windows at that instant, so subprocess
//! startup latency can never skew the rotation schedule that later turns
//! packet timestamps into bearings.

pub mod gate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

use crate::antenna::AntennaDriver;
use crate::bearing::RotationSchedule;
use crate::capture::{CaptureStats, CaptureWorker, DEFAULT_STARTUP_BUDGET};
use crate::config::SessionConfig;
use crate::error::{Result, RotodfError};
use crate::gps::{GpsSource, PositionFix};
use crate::session::gate::GateWait;
use crate::storage::{self, MetaRecord, SessionPaths};
use crate::wifi::{self, WifiControl};

/// Extra time the coordinator allows past the capture worker's own
/// liveness budget before declaring it hung.
const STARTUP_GRACE: Duration = Duration::from_secs(2);

/// How long a finished session waits for each worker task to terminate
/// before abandoning it.
const JOIN_GRACE: Duration = Duration::from_secs(2);

/// The wireless interface and antenna motor are exclusive resources; only
/// one session may hold them at a time.
static ACTIVE_SESSION: Mutex<()> = Mutex::const_new(());

/// Hardware and subprocess collaborators wired into one session.
pub struct Collaborators {
    pub gps: Arc<dyn GpsSource>,
    pub antenna: Arc<dyn AntennaDriver>,
    pub wifi: Arc<dyn WifiControl>,
    pub capture_bin: String,
    pub capture_startup_budget: Duration,
}

impl Collaborators {
    pub fn new(
        gps: Arc<dyn GpsSource>,
        antenna: Arc<dyn AntennaDriver>,
        wifi: Arc<dyn WifiControl>,
        capture_bin: &str,
    ) -> Self {
        Self {
            gps,
            antenna,
            wifi,
            capture_bin: capture_bin.to_string(),
            capture_startup_budget: DEFAULT_STARTUP_BUDGET,
        }
    }
}

/// A completed capture session.
///
/// Owns its rotation schedule and artifact paths; finalized exactly once,
/// when the metadata row is written at session end.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub label: Option<String>,
    pub dir: PathBuf,
    pub interface: String,
    pub duration_secs: u64,
    pub position: PositionFix,
    pub schedule: RotationSchedule,
    pub stats: CaptureStats,
    pub paths: SessionPaths,
}

impl CaptureSession {
    /// The session's row in the append-only metadata log.
    pub fn meta_record(&self) -> MetaRecord {
        MetaRecord {
            name: self.label.clone().unwrap_or_default(),
            path: self.dir.display().to_string(),
            iface: self.interface.clone(),
            duration: self.duration_secs,
            pos_lat: self.position.lat,
            pos_lon: self.position.lon,
            pos_alt: self.position.alt,
            pos_lat_err: self.position.lat_err,
            pos_lon_err: self.position.lon_err,
            pos_alt_err: self.position.alt_err,
            start: self.schedule.rotation_start_time,
            end: self.schedule.rotation_end_time,
            degrees: self.schedule.sweep_degrees,
            bearing: self.schedule.start_bearing,
            pcap: self.paths.pcap.display().to_string(),
            nmea: self.paths.nmea.display().to_string(),
            coords: self.paths.coords.display().to_string(),
        }
    }
}

fn validate_session(cfg: &SessionConfig) -> Result<()> {
    if cfg.interface.is_empty() {
        return Err(RotodfError::Config("session interface must be set".to_string()));
    }
    if cfg.duration_secs == 0 {
        return Err(RotodfError::Config("session duration must be set".to_string()));
    }
    if !cfg.sweep_degrees.is_finite() || cfg.sweep_degrees < 0.0 {
        return Err(RotodfError::Config("sweep_degrees must be non-negative".to_string()));
    }
    Ok(())
}

/// Run one synchronized capture session.
///
/// Fatal errors before the start gate fires (bad parameters, unwritable
/// storage, the capture subprocess failing to prove liveness) abort the
/// whole session with no worker ever released. After the gate fires the run
/// always proceeds to its full duration; worker failures then surface at
/// result-collection time, and every worker is joined before this function
/// returns, success or not.
pub async fn run_session(
    cfg: &SessionConfig,
    storage_root: &Path,
    collab: Collaborators,
) -> Result<CaptureSession> {
    validate_session(cfg)?;

    // The interface and the motor cannot be shared; a second session waits
    // its turn instead of corrupting the one in flight.
    let _active = ACTIVE_SESSION.lock().await;

    // Monitor mode is a precondition of spawning anything.
    wifi::ensure_monitor(collab.wifi.as_ref(), &cfg.interface).await?;

    let (dir, base) = storage::create_session_dir(storage_root, cfg.label.as_deref())?;
    let paths = SessionPaths::new(&dir, &base);
    let duration = Duration::from_secs(cfg.duration_secs);

    info!(dir = %dir.display(), interface = %cfg.interface, "setting up session workers");

    let (init_trigger, init_gate) = gate::gate();
    let (start_trigger, start_gate) = gate::gate();
    let mut coordinator_gate = start_gate.clone();

    // Antenna rotator worker.
    let (antenna_tx, antenna_rx) = oneshot::channel();
    let h_antenna = {
        let driver = Arc::clone(&collab.antenna);
        let mut gate = start_gate.clone();
        let (start_bearing, sweep_degrees) = (cfg.start_bearing, cfg.sweep_degrees);
        tokio::spawn(async move {
            if gate.wait().await == GateWait::Abandoned {
                return;
            }
            let result = driver.sweep(start_bearing, sweep_degrees, duration).await;
            let _ = antenna_tx.send(result);
        })
    };

    // GPS logging worker.
    let (gps_tx, gps_rx) = oneshot::channel();
    let h_gps = {
        let source = Arc::clone(&collab.gps);
        let mut gate = start_gate.clone();
        let (nmea, coords) = (paths.nmea.clone(), paths.coords.clone());
        tokio::spawn(async move {
            if gate.wait().await == GateWait::Abandoned {
                return;
            }
            let result = source.record(duration, &nmea, &coords).await;
            let _ = gps_tx.send(result);
        })
    };

    // Channel hopper worker; produces no result.
    let h_hopper = {
        let ctl = Arc::clone(&collab.wifi);
        let mut gate = start_gate.clone();
        let iface = cfg.interface.clone();
        let channels = cfg.hop_channels.clone();
        let hop_interval = Duration::from_millis(cfg.hop_interval_ms);
        tokio::spawn(async move {
            if gate.wait().await == GateWait::Abandoned {
                return;
            }
            if let Err(err) = wifi::hop_channels(ctl.as_ref(), &iface, &channels, hop_interval, duration).await
            {
                warn!(error = %err, "channel hopper failed mid-session");
            }
        })
    };

    // Packet capture worker; owns the start trigger.
    let (capture_tx, capture_rx) = oneshot::channel();
    let h_capture = {
        let worker = CaptureWorker::new(
            &collab.capture_bin,
            &cfg.interface,
            cfg.duration_secs,
            paths.pcap.clone(),
        )
        .with_startup_budget(collab.capture_startup_budget);
        tokio::spawn(async move {
            let result = worker.run(init_gate, start_trigger).await;
            let _ = capture_tx.send(result);
        })
    };

    // Block until the GPS has a 3-D fix; the operator can cancel here and
    // nothing will have started.
    let fix_wait = {
        let gps = Arc::clone(&collab.gps);
        async move {
            let mut waited = 0u64;
            loop {
                let mode = gps.current_mode().await?;
                if mode.is_three_d() {
                    return Ok(());
                }
                info!(waited_secs = waited, ?mode, "waiting for 3D GPS fix (ctrl-c cancels)");
                sleep(Duration::from_secs(1)).await;
                waited += 1;
            }
        }
    };
    let fix_result: Result<()> = tokio::select! {
        result = fix_wait => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("session canceled by operator before start");
            Err(RotodfError::Interrupted)
        }
    };
    if let Err(err) = fix_result {
        // Dropping the init trigger unwinds every worker unreleased.
        drop(init_trigger);
        join_workers(h_hopper, h_antenna, h_gps, h_capture).await;
        return Err(err);
    }

    // Phase one: tell the capture worker to spawn its subprocess.
    info!("triggering capture initialization");
    init_trigger.release();

    // Phase two: the capture worker fires the start gate once frames are
    // provably flowing.
    match timeout(
        collab.capture_startup_budget + STARTUP_GRACE,
        coordinator_gate.wait(),
    )
    .await
    {
        Ok(GateWait::Released) => {
            info!(duration_secs = cfg.duration_secs, "start gate released; session running");
        }
        Ok(GateWait::Abandoned) => {
            let err = match capture_rx.await {
                Ok(Err(err)) => err,
                _ => RotodfError::WorkerTimeout { worker: "capture" },
            };
            join_workers(h_hopper, h_antenna, h_gps, h_capture).await;
            return Err(err);
        }
        Err(_) => {
            h_capture.abort();
            join_workers(h_hopper, h_antenna, h_gps, h_capture).await;
            return Err(RotodfError::WorkerTimeout { worker: "capture" });
        }
    }

    // The run itself needs no coordination: every worker measures its own
    // window. The extra second mirrors the capture subprocess bound.
    sleep(duration + Duration::from_secs(1)).await;

    // Bounded result collection, fixed order. A crashed or hung worker
    // becomes a WorkerTimeout instead of blocking the session forever.
    let margin = Duration::from_secs(cfg.result_margin_secs);
    let window = collect("antenna", antenna_rx, margin).await;
    let position = collect("gps", gps_rx, margin).await;
    let stats = collect("capture", capture_rx, margin).await;

    // All workers are joined even when a result is missing, so no task
    // outlives its session.
    join_workers(h_hopper, h_antenna, h_gps, h_capture).await;

    let window = window?;
    let position = position?;
    let stats = stats?;

    let schedule = RotationSchedule::new(
        cfg.start_bearing,
        cfg.sweep_degrees,
        cfg.duration_secs,
        window.started_at,
        window.ended_at,
    )?;

    let session = CaptureSession {
        label: cfg.label.clone(),
        dir,
        interface: cfg.interface.clone(),
        duration_secs: cfg.duration_secs,
        position,
        schedule,
        stats,
        paths,
    };

    storage::write_meta(&session.paths.meta, &session.meta_record())?;
    info!(
        captured = stats.captured,
        dropped = stats.dropped,
        dir = %session.dir.display(),
        "session complete"
    );

    Ok(session)
}

async fn collect<T>(
    worker: &'static str,
    rx: oneshot::Receiver<Result<T>>,
    margin: Duration,
) -> Result<T> {
    match timeout(margin, rx).await {
        Ok(Ok(result)) => result,
        // Receiver error: the worker crashed without reporting.
        Ok(Err(_)) => Err(RotodfError::WorkerTimeout { worker }),
        Err(_) => Err(RotodfError::WorkerTimeout { worker }),
    }
}

async fn join_workers(
    hopper: JoinHandle<()>,
    antenna: JoinHandle<()>,
    gps: JoinHandle<()>,
    capture: JoinHandle<()>,
) {
    for (worker, handle) in [
        ("hopper", hopper),
        ("antenna", antenna),
        ("gps", gps),
        ("capture", capture),
    ] {
        let abort = handle.abort_handle();
        if timeout(JOIN_GRACE, handle).await.is_err() {
            warn!(worker, "worker task did not terminate; aborting");
            abort.abort();
        }
    }
}
