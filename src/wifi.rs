//! # Wireless Interface Control
//!
//! Thin seam over the system wireless tools: interface mode queries, the
//! switch into monitor mode, and per-channel tuning for the hopper worker.

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info};

use crate::error::{Result, RotodfError};

/// Trait for wireless interface control
#[async_trait]
pub trait WifiControl: Send + Sync {
    /// Current interface mode (`managed`, `monitor`, ...).
    async fn interface_mode(&self, iface: &str) -> Result<String>;

    /// Switch the interface into monitor mode.
    async fn set_monitor(&self, iface: &str) -> Result<()>;

    /// Tune the interface to a channel.
    async fn set_channel(&self, iface: &str, channel: u32) -> Result<()>;
}

/// `iw`/`ip` backed implementation.
#[derive(Debug, Clone)]
pub struct IwControl {
    iw_bin: String,
    ip_bin: String,
}

impl IwControl {
    pub fn new(iw_bin: &str, ip_bin: &str) -> Self {
        Self {
            iw_bin: iw_bin.to_string(),
            ip_bin: ip_bin.to_string(),
        }
    }
}

async fn run_tool(bin: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(bin).args(args).output().await?;
    if !output.status.success() {
        return Err(RotodfError::Wifi(format!(
            "{} {} failed: {}",
            bin,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pull the `type` line out of `iw dev <iface> info` output.
fn parse_mode_output(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("type "))
        .map(|mode| mode.trim().to_string())
}

#[async_trait]
impl WifiControl for IwControl {
    async fn interface_mode(&self, iface: &str) -> Result<String> {
        let output = run_tool(&self.iw_bin, &["dev", iface, "info"]).await?;
        parse_mode_output(&output).ok_or_else(|| {
            RotodfError::Wifi(format!("could not determine mode of {}", iface))
        })
    }

    async fn set_monitor(&self, iface: &str) -> Result<()> {
        // The link must be down while the type changes.
        run_tool(&self.ip_bin, &["link", "set", iface, "down"]).await?;
        run_tool(&self.iw_bin, &["dev", iface, "set", "type", "monitor"]).await?;
        run_tool(&self.ip_bin, &["link", "set", iface, "up"]).await?;
        info!(iface, "interface switched to monitor mode");
        Ok(())
    }

    async fn set_channel(&self, iface: &str, channel: u32) -> Result<()> {
        run_tool(
            &self.iw_bin,
            &["dev", iface, "set", "channel", &channel.to_string()],
        )
        .await?;
        Ok(())
    }
}

/// Put the interface into monitor mode if it is not there already.
///
/// # Errors
///
/// Returns [`RotodfError::Wifi`] if the interface cannot be queried or
/// refuses to enter monitor mode.
pub async fn ensure_monitor(ctl: &dyn WifiControl, iface: &str) -> Result<()> {
    if ctl.interface_mode(iface).await? == "monitor" {
        return Ok(());
    }
    ctl.set_monitor(iface).await?;
    let mode = ctl.interface_mode(iface).await?;
    if mode != "monitor" {
        return Err(RotodfError::Wifi(format!(
            "{} stayed in {} mode after monitor switch",
            iface, mode
        )));
    }
    Ok(())
}

/// Channel-hopper run loop: cycle `channels` on a fixed dwell until the
/// run window elapses. Measures its own elapsed time; produces no result
/// beyond the hop count.
pub async fn hop_channels(
    ctl: &dyn WifiControl,
    iface: &str,
    channels: &[u32],
    hop_interval: Duration,
    duration: Duration,
) -> Result<u64> {
    let started = Instant::now();
    let mut hops = 0u64;

    for &channel in channels.iter().cycle() {
        if started.elapsed() >= duration {
            break;
        }
        ctl.set_channel(iface, channel).await?;
        hops += 1;
        let remaining = duration.saturating_sub(started.elapsed());
        sleep(hop_interval.min(remaining)).await;
    }

    debug!(hops, "channel hopper finished");
    Ok(hops)
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Mock wireless control recording every call.
    #[derive(Debug, Default)]
    pub struct MockWifi {
        pub mode: Mutex<String>,
        pub channels_set: Mutex<Vec<u32>>,
    }

    impl MockWifi {
        pub fn in_mode(mode: &str) -> Self {
            Self {
                mode: Mutex::new(mode.to_string()),
                channels_set: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WifiControl for MockWifi {
        async fn interface_mode(&self, _iface: &str) -> Result<String> {
            Ok(self.mode.lock().unwrap().clone())
        }

        async fn set_monitor(&self, _iface: &str) -> Result<()> {
            *self.mode.lock().unwrap() = "monitor".to_string();
            Ok(())
        }

        async fn set_channel(&self, _iface: &str, channel: u32) -> Result<()> {
            self.channels_set.lock().unwrap().push(channel);
            Ok(())
        }
    }

    /// Mock wireless control stuck in managed mode.
    #[derive(Debug, Default)]
    pub struct StubbornWifi;

    #[async_trait]
    impl WifiControl for StubbornWifi {
        async fn interface_mode(&self, _iface: &str) -> Result<String> {
            Ok("managed".to_string())
        }

        async fn set_monitor(&self, _iface: &str) -> Result<()> {
            Ok(())
        }

        async fn set_channel(&self, _iface: &str, _channel: u32) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocks::{MockWifi, StubbornWifi};

    const IW_INFO: &str = "Interface wlan0\n\tifindex 3\n\twdev 0x1\n\taddr aa:bb:cc:dd:ee:ff\n\ttype monitor\n\tchannel 6 (2437 MHz)\n";

    #[test]
    fn test_parse_mode_output() {
        assert_eq!(parse_mode_output(IW_INFO).as_deref(), Some("monitor"));
        assert_eq!(parse_mode_output("Interface wlan0\n"), None);
    }

    #[tokio::test]
    async fn test_ensure_monitor_switches_when_managed() {
        let ctl = MockWifi::in_mode("managed");
        ensure_monitor(&ctl, "wlan0").await.unwrap();
        assert_eq!(*ctl.mode.lock().unwrap(), "monitor");
    }

    #[tokio::test]
    async fn test_ensure_monitor_noop_when_already_monitor() {
        let ctl = MockWifi::in_mode("monitor");
        ensure_monitor(&ctl, "wlan0").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_monitor_fails_when_mode_sticks() {
        let ctl = StubbornWifi;
        let err = ensure_monitor(&ctl, "wlan0").await.unwrap_err();
        assert!(matches!(err, RotodfError::Wifi(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hopper_cycles_channels_for_duration() {
        let ctl = MockWifi::in_mode("monitor");
        let hops = hop_channels(
            &ctl,
            "wlan0",
            &[1, 6, 11],
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(hops, 10);
        let set = ctl.channels_set.lock().unwrap();
        assert_eq!(set.len(), 10);
        assert_eq!(&set[..6], &[1, 6, 11, 1, 6, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hopper_stops_at_window_end() {
        let ctl = MockWifi::in_mode("monitor");
        let hops = hop_channels(
            &ctl,
            "wlan0",
            &[1],
            Duration::from_millis(400),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        // Dwells at 0ms, 400ms, 800ms; the window closes at 1s.
        assert_eq!(hops, 3);
    }
}
