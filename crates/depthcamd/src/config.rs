use depthcam_core::{CompatMode, DepthUnits, NodeSettings};
use std::str::FromStr;

/// Which D-Bus bus to serve the status interface on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    Session,
    System,
    Off,
}

impl FromStr for BusMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(BusMode::Session),
            "system" => Ok(BusMode::System),
            "off" | "0" | "none" => Ok(BusMode::Off),
            other => Err(format!("unknown bus '{other}'")),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Device spec passed to `open_device` (default: synthetic).
    pub device: String,
    /// Device name used in frame ids and topics.
    pub device_name: String,
    /// Calibration URL for the color stream; empty means uncalibrated.
    pub rgb_info_url: String,
    /// Calibration URL for the depth stream; empty means uncalibrated.
    pub depth_info_url: String,
    pub depth_units: DepthUnits,
    pub compat: CompatMode,
    /// Per-topic queue depth.
    pub queue_depth: usize,
    /// Frame rate of the synthetic device.
    pub fps: u32,
    pub bus: BusMode,
    /// Seconds between per-stream rate reports.
    pub stats_interval_secs: u64,
}

impl Config {
    /// Load configuration from `DEPTHCAM_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let compat = match lookup("DEPTHCAM_LEGACY_COMPAT").as_deref() {
            Some("1") | Some("true") => CompatMode::Legacy,
            _ => CompatMode::Corrected,
        };

        Self {
            device: string("DEPTHCAM_DEVICE", "synthetic"),
            device_name: string("DEPTHCAM_NAME", "kinect2"),
            rgb_info_url: string("DEPTHCAM_RGB_INFO_URL", ""),
            depth_info_url: string("DEPTHCAM_DEPTH_INFO_URL", ""),
            depth_units: parse_or(&lookup, "DEPTHCAM_DEPTH_UNITS", DepthUnits::Meters),
            compat,
            queue_depth: parse_or(&lookup, "DEPTHCAM_QUEUE_DEPTH", 1),
            fps: parse_or(&lookup, "DEPTHCAM_FPS", 30),
            bus: parse_or(&lookup, "DEPTHCAM_DBUS", BusMode::Session),
            stats_interval_secs: parse_or(&lookup, "DEPTHCAM_STATS_INTERVAL_SECS", 5),
        }
    }

    pub fn node_settings(&self) -> NodeSettings {
        NodeSettings {
            device_name: self.device_name.clone(),
            rgb_info_url: self.rgb_info_url.clone(),
            depth_info_url: self.depth_info_url.clone(),
            queue_depth: self.queue_depth,
            depth_units: self.depth_units,
            compat: self.compat,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid value; using default");
            default
        }),
    }
}
