//! modelgate.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::types::SELECTOR_SPACE;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub routing: RoutingConfig,
    pub capacity: CapacityConfig,
    pub signal: SignalConfig,
    pub provisioner: ProvisionerConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file, relative to the data directory unless absolute.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("modelgate.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub session_ttl: String,
    /// Selectors below this value route to the small tier while it is active.
    pub small_slots: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            session_ttl: "1h".to_string(),
            small_slots: SELECTOR_SPACE,
        }
    }
}

impl RoutingConfig {
    pub fn session_ttl(&self) -> Duration {
        duration_or(&self.session_ttl, "routing.session_ttl", Duration::from_secs(3600))
    }

    pub fn small_slots(&self) -> u8 {
        self.small_slots.min(SELECTOR_SPACE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Baseline load magnitude above which scale-up triggers.
    pub threshold_bytes: u64,
    pub scale_up_interval: String,
    pub scale_down_interval: String,
    /// Added to a tier's declared latency to form its readiness timeout.
    pub readiness_grace: String,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 256 * 1024,
            scale_up_interval: "10s".to_string(),
            scale_down_interval: "20s".to_string(),
            readiness_grace: "30s".to_string(),
        }
    }
}

impl CapacityConfig {
    pub fn scale_up_interval(&self) -> Duration {
        duration_or(&self.scale_up_interval, "capacity.scale_up_interval", Duration::from_secs(10))
    }

    pub fn scale_down_interval(&self) -> Duration {
        duration_or(
            &self.scale_down_interval,
            "capacity.scale_down_interval",
            Duration::from_secs(20),
        )
    }

    pub fn readiness_grace(&self) -> Duration {
        duration_or(&self.readiness_grace, "capacity.readiness_grace", Duration::from_secs(30))
    }
}

/// Which load signal drives the capacity controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    LogVolume,
    RequestRate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub kind: SignalKind,
    pub log_dir: PathBuf,
    pub window: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            kind: SignalKind::LogVolume,
            log_dir: PathBuf::from(".logs"),
            window: "30s".to_string(),
        }
    }
}

impl SignalConfig {
    pub fn window(&self) -> Duration {
        duration_or(&self.window, "signal.window", Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub large_warmup: String,
    pub small_warmup: String,
    pub teardown: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            large_warmup: "100s".to_string(),
            small_warmup: "20s".to_string(),
            teardown: "5s".to_string(),
        }
    }
}

impl ProvisionerConfig {
    pub fn large_warmup(&self) -> Duration {
        duration_or(&self.large_warmup, "provisioner.large_warmup", Duration::from_secs(100))
    }

    pub fn small_warmup(&self) -> Duration {
        duration_or(&self.small_warmup, "provisioner.small_warmup", Duration::from_secs(20))
    }

    pub fn teardown(&self) -> Duration {
        duration_or(&self.teardown, "provisioner.teardown", Duration::from_secs(5))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub small_latency: String,
    pub large_latency: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            small_latency: "1s".to_string(),
            large_latency: "2s".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn small_latency(&self) -> Duration {
        duration_or(&self.small_latency, "backend.small_latency", Duration::from_secs(1))
    }

    pub fn large_latency(&self) -> Duration {
        duration_or(&self.large_latency, "backend.large_latency", Duration::from_secs(2))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".logs"),
            json: false,
        }
    }
}

impl GateConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GateConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Signal window as the controller should use it: never shorter than
    /// the scale-up poll interval, so every poll sees a full window of load.
    pub fn signal_window(&self) -> Duration {
        let window = self.signal.window();
        let interval = self.capacity.scale_up_interval();
        if window < interval {
            warn!(?window, ?interval, "signal.window shorter than scale_up_interval, widening");
            interval
        } else {
            window
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "500ms", "5s", "2m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn duration_or(raw: &str, field: &str, default: Duration) -> Duration {
    parse_duration(raw).unwrap_or_else(|| {
        warn!(field, value = raw, ?default, "invalid duration, using default");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SELECTOR_SPACE;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = GateConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.capacity.threshold_bytes, 262_144);
        assert_eq!(config.routing.session_ttl(), Duration::from_secs(3600));
        assert_eq!(config.routing.small_slots(), SELECTOR_SPACE);
        assert_eq!(config.signal.kind, SignalKind::LogVolume);
        assert_eq!(config.provisioner.small_warmup(), Duration::from_secs(20));
    }

    #[test]
    fn parse_partial_file() {
        let toml_str = r#"
[capacity]
threshold_bytes = 1048576
scale_up_interval = "500ms"

[signal]
kind = "request_rate"
window = "1m"
"#;
        let config: GateConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.capacity.threshold_bytes, 1_048_576);
        assert_eq!(config.capacity.scale_up_interval(), Duration::from_millis(500));
        // Untouched fields keep their defaults.
        assert_eq!(config.capacity.scale_down_interval(), Duration::from_secs(20));
        assert_eq!(config.signal.kind, SignalKind::RequestRate);
        assert_eq!(config.signal.window(), Duration::from_secs(60));
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = GateConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("threshold_bytes"));
        let parsed: GateConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }

    #[test]
    fn small_slots_clamped_to_selector_space() {
        let routing = RoutingConfig {
            small_slots: 200,
            ..Default::default()
        };
        assert_eq!(routing.small_slots(), SELECTOR_SPACE);
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn overflowing_duration_is_invalid() {
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        assert_eq!(parse_duration(&format!("{}h", u64::MAX / 1000)), None);
        let routing = RoutingConfig {
            session_ttl: format!("{}h", u64::MAX),
            ..Default::default()
        };
        assert_eq!(routing.session_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn signal_window_covers_scale_up_interval() {
        let mut config = GateConfig::default();
        assert!(config.signal_window() >= config.capacity.scale_up_interval());

        config.signal.window = "5s".to_string();
        assert_eq!(config.signal_window(), Duration::from_secs(10));

        config.signal.window = "1m".to_string();
        assert_eq!(config.signal_window(), Duration::from_secs(60));
    }

    #[test]
    fn invalid_duration_falls_back() {
        let capacity = CapacityConfig {
            readiness_grace: "whenever".to_string(),
            ..Default::default()
        };
        assert_eq!(capacity.readiness_grace(), Duration::from_secs(30));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped: GateConfig =
            toml::from_str(include_str!("../../../modelgate.toml")).unwrap();
        assert_eq!(
            shipped.to_toml_string().unwrap(),
            GateConfig::default().to_toml_string().unwrap()
        );
    }
}
