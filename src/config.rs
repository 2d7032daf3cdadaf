use ipnetwork::IpNetwork;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Refresh period used when neither the config file nor the CLI sets one.
pub const DEFAULT_REFRESH_SECONDS: u64 = 5;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub monitoring: MonitoringConfig,
    pub dns: DnsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitoringConfig {
    pub refresh_interval_seconds: u64,
    pub include_ipv6: bool,
    /// CIDR ranges whose remote endpoints never enter a snapshot.
    pub exclude_networks: Vec<String>,
    /// Inactive records older than this are dropped. `None` keeps them forever.
    pub inactive_retention_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DnsConfig {
    /// 0 disables the bound and waits for the system resolver.
    pub lookup_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_file: PathBuf,
    pub log_level: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            refresh_interval_seconds: DEFAULT_REFRESH_SECONDS,
            include_ipv6: true,
            exclude_networks: Vec::new(),
            inactive_retention_seconds: None,
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            lookup_timeout_ms: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_file: std::env::temp_dir().join("connwatch.log"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Loads `explicit` if given, else `./connwatch.yaml` when present, else defaults.
    /// A file that fails to parse falls back to defaults.
    pub fn discover(explicit: Option<&Path>) -> (Self, Option<PathBuf>) {
        let candidate = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let local = Path::new("connwatch.yaml");
                local.exists().then(|| local.to_path_buf())
            }
        };

        match candidate {
            Some(path) => match Config::load(&path) {
                Ok(cfg) => (cfg, Some(path)),
                Err(e) => {
                    warn!("Failed to load config {} ({}), using defaults", path.display(), e);
                    (Config::default(), None)
                }
            },
            None => (Config::default(), None),
        }
    }

    /// Refresh interval with the zero case clamped to one second.
    pub fn refresh_interval_seconds(&self) -> u64 {
        if self.monitoring.refresh_interval_seconds == 0 {
            warn!("refresh_interval_seconds = 0 is not allowed, using 1");
            1
        } else {
            self.monitoring.refresh_interval_seconds
        }
    }

    /// Parses `exclude_networks`, skipping and logging entries that are not valid CIDR.
    pub fn excluded_networks(&self) -> Vec<IpNetwork> {
        let mut networks = Vec::new();
        for range in &self.monitoring.exclude_networks {
            match range.parse::<IpNetwork>() {
                Ok(network) => networks.push(network),
                Err(e) => warn!("Failed to parse network '{}': {}", range, e),
            }
        }
        networks
    }
}
