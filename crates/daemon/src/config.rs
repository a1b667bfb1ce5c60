//! Daemon configuration

use crate::collector::CollectorConfig;
use crate::supervisor::SupervisorConfig;
use anyhow::Context;
use gridshim_common::BackoffPolicy;
use gridshim_web::{ApiServerConfig, UpstreamConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API listener
    pub server: ServerConfig,

    /// Upstream management API
    pub upstream: UpstreamSection,

    /// Local script exec endpoint
    pub invoker: InvokerConfig,

    /// Script names and timeouts
    pub scripts: ScriptsConfig,

    /// Files read by the daemon
    pub paths: PathsConfig,

    /// Timers
    pub intervals: IntervalsConfig,

    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:26750".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub base_url: String,
    pub wapi_version: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            base_url: "https://127.0.0.1".to_string(),
            wapi_version: "v2.12".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 999,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    pub inject_redirection: String,
    pub remove_redirection: String,
    pub hotfix_manifest: String,
    pub grid_data: String,
    pub redirection_timeout_secs: u64,
    pub hotfix_timeout_secs: u64,
    pub grid_data_timeout_secs: u64,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            inject_redirection: "inject_http_redirection".to_string(),
            remove_redirection: "remove_http_redirection".to_string(),
            hotfix_manifest: "trigger_hotfix_manifest".to_string(),
            grid_data: "collect_grid_data".to_string(),
            redirection_timeout_secs: 60,
            hotfix_timeout_secs: 30,
            grid_data_timeout_secs: 200,
        }
    }
}

impl ScriptsConfig {
    pub fn redirection_timeout(&self) -> Duration {
        Duration::from_secs(self.redirection_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub param_file: PathBuf,
    pub manifest_file: PathBuf,
    pub hotfix_dir: PathBuf,
    /// Developer override file, `{"log.level": "debug"}`
    pub test_conf_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            param_file: PathBuf::from("/etc/onprem.d/params.json"),
            manifest_file: PathBuf::from("/etc/onprem.d/hotfix_manifest.json"),
            hotfix_dir: PathBuf::from("/etc/onprem.d/hotfix/"),
            test_conf_file: PathBuf::from("/etc/onprem.d/test.conf"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub startup_delay_secs: u64,
    pub hotfix_secs: u64,
    pub supervision_secs: u64,
    pub cooldown_secs: u64,
    pub watch_timeout_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 10,
            hotfix_secs: 5 * 60,
            supervision_secs: 5 * 60,
            cooldown_secs: 60,
            watch_timeout_secs: 10 * 60,
        }
    }
}

impl IntervalsConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// debug, info, warn, error
    pub level: String,
    /// json or text
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TestConf {
    #[serde(rename = "log.level")]
    log_level: Option<String>,
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Log level to use: the developer override file wins over the configured level.
    pub fn effective_log_level(&self) -> String {
        log_level_override(&self.paths.test_conf_file).unwrap_or_else(|| self.log.level.clone())
    }

    pub fn server_address(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .address
            .parse()
            .with_context(|| format!("invalid server address {:?}", self.server.address))
    }

    pub fn api_server_config(&self) -> anyhow::Result<ApiServerConfig> {
        Ok(ApiServerConfig {
            address: self.server_address()?,
            manifest_file: self.paths.manifest_file.clone(),
            hotfix_dir: self.paths.hotfix_dir.clone(),
            upstream: UpstreamConfig {
                base_url: self.upstream.base_url.clone(),
                wapi_version: self.upstream.wapi_version.clone(),
                timeout: Duration::from_secs(self.upstream.timeout_secs),
            },
            login_policy: BackoffPolicy::login(),
            shutdown_timeout: Duration::from_secs(5),
        })
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            grid_data_script: self.scripts.grid_data.clone(),
            hotfix_script: self.scripts.hotfix_manifest.clone(),
            grid_data_timeout: Duration::from_secs(self.scripts.grid_data_timeout_secs),
            hotfix_timeout: Duration::from_secs(self.scripts.hotfix_timeout_secs),
            hotfix_interval: Duration::from_secs(self.intervals.hotfix_secs),
            ..Default::default()
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            interval: Duration::from_secs(self.intervals.supervision_secs),
            cooldown: Duration::from_secs(self.intervals.cooldown_secs),
        }
    }
}

/// Level from the developer override file, if present and readable.
pub fn log_level_override(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<TestConf>(&content) {
        Ok(conf) => conf.log_level.filter(|l| !l.is_empty()),
        Err(e) => {
            debug!("Ignoring malformed {}: {}", path.display(), e);
            None
        }
    }
}
