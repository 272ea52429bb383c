//! Uploader configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/partup/uploader.toml`
//! - Windows: `%APPDATA%/partup/uploader.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use partup_protocol::DEFAULT_PROXY_PORT;
use partup_worker::{DEFAULT_TRANSMISSION_UNIT, FailurePolicy, ProxyConfig, WorkerConfig};
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upload server address.
    #[serde(default = "default_server_host")]
    pub server_host: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Tunnel through an HTTP proxy with CONNECT.
    #[serde(default)]
    pub use_proxy: bool,

    #[serde(default)]
    pub proxy_host: String,

    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,

    /// Transfer buffer size in bytes; also the largest accepted part.
    #[serde(default = "default_transmission_unit")]
    pub transmission_unit: usize,

    /// Number of upload workers sharing the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_connected_interval_ms")]
    pub connected_interval_ms: u64,

    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Consecutive failed connects before a worker stops (unset = forever).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connect_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_timeout_ms: Option<u64>,

    /// Push failed parts back onto the queue instead of dropping them.
    #[serde(default)]
    pub requeue_on_failure: bool,

    /// File of job lines enqueued at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs_file: Option<PathBuf>,
}

fn default_server_host() -> String {
    "127.0.0.1".into()
}

fn default_server_port() -> u16 {
    9000
}

fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

fn default_transmission_unit() -> usize {
    DEFAULT_TRANSMISSION_UNIT
}

fn default_workers() -> usize {
    4
}

fn default_connected_interval_ms() -> u64 {
    100
}

fn default_idle_interval_ms() -> u64 {
    500
}

fn default_retry_interval_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
            use_proxy: false,
            proxy_host: String::new(),
            proxy_port: default_proxy_port(),
            transmission_unit: default_transmission_unit(),
            workers: default_workers(),
            connected_interval_ms: default_connected_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_connect_attempts: None,
            connect_timeout_ms: None,
            write_timeout_ms: None,
            requeue_on_failure: false,
            jobs_file: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform default), creating
    /// a default file if none exists.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p,
            None => config_path()?,
        };

        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save(&path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.transmission_unit == 0 {
            anyhow::bail!("transmission_unit must be greater than 0");
        }
        if self.use_proxy && self.proxy_host.is_empty() {
            anyhow::bail!("use_proxy is set but proxy_host is empty");
        }
        Ok(())
    }

    /// Per-worker settings derived from this configuration.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            transmission_unit: self.transmission_unit,
            server_host: self.server_host.clone(),
            server_port: self.server_port,
            proxy: self.use_proxy.then(|| ProxyConfig {
                host: self.proxy_host.clone(),
                port: self.proxy_port,
            }),
            connected_interval: Duration::from_millis(self.connected_interval_ms),
            idle_interval: Duration::from_millis(self.idle_interval_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_connect_attempts: self.max_connect_attempts,
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            write_timeout: self.write_timeout_ms.map(Duration::from_millis),
            failure_policy: if self.requeue_on_failure {
                FailurePolicy::Requeue
            } else {
                FailurePolicy::Abandon
            },
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("partup").join("uploader.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("partup")
            .join("uploader.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.proxy_port, 80);
        assert_eq!(config.workers, 4);
        assert_eq!(config.connected_interval_ms, 100);
        assert_eq!(config.idle_interval_ms, 500);
        assert!(!config.use_proxy);
        assert!(!config.requeue_on_failure);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
            server_host = "203.0.113.10"
            server_port = 7000
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server_host, "203.0.113.10");
        assert_eq!(config.server_port, 7000);
        assert_eq!(config.transmission_unit, DEFAULT_TRANSMISSION_UNIT);
        assert!(config.max_connect_attempts.is_none());
    }

    #[test]
    fn worker_config_mapping() {
        let config = Config {
            use_proxy: true,
            proxy_host: "10.0.0.1".into(),
            retry_interval_ms: 250,
            write_timeout_ms: Some(3000),
            max_connect_attempts: Some(10),
            requeue_on_failure: true,
            ..Config::default()
        };

        let worker = config.worker_config();
        assert_eq!(
            worker.proxy,
            Some(ProxyConfig {
                host: "10.0.0.1".into(),
                port: 80
            })
        );
        assert_eq!(worker.retry_interval, Duration::from_millis(250));
        assert_eq!(worker.write_timeout, Some(Duration::from_secs(3)));
        assert!(worker.connect_timeout.is_none());
        assert_eq!(worker.max_connect_attempts, Some(10));
        assert_eq!(worker.failure_policy, FailurePolicy::Requeue);
    }

    #[test]
    fn proxy_disabled_maps_to_none() {
        let config = Config {
            proxy_host: "ignored".into(),
            ..Config::default()
        };
        assert!(config.worker_config().proxy.is_none());
    }

    #[test]
    fn load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("uploader.toml");

        let config = Config::load(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(config.server_port, 9000);

        let reloaded = Config::load(Some(path)).unwrap();
        assert_eq!(reloaded.workers, config.workers);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "workers = 0\n").unwrap();
        assert!(Config::load(Some(path.clone())).is_err());

        std::fs::write(&path, "use_proxy = true\n").unwrap();
        assert!(Config::load(Some(path)).is_err());
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path().unwrap();
        assert!(path.to_string_lossy().contains("partup"));
    }
}
