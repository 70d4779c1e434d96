use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::placement::PlacementOptions;

/// libcurl tuning for the built-in transport (optional `[transport]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Seconds allowed for establishing a connection.
    pub connect_timeout_secs: u64,
    /// Bytes per second below which a transfer counts as stalled.
    pub low_speed_limit: u32,
    /// Seconds a transfer may stay under `low_speed_limit` before it fails.
    pub low_speed_time_secs: u64,
    pub max_redirections: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            max_redirections: 10,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn low_speed_time(&self) -> Duration {
        Duration::from_secs(self.low_speed_time_secs)
    }
}

/// Global configuration loaded from `~/.config/dlq/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Maximum number of transfers running at once.
    pub concurrency_limit: usize,
    /// Directory for partial artifacts. None = `$XDG_CACHE_HOME/dlq/partial`.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub placement: PlacementOptions,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            temp_dir: None,
            placement: PlacementOptions::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl DlqConfig {
    /// Configured temp dir, or the XDG cache default (created if missing).
    pub fn resolved_temp_dir(&self) -> Result<PathBuf> {
        let dir = match &self.temp_dir {
            Some(dir) => dir.clone(),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
                xdg_dirs.get_cache_home().join("partial")
            }
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DlqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DlqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DlqConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = DlqConfig::default();
        assert_eq!(cfg.concurrency_limit, 4);
        assert!(cfg.temp_dir.is_none());
        assert!(cfg.placement.overwrite);
        assert!(cfg.placement.create_dirs);
        assert_eq!(cfg.transport.connect_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.transport.max_redirections, 10);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = DlqConfig {
            temp_dir: Some(PathBuf::from("/var/tmp/dlq")),
            ..DlqConfig::default()
        };
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DlqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn config_toml_minimal() {
        let cfg: DlqConfig = toml::from_str("concurrency_limit = 2").unwrap();
        assert_eq!(cfg.concurrency_limit, 2);
        assert_eq!(cfg.placement, PlacementOptions::default());
        assert_eq!(cfg.transport, TransportConfig::default());
    }

    #[test]
    fn config_toml_sections() {
        let toml = r#"
            concurrency_limit = 8
            temp_dir = "/tmp/partials"

            [placement]
            overwrite = false

            [transport]
            low_speed_limit = 512
            max_redirections = 3
        "#;
        let cfg: DlqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.concurrency_limit, 8);
        assert_eq!(cfg.temp_dir.as_deref(), Some(std::path::Path::new("/tmp/partials")));
        assert!(!cfg.placement.overwrite);
        assert!(cfg.placement.create_dirs);
        assert_eq!(cfg.transport.low_speed_limit, 512);
        assert_eq!(cfg.transport.max_redirections, 3);
        assert_eq!(cfg.transport.low_speed_time_secs, 60);
    }

    #[test]
    fn default_temp_dir_sits_under_dlq_cache() {
        let dir = DlqConfig::default().resolved_temp_dir().unwrap();
        assert!(dir.ends_with("dlq/partial"), "{}", dir.display());
        assert!(!dir.ends_with("dlq/dlq/partial"), "{}", dir.display());
    }

    #[test]
    fn configured_temp_dir_is_created() {
        let root = tempfile::tempdir().unwrap();
        let cfg = DlqConfig {
            temp_dir: Some(root.path().join("parts")),
            ..DlqConfig::default()
        };
        assert_eq!(cfg.resolved_temp_dir().unwrap(), root.path().join("parts"));
        assert!(root.path().join("parts").is_dir());
    }
}
