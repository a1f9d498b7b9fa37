use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunlensError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub otlp_grpc_addr: String,
    pub otlp_http_addr: String,
    pub migration_batch_size: usize,
    pub fanout_channel_capacity: usize,
    pub legacy_warning_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("runlens/runlens.duckdb"),
            otlp_grpc_addr: "127.0.0.1:4317".to_string(),
            otlp_http_addr: "127.0.0.1:4318".to_string(),
            migration_batch_size: 100,
            fanout_channel_capacity: 256,
            legacy_warning_window: Duration::from_secs(5 * 60),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    otlp_grpc_addr: Option<String>,
    otlp_http_addr: Option<String>,
    migration_batch_size: Option<usize>,
    fanout_channel_capacity: Option<usize>,
    legacy_warning_window: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("RUNLENS_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("runlens/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| RunlensError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| RunlensError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let migration_batch_size = match env::var("RUNLENS_MIGRATION_BATCH_SIZE") {
        Ok(v) => Some(v.parse::<usize>().map_err(|e| {
            RunlensError::Config(format!("bad RUNLENS_MIGRATION_BATCH_SIZE in environment: {e}"))
        })?),
        Err(_) => None,
    };
    let fanout_channel_capacity = match env::var("RUNLENS_FANOUT_CHANNEL_CAPACITY") {
        Ok(v) => Some(v.parse::<usize>().map_err(|e| {
            RunlensError::Config(format!(
                "bad RUNLENS_FANOUT_CHANNEL_CAPACITY in environment: {e}"
            ))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        db_path: env::var("RUNLENS_DB_PATH").ok().map(PathBuf::from),
        otlp_grpc_addr: env::var("RUNLENS_OTLP_GRPC_ADDR").ok(),
        otlp_http_addr: env::var("RUNLENS_OTLP_HTTP_ADDR").ok(),
        migration_batch_size,
        fanout_channel_capacity,
        legacy_warning_window: env::var("RUNLENS_LEGACY_WARNING_WINDOW").ok(),
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.otlp_grpc_addr {
        cfg.otlp_grpc_addr = v;
    }
    if let Some(v) = overrides.otlp_http_addr {
        cfg.otlp_http_addr = v;
    }
    if let Some(v) = overrides.migration_batch_size {
        if v == 0 {
            return Err(RunlensError::Config(format!(
                "migration_batch_size in {source} must be positive"
            )));
        }
        cfg.migration_batch_size = v;
    }
    if let Some(v) = overrides.fanout_channel_capacity {
        cfg.fanout_channel_capacity = v;
    }
    if let Some(v) = overrides.legacy_warning_window {
        cfg.legacy_warning_window = humantime::parse_duration(&v).map_err(|e| {
            RunlensError::Config(format!(
                "bad legacy_warning_window in {source}: {e} (value={v})"
            ))
        })?;
    }
    Ok(())
}
