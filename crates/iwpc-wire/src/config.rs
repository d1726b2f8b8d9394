//! Configuration loading from `iwpc.toml` with defaults.

use iwpc_types::{IwpcConfig, IwpcError, IwpcResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File read by [`load_config`] when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "iwpc.toml";

/// Environment variable overriding the default config location.
pub const CONFIG_ENV_VAR: &str = "IWPC_CONFIG";

/// Parse a TOML document into a config. Unset keys keep their defaults.
pub fn parse_config(contents: &str) -> IwpcResult<IwpcConfig> {
    let config: IwpcConfig =
        toml::from_str(contents).map_err(|e| IwpcError::Config(e.to_string()))?;
    if config.channel_name.is_empty() {
        return Err(IwpcError::Config("channel_name must not be empty".into()));
    }
    Ok(config)
}

/// Read and parse a config file, failing on any problem.
pub fn read_config(path: &Path) -> IwpcResult<IwpcConfig> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Load configuration from a TOML file, with defaults.
///
/// A missing, unreadable or invalid file is logged and yields
/// [`IwpcConfig::default`].
pub fn load_config(path: Option<&Path>) -> IwpcConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return IwpcConfig::default();
    }

    match read_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to load config, using defaults"
            );
            IwpcConfig::default()
        }
    }
}

fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
