//! CLI configuration loading and merging.

use anyhow::Context;
use pek_client::ClientConfig;
use std::path::Path;

/// Load and merge client configuration.
///
/// Configuration precedence:
/// 1. `--server`
/// 2. Environment variables
/// 3. `--config FILE`, or else the local (./.pekrc) then global (~/.pek/config.toml) file
/// 4. Defaults
pub fn load_config(config_file: Option<&Path>, server: Option<String>) -> anyhow::Result<ClientConfig> {
    let mut config = match config_file {
        Some(path) => {
            let mut config = ClientConfig::from_file(path)?;
            config.apply_env_with(|key| std::env::var(key).ok())?;
            config
        }
        None => ClientConfig::discover_and_load()?,
    };

    if let Some(server) = server {
        config = config.with_server_url(server);
    }

    config.validate().context("invalid client configuration")?;
    Ok(config)
}
