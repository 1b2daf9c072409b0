//! YAML configuration loading for the gateway.
//!
//! Loads [`GatewayConfig`] from a YAML file on disk, falling back to
//! defaults when no file is specified.

use promptgate_core::GatewayConfig;
use std::path::Path;

/// Load a [`GatewayConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: GatewayConfig = serde_yaml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {}", e))?;
    Ok(config)
}
