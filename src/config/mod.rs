mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./mediagate.toml",
        "~/.config/mediagate/config.toml",
        "/etc/mediagate/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Apply `--host`/`--port` from the command line over the file's values.
///
/// Only flags that were given replace config values; the result is
/// validated again.
pub fn apply_listen_overrides(
    config: &mut Config,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    validate_config(config)
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.server.auth.enabled && config.server.auth.tokens.is_empty() {
        anyhow::bail!("Authentication is enabled but no tokens are configured");
    }

    if config.processing.workers == 0 {
        anyhow::bail!("Processing workers must be at least 1");
    }

    if config.storage.url_ttl_secs == 0 {
        anyhow::bail!("Signed URL lifetime cannot be 0");
    }

    // Cached responses must expire before the links they carry
    if config.delivery.cache_max_age_secs >= config.storage.url_ttl_secs {
        anyhow::bail!(
            "delivery.cache_max_age_secs ({}) must be shorter than storage.url_ttl_secs ({})",
            config.delivery.cache_max_age_secs,
            config.storage.url_ttl_secs
        );
    }

    if config.delivery.authorization.mode == AuthorizationMode::Http
        && config.delivery.authorization.url.is_none()
    {
        anyhow::bail!("HTTP authorization mode requires delivery.authorization.url");
    }

    if config.storage.signing_secret.is_empty() {
        tracing::warn!("storage.signing_secret is empty; a random key will be used for this run");
    }

    if !config.processing.local_transcode && !config.processing.remote.is_configured() {
        tracing::warn!("Neither local transcoding nor a remote processor is configured");
    }

    Ok(())
}
