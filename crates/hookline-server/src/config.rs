//! Configuration loading: TOML file plus environment overrides.
//!
//! Every setting has a default, so a missing file is a valid (local
//! development) configuration. Environment variables override the file
//! for the handful of settings that differ per deployment.

use std::path::Path;

use hookline_core::config::RelayConfig;

/// Environment variable overriding the store URL
pub const ENV_STORE_URL: &str = "HOOKLINE_STORE_URL";
/// Environment variable overriding the bind address
pub const ENV_BIND_ADDR: &str = "HOOKLINE_BIND_ADDR";
/// Environment variable overriding the signing salt
pub const ENV_SECRET_SALT: &str = "HOOKLINE_WEBHOOK_SECRET_SALT";

/// Load configuration from an optional TOML file, then apply
/// environment overrides.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        }
        Some(path) => {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        None => RelayConfig::default(),
    };

    if let Ok(url) = std::env::var(ENV_STORE_URL) {
        config.store.url = url;
    }
    if let Ok(addr) = std::env::var(ENV_BIND_ADDR) {
        config.server.bind_addr = addr;
    }
    if let Ok(salt) = std::env::var(ENV_SECRET_SALT) {
        config.webhook_secret_salt = Some(salt);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = load(None).unwrap();
        assert_eq!(config.queue.max_size, 10_000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }

    #[test]
    fn test_file_values_apply() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            event_log_enabled = true

            [queue]
            max_size = 42

            [delivery]
            user_agent = "custom-agent/1"
            "#
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert!(config.event_log_enabled);
        assert_eq!(config.queue.max_size, 42);
        assert_eq!(config.delivery.user_agent, "custom-agent/1");
        // untouched sections keep defaults
        assert_eq!(config.dead_letter.retention_days, 30);
    }
}
