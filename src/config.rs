use crate::types::{AppError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "/etc/fwctl/config.yaml";
const PKG_DEFAULT_CONFIG_PATH: &str = "pkg-files/config/default.yaml";

const KNOWN_DRIVERS: &[&str] = &["queue", "log"];

fn default_queue_depth() -> usize {
    64
}

fn default_driver() -> String {
    "queue".to_string()
}

/// Backend strategy selection, resolved once at startup by the channel
/// registry in `dispatch`. The recognized strategy names are enumerated
/// here rather than side-loaded from a secondary module file.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            driver: default_driver(),
            queue_depth: default_queue_depth(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    pub socket_path: Option<String>,
}

/// Loads configuration from the specified path, or falls back to defaults.
pub fn load_config(config_path_opt: Option<&Path>) -> Result<AppConfig> {
    let config_path = config_path_opt
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH).to_path_buf());

    tracing::info!("Attempting to load configuration from: {:?}", config_path);

    let config_str = match fs::read_to_string(&config_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(
                "Failed to read config file {:?}: {}. Trying package default.",
                config_path,
                e
            );
            fs::read_to_string(PKG_DEFAULT_CONFIG_PATH).map_err(|e| {
                AppError::Config(format!(
                    "Failed to read both {:?} and {}: {}",
                    config_path, PKG_DEFAULT_CONFIG_PATH, e
                ))
            })?
        }
    };

    let config: AppConfig = serde_yaml::from_str(&config_str)
        .map_err(|e| AppError::Config(format!("Failed to parse YAML: {}", e)))?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
    if !KNOWN_DRIVERS.contains(&config.backend.driver.as_str()) {
        return Err(AppError::Config(format!(
            "Unknown backend driver '{}'; expected one of {:?}",
            config.backend.driver, KNOWN_DRIVERS
        )));
    }
    if config.backend.queue_depth == 0 {
        return Err(AppError::Config(
            "backend.queue_depth must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_config() {
        let yaml = r#"
backend:
  driver: queue
  queue_depth: 16
socket_path: /tmp/fwctl-test.sock
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", yaml).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.backend.driver, "queue");
        assert_eq!(config.backend.queue_depth, 16);
        assert_eq!(config.socket_path, Some("/tmp/fwctl-test.sock".to_string()));
    }

    #[test]
    fn test_defaults_apply_when_backend_omitted() {
        let yaml = "socket_path: /tmp/fwctl.sock";
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", yaml).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.backend.driver, "queue");
        assert_eq!(config.backend.queue_depth, 64);
    }

    #[test]
    fn test_load_invalid_yaml() {
        let yaml = "backend: [ driver: queue ]";
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", yaml).unwrap();

        let result = load_config(Some(file.path()));
        assert!(result.is_err());
        if let Err(AppError::Config(msg)) = result {
            assert!(msg.contains("Failed to parse YAML"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_validate_unknown_driver() {
        let config = AppConfig {
            backend: BackendConfig {
                driver: "rpc".to_string(),
                queue_depth: 8,
            },
            socket_path: None,
        };
        let result = validate_config(&config);
        assert!(result.is_err());
        if let Err(AppError::Config(msg)) = result {
            assert!(msg.contains("Unknown backend driver"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_validate_zero_queue_depth() {
        let config = AppConfig {
            backend: BackendConfig {
                driver: "queue".to_string(),
                queue_depth: 0,
            },
            socket_path: None,
        };
        assert!(validate_config(&config).is_err());
    }
}
