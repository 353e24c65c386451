//! Service configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// The default name for the skylift configuration file.
pub const SKYCONF_FILENAME: &str = "Skylift.toml";

/// Per-service deployment configuration.
///
/// Lives next to the service source as a TOML file and names the account-level
/// resources every deploy of the service touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, used for the gateway lookup and artifact prefixes.
    pub service_name: String,
    /// Region every resource of the service lives in.
    pub region: String,
    /// Bucket holding deployment artifacts and uploaded templates.
    pub deployment_bucket: String,
    /// Hosted function backing the service. Defaults to `{service_name}-api`.
    #[serde(default)]
    pub function_name: Option<String>,
    /// Stages whose name contains this marker are never torn down.
    #[serde(default = "default_protected_stage")]
    pub protected_stage: String,
}

fn default_protected_stage() -> String {
    "production".to_string()
}

impl ServiceConfig {
    pub fn function_name(&self) -> String {
        self.function_name
            .clone()
            .unwrap_or_else(|| format!("{}-api", self.service_name))
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeployError::validation(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content).map_err(|source| DeployError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `Skylift.toml` inside
    /// a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config_path: PathBuf = if path.is_dir() {
            path.join(SKYCONF_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path).map_err(|source| DeployError::Io {
            path: config_path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            DeployError::validation(format!(
                "failed to parse {} as TOML: {e}",
                config_path.display()
            ))
        })?;

        if config.service_name.is_empty() {
            return Err(DeployError::validation("service_name must not be empty"));
        }
        if config.region.is_empty() {
            return Err(DeployError::validation("region must not be empty"));
        }
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn sample_config() -> ServiceConfig {
        ServiceConfig {
            service_name: "orders".to_string(),
            region: "us-east-1".to_string(),
            deployment_bucket: "orders-deployments".to_string(),
            function_name: None,
            protected_stage: default_protected_stage(),
        }
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new("skylift-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join(SKYCONF_FILENAME);

        let original = sample_config();
        original.save_to_file(&path).expect("Failed to save config");
        let loaded = ServiceConfig::load_from_file(&path).expect("Failed to load config");
        assert_eq!(original, loaded);

        // Loading from the directory resolves the default filename.
        let from_dir =
            ServiceConfig::load_from_file(temp_dir.path()).expect("Failed to load from dir");
        assert_eq!(original, from_dir);
    }

    #[test]
    fn test_config_load_missing_file() {
        let temp_dir = TempDir::new("skylift-test").expect("Failed to create temp dir");
        let result = ServiceConfig::load_from_file(&temp_dir.path().join("nonexistent.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_empty_service_name() {
        let temp_dir = TempDir::new("skylift-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join(SKYCONF_FILENAME);
        std::fs::write(
            &path,
            "service_name = \"\"\nregion = \"us-east-1\"\ndeployment_bucket = \"b\"\n",
        )
        .expect("Failed to write config");
        let result = ServiceConfig::load_from_file(&path);
        assert!(matches!(result, Err(DeployError::Validation(_))));
    }

    #[test]
    fn test_function_name_defaults_from_service() {
        let mut config = sample_config();
        assert_eq!(config.function_name(), "orders-api");
        config.function_name = Some("orders-backend".to_string());
        assert_eq!(config.function_name(), "orders-backend");
    }
}
