//! Configuration management for rolesync
//!
//! Settings are layered, highest priority last:
//! 1. Default values
//! 2. Configuration file (TOML format)
//! 3. Environment variables
//!
//! The CLI applies its flags on top of the loaded result.

use crate::discovery::iam::DEFAULT_MAX_TAGS;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesyncConfig {
    /// Role discovery settings
    pub discovery: DiscoveryConfig,
    /// Cluster apply settings
    pub apply: ApplyConfig,
    /// Run and per-cluster timeouts
    pub timeouts: TimeoutConfig,
    /// AWS credentials and CLI
    pub aws: AwsSettings,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Role discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// IAM path the tagged roles live under
    pub path_prefix: String,
    /// Tags fetched per role; a role with more fails discovery
    pub max_tags: i32,
}

/// Cluster apply settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Clusters written concurrently
    pub concurrency: usize,
}

/// Timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Discovery plus mapping build; expiry fails the whole run
    pub plan_secs: u64,
    /// One cluster's read and write; expiry fails only that cluster
    pub cluster_apply_secs: u64,
}

/// AWS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    pub region: Option<String>,
    pub profile: Option<String>,
    /// AWS CLI binary used for `eks get-token`
    pub cli_command: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/eks/".to_string(),
            max_tags: DEFAULT_MAX_TAGS,
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            plan_secs: 120,
            cluster_apply_secs: 30,
        }
    }
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            cli_command: "aws".to_string(),
        }
    }
}

impl TimeoutConfig {
    pub fn plan(&self) -> Duration {
        Duration::from_secs(self.plan_secs)
    }

    pub fn cluster_apply(&self) -> Duration {
        Duration::from_secs(self.cluster_apply_secs)
    }
}

impl AwsSettings {
    /// Load the shared SDK configuration (credential chain, region, profile)
    pub async fn load_sdk_config(&self) -> aws_config::SdkConfig {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }

        loader.load().await
    }
}

impl RolesyncConfig {
    /// Load configuration from an explicit file, or the first standard location found,
    /// then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("ROLESYNC_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/rolesync/config.toml")),
            Some(PathBuf::from("./rolesync.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Discovery
        if let Some(prefix) = lookup("ROLESYNC_PATH_PREFIX") {
            self.discovery.path_prefix = prefix;
        }
        if let Some(max) = lookup("ROLESYNC_MAX_TAGS").and_then(|v| v.parse().ok()) {
            self.discovery.max_tags = max;
        }

        // Apply
        if let Some(concurrency) = lookup("ROLESYNC_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.apply.concurrency = concurrency;
        }

        // Timeouts
        if let Some(secs) = lookup("ROLESYNC_PLAN_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.timeouts.plan_secs = secs;
        }
        if let Some(secs) = lookup("ROLESYNC_CLUSTER_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.timeouts.cluster_apply_secs = secs;
        }

        // AWS
        if let Some(region) = lookup("ROLESYNC_AWS_REGION") {
            self.aws.region = Some(region);
        }
        if let Some(profile) = lookup("ROLESYNC_AWS_PROFILE") {
            self.aws.profile = Some(profile);
        }
        if let Some(command) = lookup("ROLESYNC_AWS_CLI") {
            self.aws.cli_command = command;
        }

        // Logging
        if let Some(level) = lookup("ROLESYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("ROLESYNC_LOG_JSON") {
            self.logging.json = json.parse().unwrap_or(false);
        }
        if let Some(dir) = lookup("ROLESYNC_LOG_DIR") {
            self.logging.file_dir = Some(PathBuf::from(dir));
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.discovery.path_prefix;
        if !prefix.starts_with('/') || !prefix.ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "Path prefix '{}' must start and end with '/'",
                prefix
            )));
        }

        if self.discovery.max_tags < 1 || self.discovery.max_tags > DEFAULT_MAX_TAGS {
            return Err(ConfigError::Validation(format!(
                "max_tags must be between 1 and {}",
                DEFAULT_MAX_TAGS
            )));
        }

        if self.apply.concurrency == 0 {
            return Err(ConfigError::Validation("Concurrency cannot be 0".to_string()));
        }

        if self.timeouts.plan_secs == 0 || self.timeouts.cluster_apply_secs == 0 {
            return Err(ConfigError::Validation("Timeouts cannot be 0".to_string()));
        }

        if self.aws.cli_command.trim().is_empty() {
            return Err(ConfigError::Validation("AWS CLI command cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RolesyncConfig::default();
        assert_eq!(config.discovery.path_prefix, "/eks/");
        assert_eq!(config.discovery.max_tags, 100);
        assert_eq!(config.apply.concurrency, 4);
        assert_eq!(config.timeouts.cluster_apply(), Duration::from_secs(30));
        assert_eq!(config.aws.cli_command, "aws");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[apply]\nconcurrency = 8\n\n[aws]\nregion = \"eu-central-1\"").unwrap();

        let config = RolesyncConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.apply.concurrency, 8);
        assert_eq!(config.aws.region.as_deref(), Some("eu-central-1"));
        assert_eq!(config.discovery.path_prefix, "/eks/");
        assert_eq!(config.timeouts.plan_secs, 120);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = RolesyncConfig::load(Some(Path::new("/nonexistent/rolesync.toml")));
        assert!(matches!(result, Err(ConfigError::FileRead(_, _))));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[apply\nconcurrency = ").unwrap();

        let result = RolesyncConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("ROLESYNC_PATH_PREFIX", "/platform/eks/"),
            ("ROLESYNC_CONCURRENCY", "2"),
            ("ROLESYNC_CLUSTER_TIMEOUT", "not-a-number"),
            ("ROLESYNC_AWS_PROFILE", "ops"),
        ]
        .into_iter()
        .collect();

        let mut config = RolesyncConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.discovery.path_prefix, "/platform/eks/");
        assert_eq!(config.apply.concurrency, 2);
        assert_eq!(config.timeouts.cluster_apply_secs, 30);
        assert_eq!(config.aws.profile.as_deref(), Some("ops"));
    }

    #[test]
    fn test_validation() {
        let mut config = RolesyncConfig::default();
        config.discovery.path_prefix = "eks".to_string();
        assert!(config.validate().is_err());

        let mut config = RolesyncConfig::default();
        config.apply.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = RolesyncConfig::default();
        config.discovery.max_tags = 101;
        assert!(config.validate().is_err());

        let mut config = RolesyncConfig::default();
        config.timeouts.plan_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_parses_back() {
        let sample = RolesyncConfig::generate_sample();
        let parsed: RolesyncConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.discovery.path_prefix, "/eks/");
    }
}
