use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pull: PullConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Remote Aggregate-compatible server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Base URL (e.g., "https://aggregate.example.org")
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

/// Local storage locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per form
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// SQLite file of the recorded-instance index
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            index_path: default_index_path(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("formsync")
}

fn default_index_path() -> PathBuf {
    PathBuf::from("formsync.db")
}

/// Pull behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullConfig {
    /// Form ids to pull
    #[serde(default)]
    pub forms: Vec<String>,
    /// Instance ids requested per page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Also pull submissions the server marks as incomplete
    #[serde(default)]
    pub include_incomplete: bool,
    /// Concurrent submission/attachment downloads (default: 8)
    #[serde(default = "default_parallel_downloads")]
    pub max_parallel_downloads: usize,
    /// Resume from the cursor saved by the previous pull (default: true)
    #[serde(default = "default_resume")]
    pub resume_from_last: bool,
    /// Start from this date when there is no cursor to resume from
    #[serde(default)]
    pub start_from_date: Option<NaiveDate>,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            forms: Vec::new(),
            page_size: default_page_size(),
            include_incomplete: false,
            max_parallel_downloads: default_parallel_downloads(),
            resume_from_last: default_resume(),
            start_from_date: None,
        }
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_parallel_downloads() -> usize {
    8
}

fn default_resume() -> bool {
    true
}

/// Job runner
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Job bodies allowed to run at once (default: 4)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: SanitizedServerConfig,
    pub storage: StorageConfig,
    pub pull: PullConfig,
    pub runner: RunnerConfig,
}

/// Sanitized server config (password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServerConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub password_configured: bool,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: SanitizedServerConfig {
                url: config.server.url.clone(),
                username: config.server.username.clone(),
                password_configured: config
                    .server
                    .password
                    .as_ref()
                    .is_some_and(|p| !p.is_empty()),
                timeout_secs: config.server.timeout_secs,
            },
            storage: config.storage.clone(),
            pull: config.pull.clone(),
            runner: config.runner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
[server]
url = "https://aggregate.example.org"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.url, "https://aggregate.example.org");
        assert_eq!(config.server.timeout_secs, 30);
        assert!(config.server.username.is_none());
        assert_eq!(config.storage.root.to_str().unwrap(), "formsync");
        assert_eq!(config.storage.index_path.to_str().unwrap(), "formsync.db");
        assert_eq!(config.pull.page_size, 100);
        assert_eq!(config.pull.max_parallel_downloads, 8);
        assert!(config.pull.resume_from_last);
        assert!(!config.pull.include_incomplete);
        assert!(config.pull.forms.is_empty());
        assert_eq!(config.runner.max_workers, 4);
    }

    #[test]
    fn test_deserialize_missing_server_fails() {
        let toml = r#"
[pull]
page_size = 50
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
url = "http://localhost:8080/aggregate"
username = "collector"
password = "secret"
timeout_secs = 10

[storage]
root = "/data/forms"
index_path = "/data/index.db"

[pull]
forms = ["household", "water_points"]
page_size = 250
include_incomplete = true
max_parallel_downloads = 2
resume_from_last = false
start_from_date = "2021-05-01"

[runner]
max_workers = 6
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.username.as_deref(), Some("collector"));
        assert_eq!(config.server.timeout_secs, 10);
        assert_eq!(config.storage.root.to_str().unwrap(), "/data/forms");
        assert_eq!(config.pull.forms, vec!["household", "water_points"]);
        assert_eq!(config.pull.page_size, 250);
        assert!(config.pull.include_incomplete);
        assert!(!config.pull.resume_from_last);
        assert_eq!(
            config.pull.start_from_date,
            NaiveDate::from_ymd_opt(2021, 5, 1)
        );
        assert_eq!(config.runner.max_workers, 6);
    }

    #[test]
    fn test_sanitized_config_hides_password() {
        let toml = r#"
[server]
url = "https://aggregate.example.org"
username = "collector"
password = "secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.server.password_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("collector"));
    }
}
