use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server URL is set and uses http or https
/// - Page size, download parallelism and worker count are not 0
/// - At least one form is listed
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let url = config.server.url.trim();
    if url.is_empty() {
        return Err(ConfigError::ValidationError(
            "server.url cannot be empty".to_string(),
        ));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "server.url must start with http:// or https://, got {url}"
        )));
    }

    if config.pull.page_size == 0 {
        return Err(ConfigError::ValidationError(
            "pull.page_size cannot be 0".to_string(),
        ));
    }
    if config.pull.max_parallel_downloads == 0 {
        return Err(ConfigError::ValidationError(
            "pull.max_parallel_downloads cannot be 0".to_string(),
        ));
    }
    if config.runner.max_workers == 0 {
        return Err(ConfigError::ValidationError(
            "runner.max_workers cannot be 0".to_string(),
        ));
    }

    if config.pull.forms.is_empty() {
        return Err(ConfigError::ValidationError(
            "pull.forms must list at least one form id".to_string(),
        ));
    }
    if config.pull.forms.iter().any(|f| f.trim().is_empty()) {
        return Err(ConfigError::ValidationError(
            "pull.forms cannot contain blank form ids".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PullConfig, RunnerConfig, ServerConfig, StorageConfig};

    fn valid_config() -> Config {
        Config {
            server: ServerConfig {
                url: "https://aggregate.example.org".to_string(),
                username: None,
                password: None,
                timeout_secs: 30,
            },
            storage: StorageConfig::default(),
            pull: PullConfig {
                forms: vec!["household".to_string()],
                ..Default::default()
            },
            runner: RunnerConfig::default(),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_bad_url_scheme_fails() {
        let mut config = valid_config();
        config.server.url = "ftp://aggregate.example.org".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        config.server.url = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_limits_fail() {
        let mut config = valid_config();
        config.pull.page_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.pull.max_parallel_downloads = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.runner.max_workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_requires_forms() {
        let mut config = valid_config();
        config.pull.forms.clear();
        assert!(validate_config(&config).is_err());

        config.pull.forms = vec![" ".to_string()];
        assert!(validate_config(&config).is_err());
    }
}
