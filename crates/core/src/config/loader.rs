use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "FORMSYNC_CONFIG";

/// Configuration file used when [`CONFIG_PATH_VAR`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "formsync.toml";

/// Prefix of per-key overrides, e.g. `FORMSYNC_PULL__PAGE_SIZE=50`.
const ENV_PREFIX: &str = "FORMSYNC_";

/// Configuration file to load: `$FORMSYNC_CONFIG`, else `formsync.toml`.
pub fn config_path() -> PathBuf {
    config_path_with(|name| std::env::var(name).ok())
}

fn config_path_with(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup(CONFIG_PATH_VAR)
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the TOML file at `path`, then apply `FORMSYNC_*` overrides.
///
/// Nested keys are separated by `__`; the path variable itself is not a key.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Parse a TOML document without file or environment sources.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[server]
url = "https://aggregate.example.org"

[pull]
forms = ["household"]
page_size = 20
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.pull.page_size, 20);
        assert_eq!(config.pull.forms, vec!["household"]);
    }

    #[test]
    fn test_load_config_from_str_missing_server() {
        let toml = r#"
[pull]
forms = ["household"]
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/formsync.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_config_path_resolution() {
        assert_eq!(config_path_with(|_| None), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(
            config_path_with(|name| (name == CONFIG_PATH_VAR).then(|| "/etc/formsync.toml".to_string())),
            PathBuf::from("/etc/formsync.toml")
        );
        assert_eq!(
            config_path_with(|_| Some("  ".to_string())),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
    }

    #[test]
    fn test_env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "formsync.toml",
                r#"
[server]
url = "https://aggregate.example.org"

[pull]
forms = ["household"]
page_size = 20
"#,
            )?;
            jail.set_env(CONFIG_PATH_VAR, "formsync.toml");
            jail.set_env("FORMSYNC_PULL__PAGE_SIZE", "50");

            let path = config_path();
            assert_eq!(path, PathBuf::from("formsync.toml"));
            let config = load_config(&path).map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.pull.page_size, 50);
            assert_eq!(config.pull.forms, vec!["household"]);
            Ok(())
        });
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[server]
url = "http://127.0.0.1:8080"
username = "collector"

[runner]
max_workers = 2
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.url, "http://127.0.0.1:8080");
        assert_eq!(config.server.username.as_deref(), Some("collector"));
        assert_eq!(config.runner.max_workers, 2);
    }
}
