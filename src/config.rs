use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bootvol_oci::{Credentials, Platform, RegistryConfig};
use secrecy::SecretString;

use crate::populate::{DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
use crate::resolver::DuplicateRolePolicy;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_sync")]
    pub sync: bool,
    #[serde(default)]
    pub duplicate_roles: DuplicateRolePolicy,
    #[serde(default)]
    pub registry: RegistrySettings,
    /// Storage class list consulted by `bootvol classes`.
    #[serde(default)]
    pub classes_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            buffer_size: default_buffer_size(),
            sync: default_sync(),
            duplicate_roles: DuplicateRolePolicy::default(),
            registry: RegistrySettings::default(),
            classes_file: None,
        }
    }
}

/// Registry settings as written in the config file.  Secrets are never
/// stored here; only the names of the environment variables holding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub insecure: Vec<String>,
    /// Environment variable holding a static bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Environment variable holding the password for `username`.
    #[serde(default)]
    pub password_env: Option<String>,
    /// Platform picked out of multi-arch indexes.  Defaults to the host.
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: None,
            insecure: Vec::new(),
            token_env: None,
            username: None,
            password_env: None,
            platform: None,
        }
    }
}

impl RegistrySettings {
    /// Build the client configuration, reading any secrets from the
    /// environment.
    pub fn to_registry_config(&self) -> Result<RegistryConfig> {
        let credentials = match (&self.token_env, &self.username) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "registry.token_env and registry.username are mutually exclusive".into(),
                ))
            }
            (Some(var), None) => Some(Credentials::Bearer(read_secret(var)?)),
            (None, Some(username)) => {
                let Some(var) = &self.password_env else {
                    return Err(Error::Config(
                        "registry.username requires registry.password_env".into(),
                    ));
                };
                Some(Credentials::Basic {
                    username: username.clone(),
                    password: read_secret(var)?,
                })
            }
            (None, None) => None,
        };

        let mut config = RegistryConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            timeout: self.timeout_secs.map(Duration::from_secs),
            insecure: self.insecure.clone(),
            credentials,
            ..RegistryConfig::default()
        };
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(platform) = &self.platform {
            config.platform = platform.clone();
        }
        Ok(config)
    }
}

fn read_secret(var: &str) -> Result<SecretString> {
    match env::var(var) {
        Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(Error::Config(format!(
            "environment variable {} is not set",
            var
        ))),
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/lib/bootvol/cache")
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_sync() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let config: Config = if is_yaml {
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid YAML config {}: {}", path.display(), e)))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid JSON config {}: {}", path.display(), e)))?
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.buffer_size == 0 || config.buffer_size > MAX_BUFFER_SIZE {
        return Err(Error::Config(format!(
            "buffer_size must be between 1 and {} bytes, got {}",
            MAX_BUFFER_SIZE, config.buffer_size
        )));
    }

    if config.cache_dir.as_os_str().is_empty() {
        return Err(Error::Config("cache_dir cannot be empty".into()));
    }

    let registry = &config.registry;
    if registry.connect_timeout_secs == 0 {
        return Err(Error::Config(
            "registry.connect_timeout_secs must be greater than 0".into(),
        ));
    }
    if registry.timeout_secs == Some(0) {
        return Err(Error::Config(
            "registry.timeout_secs must be greater than 0".into(),
        ));
    }
    if registry.insecure.iter().any(|h| h.trim().is_empty()) {
        return Err(Error::Config(
            "registry.insecure entries cannot be empty".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    fn write_config(name: &str, body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        fs::File::create(&path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
        (dir, path)
    }

    #[test]
    fn yaml_config_with_defaults() {
        let (_dir, path) = write_config(
            "bootvol.yaml",
            "cache_dir: /tmp/cache\nduplicate_roles: reject\nregistry:\n  insecure: [\"registry.local:5000\"]\n",
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.sync);
        assert_eq!(config.duplicate_roles, DuplicateRolePolicy::Reject);
        assert_eq!(config.registry.connect_timeout_secs, 30);
        assert_eq!(config.registry.timeout_secs, None);
        assert_eq!(config.registry.insecure, vec!["registry.local:5000"]);
    }

    #[test]
    fn json_config_is_selected_by_extension() {
        let (_dir, path) = write_config(
            "bootvol.json",
            r#"{"cache_dir": "/srv/cache", "buffer_size": 65536, "sync": false}"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.buffer_size, 65536);
        assert!(!config.sync);
        assert_eq!(config.duplicate_roles, DuplicateRolePolicy::FirstWins);
    }

    #[test]
    fn rejects_out_of_range_buffer() {
        let mut config = Config {
            buffer_size: 0,
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
        config.buffer_size = MAX_BUFFER_SIZE + 1;
        assert!(validate_config(&config).is_err());
        config.buffer_size = MAX_BUFFER_SIZE;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut config = Config::default();
        config.registry.connect_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.registry.timeout_secs = Some(0);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let (_dir, path) = write_config("bootvol.yaml", "buffer_size: [not a number\n");
        assert!(matches!(load_config(&path), Err(Error::Config(_))));
    }

    #[test]
    fn credentials_come_from_the_environment() {
        let settings = RegistrySettings {
            token_env: Some("BOOTVOL_TEST_TOKEN_UNSET_4f1c".into()),
            ..RegistrySettings::default()
        };
        let err = settings.to_registry_config().unwrap_err();
        assert!(err.to_string().contains("BOOTVOL_TEST_TOKEN_UNSET_4f1c"));

        // PATH is always set, so it stands in for a real secret variable.
        let settings = RegistrySettings {
            username: Some("robot".into()),
            password_env: Some("PATH".into()),
            timeout_secs: Some(600),
            ..RegistrySettings::default()
        };
        let config = settings.to_registry_config().unwrap();
        assert_eq!(config.timeout, Some(Duration::from_secs(600)));
        match config.credentials {
            Some(Credentials::Basic { username, password }) => {
                assert_eq!(username, "robot");
                assert_eq!(password.expose_secret(), env::var("PATH").unwrap());
            }
            other => panic!("unexpected credentials: {other:?}"),
        }
    }

    #[test]
    fn username_without_password_is_rejected() {
        let settings = RegistrySettings {
            username: Some("robot".into()),
            ..RegistrySettings::default()
        };
        assert!(settings.to_registry_config().is_err());
    }
}
