//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Package storage configuration
    pub storage: StorageConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host to bind to
    pub hostname: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible base URL (used for the OIDC redirect URI)
    pub base_url: Option<String>,
    /// TLS certificate chain (PEM)
    pub tls_cert: Option<PathBuf>,
    /// TLS private key (PEM)
    pub tls_key: Option<PathBuf>,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 8080,
            base_url: None,
            tls_cert: None,
            tls_key: None,
            request_timeout: Duration::from_secs(30),
            max_body_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

impl ServerConfig {
    /// Whether the server terminates TLS itself
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// Base URL without trailing slash, derived from host/port if unset
    #[must_use]
    pub fn resolved_base_url(&self) -> String {
        match self.base_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None => {
                let scheme = if self.tls_enabled() { "https" } else { "http" };
                format!("{scheme}://{}:{}", self.hostname, self.port)
            }
        }
    }
}

/// Filesystem repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding `<scope>/<name>/<version>/` trees
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./packages"),
        }
    }
}

/// Authentication strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// Static username / password-digest list
    #[default]
    Basic,
    /// OpenID Connect provider
    Oidc,
}

/// OAuth2 grant used by the OIDC strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GrantType {
    /// Browser redirect (authorization code)
    #[default]
    Code,
    /// Resource-owner password credentials
    Password,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthConfig {
    /// Enable authentication (disabled = every request is accepted)
    pub enabled: bool,
    /// Authentication strategy
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    /// OIDC grant type
    pub grant_type: GrantType,
    /// OIDC issuer URL
    pub issuer: String,
    /// OIDC client ID
    pub client_id: String,
    /// OIDC client secret (supports `env:VAR_NAME`)
    pub client_secret: String,
    /// Users for the basic strategy
    pub users: Vec<UserConfig>,
    /// Maximum number of cached ID tokens (password grant)
    pub jwt_cache_size: usize,
    /// Lifetime of a cached ID token in hours (password grant)
    #[serde(rename = "jwtCacheTTLHours")]
    pub jwt_cache_ttl_hours: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auth_type: AuthType::Basic,
            grant_type: GrantType::Code,
            issuer: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            users: Vec::new(),
            jwt_cache_size: 100,
            jwt_cache_ttl_hours: 24,
        }
    }
}

impl AuthConfig {
    /// Resolve the client secret (expand `env:VAR_NAME`)
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        if let Some(var_name) = self.client_secret.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.client_secret.clone())
        } else {
            self.client_secret.clone()
        }
    }

    /// Token cache TTL as a [`Duration`]
    #[must_use]
    pub fn jwt_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwt_cache_ttl_hours.saturating_mul(3600))
    }

    fn validate(&self) -> Result<()> {
        if !self.enabled || self.auth_type != AuthType::Oidc {
            return Ok(());
        }
        if self.issuer.trim().is_empty() {
            return Err(Error::Config("auth.issuer is required for oidc".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::Config(
                "auth.clientId is required for oidc".to_string(),
            ));
        }
        Ok(())
    }
}

/// A configured basic-auth user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Username
    pub username: String,
    /// Hex SHA-256 digest of the password
    pub password: String,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or describes an incomplete OIDC setup.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (SPM_REGISTRY_ prefix)
        figment = figment.merge(Env::prefixed("SPM_REGISTRY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.auth.validate()?;
        Ok(config)
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms", "1h")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(serde::de::Error::custom)?;
            scaled(mins, 60, &s)
        } else if let Some(hours) = s.strip_suffix('h') {
            let hours = hours.parse::<u64>().map_err(serde::de::Error::custom)?;
            scaled(hours, 3600, &s)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }

    fn scaled<E: serde::de::Error>(value: u64, unit_secs: u64, raw: &str) -> Result<Duration, E> {
        value
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| E::custom(format!("duration out of range: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.jwt_cache_size, 100);
        assert_eq!(config.auth.jwt_cache_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.server.resolved_base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_auth_section_uses_camel_case_keys() {
        let yaml = r#"
auth:
  enabled: true
  type: oidc
  grantType: password
  issuer: "https://idp.example.com"
  clientId: registry
  clientSecret: s3cret
  jwtCacheSize: 5
  jwtCacheTTLHours: 2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.auth.auth_type, AuthType::Oidc);
        assert_eq!(config.auth.grant_type, GrantType::Password);
        assert_eq!(config.auth.client_id, "registry");
        assert_eq!(config.auth.jwt_cache_size, 5);
        assert_eq!(config.auth.jwt_cache_ttl(), Duration::from_secs(7200));
    }

    #[test]
    fn test_unknown_auth_type_is_rejected() {
        let yaml = "auth:\n  type: ldap\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_oidc_requires_issuer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "auth:\n  enabled: true\n  type: oidc\n  clientId: registry").unwrap();
        drop(f);

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("auth.issuer"));
    }

    #[test]
    fn test_load_basic_users_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "server:\n  port: 9090\n  requestTimeout: 5s\nauth:\n  enabled: true\n  users:\n    - username: alice\n      password: abc123"
        )
        .unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.request_timeout, Duration::from_secs(5));
        assert_eq!(config.auth.users.len(), 1);
        assert_eq!(config.auth.users[0].username, "alice");
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::load(Some(Path::new("/nonexistent/registry.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_client_secret_env_indirection() {
        // env::set_var is unsafe in edition 2024; PATH is always set.
        let auth = AuthConfig {
            client_secret: "env:PATH".to_string(),
            ..AuthConfig::default()
        };
        assert_eq!(auth.resolve_client_secret(), env::var("PATH").unwrap());

        let literal = AuthConfig {
            client_secret: "plain".to_string(),
            ..AuthConfig::default()
        };
        assert_eq!(literal.resolve_client_secret(), "plain");
    }

    #[test]
    fn test_duration_suffixes() {
        #[derive(Deserialize)]
        struct D {
            #[serde(with = "humantime_serde")]
            d: Duration,
        }
        let parse = |s: &str| serde_yaml::from_str::<D>(&format!("d: {s}")).unwrap().d;
        assert_eq!(parse("100ms"), Duration::from_millis(100));
        assert_eq!(parse("30s"), Duration::from_secs(30));
        assert_eq!(parse("5m"), Duration::from_secs(300));
        assert_eq!(parse("1h"), Duration::from_secs(3600));
    }

    #[test]
    fn test_duration_overflow_is_an_error() {
        #[derive(Debug, Deserialize)]
        struct D {
            #[serde(with = "humantime_serde")]
            #[allow(dead_code)]
            d: Duration,
        }
        for raw in ["99999999999999999h", "999999999999999999m"] {
            let err = serde_yaml::from_str::<D>(&format!("d: {raw}")).unwrap_err();
            assert!(err.to_string().contains("duration out of range"), "{err}");
        }
    }
}
