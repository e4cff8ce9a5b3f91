use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CREDENTIAL_HEADER: &str = "X-Parse-REST-API-Key";
pub const DEFAULT_TOKEN_HEADER: &str = "X-JWT-KWY";

fn default_credential_header() -> String {
    DEFAULT_CREDENTIAL_HEADER.to_string()
}
fn default_token_header() -> String {
    DEFAULT_TOKEN_HEADER.to_string()
}
fn default_store_timeout_ms() -> u64 {
    2_000
}
fn default_min_replay_ttl() -> u64 {
    1
}
fn default_max_replay_ttl() -> u64 {
    86_400
}

/// On-disk shape of the config file. Secrets are optional here so that they
/// can come from the environment instead.
#[derive(Debug, Deserialize)]
struct RawConfig {
    api_key: Option<String>,
    jwt_secret: Option<String>,
    #[serde(default = "default_credential_header")]
    credential_header: String,
    #[serde(default = "default_token_header")]
    token_header: String,
    redis_url: Option<String>,
    #[serde(default = "default_store_timeout_ms")]
    store_timeout_ms: u64,
    #[serde(default = "default_min_replay_ttl")]
    min_replay_ttl_secs: u64,
    #[serde(default = "default_max_replay_ttl")]
    max_replay_ttl_secs: u64,
    acme_challenge_dir: Option<String>,
}

/// Immutable gate configuration, built once at startup and shared by `Arc`.
#[derive(Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub jwt_secret: SecretString,
    pub credential_header: String,
    pub token_header: String,
    pub redis_url: Option<String>,
    pub store_timeout: Duration,
    pub min_replay_ttl_secs: u64,
    pub max_replay_ttl_secs: u64,
    pub acme_challenge_dir: Option<String>,
}

impl Config {
    /// Config with the default headers and limits, mostly useful for tests.
    pub fn new(api_key: &str, jwt_secret: &str) -> Self {
        Self {
            api_key: SecretString::from(api_key.to_string()),
            jwt_secret: SecretString::from(jwt_secret.to_string()),
            credential_header: default_credential_header(),
            token_header: default_token_header(),
            redis_url: None,
            store_timeout: Duration::from_millis(default_store_timeout_ms()),
            min_replay_ttl_secs: default_min_replay_ttl(),
            max_replay_ttl_secs: default_max_replay_ttl(),
            acme_challenge_dir: None,
        }
    }

    /// Load `path` if it exists, then apply `GATE_*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let parsed = if Path::new(path).is_file() {
            read_raw(Path::new(path))?
        } else {
            debug!(path, "config file not found, using environment only");
            serde_json::from_str("{}").context("building default config")?
        };
        Self::from_raw(parsed, env_lookup)
    }

    fn from_raw(mut raw: RawConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = env("GATE_API_KEY") {
            raw.api_key = Some(v);
        }
        if let Some(v) = env("GATE_JWT_SECRET") {
            raw.jwt_secret = Some(v);
        }
        if let Some(v) = env("GATE_REDIS_URL") {
            raw.redis_url = Some(v);
        }
        if let Some(v) = env("GATE_ACME_DIR") {
            raw.acme_challenge_dir = Some(v);
        }

        let api_key = raw
            .api_key
            .filter(|s| !s.is_empty())
            .context("api_key is required (config file or GATE_API_KEY)")?;
        let jwt_secret = raw
            .jwt_secret
            .filter(|s| !s.is_empty())
            .context("jwt_secret is required (config file or GATE_JWT_SECRET)")?;

        if raw.min_replay_ttl_secs == 0 {
            bail!("min_replay_ttl_secs must be at least 1");
        }
        if raw.max_replay_ttl_secs < raw.min_replay_ttl_secs {
            bail!(
                "max_replay_ttl_secs ({}) is below min_replay_ttl_secs ({})",
                raw.max_replay_ttl_secs,
                raw.min_replay_ttl_secs
            );
        }
        if raw.store_timeout_ms == 0 {
            bail!("store_timeout_ms must be positive");
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            jwt_secret: SecretString::from(jwt_secret),
            credential_header: raw.credential_header,
            token_header: raw.token_header,
            redis_url: raw.redis_url.filter(|s| !s.is_empty()),
            store_timeout: Duration::from_millis(raw.store_timeout_ms),
            min_replay_ttl_secs: raw.min_replay_ttl_secs,
            max_replay_ttl_secs: raw.max_replay_ttl_secs,
            acme_challenge_dir: raw.acme_challenge_dir.filter(|s| !s.is_empty()),
        })
    }

    /// Human-readable summary with secrets reduced to their length.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "api_key": format!("<{} bytes>", self.api_key.expose_secret().len()),
            "jwt_secret": format!("<{} bytes>", self.jwt_secret.expose_secret().len()),
            "credential_header": self.credential_header,
            "token_header": self.token_header,
            "replay_store": if self.redis_url.is_some() { "redis" } else { "memory" },
            "store_timeout_ms": self.store_timeout.as_millis() as u64,
            "min_replay_ttl_secs": self.min_replay_ttl_secs,
            "max_replay_ttl_secs": self.max_replay_ttl_secs,
            "acme_challenge_dir": self.acme_challenge_dir,
        })
    }
}

fn read_raw(path: &Path) -> Result<RawConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&raw).context("parsing JSON")
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn parse(json: &str) -> RawConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_config_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "api_key": "2f5ae96c",
                "jwt_secret": "s3cret",
                "redis_url": "redis://127.0.0.1:6379/",
                "store_timeout_ms": 500,
                "acme_challenge_dir": "/var/www/acme"
            }}"#
        )
        .unwrap();

        let config = Config::from_raw(read_raw(file.path()).unwrap(), no_env).unwrap();
        assert_eq!(config.api_key.expose_secret(), "2f5ae96c");
        assert_eq!(config.jwt_secret.expose_secret(), "s3cret");
        assert_eq!(config.credential_header, DEFAULT_CREDENTIAL_HEADER);
        assert_eq!(config.token_header, DEFAULT_TOKEN_HEADER);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379/"));
        assert_eq!(config.store_timeout, Duration::from_millis(500));
        assert_eq!(config.min_replay_ttl_secs, 1);
        assert_eq!(config.max_replay_ttl_secs, 86_400);
        assert_eq!(config.acme_challenge_dir.as_deref(), Some("/var/www/acme"));
    }

    #[test]
    fn test_config_missing_file() {
        let result = read_raw(Path::new("/nonexistent/path/config.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_reads_existing_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"api_key": "k", "jwt_secret": "s", "store_timeout_ms": 750}}"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.store_timeout, Duration::from_millis(750));
        assert_eq!(config.max_replay_ttl_secs, 86_400);
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json").unwrap();

        assert!(read_raw(file.path()).is_err());
        let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing JSON"));
    }

    #[test]
    fn test_secrets_required() {
        let err = Config::from_raw(parse(r#"{"jwt_secret": "x"}"#), no_env).unwrap_err();
        assert!(err.to_string().contains("api_key"));

        let err = Config::from_raw(parse(r#"{"api_key": "k", "jwt_secret": ""}"#), no_env)
            .unwrap_err();
        assert!(err.to_string().contains("jwt_secret"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("GATE_API_KEY", "from-env"),
            ("GATE_REDIS_URL", "redis://cache:6379/"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_raw(
            parse(r#"{"api_key": "from-file", "jwt_secret": "s"}"#),
            |k| env.get(k).map(|v| v.to_string()),
        )
        .unwrap();

        assert_eq!(config.api_key.expose_secret(), "from-env");
        assert_eq!(config.jwt_secret.expose_secret(), "s");
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379/"));
    }

    #[test]
    fn test_ttl_window_validated() {
        let result = Config::from_raw(
            parse(r#"{"api_key": "k", "jwt_secret": "s", "min_replay_ttl_secs": 0}"#),
            no_env,
        );
        assert!(result.is_err());

        let result = Config::from_raw(
            parse(
                r#"{"api_key": "k", "jwt_secret": "s",
                    "min_replay_ttl_secs": 60, "max_replay_ttl_secs": 30}"#,
            ),
            no_env,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_and_summary_redact_secrets() {
        let config = Config::new("top-secret-key", "top-secret-jwt");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("top-secret-key"));
        assert!(!debug.contains("top-secret-jwt"));

        let summary = config.redacted_summary().to_string();
        assert!(!summary.contains("top-secret"));
        assert!(summary.contains("\"replay_store\":\"memory\""));
    }
}
