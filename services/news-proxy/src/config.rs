//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are never stored in the TOML. They come from the NEWS_API_KEYS
//! env var (comma-separated), then `keys.keys_file` (one per line), then the
//! single-key NEWS_API_KEY env var.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub keys: KeysConfig,
}

/// Inbound HTTP settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Browser origin allowed by CORS; no CORS layer when unset
    #[serde(default)]
    pub cors_origin: Option<String>,
}

/// News API settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Query parameter carrying the API key
    #[serde(default = "default_key_param")]
    pub key_param: String,
    /// Attempts per news request; defaults to the number of keys
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// API key sources
#[derive(Debug, Default, Deserialize)]
pub struct KeysConfig {
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    #[serde(skip)]
    pub api_keys: Vec<Secret<String>>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            key_param: default_key_param(),
            max_attempts: None,
        }
    }
}

fn default_base_url() -> String {
    "https://newsdata.io/api/1".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_key_param() -> String {
    "apikey".to_string()
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Fails if no API key can be resolved from any source.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.upstream.base_url.starts_with("http://")
            && !config.upstream.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.upstream.base_url
            )));
        }

        if config.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.upstream.max_attempts == Some(0) {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if config.upstream.key_param.trim().is_empty() {
            return Err(common::Error::Config("key_param must not be empty".into()));
        }

        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| common::Error::Config(format!("invalid PORT {port:?}: {e}")))?;
            config.server.listen_addr.set_port(port);
        }

        config.keys.api_keys = resolve_keys(config.keys.keys_file.as_deref())?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("news-proxy.toml")
    }

    /// Attempts per news request: configured value, else one per pooled key.
    ///
    /// `pool_size` is the size of the built pool, after duplicates collapse.
    pub fn max_attempts(&self, pool_size: usize) -> u32 {
        self.upstream
            .max_attempts
            .unwrap_or(pool_size.max(1) as u32)
    }
}

/// Resolve API keys from the first source that yields at least one key.
fn resolve_keys(keys_file: Option<&Path>) -> common::Result<Vec<Secret<String>>> {
    if let Ok(list) = std::env::var("NEWS_API_KEYS") {
        let keys = non_empty(list.split(','));
        if !keys.is_empty() {
            return Ok(keys);
        }
    }

    if let Some(file) = keys_file {
        let contents = std::fs::read_to_string(file).map_err(|e| {
            common::Error::Config(format!("failed to read keys_file {}: {e}", file.display()))
        })?;
        let keys = non_empty(contents.lines().filter(|l| !l.trim_start().starts_with('#')));
        if !keys.is_empty() {
            return Ok(keys);
        }
    }

    if let Ok(key) = std::env::var("NEWS_API_KEY") {
        let keys = non_empty(std::iter::once(key.as_str()));
        if !keys.is_empty() {
            return Ok(keys);
        }
    }

    Err(common::Error::MissingKeys(
        "set NEWS_API_KEYS, keys.keys_file, or NEWS_API_KEY".into(),
    ))
}

fn non_empty<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<Secret<String>> {
    raw.map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| Secret::new(k.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEY_VARS: &[&str] = &["NEWS_API_KEYS", "NEWS_API_KEY", "PORT"];

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    /// SAFETY: Callers must hold ENV_MUTEX.
    unsafe fn clear_key_env() {
        for var in KEY_VARS {
            unsafe { remove_env(var) };
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:5000"
cors_origin = "http://localhost:5173"

[upstream]
base_url = "https://newsdata.io/api/1"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("news-proxy.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn exposed(config: &Config) -> Vec<&str> {
        config
            .keys
            .api_keys
            .iter()
            .map(|k| k.expose().as_str())
            .collect()
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEYS", "pub_key_one,pub_key_two") };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.port(), 5000);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(
            config.server.cors_origin.as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(config.upstream.base_url, "https://newsdata.io/api/1");
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.upstream.key_param, "apikey");
        assert_eq!(exposed(&config), vec!["pub_key_one", "pub_key_two"]);
        assert_eq!(config.max_attempts(2), 2);

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_upstream_section_optional() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[server]\nlisten_addr = \"0.0.0.0:8080\"\n");

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEY", "pub_single") };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.upstream.base_url, "https://newsdata.io/api/1");
        assert!(config.server.cors_origin.is_none());
        assert_eq!(exposed(&config), vec!["pub_single"]);
        assert_eq!(config.max_attempts(1), 1);

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");

        let result = Config::load(&path);
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_keys_env_filters_blank_entries() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEYS", " pub_a , ,pub_b,, ") };

        let config = Config::load(&path).unwrap();
        assert_eq!(exposed(&config), vec!["pub_a", "pub_b"]);

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_keys_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys");
        std::fs::write(&key_path, "# primary\npub_file_1\n\n  pub_file_2  \n").unwrap();

        let toml_content = format!(
            r#"
[server]
listen_addr = "127.0.0.1:5000"

[keys]
keys_file = "{}"
"#,
            key_path.display()
        );
        let path = write_config(&dir, &toml_content);

        unsafe { clear_key_env() };
        let config = Config::load(&path).unwrap();
        assert_eq!(exposed(&config), vec!["pub_file_1", "pub_file_2"]);
    }

    #[test]
    fn test_keys_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("keys");
        std::fs::write(&key_path, "pub_from_file\n").unwrap();

        let toml_content = format!(
            "[server]\nlisten_addr = \"127.0.0.1:5000\"\n\n[keys]\nkeys_file = \"{}\"\n",
            key_path.display()
        );
        let path = write_config(&dir, &toml_content);

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEYS", "pub_from_env") };
        let config = Config::load(&path).unwrap();
        assert_eq!(
            exposed(&config),
            vec!["pub_from_env"],
            "NEWS_API_KEYS must take precedence over keys_file"
        );

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_keys_file_nonexistent_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[server]\nlisten_addr = \"127.0.0.1:5000\"\n\n[keys]\nkeys_file = \"/nonexistent/keys\"\n",
        );

        unsafe { clear_key_env() };
        let result = Config::load(&path);
        assert!(matches!(result, Err(common::Error::Config(_))));
    }

    #[test]
    fn test_no_keys_is_fatal() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEYS", " , ,") };

        let result = Config::load(&path);
        assert!(
            matches!(result, Err(common::Error::MissingKeys(_))),
            "blank-only key list must be rejected"
        );

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_port_env_overrides_listen_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEY", "pub_single") };
        unsafe { set_env("PORT", "7070") };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.to_string(), "127.0.0.1:7070");

        unsafe { set_env("PORT", "not-a-port") };
        assert!(Config::load(&path).is_err());

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_default_max_attempts_counts_unique_keys() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEYS", "pub_dup,pub_dup,pub_dup") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.keys.api_keys.len(), 3);

        let rotator = key_pool::Rotator::with_system_clock(exposed(&config)).unwrap();
        assert_eq!(rotator.len(), 1);
        assert_eq!(config.max_attempts(rotator.len()), 1);

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_explicit_max_attempts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[server]\nlisten_addr = \"127.0.0.1:5000\"\n\n[upstream]\nmax_attempts = 5\n",
        );

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEYS", "pub_a,pub_b") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_attempts(2), 5);

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_invalid_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEY", "pub_single") };

        let cases = [
            ("[upstream]\nbase_url = \"newsdata.io/api/1\"\n", "base_url must start with http"),
            ("[upstream]\ntimeout_secs = 0\n", "timeout_secs"),
            ("[upstream]\nmax_attempts = 0\n", "max_attempts"),
            ("[upstream]\nkey_param = \" \"\n", "key_param"),
        ];
        for (section, expected) in cases {
            let dir = tempfile::tempdir().unwrap();
            let path = write_config(
                &dir,
                &format!("[server]\nlisten_addr = \"127.0.0.1:5000\"\n\n{section}"),
            );
            let err = Config::load(&path).unwrap_err().to_string();
            assert!(err.contains(expected), "expected {expected:?} in {err}");
        }

        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[server]\nlisten_addr = \"127.0.0.1:5000\"\nmax_connections = 0\n",
        );
        assert!(Config::load(&path).is_err(), "max_connections = 0 must be rejected");

        unsafe { clear_key_env() };
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("news-proxy.toml"));
    }

    #[test]
    fn test_debug_never_prints_keys() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { clear_key_env() };
        unsafe { set_env("NEWS_API_KEYS", "pub_supersecret_value") };
        let config = Config::load(&path).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("pub_supersecret_value"));
        assert!(debug.contains("[REDACTED]"));

        unsafe { clear_key_env() };
    }
}
