use crate::error::{NamespoofError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum length of a spoofed display name, in characters
pub const MAX_NAME_LENGTH: usize = 32;

/// Display name used when `SPOOF_NAME` is not set
pub const DEFAULT_SPOOF_NAME: &str = "RL Name Changer";

/// Hosts whose JSON responses carry the display name
pub const DEFAULT_MATCH_DOMAINS: &[&str] = &[
    "epicgames.dev",
    "epicgames.com",
    "psyonix.com",
    "live.psynet.gg",
];

/// Content type a response must carry to be rewritten
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy listener and lifecycle configuration
    pub proxy: ProxyServerConfig,
    /// Rewrite rule configuration
    pub spoof: SpoofConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    pub host: String,
    /// Port for the proxy server (default: 8080)
    pub port: u16,
    /// Upstream connection timeout in seconds
    pub connect_timeout: u64,
    /// Upstream response timeout in seconds
    pub request_timeout: u64,
    /// How long `start` waits for the engine to listen, in milliseconds
    pub ready_timeout_ms: u64,
    /// How long `stop` waits for the worker thread, in milliseconds
    pub stop_timeout_ms: u64,
    /// How many times to probe a busy listen port before giving up
    pub port_probe_attempts: u32,
    /// Delay between port probes in milliseconds
    pub port_probe_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SpoofConfig {
    /// Initial display name substituted into responses
    pub name: String,
    /// Host fragments the rewrite applies to
    pub domains: Vec<String>,
    /// Required content-type fragment
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
    /// Optional file that receives a plain-text copy of the log
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            proxy: ProxyServerConfig {
                host: get_env_or("PROXY_HOST", "127.0.0.1"),
                port: get_env_or("PROXY_PORT", "8080").parse().map_err(|_| {
                    NamespoofError::InvalidConfig("PROXY_PORT must be a valid port number".into())
                })?,
                connect_timeout: get_env_or("PROXY_CONNECT_TIMEOUT", "10")
                    .parse()
                    .unwrap_or(10),
                request_timeout: get_env_or("PROXY_REQUEST_TIMEOUT", "30")
                    .parse()
                    .unwrap_or(30),
                ready_timeout_ms: get_env_or("PROXY_READY_TIMEOUT_MS", "3000")
                    .parse()
                    .map_err(|_| {
                        NamespoofError::InvalidConfig(
                            "PROXY_READY_TIMEOUT_MS must be a valid number".into(),
                        )
                    })?,
                stop_timeout_ms: get_env_or("PROXY_STOP_TIMEOUT_MS", "5000")
                    .parse()
                    .map_err(|_| {
                        NamespoofError::InvalidConfig(
                            "PROXY_STOP_TIMEOUT_MS must be a valid number".into(),
                        )
                    })?,
                port_probe_attempts: get_env_or("PROXY_PORT_PROBE_ATTEMPTS", "5")
                    .parse()
                    .unwrap_or(5),
                port_probe_interval_ms: get_env_or("PROXY_PORT_PROBE_INTERVAL_MS", "500")
                    .parse()
                    .unwrap_or(500),
            },
            spoof: SpoofConfig {
                name: validate_spoof_name(&get_env_or("SPOOF_NAME", DEFAULT_SPOOF_NAME))?,
                domains: parse_domains(&get_env_or(
                    "SPOOF_DOMAINS",
                    &DEFAULT_MATCH_DOMAINS.join(","),
                ))?,
                content_type: get_env_or("SPOOF_CONTENT_TYPE", DEFAULT_CONTENT_TYPE),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
                file: env::var("LOG_FILE")
                    .ok()
                    .map(|path| path.trim().to_string())
                    .filter(|path| !path.is_empty())
                    .map(PathBuf::from),
            },
        })
    }

    /// Get the proxy listen address
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }
}

impl ProxyServerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn port_probe_interval(&self) -> Duration {
        Duration::from_millis(self.port_probe_interval_ms)
    }
}

/// Normalize and validate a display name entered by the operator
pub fn validate_spoof_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(NamespoofError::InvalidName(
            "display name must not be empty".into(),
        ));
    }

    let length = name.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(NamespoofError::InvalidName(format!(
            "display name is {} characters, maximum is {}",
            length, MAX_NAME_LENGTH
        )));
    }

    Ok(name.to_string())
}

fn parse_domains(raw: &str) -> Result<Vec<String>> {
    let domains: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    if domains.is_empty() {
        return Err(NamespoofError::InvalidConfig(
            "SPOOF_DOMAINS must name at least one domain".into(),
        ));
    }

    Ok(domains)
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "PROXY_HOST",
        "PROXY_PORT",
        "PROXY_CONNECT_TIMEOUT",
        "PROXY_REQUEST_TIMEOUT",
        "PROXY_READY_TIMEOUT_MS",
        "PROXY_STOP_TIMEOUT_MS",
        "PROXY_PORT_PROBE_ATTEMPTS",
        "PROXY_PORT_PROBE_INTERVAL_MS",
        "SPOOF_NAME",
        "SPOOF_DOMAINS",
        "SPOOF_CONTENT_TYPE",
        "LOG_LEVEL",
        "LOG_FORMAT",
        "LOG_FILE",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.proxy.host, "127.0.0.1");
        assert_eq!(config.proxy.port, 8080);
        assert_eq!(config.proxy.ready_timeout(), Duration::from_secs(3));
        assert_eq!(config.proxy.stop_timeout(), Duration::from_secs(5));
        assert_eq!(config.proxy.port_probe_attempts, 5);
        assert_eq!(config.proxy.port_probe_interval(), Duration::from_millis(500));

        assert_eq!(config.spoof.name, DEFAULT_SPOOF_NAME);
        assert_eq!(config.spoof.domains, DEFAULT_MATCH_DOMAINS);
        assert_eq!(config.spoof.content_type, "application/json");

        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "pretty");
        assert!(config.log.file.is_none());
        assert_eq!(config.proxy_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("PROXY_HOST", "0.0.0.0");
        env::set_var("PROXY_PORT", "9090");
        env::set_var("PROXY_READY_TIMEOUT_MS", "1500");
        env::set_var("SPOOF_NAME", "  Alpha  ");
        env::set_var("SPOOF_DOMAINS", "Example.com, api.test ,");
        env::set_var("LOG_FORMAT", "json");
        env::set_var("LOG_FILE", " logs/namespoof.log ");

        let config = Config::from_env().unwrap();

        assert_eq!(config.proxy.host, "0.0.0.0");
        assert_eq!(config.proxy.port, 9090);
        assert_eq!(config.proxy.ready_timeout(), Duration::from_millis(1500));
        assert_eq!(config.spoof.name, "Alpha");
        assert_eq!(
            config.spoof.domains,
            vec!["example.com".to_string(), "api.test".to_string()]
        );
        assert_eq!(config.log.format, "json");
        assert_eq!(config.log.file, Some(PathBuf::from("logs/namespoof.log")));
    }

    #[test]
    fn test_config_from_env_invalid_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("PROXY_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, NamespoofError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_rejects_empty_domains() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SPOOF_DOMAINS", " , ");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, NamespoofError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_rejects_invalid_name() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SPOOF_NAME", "   ");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, NamespoofError::InvalidName(_)));
    }

    #[test]
    fn test_validate_spoof_name() {
        assert_eq!(validate_spoof_name(" Bob ").unwrap(), "Bob");
        assert!(validate_spoof_name("").is_err());

        let longest = "x".repeat(MAX_NAME_LENGTH);
        assert_eq!(validate_spoof_name(&longest).unwrap(), longest);
        assert!(validate_spoof_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());

        // Length counts characters, not bytes
        let wide = "é".repeat(MAX_NAME_LENGTH);
        assert!(validate_spoof_name(&wide).is_ok());
    }
}
