//! Configuration management

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default activation prefix for chat messages
pub const DEFAULT_PREFIX: &str = "/logiq";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the Ollama server
    pub ollama_url: String,

    /// Sampling temperature sent with every generation
    pub temperature: f64,

    /// Attempts per problem, at least 1
    pub max_retries: u32,

    /// Report exception details instead of a bare "Error"
    pub show_code_run_errors: bool,

    /// Model used when a request does not name one
    pub default_model: String,

    /// Timeout for a single oracle request
    pub request_timeout: Duration,

    /// Chat activation prefix
    pub prefix: String,

    /// Listen address for `--serve`
    pub bind_addr: SocketAddr,

    /// Emit logs as JSON
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            temperature: 0.1,
            max_retries: 6,
            show_code_run_errors: false,
            default_model: "llama2".to_string(),
            request_timeout: Duration::from_secs(120),
            prefix: DEFAULT_PREFIX.to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// unset keys. Set but unparsable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let ollama_url = lookup("LOGIQ_OLLAMA_URL")
            .or_else(|| lookup("OLLAMA_URL"))
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.ollama_url);

        let temperature = parse_var(&lookup, "LOGIQ_TEMPERATURE")?.unwrap_or(defaults.temperature);
        if !(0.0..=2.0).contains(&temperature) {
            bail!("LOGIQ_TEMPERATURE must be between 0 and 2, got {}", temperature);
        }

        let max_retries = parse_var(&lookup, "LOGIQ_MAX_RETRIES")?.unwrap_or(defaults.max_retries);
        if max_retries == 0 {
            bail!("LOGIQ_MAX_RETRIES must be at least 1");
        }

        let show_code_run_errors = match lookup("LOGIQ_SHOW_CODE_RUN_ERRORS") {
            Some(raw) => parse_flag("LOGIQ_SHOW_CODE_RUN_ERRORS", &raw)?,
            None => defaults.show_code_run_errors,
        };

        let default_model = lookup("LOGIQ_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(defaults.default_model);

        let request_timeout = parse_var::<u64, _>(&lookup, "LOGIQ_REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let prefix = lookup("LOGIQ_PREFIX")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(defaults.prefix);

        let bind_addr = parse_var(&lookup, "LOGIQ_BIND")?.unwrap_or(defaults.bind_addr);

        let log_json = match lookup("LOGIQ_LOG_JSON") {
            Some(raw) => parse_flag("LOGIQ_LOG_JSON", &raw)?,
            None => defaults.log_json,
        };

        Ok(Self {
            ollama_url,
            temperature,
            max_retries,
            show_code_run_errors,
            default_model,
            request_timeout,
            prefix,
            bind_addr,
            log_json,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {:?}", key, raw))
        })
        .transpose()
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => bail!("invalid value for {}: {:?} (expected true/false)", key, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_retries, 6);
        assert_eq!(config.default_model, "llama2");
        assert_eq!(config.prefix, "/logiq");
        assert_eq!(config.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_ollama_url_fallback() {
        let config = load(&[("OLLAMA_URL", "http://gpu-box:11434/")]).unwrap();
        assert_eq!(config.ollama_url, "http://gpu-box:11434");

        let config = load(&[
            ("OLLAMA_URL", "http://gpu-box:11434"),
            ("LOGIQ_OLLAMA_URL", "http://other:11434"),
        ])
        .unwrap();
        assert_eq!(config.ollama_url, "http://other:11434");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("LOGIQ_MAX_RETRIES", "3"),
            ("LOGIQ_SHOW_CODE_RUN_ERRORS", "true"),
            ("LOGIQ_TEMPERATURE", "0.7"),
            ("LOGIQ_MODEL", "qwen2.5-coder"),
            ("LOGIQ_BIND", "0.0.0.0:9000"),
            ("LOGIQ_LOG_JSON", "1"),
        ])
        .unwrap();
        assert_eq!(config.max_retries, 3);
        assert!(config.show_code_run_errors);
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.default_model, "qwen2.5-coder");
        assert_eq!(config.bind_addr.port(), 9000);
        assert!(config.log_json);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(load(&[("LOGIQ_MAX_RETRIES", "0")]).is_err());
        assert!(load(&[("LOGIQ_MAX_RETRIES", "many")]).is_err());
        assert!(load(&[("LOGIQ_TEMPERATURE", "hot")]).is_err());
        assert!(load(&[("LOGIQ_TEMPERATURE", "5")]).is_err());
        assert!(load(&[("LOGIQ_SHOW_CODE_RUN_ERRORS", "maybe")]).is_err());
        assert!(load(&[("LOGIQ_BIND", "localhost")]).is_err());
    }
}
