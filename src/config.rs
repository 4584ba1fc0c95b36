use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;

use crate::error::{Result, TrackerError};

const DEFAULT_LANGUAGE: &str = "javascript";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CONCURRENCY: usize = 8;
const DEFAULT_INTERVAL_SECS: u64 = 60 * 60 * 24;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let bind_addr: SocketAddr = parse_or(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?;

        Ok(Self {
            database_url,
            bind_addr,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub codewars_base_url: Url,
    pub github_base_url: Url,
    pub github_org: String,
    pub github_token: Option<String>,
    pub language: String,
    pub http_timeout: Duration,
    pub max_concurrency: usize,
    pub interval: Duration,
}

impl ExtractionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let codewars_base_url = base_url(&lookup, "CODEWARS_API_URL")?;
        let github_base_url = base_url(&lookup, "GITHUB_API_URL")?;
        let github_org = required(&lookup, "GITHUB_ORG")?;
        let github_token = lookup("GITHUB_TOKEN").filter(|token| !token.trim().is_empty());
        let language = lookup("CODEWARS_LANGUAGE")
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let timeout_secs: u64 = parse_or(&lookup, "HTTP_TIMEOUT_SECS", Some(DEFAULT_HTTP_TIMEOUT_SECS))?;
        let max_concurrency: usize =
            parse_or(&lookup, "EXTRACTION_MAX_CONCURRENCY", Some(DEFAULT_MAX_CONCURRENCY))?;
        let interval_secs: u64 = parse_or(&lookup, "EXTRACTION_INTERVAL_SECS", Some(DEFAULT_INTERVAL_SECS))?;

        if max_concurrency == 0 {
            return Err(TrackerError::Configuration(
                "EXTRACTION_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if interval_secs == 0 {
            return Err(TrackerError::Configuration(
                "EXTRACTION_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            codewars_base_url,
            github_base_url,
            github_org,
            github_token,
            language,
            http_timeout: Duration::from_secs(timeout_secs),
            max_concurrency,
            interval: Duration::from_secs(interval_secs),
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TrackerError::Configuration(format!("{key} must be set")))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: Option<T>) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| TrackerError::Configuration(format!("{key} has an invalid value '{raw}'"))),
        None => default.ok_or_else(|| TrackerError::Configuration(format!("{key} must be set"))),
    }
}

fn base_url<F>(lookup: &F, key: &str) -> Result<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = required(lookup, key)?;
    let url = Url::parse(raw.trim_end_matches('/'))
        .map_err(|err| TrackerError::Configuration(format!("{key} is not a valid URL: {err}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(TrackerError::Configuration(format!(
            "{key} must use http or https, got '{scheme}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn extraction_env() -> HashMap<String, String> {
        env(&[
            ("CODEWARS_API_URL", "https://www.codewars.com/api/v1/"),
            ("GITHUB_API_URL", "https://api.github.com"),
            ("GITHUB_ORG", "CodeYourFuture"),
        ])
    }

    #[test]
    fn extraction_defaults_apply() {
        let vars = extraction_env();
        let config = ExtractionConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

        assert_eq!(config.codewars_base_url.as_str(), "https://www.codewars.com/api/v1");
        assert_eq!(config.github_org, "CodeYourFuture");
        assert_eq!(config.language, "javascript");
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.interval, Duration::from_secs(86_400));
        assert!(config.github_token.is_none());
    }

    #[test]
    fn missing_org_is_a_configuration_error() {
        let mut vars = extraction_env();
        vars.remove("GITHUB_ORG");
        let err = ExtractionConfig::from_lookup(|key| vars.get(key).cloned()).unwrap_err();

        assert!(matches!(err, TrackerError::Configuration(ref msg) if msg.contains("GITHUB_ORG")));
    }

    #[test]
    fn missing_base_url_is_a_configuration_error() {
        let mut vars = extraction_env();
        vars.remove("GITHUB_API_URL");
        let err = ExtractionConfig::from_lookup(|key| vars.get(key).cloned()).unwrap_err();

        assert!(matches!(err, TrackerError::Configuration(ref msg) if msg.contains("GITHUB_API_URL")));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mut vars = extraction_env();
        vars.insert("CODEWARS_API_URL".to_string(), "ftp://codewars.example".to_string());

        assert!(ExtractionConfig::from_lookup(|key| vars.get(key).cloned()).is_err());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut vars = extraction_env();
        vars.insert("EXTRACTION_MAX_CONCURRENCY".to_string(), "0".to_string());

        assert!(ExtractionConfig::from_lookup(|key| vars.get(key).cloned()).is_err());
    }

    #[test]
    fn database_url_is_required() {
        let vars = env(&[]);
        assert!(Config::from_lookup(|key| vars.get(key).cloned()).is_err());

        let vars = env(&[("DATABASE_URL", "postgres://localhost/tracker")]);
        let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
    }
}
