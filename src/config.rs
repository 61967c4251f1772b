//!
//! sentry_portal configuration
//! ---------------------------
//! Runtime settings for the portal server. Values start from built-in defaults,
//! are overridden by `SENTRY_*` environment variables, and finally by CLI flags.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_PREDICT_DELAY_MIN_MS: u64 = 2_000;
pub const DEFAULT_PREDICT_DELAY_MAX_MS: u64 = 5_000;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("predict delay window is inverted: min {min_ms}ms > max {max_ms}ms")]
    InvertedDelayWindow { min_ms: u64, max_ms: u64 },
    #[error("session ttl must be greater than zero")]
    ZeroSessionTtl,
    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub http_port: u16,
    /// Folder for JSON table snapshots. `None` keeps everything in memory.
    pub data_root: Option<PathBuf>,
    pub session_ttl_secs: u64,
    pub predict_delay_min_ms: u64,
    pub predict_delay_max_ms: u64,
    pub max_upload_bytes: u64,
    pub secure_cookies: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            data_root: None,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            predict_delay_min_ms: DEFAULT_PREDICT_DELAY_MIN_MS,
            predict_delay_max_ms: DEFAULT_PREDICT_DELAY_MAX_MS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            secure_cookies: true,
        }
    }
}

pub const USAGE: &str = "sentry_portal server\n\nUSAGE:\n  sentry_server [--http-port N] [--data-root PATH] [--session-ttl SECS] [--predict-delay-min MS] [--predict-delay-max MS] [--max-upload-bytes N] [--insecure-cookies]\n\nOPTIONS:\n  --http-port N            HTTP port (env: SENTRY_HTTP_PORT, default 8080)\n  --data-root PATH         Persist tables as JSON under PATH (env: SENTRY_DATA_ROOT, default memory only)\n  --session-ttl SECS       Session lifetime (env: SENTRY_SESSION_TTL_SECS, default 3600)\n  --predict-delay-min MS   Mock predictor minimum delay (env: SENTRY_PREDICT_DELAY_MIN_MS, default 2000)\n  --predict-delay-max MS   Mock predictor maximum delay (env: SENTRY_PREDICT_DELAY_MAX_MS, default 5000)\n  --max-upload-bytes N     Largest declared evidence size (env: SENTRY_MAX_UPLOAD_BYTES, default 100MiB)\n  --insecure-cookies       Drop the Secure cookie attribute for plain-HTTP development (env: SENTRY_SECURE_COOKIES=false)\n";

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_num<T: std::str::FromStr>(flag: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue { flag: flag.to_string(), value: raw.to_string() })
}

impl PortalConfig {
    /// Build from the process environment and the given argv (including argv[0]).
    pub fn from_env_and_args(args: &[String]) -> Result<Self, ConfigError> {
        Self::from_sources(|k| env::var(k).ok(), args)
    }

    /// Layered construction with an injectable environment lookup.
    pub fn from_sources<F>(lookup: F, args: &[String]) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = PortalConfig::default();

        // Environment variables
        if let Some(v) = lookup("SENTRY_HTTP_PORT") { cfg.http_port = parse_num("SENTRY_HTTP_PORT", &v)?; }
        if let Some(v) = lookup("SENTRY_DATA_ROOT") {
            if !v.trim().is_empty() { cfg.data_root = Some(PathBuf::from(v)); }
        }
        if let Some(v) = lookup("SENTRY_SESSION_TTL_SECS") { cfg.session_ttl_secs = parse_num("SENTRY_SESSION_TTL_SECS", &v)?; }
        if let Some(v) = lookup("SENTRY_PREDICT_DELAY_MIN_MS") { cfg.predict_delay_min_ms = parse_num("SENTRY_PREDICT_DELAY_MIN_MS", &v)?; }
        if let Some(v) = lookup("SENTRY_PREDICT_DELAY_MAX_MS") { cfg.predict_delay_max_ms = parse_num("SENTRY_PREDICT_DELAY_MAX_MS", &v)?; }
        if let Some(v) = lookup("SENTRY_MAX_UPLOAD_BYTES") { cfg.max_upload_bytes = parse_num("SENTRY_MAX_UPLOAD_BYTES", &v)?; }
        if let Some(v) = lookup("SENTRY_SECURE_COOKIES") {
            cfg.secure_cookies = parse_bool(&v).ok_or(ConfigError::InvalidValue { flag: "SENTRY_SECURE_COOKIES".into(), value: v.clone() })?;
        }

        // CLI arguments override environment
        if let Some(v) = flag_value(args, "--http-port") { cfg.http_port = parse_num("--http-port", v)?; }
        if let Some(v) = flag_value(args, "--data-root") { cfg.data_root = Some(PathBuf::from(v)); }
        if let Some(v) = flag_value(args, "--session-ttl") { cfg.session_ttl_secs = parse_num("--session-ttl", v)?; }
        if let Some(v) = flag_value(args, "--predict-delay-min") { cfg.predict_delay_min_ms = parse_num("--predict-delay-min", v)?; }
        if let Some(v) = flag_value(args, "--predict-delay-max") { cfg.predict_delay_max_ms = parse_num("--predict-delay-max", v)?; }
        if let Some(v) = flag_value(args, "--max-upload-bytes") { cfg.max_upload_bytes = parse_num("--max-upload-bytes", v)?; }
        if has_flag(args, "--insecure-cookies") { cfg.secure_cookies = false; }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.predict_delay_min_ms > self.predict_delay_max_ms {
            return Err(ConfigError::InvertedDelayWindow { min_ms: self.predict_delay_min_ms, max_ms: self.predict_delay_max_ms });
        }
        if self.session_ttl_secs == 0 { return Err(ConfigError::ZeroSessionTtl); }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration { Duration::from_secs(self.session_ttl_secs) }

    /// Settings for in-process tests: memory store, no artificial delay, plain-HTTP cookies.
    pub fn for_tests() -> Self {
        Self { predict_delay_min_ms: 0, predict_delay_max_ms: 0, secure_cookies: false, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn argv(items: &[&str]) -> Vec<String> {
        std::iter::once("sentry_server").chain(items.iter().copied()).map(String::from).collect()
    }

    #[test]
    fn defaults_without_env_or_flags() {
        let cfg = PortalConfig::from_sources(|_| None, &argv(&[])).unwrap();
        assert_eq!(cfg, PortalConfig::default());
        assert_eq!(cfg.predict_delay_min_ms, 2_000);
        assert_eq!(cfg.predict_delay_max_ms, 5_000);
    }

    #[test]
    fn flags_override_environment() {
        let env: HashMap<&str, &str> = [("SENTRY_HTTP_PORT", "9000"), ("SENTRY_DATA_ROOT", "/var/lib/sentry")].into_iter().collect();
        let cfg = PortalConfig::from_sources(|k| env.get(k).map(|s| s.to_string()), &argv(&["--http-port", "9100", "--insecure-cookies"])).unwrap();
        assert_eq!(cfg.http_port, 9100);
        assert_eq!(cfg.data_root, Some(PathBuf::from("/var/lib/sentry")));
        assert!(!cfg.secure_cookies);
    }

    #[test]
    fn rejects_inverted_delay_window() {
        let err = PortalConfig::from_sources(|_| None, &argv(&["--predict-delay-min", "10", "--predict-delay-max", "5"])).unwrap_err();
        assert_eq!(err, ConfigError::InvertedDelayWindow { min_ms: 10, max_ms: 5 });
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = PortalConfig::from_sources(|k| (k == "SENTRY_SESSION_TTL_SECS").then(|| "soon".to_string()), &argv(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
