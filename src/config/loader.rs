//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    /// An environment variable held a value of the wrong shape.
    Env { var: &'static str, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, value } => {
                write!(f, "Invalid value for {}: '{}'", var, value)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse a TOML file without validating it.
///
/// Used when environment or CLI overrides still have to be layered on top.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let config = read_config(path)?;
    finalize(config)
}

/// Validate a fully layered configuration.
pub fn finalize(config: ProxyConfig) -> Result<ProxyConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut ProxyConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |var| std::env::var(var).ok())
}

/// Apply overrides from an arbitrary variable source.
///
/// Unset variables leave the field untouched; unparseable ones fail.
pub fn apply_overrides_from<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    if let Some(addr) = lookup("BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }
    if let Some(port) = parse_var::<u16, _>(&lookup, "PORT")? {
        config.listener.set_port(port);
    }
    if let Some(dir) = lookup("CACHE_DIR") {
        config.cache.disk.directory = PathBuf::from(dir);
    }
    if let Some(enabled) = parse_var::<bool, _>(&lookup, "DISK_CACHE_ENABLED")? {
        config.cache.disk.enabled = enabled;
    }
    if let Some(capacity) = parse_var(&lookup, "MEMORY_CACHE_CAPACITY")? {
        config.cache.memory.capacity = capacity;
    }
    if let Some(ttl) = parse_var(&lookup, "MEMORY_CACHE_TTL_SECS")? {
        config.cache.memory.ttl_secs = ttl;
    }
    if let Some(ttl) = parse_var(&lookup, "DISK_CACHE_TTL_SECS")? {
        config.cache.disk.ttl_secs = ttl;
    }
    if let Some(max) = parse_var(&lookup, "DISK_CACHE_MAX_BYTES")? {
        config.cache.disk.max_bytes = max;
    }
    if let Some(timeout) = parse_var(&lookup, "UPSTREAM_TIMEOUT_SECS")? {
        config.upstream.timeout_secs = timeout;
    }
    if let Some(dir) = lookup("STATIC_DIR") {
        config.shell.static_dir = Some(PathBuf::from(dir));
    }
    if let Some(format) = lookup("LOG_FORMAT") {
        config.observability.log_format = format;
    }
    if let Some(addr) = lookup("METRICS_ADDRESS") {
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = addr;
    }
    Ok(())
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
