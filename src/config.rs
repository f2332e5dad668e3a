//! Lookup helpers over the `config` crate.
//!
//! Engine and transport configs read their keys through [`lookup`]: an
//! instance name scopes the key (`{name}.{key}`) and the bare key is the
//! shared fallback, so several transports can draw on one configuration
//! source.

use ::config::{Config, ConfigError};

// The typed getters this crate needs are all `fn(&Config, &str)`, so a
// plain function pointer keeps the scoping logic in one place.
pub(crate) fn lookup<T>(
    config: &Config,
    name: &str,
    key: &str,
    get: fn(&Config, &str) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    if !name.is_empty() {
        if let Ok(value) = get(config, &format!("{name}.{key}")) {
            return Ok(value);
        }
    }
    get(config, key)
}

pub(crate) fn lookup_string(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<String, ConfigError> {
    lookup(config, name, key, Config::get_string)
}

pub(crate) fn lookup_int(config: &Config, name: &str, key: &str) -> Result<i64, ConfigError> {
    lookup(config, name, key, Config::get_int)
}

pub(crate) fn lookup_bool(config: &Config, name: &str, key: &str) -> Result<bool, ConfigError> {
    lookup(config, name, key, Config::get_bool)
}
