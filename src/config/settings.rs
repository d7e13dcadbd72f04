//! Engine settings loading from config.toml
//!
//! The commission engine has a single business policy knob, the category
//! decomposition policy, which lives in the `[engine]` table of `config.toml`. The database location is not part of the
//! file; it comes from `DATABASE_URL` (see [`super::database`]).

use crate::core::calculator::CategoryPolicy;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::env::VarError;
use std::path::Path;

/// Environment variable that overrides the config file location
pub const CONFIG_PATH_ENV: &str = "COMMISSION_CONFIG";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Commission engine settings
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Settings that govern how commission amounts are computed
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How AGCI is divided into origination/site/deal amounts
    pub category_policy: CategoryPolicy,
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A field has an unknown value (e.g. an unrecognised policy name)
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    parse_config(&contents)
}

/// Parses configuration from TOML text
pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads configuration from `$COMMISSION_CONFIG` or `./config.toml`.
///
/// A missing file is not an error: the defaults (normalized policy)
/// are used instead.
///
/// # Errors
/// Returns [`Error::EnvVar`] if `$COMMISSION_CONFIG` is set but not valid
/// unicode, or [`Error::Config`] if the file can't be read or parsed.
pub fn load_default_config() -> Result<Config> {
    let path = config_path(std::env::var(CONFIG_PATH_ENV))?;

    if !Path::new(&path).exists() {
        tracing::info!(path = %path, "No config file found, using default engine settings");
        return Ok(Config::default());
    }

    load_config(&path)
}

fn config_path(var: std::result::Result<String, VarError>) -> Result<String> {
    match var {
        Ok(path) => Ok(path),
        Err(VarError::NotPresent) => Ok(DEFAULT_CONFIG_PATH.to_string()),
        Err(e) => Err(e.into()),
    }
}
