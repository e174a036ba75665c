//! Runtime configuration of the `connclass` binary.
//!
//! Settings are layered: built-in defaults, then an optional JSON file named by
//! [`CONFIG_PATH_ENV`], then individual environment variable overrides.
//!
//! ```json
//! {
//!   "estimator": { "poor_bandwidth_bps": 100000.0 },
//!   "stats_path": "/proc/net/xt_qtaguid/stats",
//!   "sample_interval_ms": 1000,
//!   "uid": 10123
//! }
//! ```

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::estimator::{ConfigError, EstimatorConfig};
use crate::fsutil::{self, FileOpenError};
use crate::qtaguid::QTAGUID_UID_STATS;
use crate::sampler::DEFAULT_SAMPLE_INTERVAL;

/// Path of a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "CONNCLASS_CONFIG";
/// Overrides [`Config::stats_path`].
pub const STATS_PATH_ENV: &str = "CONNCLASS_STATS_PATH";
/// Overrides [`Config::sample_interval_ms`].
pub const SAMPLE_INTERVAL_ENV: &str = "CONNCLASS_SAMPLE_INTERVAL_MS";
/// Overrides [`Config::uid`].
pub const UID_ENV: &str = "CONNCLASS_UID";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    FileOpen(#[from] FileOpenError),
    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value `{value}` for environment variable `{name}`")]
    InvalidVar { name: &'static str, value: String },
    #[error("sample interval must be positive")]
    ZeroInterval,
    #[error(transparent)]
    Estimator(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub estimator: EstimatorConfig,
    /// Traffic accounting file to sample.
    pub stats_path: PathBuf,
    pub sample_interval_ms: u64,
    /// Uid whose traffic is measured. Defaults to the uid of this process.
    pub uid: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            stats_path: PathBuf::from(QTAGUID_UID_STATS),
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL.as_millis() as u64,
            uid: None,
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails if the configuration file cannot be read or parsed, an override is malformed, or the
    /// result does not validate.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match var(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(path) = var(STATS_PATH_ENV) {
            config.stats_path = PathBuf::from(path);
        }
        if let Some(value) = var(SAMPLE_INTERVAL_ENV) {
            config.sample_interval_ms = parse_var(SAMPLE_INTERVAL_ENV, value)?;
        }
        if let Some(value) = var(UID_ENV) {
            config.uid = Some(parse_var(UID_ENV, value)?);
        }

        config.validate()?;
        log::debug!("loaded configuration: {config:?}");
        Ok(config)
    }

    /// Reads a JSON configuration file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileOpen`] or [`Error::Parse`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fsutil::open_file(path)?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    ///
    /// Returns [`Error::ZeroInterval`] or the estimator's [`ConfigError`].
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 {
            return Err(Error::ZeroInterval);
        }
        self.estimator.validate()?;
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// The configured uid, or the real uid of this process.
    pub fn uid(&self) -> u32 {
        self.uid.unwrap_or_else(current_uid)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidVar { name, value })
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
