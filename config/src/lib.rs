//! Configuration for leakwatch audit sessions.
//!
//! Read from `$LEAKWATCH_CONFIG` if set, otherwise `~/.leakwatch/config.toml`.
//! Every section and field is optional; absent values fall back to the
//! auditor's built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use leakwatch_types::{AllowlistRule, Namespace};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "LEAKWATCH_CONFIG";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    pub session: Option<SessionConfig>,
    pub allowlist: Option<AllowlistConfig>,
    pub report: Option<ReportConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid allowlist namespace {value:?}: must not be empty")]
    InvalidNamespace { value: String },
    #[error("invalid session jitter {value}: must be a finite number in [0, 1]")]
    InvalidJitter { value: f64 },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path.as_path()),
            ConfigError::InvalidNamespace { .. } | ConfigError::InvalidJitter { .. } => None,
        }
    }
}

/// Retry and grace bounds for one session teardown.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Reachability polls per registered resource. Default: 10.
    pub max_attempts: Option<u32>,
    /// Delay after the first failed poll. Default: 10.
    pub initial_backoff_ms: Option<u64>,
    /// Backoff ceiling. Default: 200.
    pub max_backoff_ms: Option<u64>,
    /// Down-jitter factor in `[0, 1]`. Default: 0.
    pub jitter: Option<f64>,
    /// Extra census captures while unexpected threads remain. Default: 3.
    pub thread_grace_attempts: Option<u32>,
}

impl SessionConfig {
    /// The configured jitter factor, rejected unless finite and in `[0, 1]`.
    pub fn jitter(&self) -> Result<Option<f64>, ConfigError> {
        match self.jitter {
            Some(value) if !(value.is_finite() && (0.0..=1.0).contains(&value)) => {
                Err(ConfigError::InvalidJitter { value })
            }
            jitter => Ok(jitter),
        }
    }
}

/// Threads permitted to outlive a session.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowlistConfig {
    /// Exact namespace labels.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Namespace prefixes.
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl AllowlistConfig {
    /// Rules in file order: exact namespaces first, then prefixes.
    pub fn rules(&self) -> Result<Vec<AllowlistRule>, ConfigError> {
        let mut rules = Vec::with_capacity(self.namespaces.len() + self.prefixes.len());
        for value in &self.namespaces {
            let namespace = Namespace::new(value.as_str()).map_err(|_| {
                ConfigError::InvalidNamespace {
                    value: value.clone(),
                }
            })?;
            rules.push(AllowlistRule::namespace(namespace));
        }
        for prefix in &self.prefixes {
            if prefix.trim().is_empty() {
                // An empty prefix would permit every thread.
                return Err(ConfigError::InvalidNamespace {
                    value: prefix.clone(),
                });
            }
            rules.push(AllowlistRule::prefix(prefix.trim()));
        }
        Ok(rules)
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Directory for JSON leak reports. Supports `${VAR}` expansion.
    pub dir: Option<String>,
}

impl ReportConfig {
    /// Expanded report directory, or `None` if unset or empty after expansion.
    #[must_use]
    pub fn dir(&self) -> Option<PathBuf> {
        let raw = self.dir.as_deref()?;
        let expanded = expand_env_vars(raw);
        let trimmed = expanded.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// Replace `${VAR}` with the value of `VAR` (empty if unset).
///
/// An unclosed `${` is kept verbatim.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl AuditConfig {
    /// Load from the default location. `Ok(None)` if no file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No leakwatch config file");
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let config: Self = match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        if let Err(err) = config.validate() {
            tracing::warn!("Invalid config at {:?}: {}", path, err);
            return Err(err);
        }
        Ok(config)
    }

    /// Check values that parse but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(session) = &self.session {
            session.jitter()?;
        }
        self.allowlist_rules()?;
        Ok(())
    }

    /// Like [`AuditConfig::load`], but an absent file yields the defaults.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        Ok(Self::load()?.unwrap_or_default())
    }

    pub fn allowlist_rules(&self) -> Result<Vec<AllowlistRule>, ConfigError> {
        self.allowlist
            .as_ref()
            .map_or_else(|| Ok(Vec::new()), AllowlistConfig::rules)
    }

    #[must_use]
    pub fn report_dir(&self) -> Option<PathBuf> {
        self.report.as_ref().and_then(ReportConfig::dir)
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".leakwatch").join("config.toml"))
}
