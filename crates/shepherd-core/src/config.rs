use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::budget::BudgetLimits;
use crate::envfp;
use crate::lock::LockOptions;

const CONFIG_FILE: &str = "config.toml";
const MAX_STALE_AFTER_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub budget: BudgetLimits,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl LockConfig {
    #[must_use]
    pub fn options(&self) -> LockOptions {
        LockOptions {
            max_attempts: self.max_attempts.max(1),
            retry_delay: std::time::Duration::from_millis(self.retry_delay_ms),
            stale_after: chrono::Duration::seconds(
                i64::try_from(self.stale_after_secs.min(MAX_STALE_AFTER_SECS))
                    .unwrap_or(i64::MAX / 1000),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintConfig {
    #[serde(default = "envfp::default_rules")]
    pub rules: Vec<String>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            rules: envfp::default_rules(),
        }
    }
}

/// Resolved store root plus the settings that apply to it.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub root: PathBuf,
    pub config: RuntimeConfig,
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
}

const fn default_ttl_secs() -> u64 {
    30
}

const fn default_max_attempts() -> u32 {
    200
}

const fn default_retry_delay_ms() -> u64 {
    5
}

const fn default_stale_after_secs() -> u64 {
    120
}

/// `~/.shepherd`, or `.shepherd` in the working directory when there is no
/// home directory.
#[must_use]
pub fn default_store_root() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".shepherd"), |home| home.join(".shepherd"))
}

/// `<config_dir>/shepherd/config.toml`, when the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("shepherd").join(CONFIG_FILE))
}

/// Read a config file. A missing file is `Ok(None)`.
///
/// # Errors
///
/// Fails if the file exists but cannot be read or parsed.
pub fn load_config_file(path: &Path) -> Result<Option<RuntimeConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<RuntimeConfig>(&content)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Pick the store root: CLI flag, then `SHEPHERD_HOME`, then the user
/// config's `store.root`, then [`default_store_root`].
#[must_use]
pub fn resolve_store_root(
    cli_root: Option<&Path>,
    env_home: Option<&str>,
    user: Option<&RuntimeConfig>,
) -> PathBuf {
    if let Some(root) = cli_root {
        return root.to_path_buf();
    }
    if let Some(home) = env_home.map(str::trim).filter(|h| !h.is_empty()) {
        return PathBuf::from(home);
    }
    user.and_then(|cfg| cfg.store.root.clone())
        .unwrap_or_else(default_store_root)
}

/// Resolve configuration from explicit inputs.
///
/// The settings come from the first file found: `<root>/config.toml`, then
/// the user config file, then built-in defaults.
///
/// # Errors
///
/// Fails if a config file exists but cannot be read or parsed.
pub fn resolve_config_from(
    cli_root: Option<&Path>,
    env_home: Option<&str>,
    user_path: Option<&Path>,
) -> Result<EffectiveConfig> {
    let user = match user_path {
        Some(path) => load_config_file(path)?,
        None => None,
    };
    let root = resolve_store_root(cli_root, env_home, user.as_ref());

    let store_path = root.join(CONFIG_FILE);
    if let Some(config) = load_config_file(&store_path)? {
        return Ok(EffectiveConfig {
            root,
            config,
            source: Some(store_path),
        });
    }
    if let Some(config) = user {
        return Ok(EffectiveConfig {
            root,
            config,
            source: user_path.map(Path::to_path_buf),
        });
    }
    Ok(EffectiveConfig {
        root,
        config: RuntimeConfig::default(),
        source: None,
    })
}

/// Resolve configuration from the process environment and user config dir.
///
/// # Errors
///
/// Fails if a config file exists but cannot be read or parsed.
pub fn resolve_config(cli_root: Option<&Path>) -> Result<EffectiveConfig> {
    let env_home = env::var("SHEPHERD_HOME").ok();
    let user_path = user_config_path();
    resolve_config_from(cli_root, env_home.as_deref(), user_path.as_deref())
}
