//! Environment fingerprints.
//!
//! A fingerprint is a set of observed values keyed by rule name plus a
//! BLAKE3 hash over `{rules, values}`. Resume compares the hash captured now
//! against the one recorded for the job to detect drift.
//!
//! Supported rules: `os`, `arch`, `family`, `hostname`, `cwd` and
//! `env:<NAME>`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::{env, fs, io};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed environment values and their hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub rules: Vec<String>,
    pub values: BTreeMap<String, String>,
    pub hash: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("unsupported environment fingerprint rule '{0}'")]
    UnsupportedRule(String),

    #[error("failed to evaluate fingerprint rule '{rule}': {source}")]
    Probe {
        rule: String,
        #[source]
        source: io::Error,
    },
}

/// Rules used when none are configured.
#[must_use]
pub fn default_rules() -> Vec<String> {
    vec!["arch".to_string(), "os".to_string()]
}

fn is_supported(rule: &str) -> bool {
    match rule.strip_prefix("env:") {
        Some(name) => !name.trim().is_empty(),
        None => matches!(rule, "os" | "arch" | "family" | "hostname" | "cwd"),
    }
}

/// Trim, drop blanks, de-duplicate and sort. An empty result falls back to
/// [`default_rules`].
///
/// # Errors
///
/// [`FingerprintError::UnsupportedRule`] for the first unknown rule.
pub fn normalize_rules<S: AsRef<str>>(rules: &[S]) -> Result<Vec<String>, FingerprintError> {
    let mut out: Vec<String> = rules
        .iter()
        .map(|r| r.as_ref().trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    out.sort();
    out.dedup();
    if out.is_empty() {
        return Ok(default_rules());
    }
    if let Some(bad) = out.iter().find(|r| !is_supported(r)) {
        return Err(FingerprintError::UnsupportedRule(bad.clone()));
    }
    Ok(out)
}

/// `blake3:<hex>` over the compact JSON of `{"rules": .., "values": ..}`.
#[must_use]
pub fn fingerprint_hash(rules: &[String], values: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::json!({ "rules": rules, "values": values });
    let hash = blake3::hash(canonical.to_string().as_bytes());
    format!("blake3:{}", hash.to_hex())
}

/// Produces fingerprints for a set of rules.
pub trait FingerprintSource: Send + Sync {
    /// Look up one already-normalized rule.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError`] when the value cannot be observed.
    fn observe(&self, rule: &str) -> Result<String, FingerprintError>;

    /// Normalize `rules`, observe each one and hash the result.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError`] for unknown rules or failed probes.
    fn capture(
        &self,
        rules: &[String],
        now: DateTime<Utc>,
    ) -> Result<Fingerprint, FingerprintError> {
        let rules = normalize_rules(rules)?;
        let values = rules
            .iter()
            .map(|rule| Ok((rule.clone(), self.observe(rule)?)))
            .collect::<Result<BTreeMap<_, _>, FingerprintError>>()?;
        let hash = fingerprint_hash(&rules, &values);
        Ok(Fingerprint {
            rules,
            values,
            hash,
            captured_at: now,
        })
    }
}

/// Observes the running process and host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFingerprint;

impl FingerprintSource for SystemFingerprint {
    fn observe(&self, rule: &str) -> Result<String, FingerprintError> {
        let probe_err = |source| FingerprintError::Probe {
            rule: rule.to_string(),
            source,
        };
        match rule {
            "os" => Ok(env::consts::OS.to_string()),
            "arch" => Ok(env::consts::ARCH.to_string()),
            "family" => Ok(env::consts::FAMILY.to_string()),
            "cwd" => env::current_dir()
                .map(|p| p.display().to_string())
                .map_err(probe_err),
            "hostname" => hostname().map_err(probe_err),
            other => match other.strip_prefix("env:") {
                Some(name) => Ok(env::var(name.trim()).unwrap_or_default()),
                None => Err(FingerprintError::UnsupportedRule(other.to_string())),
            },
        }
    }
}

fn hostname() -> io::Result<String> {
    hostname_from(
        ["/proc/sys/kernel/hostname", "/etc/hostname"]
            .into_iter()
            .filter_map(|path| fs::read_to_string(path).ok()),
        |key| env::var(key).ok(),
    )
}

/// Kernel sources win over shell variables; `HOSTNAME` differs per shell.
fn hostname_from(
    files: impl IntoIterator<Item = String>,
    var: impl Fn(&str) -> Option<String>,
) -> io::Result<String> {
    files
        .into_iter()
        .chain(["HOSTNAME", "COMPUTERNAME"].into_iter().filter_map(var))
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "hostname not available"))
}

/// Fixed, mutable values. Unset rules observe as the empty string.
#[derive(Debug, Default)]
pub struct StaticFingerprint {
    values: Mutex<BTreeMap<String, String>>,
}

impl StaticFingerprint {
    #[must_use]
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn set(&self, rule: impl Into<String>, value: impl Into<String>) {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(rule.into(), value.into());
    }
}

impl FingerprintSource for StaticFingerprint {
    fn observe(&self, rule: &str) -> Result<String, FingerprintError> {
        if !is_supported(rule) {
            return Err(FingerprintError::UnsupportedRule(rule.to_string()));
        }
        Ok(self
            .values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(rule)
            .cloned()
            .unwrap_or_default())
    }
}
