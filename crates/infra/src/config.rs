//! Configuration loading and representation.
//!
//! The configuration is loaded once at start-up and handed to every service
//! explicitly; nothing here is ambient global state.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

use ppghub_auth::{
    LockoutPolicy, ResolutionPolicy, RoleDefinition, RoleName, SessionPolicy, default_catalog,
};
use ppghub_observability::{LogFormat, LogSettings};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid_value(key: &str, reason: impl ToString) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HashingSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingSettings {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl HashingSettings {
    /// Cheapest parameters argon2 accepts; for tests only.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub session_ttl_secs: u64,
    pub max_session_lifetime_secs: u64,
    pub lockout_threshold: u32,
    pub lockout_duration_secs: u64,
    /// Role names that apply across every program of their institution.
    pub global_scope_roles: Vec<String>,
    pub store_timeout_ms: u64,
    pub password_hashing: HashingSettings,
    pub log: LogSettings,
    /// Catalog seeded at start-up.
    pub roles: Vec<RoleDefinition>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 24 * 60 * 60,
            max_session_lifetime_secs: 7 * 24 * 60 * 60,
            lockout_threshold: 5,
            lockout_duration_secs: 15 * 60,
            global_scope_roles: Vec::new(),
            store_timeout_ms: 5_000,
            password_hashing: HashingSettings::default(),
            log: LogSettings::default(),
            roles: default_catalog(),
        }
    }
}

impl AuthConfig {
    /// Load from the process environment (after an optional `.env` file).
    pub fn from_env() -> Result<Self, ConfigError> {
        // a missing .env file is fine; the process environment still applies
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            session_ttl_secs: parse_or(&lookup, "PPGHUB_SESSION_TTL_SECS", defaults.session_ttl_secs)?,
            max_session_lifetime_secs: parse_or(
                &lookup,
                "PPGHUB_MAX_SESSION_LIFETIME_SECS",
                defaults.max_session_lifetime_secs,
            )?,
            lockout_threshold: parse_or(&lookup, "PPGHUB_LOCKOUT_THRESHOLD", defaults.lockout_threshold)?,
            lockout_duration_secs: parse_or(
                &lookup,
                "PPGHUB_LOCKOUT_DURATION_SECS",
                defaults.lockout_duration_secs,
            )?,
            global_scope_roles: lookup("PPGHUB_GLOBAL_SCOPE_ROLES")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.global_scope_roles),
            store_timeout_ms: parse_or(&lookup, "PPGHUB_STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
            password_hashing: HashingSettings {
                memory_kib: parse_or(
                    &lookup,
                    "PPGHUB_ARGON2_MEMORY_KIB",
                    defaults.password_hashing.memory_kib,
                )?,
                iterations: parse_or(
                    &lookup,
                    "PPGHUB_ARGON2_ITERATIONS",
                    defaults.password_hashing.iterations,
                )?,
                parallelism: parse_or(
                    &lookup,
                    "PPGHUB_ARGON2_PARALLELISM",
                    defaults.password_hashing.parallelism,
                )?,
            },
            log: LogSettings {
                level: lookup("PPGHUB_LOG_LEVEL").unwrap_or(defaults.log.level),
                format: match lookup("PPGHUB_LOG_FORMAT") {
                    Some(raw) => raw
                        .parse::<LogFormat>()
                        .map_err(|e| ConfigError::invalid_value("PPGHUB_LOG_FORMAT", e))?,
                    None => defaults.log.format,
                },
            },
            roles: defaults.roles,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lockout_threshold == 0 {
            return Err(ConfigError::Invalid("lockout_threshold must be at least 1".into()));
        }
        if self.session_ttl_secs == 0 {
            return Err(ConfigError::Invalid("session_ttl must be positive".into()));
        }
        if self.max_session_lifetime_secs < self.session_ttl_secs {
            return Err(ConfigError::Invalid(
                "max_session_lifetime must not be shorter than session_ttl".into(),
            ));
        }
        for (key, value) in [
            ("session_ttl", self.session_ttl_secs),
            ("max_session_lifetime", self.max_session_lifetime_secs),
            ("lockout_duration", self.lockout_duration_secs),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(ConfigError::invalid_value(key, "longer than a century"));
            }
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store_timeout must be positive".into()));
        }

        let mut seeded = BTreeSet::new();
        for def in &self.roles {
            if !seeded.insert(def.name.clone()) {
                return Err(ConfigError::Invalid(format!("role '{}' seeded twice", def.name)));
            }
        }
        for name in &self.global_scope_roles {
            if !seeded.contains(&RoleName::new(name.clone())) {
                return Err(ConfigError::Invalid(format!(
                    "global scope role '{name}' is not in the role catalog"
                )));
            }
        }
        Ok(())
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            ttl: secs(self.session_ttl_secs),
            max_lifetime: secs(self.max_session_lifetime_secs),
        }
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            threshold: self.lockout_threshold,
            duration: secs(self.lockout_duration_secs),
        }
    }

    pub fn resolution_policy(&self) -> ResolutionPolicy {
        ResolutionPolicy::new(self.global_scope_roles.iter().cloned())
    }

    pub fn store_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.store_timeout_ms)
    }
}

/// Upper bound for any configured duration (about a century).
const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECS) as i64)
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid_value(key, e)),
        None => Ok(default),
    }
}
