/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Provisioner Settings
//!
//! Layered configuration shared by every provisioner component.
//!
//! ## Sources
//!
//! Later sources win:
//!
//! 1. `default.toml`, compiled into the binary
//! 2. an optional configuration file passed to [`Settings::new`]
//! 3. `PROVISIONER__<SECTION>__<KEY>` environment variables
//!
//! File keys are the snake_case field names (`supervisor.tick_interval_seconds`);
//! the environment form upper-cases them and joins path segments with `__`
//! (`PROVISIONER__SUPERVISOR__TICK_INTERVAL_SECONDS`).
//!
//! ## Keys
//!
//! | Key | Default |
//! |---|---|
//! | `log.level` | `"info"` |
//! | `log.format` (`"text"` or `"json"`) | `"text"` |
//! | `supervisor.instance_id` | unset, generated at startup |
//! | `supervisor.tick_interval_seconds` | 30 |
//! | `supervisor.lock_expiry_seconds` (0 disables expiry) | 600 |
//! | `supervisor.cluster_batch_size` | 10 |
//! | `scheduling.max_installations_per_multitenant_database` | 10 |
//! | `scheduling.default_node_group` | `"worker"` |
//! | `webhooks.default_failure_threshold_seconds` | 7200 |
//! | `webhooks.delivery_batch_size` | 50 |
//! | `webhooks.base_backoff_seconds` | 2 |
//! | `webhooks.cleanup_interval_seconds` | 3600 |
//! | `webhooks.delivery_retention_seconds` | 604800 (7 days) |
//!
//! Only `log.level`, `supervisor.tick_interval_seconds` and
//! `webhooks.delivery_batch_size` are picked up by [`ReloadableConfig::reload`];
//! everything else is fixed for the life of the process.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

const DEFAULT_SETTINGS: &str = include_str!("../default.toml");
const ENV_PREFIX: &str = "PROVISIONER";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log: Log,
    pub supervisor: Supervisor,
    pub scheduling: Scheduling,
    pub webhooks: Webhooks,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    pub level: String,
    /// `"text"` or `"json"`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_format() -> String {
    "text".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Supervisor {
    /// Owner token written into lock fields. Generated when absent.
    pub instance_id: Option<String>,
    pub tick_interval_seconds: u64,
    /// Seconds after which a held lock is considered stale (0 = never)
    pub lock_expiry_seconds: u64,
    /// Maximum clusters processed per tick
    pub cluster_batch_size: usize,
}

impl Supervisor {
    /// `None` when expiry is disabled.
    pub fn lock_expiry(&self) -> Option<Duration> {
        (self.lock_expiry_seconds > 0).then(|| Duration::from_secs(self.lock_expiry_seconds))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scheduling {
    /// Installation limit used when filtering multitenant databases
    pub max_installations_per_multitenant_database: i64,
    /// Node group used by clusters created without explicit node groups
    pub default_node_group: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Webhooks {
    /// Failure threshold applied to subscriptions that did not set one
    pub default_failure_threshold_seconds: i64,
    pub delivery_batch_size: usize,
    /// Base for the exponential retry backoff
    pub base_backoff_seconds: i64,
    pub cleanup_interval_seconds: u64,
    /// How long finished deliveries are kept before cleanup drops them
    pub delivery_retention_seconds: i64,
}

impl Settings {
    /// Builds settings from the embedded defaults, `file` when given, and the
    /// environment.
    pub fn new(file: Option<String>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_SETTINGS, FileFormat::Toml));
        if let Some(path) = file {
            builder = builder.add_source(File::with_name(&path));
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }
}

/// The hot-reloadable subset of [`Settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicConfig {
    pub log_level: String,
    pub tick_interval_seconds: u64,
    pub delivery_batch_size: usize,
}

impl From<&Settings> for DynamicConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            log_level: settings.log.level.clone(),
            tick_interval_seconds: settings.supervisor.tick_interval_seconds,
            delivery_batch_size: settings.webhooks.delivery_batch_size,
        }
    }
}

impl DynamicConfig {
    /// Keys whose value differs in `next`, in a fixed order.
    fn diff(&self, next: &DynamicConfig) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        ConfigChange::push_if_changed(&mut changes, "log.level", &self.log_level, &next.log_level);
        ConfigChange::push_if_changed(
            &mut changes,
            "supervisor.tick_interval_seconds",
            &self.tick_interval_seconds,
            &next.tick_interval_seconds,
        );
        ConfigChange::push_if_changed(
            &mut changes,
            "webhooks.delivery_batch_size",
            &self.delivery_batch_size,
            &next.delivery_batch_size,
        );
        changes
    }
}

/// One key that changed during a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub key: String,
    pub old_value: String,
    pub new_value: String,
}

impl ConfigChange {
    fn push_if_changed<T: PartialEq + Display>(
        changes: &mut Vec<ConfigChange>,
        key: &str,
        old: &T,
        new: &T,
    ) {
        if old != new {
            changes.push(ConfigChange {
                key: key.to_string(),
                old_value: old.to_string(),
                new_value: new.to_string(),
            });
        }
    }
}

/// Settings plus a shared, reloadable view of the dynamic keys.
///
/// Clones share the dynamic half, so a reload through any clone is seen by
/// all of them.
#[derive(Clone)]
pub struct ReloadableConfig {
    static_config: Settings,
    dynamic: Arc<RwLock<DynamicConfig>>,
    config_file: Option<String>,
}

impl ReloadableConfig {
    pub fn new(file: Option<String>) -> Result<Self, ConfigError> {
        let settings = Settings::new(file.clone())?;
        Ok(Self::from_settings(settings, file))
    }

    /// `config_file` is re-read on every [`reload`](Self::reload).
    pub fn from_settings(settings: Settings, config_file: Option<String>) -> Self {
        let dynamic = DynamicConfig::from(&settings);
        Self {
            static_config: settings,
            dynamic: Arc::new(RwLock::new(dynamic)),
            config_file,
        }
    }

    /// Settings as loaded at construction.
    pub fn static_config(&self) -> &Settings {
        &self.static_config
    }

    /// Re-reads every source and swaps in the new dynamic values.
    ///
    /// Returns the keys that changed; an empty list means nothing did.
    pub fn reload(&self) -> Result<Vec<ConfigChange>, ConfigError> {
        let next = DynamicConfig::from(&Settings::new(self.config_file.clone())?);
        let mut dynamic = self
            .dynamic
            .write()
            .map_err(|e| ConfigError::Message(format!("dynamic config lock poisoned: {}", e)))?;
        let changes = dynamic.diff(&next);
        *dynamic = next;
        Ok(changes)
    }

    fn dynamic(&self) -> RwLockReadGuard<'_, DynamicConfig> {
        // Writers only swap the whole value; a poisoned guard still holds a complete config.
        self.dynamic.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn log_level(&self) -> String {
        self.dynamic().log_level.clone()
    }

    pub fn tick_interval_seconds(&self) -> u64 {
        self.dynamic().tick_interval_seconds
    }

    pub fn delivery_batch_size(&self) -> usize {
        self.dynamic().delivery_batch_size
    }
}
