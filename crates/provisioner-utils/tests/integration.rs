/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use provisioner_utils::{ReloadableConfig, Settings};
use serial_test::serial;
use std::env;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const SUPERVISOR_OVERRIDES: &str = r#"
    [log]
    level = "info"

    [supervisor]
    instance_id = "supervisor-a"
    tick_interval_seconds = 5
    lock_expiry_seconds = 0
    cluster_batch_size = 3
"#;

fn path_arg(path: &Path) -> Option<String> {
    Some(path.to_string_lossy().into_owned())
}

#[test]
#[serial]
/// File values override the embedded defaults and the environment overrides
/// both; sections missing from the file keep their defaults.
fn test_file_then_environment_precedence() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("supervisor.toml");
    fs::write(&path, SUPERVISOR_OVERRIDES).unwrap();

    env::set_var("PROVISIONER__LOG__LEVEL", "debug");
    let settings = Settings::new(path_arg(&path));
    env::remove_var("PROVISIONER__LOG__LEVEL");
    let settings = settings.unwrap();

    assert_eq!(settings.supervisor.instance_id.as_deref(), Some("supervisor-a"));
    assert_eq!(settings.supervisor.tick_interval_seconds, 5);
    assert_eq!(settings.supervisor.cluster_batch_size, 3);
    assert!(settings.supervisor.lock_expiry().is_none());
    assert_eq!(settings.log.level, "debug");
    assert_eq!(settings.webhooks.delivery_batch_size, 50);
}

#[test]
#[serial]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    assert!(Settings::new(path_arg(&dir.path().join("absent.toml"))).is_err());
}

#[test]
#[serial]
fn test_environment_only() {
    env::set_var("PROVISIONER__WEBHOOKS__BASE_BACKOFF_SECONDS", "9");
    let settings = Settings::new(None);
    env::remove_var("PROVISIONER__WEBHOOKS__BASE_BACKOFF_SECONDS");
    let settings = settings.unwrap();

    assert_eq!(settings.webhooks.base_backoff_seconds, 9);
    assert_eq!(settings.log.level, "info");
    assert_eq!(settings.scheduling.default_node_group, "worker");
}

#[test]
#[serial]
/// A changed environment variable is reported by reload and becomes visible
/// through the dynamic accessors.
fn test_reload_picks_up_environment_changes() {
    let config = ReloadableConfig::new(None).unwrap();
    assert_eq!(config.tick_interval_seconds(), 30);

    env::set_var("PROVISIONER__SUPERVISOR__TICK_INTERVAL_SECONDS", "12");
    let changes = config.reload();
    env::remove_var("PROVISIONER__SUPERVISOR__TICK_INTERVAL_SECONDS");
    let changes = changes.unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, "supervisor.tick_interval_seconds");
    assert_eq!(changes[0].old_value, "30");
    assert_eq!(changes[0].new_value, "12");
    assert_eq!(config.tick_interval_seconds(), 12);
    // Static settings are frozen at construction
    assert_eq!(config.static_config().supervisor.tick_interval_seconds, 30);
}

#[test]
#[serial]
fn test_reload_rereads_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("supervisor.toml");
    fs::write(&path, "[webhooks]\ndelivery_batch_size = 20\n").unwrap();
    let config = ReloadableConfig::new(path_arg(&path)).unwrap();
    assert_eq!(config.delivery_batch_size(), 20);

    fs::write(&path, "[webhooks]\ndelivery_batch_size = 80\n").unwrap();
    let changes = config.reload().unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, "webhooks.delivery_batch_size");
    assert_eq!(config.delivery_batch_size(), 80);
}
