/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Named volumes mounted into installations.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Volumes backed by a Kubernetes secret.
pub const VOLUME_TYPE_SECRET: &str = "secret";

pub const VALID_VOLUME_TYPES: &[&str] = &[VOLUME_TYPE_SECRET];

pub const VOLUME_NAME_MIN_LENGTH: usize = 3;
pub const VOLUME_NAME_MAX_LENGTH: usize = 64;

/// A volume and where it is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "type")]
    pub volume_type: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
    /// Keys to project from the backing secret.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Volume {
    pub fn secret(mount_path: impl Into<String>) -> Self {
        Self {
            volume_type: VOLUME_TYPE_SECRET.to_string(),
            mount_path: mount_path.into(),
            read_only: true,
            data: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !VALID_VOLUME_TYPES.contains(&self.volume_type.as_str()) {
            return Err(ModelError::validation(
                "volume type",
                format!("'{}' is not supported", self.volume_type),
            ));
        }
        if self.mount_path.trim().is_empty() {
            return Err(ModelError::validation("volume mount path", "must not be empty"));
        }
        Ok(())
    }
}

/// Volume name to volume.
pub type VolumeMap = BTreeMap<String, Volume>;

/// Names are 3-64 characters of `[a-z0-9_-]`, starting with a letter.
pub fn validate_volume_name(name: &str) -> Result<()> {
    let len = name.len();
    if !(VOLUME_NAME_MIN_LENGTH..=VOLUME_NAME_MAX_LENGTH).contains(&len) {
        return Err(ModelError::validation(
            "volume name",
            format!(
                "'{}' must be between {} and {} characters",
                name, VOLUME_NAME_MIN_LENGTH, VOLUME_NAME_MAX_LENGTH
            ),
        ));
    }
    let mut chars = name.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_lowercase()).unwrap_or(false);
    let rest_ok =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !first_ok || !rest_ok {
        return Err(ModelError::validation(
            "volume name",
            format!("'{}' must match ^[a-z][a-z0-9_-]*$", name),
        ));
    }
    Ok(())
}

/// Every name and volume is valid and no two volumes share a mount path.
pub fn validate_volume_map(volumes: &VolumeMap) -> Result<()> {
    let mut mount_paths = std::collections::HashSet::new();
    for (name, volume) in volumes {
        validate_volume_name(name)?;
        volume.validate()?;
        if !mount_paths.insert(volume.mount_path.as_str()) {
            return Err(ModelError::validation(
                "volume mount path",
                format!("'{}' is used by more than one volume", volume.mount_path),
            ));
        }
    }
    Ok(())
}

/// Adds `volume` under `name`, rejecting duplicates and invalid entries.
/// The map is left untouched on error.
pub fn add_volume(volumes: &mut VolumeMap, name: &str, volume: Volume) -> Result<()> {
    if volumes.contains_key(name) {
        return Err(ModelError::validation(
            "volume name",
            format!("'{}' already exists", name),
        ));
    }
    let mut candidate = volumes.clone();
    candidate.insert(name.to_string(), volume);
    validate_volume_map(&candidate)?;
    *volumes = candidate;
    Ok(())
}

/// Replaces the volume under `name`; it must already exist.
pub fn update_volume(volumes: &mut VolumeMap, name: &str, volume: Volume) -> Result<bool> {
    let Some(current) = volumes.get(name) else {
        return Err(ModelError::validation(
            "volume name",
            format!("'{}' does not exist", name),
        ));
    };
    if *current == volume {
        return Ok(false);
    }
    let mut candidate = volumes.clone();
    candidate.insert(name.to_string(), volume);
    validate_volume_map(&candidate)?;
    *volumes = candidate;
    Ok(true)
}

pub fn remove_volume(volumes: &mut VolumeMap, name: &str) -> bool {
    volumes.remove(name).is_some()
}
