/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Groups: shared configuration templates for installations.
//!
//! Every change to a group bumps its `sequence`; installations record the
//! sequence they last merged, which is how outdated members are found.

use super::env_vars::{clear_or_patch, EnvVarMap};
use crate::error::{ModelError, Result};
use crate::locks::{Lockable, ResourceLock};
use crate::patch::{ApplyPatch, Patch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ROLLING: i64 = 1;

/// A configuration template shared by installations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub image: String,
    /// How many member installations may be updated at once.
    pub max_rolling: i64,
    pub sequence: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<EnvVarMap>,
    pub create_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub lock: ResourceLock,
}

impl Group {
    pub fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }
}

impl Lockable for Group {
    fn id(&self) -> &str {
        &self.id
    }
    fn lock(&self) -> &ResourceLock {
        &self.lock
    }
    fn lock_mut(&mut self) -> &mut ResourceLock {
        &mut self.lock
    }
}

fn default_max_rolling() -> i64 {
    DEFAULT_MAX_ROLLING
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub image: String,
    #[serde(default = "default_max_rolling")]
    pub max_rolling: i64,
    #[serde(default)]
    pub env_vars: Option<EnvVarMap>,
}

impl CreateGroupRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::validation("name", "must not be empty"));
        }
        if self.max_rolling < 0 {
            return Err(ModelError::validation("max_rolling", "must not be negative"));
        }
        if let Some(env) = &self.env_vars {
            env.validate()?;
        }
        Ok(())
    }

    pub fn into_group(self, id: String, now: DateTime<Utc>) -> Group {
        Group {
            id,
            name: self.name,
            description: self.description,
            version: self.version,
            image: self.image,
            max_rolling: self.max_rolling,
            sequence: 0,
            env_vars: self.env_vars.filter(|e| !e.is_empty()),
            create_at: now,
            delete_at: None,
            lock: ResourceLock::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchGroupRequest {
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub name: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub description: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub version: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub image: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub max_rolling: Patch<i64>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub env_vars: Patch<Option<EnvVarMap>>,
}

impl ApplyPatch<Group> for PatchGroupRequest {
    fn validate(&self) -> Result<()> {
        if let Patch::Present(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ModelError::validation("name", "must not be empty"));
            }
        }
        if let Patch::Present(max_rolling) = self.max_rolling {
            if max_rolling < 0 {
                return Err(ModelError::validation("max_rolling", "must not be negative"));
            }
        }
        if let Patch::Present(Some(env)) = &self.env_vars {
            env.validate_patch()?;
        }
        Ok(())
    }

    fn apply_fields(&self, group: &mut Group) -> Result<bool> {
        let mut changed = self.name.apply_to(&mut group.name);
        changed |= self.description.apply_to(&mut group.description);
        changed |= self.version.apply_to(&mut group.version);
        changed |= self.image.apply_to(&mut group.image);
        changed |= self.max_rolling.apply_to(&mut group.max_rolling);
        if let Patch::Present(input) = &self.env_vars {
            changed |= clear_or_patch(&mut group.env_vars, input.as_ref());
        }
        if changed {
            group.sequence += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
impl Group {
    pub(crate) fn for_test() -> Self {
        CreateGroupRequest {
            name: "group".to_string(),
            description: String::new(),
            version: String::new(),
            image: String::new(),
            max_rolling: DEFAULT_MAX_ROLLING,
            env_vars: None,
        }
        .into_group("g0".to_string(), DateTime::<Utc>::default())
    }
}
