/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Environment variable overrides for installations and groups.
//!
//! Each entry is either a literal value or a Kubernetes `EnvVarSource`
//! reference. In a patch, an entry with neither marks the key for deletion.

use crate::error::{ModelError, Result};
use k8s_openapi::api::core::v1::EnvVarSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// A single environment variable value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            value_from: None,
        }
    }

    pub fn from_source(source: EnvVarSource) -> Self {
        Self {
            value: String::new(),
            value_from: Some(source),
        }
    }

    /// Neither a value nor a reference: a deletion marker in patches.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.value_from.is_none()
    }
}

/// Variable name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvVarMap(BTreeMap<String, EnvVar>);

impl Deref for EnvVarMap {
    type Target = BTreeMap<String, EnvVar>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for EnvVarMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<K: Into<String>> FromIterator<(K, EnvVar)> for EnvVarMap {
    fn from_iter<I: IntoIterator<Item = (K, EnvVar)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl EnvVarMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry must name a variable and carry exactly one of a literal
    /// value or a reference.
    pub fn validate(&self) -> Result<()> {
        for (name, var) in self.iter() {
            validate_name(name)?;
            if var.is_empty() {
                return Err(ModelError::validation(
                    format!("env var {}", name),
                    "has neither a value nor a valueFrom",
                ));
            }
            check_not_both(name, var)?;
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), but empty entries are allowed
    /// since they mean "delete this key".
    pub fn validate_patch(&self) -> Result<()> {
        for (name, var) in self.iter() {
            validate_name(name)?;
            check_not_both(name, var)?;
        }
        Ok(())
    }

    /// Non-destructive merge: patch keys with a value are set, empty patch
    /// keys are deleted, and keys the patch does not mention are kept.
    pub fn patch(&mut self, input: &EnvVarMap) -> bool {
        let mut changed = false;
        for (name, var) in input.iter() {
            if var.is_empty() {
                changed |= self.remove(name).is_some();
                continue;
            }
            if self.get(name) != Some(var) {
                self.insert(name.clone(), var.clone());
                changed = true;
            }
        }
        changed
    }

    /// Entries that are not deletion markers.
    fn without_empty(&self) -> EnvVarMap {
        self.iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns a copy of `low` with `high` layered on top.
    pub fn layered(low: Option<&EnvVarMap>, high: Option<&EnvVarMap>) -> EnvVarMap {
        let mut merged = low.map(EnvVarMap::without_empty).unwrap_or_default();
        if let Some(high) = high {
            for (name, var) in high.iter().filter(|(_, v)| !v.is_empty()) {
                merged.insert(name.clone(), var.clone());
            }
        }
        merged
    }
}

/// Replace-everything update used for priority env vars.
///
/// - `input = None` clears the target.
/// - An empty target takes `input` wholesale.
/// - Otherwise the key-level merge of [`EnvVarMap::patch`] applies.
///
/// The target is normalised to `None` whenever it ends up empty.
pub fn clear_or_patch(target: &mut Option<EnvVarMap>, input: Option<&EnvVarMap>) -> bool {
    let Some(input) = input else {
        let had_values = target.as_ref().map(|t| !t.is_empty()).unwrap_or(false);
        *target = None;
        return had_values;
    };

    match target {
        Some(current) if !current.is_empty() => {
            let changed = current.patch(input);
            if current.is_empty() {
                *target = None;
            }
            changed
        }
        _ => {
            let replacement = input.without_empty();
            if replacement.is_empty() {
                *target = None;
                return false;
            }
            *target = Some(replacement);
            true
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ModelError::validation("env var", "name must not be empty"));
    }
    Ok(())
}

fn check_not_both(name: &str, var: &EnvVar) -> Result<()> {
    if !var.value.is_empty() && var.value_from.is_some() {
        return Err(ModelError::validation(
            format!("env var {}", name),
            "value and valueFrom are both set",
        ));
    }
    Ok(())
}
