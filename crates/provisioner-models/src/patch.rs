/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Partial Updates
//!
//! Patch requests carry fields that are either [`Patch::Absent`] (leave the
//! target alone) or [`Patch::Present`] (overwrite when different). This keeps
//! "not sent" apart from a zero value: `Patch::Present(0)` sets zero, while an
//! absent field is skipped.
//!
//! On the wire an absent field is simply a missing key. A field of type
//! `Patch<Option<T>>` additionally lets the caller send `null` to clear it.
//!
//! Every patch type implements [`ApplyPatch`]: validate first, then apply,
//! so a rejected patch never leaves the target half-modified.

use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A field of a partial update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Patch<T> {
    #[default]
    Absent,
    Present(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Patch::Present(_))
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Absent => Patch::Absent,
            Patch::Present(v) => Patch::Present(v),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Patch::Absent => None,
            Patch::Present(v) => Some(v),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Patch<U> {
        match self {
            Patch::Absent => Patch::Absent,
            Patch::Present(v) => Patch::Present(f(v)),
        }
    }
}

impl<T: PartialEq + Clone> Patch<T> {
    /// Overwrites `target` when present and different. Returns whether it changed.
    pub fn apply_to(&self, target: &mut T) -> bool {
        match self {
            Patch::Present(value) if value != target => {
                *target = value.clone();
                true
            }
            _ => false,
        }
    }
}

impl<T> From<T> for Patch<T> {
    fn from(value: T) -> Self {
        Patch::Present(value)
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Patch::Present(v) => v.serialize(serializer),
            // Only reached when the field lacks `skip_serializing_if`.
            Patch::Absent => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        T::deserialize(deserializer).map(Patch::Present)
    }
}

/// A partial update for a `Target` record.
pub trait ApplyPatch<Target> {
    /// Checks the patch on its own. Must not look at the target.
    fn validate(&self) -> Result<()>;

    /// Writes present fields into `target`; returns whether anything changed.
    /// Only called after [`validate`](Self::validate) succeeded. Checks that
    /// depend on the target run before the first write, so an error here
    /// leaves the target untouched too.
    fn apply_fields(&self, target: &mut Target) -> Result<bool>;

    /// Validates, then applies. Nothing is touched when validation fails.
    fn apply(&self, target: &mut Target) -> Result<bool> {
        self.validate()?;
        self.apply_fields(target)
    }
}
