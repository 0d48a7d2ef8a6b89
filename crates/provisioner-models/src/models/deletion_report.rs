/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Buckets installations pending deletion by when they will be deleted.

use super::installations::{Installation, INSTALLATION_STATE_DELETION_PENDING};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A named bucket: timestamps strictly before `before` land here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionPendingCutoff {
    pub name: String,
    pub before: DateTime<Utc>,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionPendingReport {
    pub cutoffs: Vec<DeletionPendingCutoff>,
    pub overflow: u64,
}

impl DeletionPendingReport {
    /// Cutoffs at `now + offset`, in the order given.
    pub fn with_relative_cutoffs(now: DateTime<Utc>, cutoffs: &[(&str, Duration)]) -> Self {
        let mut report = Self::default();
        for (name, offset) in cutoffs {
            report.add_cutoff(*name, now + *offset);
        }
        report
    }

    /// Registers a cutoff. Cutoffs are checked in registration order.
    pub fn add_cutoff(&mut self, name: impl Into<String>, before: DateTime<Utc>) {
        self.cutoffs.push(DeletionPendingCutoff {
            name: name.into(),
            before,
            count: 0,
        });
    }

    /// Counts `timestamp` against the first cutoff after it, or the overflow.
    pub fn count(&mut self, timestamp: DateTime<Utc>) {
        match self.cutoffs.iter_mut().find(|c| timestamp < c.before) {
            Some(cutoff) => cutoff.count += 1,
            None => self.overflow += 1,
        }
    }

    /// Counts a `deletion-pending` installation by its expiry; anything else
    /// is ignored. Returns whether the installation was counted.
    pub fn count_installation(&mut self, installation: &Installation) -> bool {
        match installation.deletion_pending_expiry {
            Some(expiry) if installation.state == INSTALLATION_STATE_DELETION_PENDING => {
                self.count(expiry);
                true
            }
            _ => false,
        }
    }

    pub fn total(&self) -> u64 {
        self.cutoffs.iter().map(|c| c.count).sum::<u64>() + self.overflow
    }
}
