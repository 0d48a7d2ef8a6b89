/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use provisioner_models::error::ModelError;
use provisioner_models::transitions::ResourceKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Validation, transition or lock error from the model layer
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: String },

    /// A collaborator (cloud provisioner, webhook target) failed
    #[error("provisioner error: {0}")]
    Provisioner(String),
}

impl SupervisorError {
    /// True when another owner holds the lock; such work is retried next tick.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, SupervisorError::Model(ModelError::LockConflict { .. }))
    }
}
