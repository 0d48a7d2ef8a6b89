/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Error types shared by every model, validator and state helper.

use crate::transitions::ResourceKind;

/// Result type using ModelError
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors reported by the core before anything is mutated.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A request field is malformed or breaks a business rule.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The requested state is not reachable from the current one.
    #[error("{kind} cannot transition from '{current}' to '{target}'")]
    InvalidTransition {
        kind: ResourceKind,
        current: String,
        target: String,
    },

    /// Another owner holds the advisory lock.
    #[error("resource {resource_id} is locked by {held_by}")]
    LockConflict { resource_id: String, held_by: String },

    /// The rebalancer computed a node count below zero.
    #[error("node group {node_group} would be resized to {count} nodes")]
    NodeGroupUnderflow { node_group: String, count: i64 },

    /// A resize names a node group the cluster does not have.
    #[error("node group {node_group} does not exist")]
    UnknownNodeGroup { node_group: String },
}

impl ModelError {
    /// Shorthand for a validation failure on `field`.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by user input rather than resource state.
    pub fn is_validation(&self) -> bool {
        matches!(self, ModelError::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ModelError::validation("node_min_count", "must be at least 1");
        assert_eq!(err.to_string(), "invalid node_min_count: must be at least 1");
        assert!(err.is_validation());

        let err = ModelError::InvalidTransition {
            kind: ResourceKind::Cluster,
            current: "deleted".to_string(),
            target: "resize-requested".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cluster cannot transition from 'deleted' to 'resize-requested'"
        );
        assert!(!err.is_validation());
    }
}
