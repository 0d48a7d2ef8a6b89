/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Events fanned out to webhook subscriptions.

use crate::transitions::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Event Type Constants
// =============================================================================

pub const EVENT_TYPE_RESOURCE_STATE_CHANGE: &str = "resourceStateChange";

pub const VALID_EVENT_TYPES: &[&str] = &[EVENT_TYPE_RESOURCE_STATE_CHANGE];

// =============================================================================
// Event Payload Types
// =============================================================================

/// An immutable fact recorded by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_data: BTreeMap<String, String>,
}

impl Event {
    pub fn new(id: String, event_type: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            event_type: event_type.to_string(),
            timestamp,
            extra_data: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_data.insert(key.into(), value.into());
        self
    }
}

/// A resource moving from one state to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    #[serde(flatten)]
    pub event: Event,
    pub resource_kind: ResourceKind,
    pub resource_id: String,
    pub old_state: String,
    pub new_state: String,
}

impl StateChangeEvent {
    pub fn new(
        id: String,
        timestamp: DateTime<Utc>,
        resource_kind: ResourceKind,
        resource_id: impl Into<String>,
        old_state: impl Into<String>,
        new_state: impl Into<String>,
    ) -> Self {
        Self {
            event: Event::new(id, EVENT_TYPE_RESOURCE_STATE_CHANGE, timestamp),
            resource_kind,
            resource_id: resource_id.into(),
            old_state: old_state.into(),
            new_state: new_state.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.event.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.event.timestamp
    }

    pub fn is_noop(&self) -> bool {
        self.old_state == self.new_state
    }
}
