/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhook subscriptions and per-event delivery bookkeeping.
//!
//! A subscription's state is its last delivery status. Each (event,
//! subscription) pair has an [`EventDelivery`] that is retried with
//! exponential backoff until it is delivered or the event grows older than
//! the subscription's failure threshold.

use super::events::VALID_EVENT_TYPES;
use crate::error::{ModelError, Result};
use crate::locks::{Lockable, ResourceLock};
use crate::query::{append_optional, EncodesToQuery, Paging, QueryPairs};
use crate::transitions::{request_state, ResourceKind, StatefulResource};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

// =============================================================================
// Constants
// =============================================================================

pub const SUBSCRIPTION_DELIVERY_NONE: &str = "none";
pub const SUBSCRIPTION_DELIVERY_SUCCEEDED: &str = "succeeded";
pub const SUBSCRIPTION_DELIVERY_FAILED: &str = "failed";

pub const ALL_SUBSCRIPTION_DELIVERY_STATUSES: &[&str] = &[
    SUBSCRIPTION_DELIVERY_NONE,
    SUBSCRIPTION_DELIVERY_SUCCEEDED,
    SUBSCRIPTION_DELIVERY_FAILED,
];

pub const SUBSCRIPTION_STATES_PENDING_WORK: &[&str] = &[SUBSCRIPTION_DELIVERY_FAILED];

pub const EVENT_DELIVERY_NOT_ATTEMPTED: &str = "not-attempted";
pub const EVENT_DELIVERY_DELIVERED: &str = "delivered";
pub const EVENT_DELIVERY_RETRYING: &str = "retrying";
pub const EVENT_DELIVERY_FAILED: &str = "failed";

pub const VALID_EVENT_DELIVERY_STATUSES: &[&str] = &[
    EVENT_DELIVERY_NOT_ATTEMPTED,
    EVENT_DELIVERY_DELIVERED,
    EVENT_DELIVERY_RETRYING,
    EVENT_DELIVERY_FAILED,
];

/// Deliveries still waiting to be sent.
pub const EVENT_DELIVERY_STATUSES_PENDING: &[&str] =
    &[EVENT_DELIVERY_NOT_ATTEMPTED, EVENT_DELIVERY_RETRYING];

pub const DEFAULT_FAILURE_THRESHOLD_SECONDS: i64 = 2 * 60 * 60;
pub const DEFAULT_BASE_BACKOFF_SECONDS: i64 = 2;
pub const MAX_BACKOFF_SECONDS: i64 = 60 * 60;
pub const MAX_FAILURE_THRESHOLD_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Failure threshold for a stored or configured number of seconds, clamped
/// to `0..=MAX_FAILURE_THRESHOLD_SECONDS`.
pub fn failure_threshold_from_seconds(seconds: i64) -> Duration {
    Duration::seconds(seconds.clamp(0, MAX_FAILURE_THRESHOLD_SECONDS))
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub url: String,
    pub owner_id: String,
    pub event_type: String,
    pub last_delivery_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery_attempt_at: Option<DateTime<Utc>>,
    /// Age after which an undelivered event is given up on.
    pub failure_threshold_seconds: i64,
    pub create_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub lock: ResourceLock,
}

impl Subscription {
    pub fn is_deleted(&self) -> bool {
        self.delete_at.is_some()
    }

    pub fn failure_threshold(&self) -> Duration {
        failure_threshold_from_seconds(self.failure_threshold_seconds)
    }

    pub fn retry_policy(&self, base_backoff: Duration) -> RetryPolicy {
        RetryPolicy {
            failure_threshold: self.failure_threshold(),
            base_backoff,
        }
    }

    /// Records the outcome of a delivery attempt made at `now`.
    ///
    /// The status moves through the subscription transition table; the
    /// attempt timestamp is always updated.
    pub fn record_delivery(&mut self, delivered: bool, now: DateTime<Utc>) -> Result<bool> {
        let target = if delivered {
            SUBSCRIPTION_DELIVERY_SUCCEEDED
        } else {
            SUBSCRIPTION_DELIVERY_FAILED
        };
        let state_changed = request_state(self, target)?;
        let attempt_changed = self.last_delivery_attempt_at != Some(now);
        self.last_delivery_attempt_at = Some(now);
        Ok(state_changed || attempt_changed)
    }
}

impl Lockable for Subscription {
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

impl StatefulResource for Subscription {
    const KIND: ResourceKind = ResourceKind::Subscription;

    fn state(&self) -> &str {
        &self.last_delivery_status
    }
    fn set_state(&mut self, state: &str) {
        self.last_delivery_status = state.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSubscriptionRequest {
    pub name: String,
    pub url: String,
    pub owner_id: String,
    pub event_type: String,
    /// Zero means the configured default.
    pub failure_threshold_seconds: i64,
}

impl CreateSubscriptionRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::validation("name", "must not be empty"));
        }
        if self.owner_id.trim().is_empty() {
            return Err(ModelError::validation("owner_id", "must not be empty"));
        }
        if self.event_type.is_empty() {
            return Err(ModelError::validation("event_type", "must not be empty"));
        }
        if !VALID_EVENT_TYPES.contains(&self.event_type.as_str()) {
            return Err(ModelError::validation(
                "event_type",
                format!("unknown event type '{}'", self.event_type),
            ));
        }
        validate_webhook_url(&self.url)?;
        if self.failure_threshold_seconds < 0 {
            return Err(ModelError::validation(
                "failure_threshold_seconds",
                "must not be negative",
            ));
        }
        if self.failure_threshold_seconds > MAX_FAILURE_THRESHOLD_SECONDS {
            return Err(ModelError::validation(
                "failure_threshold_seconds",
                format!("must not exceed {}", MAX_FAILURE_THRESHOLD_SECONDS),
            ));
        }
        Ok(())
    }

    pub fn into_subscription(
        self,
        id: String,
        now: DateTime<Utc>,
        default_failure_threshold: Duration,
    ) -> Subscription {
        let failure_threshold_seconds = if self.failure_threshold_seconds == 0 {
            default_failure_threshold.num_seconds()
        } else {
            self.failure_threshold_seconds
        };
        Subscription {
            id,
            name: self.name,
            url: self.url,
            owner_id: self.owner_id,
            event_type: self.event_type,
            last_delivery_status: SUBSCRIPTION_DELIVERY_NONE.to_string(),
            last_delivery_attempt_at: None,
            failure_threshold_seconds,
            create_at: now,
            delete_at: None,
            lock: ResourceLock::default(),
        }
    }
}

/// Webhook targets must be absolute `http` or `https` URLs.
pub fn validate_webhook_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| ModelError::validation("url", e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ModelError::validation(
            "url",
            format!("unsupported scheme '{}'", other),
        )),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(flatten)]
    pub paging: Paging,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl SubscriptionFilter {
    pub fn matches(&self, subscription: &Subscription) -> bool {
        (self.paging.include_deleted || !subscription.is_deleted())
            && self
                .owner_id
                .as_deref()
                .map_or(true, |o| o == subscription.owner_id)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| t == subscription.event_type)
    }
}

impl EncodesToQuery for SubscriptionFilter {
    fn append_query(&self, pairs: &mut QueryPairs) {
        self.paging.append_query(pairs);
        append_optional(pairs, "owner", self.owner_id.as_deref());
        append_optional(pairs, "event_type", self.event_type.as_deref());
    }
}

// =============================================================================
// Event Deliveries
// =============================================================================

/// How a subscription wants failed deliveries retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub failure_threshold: Duration,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: Duration::seconds(DEFAULT_FAILURE_THRESHOLD_SECONDS),
            base_backoff: Duration::seconds(DEFAULT_BASE_BACKOFF_SECONDS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt once `attempts` have been made.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let factor = 2_i64.saturating_pow(attempts.max(0) as u32);
        let seconds = self
            .base_backoff
            .num_seconds()
            .saturating_mul(factor)
            .clamp(0, MAX_BACKOFF_SECONDS);
        Duration::seconds(seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed { error: String },
}

/// Delivery of one event to one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDelivery {
    pub id: String,
    pub event_id: String,
    pub subscription_id: String,
    pub status: String,
    pub attempts: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl EventDelivery {
    pub fn new(id: String, event_id: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            id,
            event_id: event_id.into(),
            subscription_id: subscription_id.into(),
            status: EVENT_DELIVERY_NOT_ATTEMPTED.to_string(),
            attempts: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        EVENT_DELIVERY_STATUSES_PENDING.contains(&self.status.as_str())
    }

    /// Pending and not waiting out a backoff.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Delivered or given up on, with the last attempt at or before `cutoff`.
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        !self.is_pending() && self.last_attempt_at.is_some_and(|at| at <= cutoff)
    }

    /// Records one attempt and returns the new status.
    ///
    /// A failure schedules a retry `base * 2^attempts` from now, capped at
    /// one hour, unless the event is already older than the failure
    /// threshold, in which case the delivery is given up on.
    pub fn record_attempt(
        &mut self,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
        event_timestamp: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> &str {
        self.attempts += 1;
        self.last_attempt_at = Some(now);
        match outcome {
            DeliveryOutcome::Delivered => {
                self.status = EVENT_DELIVERY_DELIVERED.to_string();
                self.next_attempt_at = None;
                self.last_error = None;
            }
            DeliveryOutcome::Failed { error } => {
                self.last_error = Some(error);
                if now - event_timestamp > policy.failure_threshold {
                    self.status = EVENT_DELIVERY_FAILED.to_string();
                    self.next_attempt_at = None;
                } else {
                    self.status = EVENT_DELIVERY_RETRYING.to_string();
                    self.next_attempt_at = Some(now + policy.backoff(self.attempts));
                }
            }
        }
        &self.status
    }

    /// Gives up without another attempt, e.g. when the subscription is gone.
    pub fn abandon(&mut self, now: DateTime<Utc>, reason: impl Into<String>) {
        self.status = EVENT_DELIVERY_FAILED.to_string();
        self.last_attempt_at = Some(now);
        self.next_attempt_at = None;
        self.last_error = Some(reason.into());
    }
}
