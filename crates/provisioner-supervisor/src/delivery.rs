/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhook fan-out for state change events.
//!
//! Emitted events are queued once per matching subscription. Each tick
//! sends the deliveries that are due, bounded by the batch size, and records
//! the outcome on both the delivery and the owning subscription.

use crate::error::Result;
use crate::store::MemoryStore;
use crate::supervisor::{EventSink, SupervisorOptions};
use chrono::{DateTime, Duration, Utc};
use provisioner_models::ids::new_id;
use provisioner_models::models::events::StateChangeEvent;
use provisioner_models::models::subscriptions::{
    failure_threshold_from_seconds, CreateSubscriptionRequest, DeliveryOutcome, EventDelivery,
    Subscription, EVENT_DELIVERY_DELIVERED, EVENT_DELIVERY_FAILED, MAX_BACKOFF_SECONDS,
};
use provisioner_utils::Settings;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Performs the outbound webhook call.
pub trait WebhookSender: Send + Sync {
    fn send(&self, url: &str, payload: &str) -> Result<()>;
}

/// Retry timing shared by every subscription.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub base_backoff: Duration,
    /// Used for subscriptions created without their own threshold
    pub default_failure_threshold: Duration,
}

impl DeliveryPolicy {
    /// Policy from configuration; out-of-range values are clamped.
    pub fn from_settings(settings: &Settings) -> Self {
        let webhooks = &settings.webhooks;
        Self {
            base_backoff: Duration::seconds(
                webhooks.base_backoff_seconds.clamp(0, MAX_BACKOFF_SECONDS),
            ),
            default_failure_threshold: failure_threshold_from_seconds(
                webhooks.default_failure_threshold_seconds,
            ),
        }
    }
}

#[derive(Default)]
struct DeliveryQueue {
    events: HashMap<String, StateChangeEvent>,
    deliveries: Vec<EventDelivery>,
}

pub struct DeliverySupervisor<S> {
    subscriptions: Arc<MemoryStore<Subscription>>,
    sender: S,
    options: SupervisorOptions,
    policy: DeliveryPolicy,
    queue: Mutex<DeliveryQueue>,
}

impl<S: WebhookSender> DeliverySupervisor<S> {
    pub fn new(
        subscriptions: Arc<MemoryStore<Subscription>>,
        sender: S,
        options: SupervisorOptions,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            subscriptions,
            sender,
            options,
            policy,
            queue: Mutex::new(DeliveryQueue::default()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, DeliveryQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates and stores a new subscription.
    pub fn subscribe(
        &self,
        request: CreateSubscriptionRequest,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        request.validate()?;
        let subscription =
            request.into_subscription(new_id(), now, self.policy.default_failure_threshold);
        self.subscriptions.create(subscription.clone())?;
        info!(
            subscription_id = subscription.id.as_str(),
            event_type = subscription.event_type.as_str(),
            "subscription created"
        );
        Ok(subscription)
    }

    /// Queues `event` for every live subscription to its type. Returns the
    /// number of deliveries created.
    pub fn enqueue(&self, event: StateChangeEvent) -> usize {
        let subscribers = self
            .subscriptions
            .list(|s| !s.is_deleted() && s.event_type == event.event.event_type);
        if subscribers.is_empty() {
            return 0;
        }

        let mut queue = self.queue();
        for subscription in &subscribers {
            queue
                .deliveries
                .push(EventDelivery::new(new_id(), event.id(), subscription.id.as_str()));
        }
        queue.events.insert(event.id().to_string(), event);
        subscribers.len()
    }

    /// Snapshot of every delivery, in creation order.
    pub fn deliveries(&self) -> Vec<EventDelivery> {
        self.queue().deliveries.clone()
    }

    /// Sends up to `batch_size` due deliveries and returns how many were attempted.
    pub fn do_tick(&self, now: DateTime<Utc>, batch_size: usize) -> usize {
        let due: Vec<(EventDelivery, Option<StateChangeEvent>)> = {
            let queue = self.queue();
            queue
                .deliveries
                .iter()
                .filter(|d| d.is_due(now))
                .take(batch_size)
                .map(|d| (d.clone(), queue.events.get(&d.event_id).cloned()))
                .collect()
        };
        if due.is_empty() {
            return 0;
        }
        debug!(count = due.len(), "processing due webhook deliveries");

        let mut attempted = 0;
        for (mut delivery, event) in due {
            let Some(event) = event else {
                warn!(delivery_id = delivery.id.as_str(), "event missing for delivery, giving up");
                delivery.abandon(now, format!("event {} not found", delivery.event_id));
                self.save(delivery);
                continue;
            };
            let subscription = match self.subscriptions.get(&delivery.subscription_id) {
                Some(s) if !s.is_deleted() => s,
                _ => {
                    warn!(
                        delivery_id = delivery.id.as_str(),
                        subscription_id = delivery.subscription_id.as_str(),
                        "subscription gone, giving up on delivery"
                    );
                    let reason = format!("subscription {} not found", delivery.subscription_id);
                    delivery.abandon(now, reason);
                    self.save(delivery);
                    continue;
                }
            };
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(delivery_id = delivery.id.as_str(), "failed to encode event: {}", e);
                    continue;
                }
            };

            let outcome = match self.sender.send(&subscription.url, &payload) {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(e) => DeliveryOutcome::Failed {
                    error: e.to_string(),
                },
            };
            let policy = subscription.retry_policy(self.policy.base_backoff);
            let status = delivery
                .record_attempt(outcome, now, event.timestamp(), &policy)
                .to_string();
            match status.as_str() {
                EVENT_DELIVERY_DELIVERED => debug!(
                    delivery_id = delivery.id.as_str(),
                    subscription_id = subscription.id.as_str(),
                    "webhook delivered"
                ),
                EVENT_DELIVERY_FAILED => warn!(
                    delivery_id = delivery.id.as_str(),
                    attempts = delivery.attempts,
                    "webhook delivery failed permanently: {}",
                    delivery.last_error.as_deref().unwrap_or_default()
                ),
                _ => debug!(
                    delivery_id = delivery.id.as_str(),
                    attempts = delivery.attempts,
                    "webhook delivery failed, will retry: {}",
                    delivery.last_error.as_deref().unwrap_or_default()
                ),
            }
            self.save(delivery);
            self.record_subscription_status(&subscription.id, status == EVENT_DELIVERY_DELIVERED, now);
            attempted += 1;
        }
        attempted
    }

    /// Drops deliveries that finished more than `retention` before `now`,
    /// then events no remaining delivery refers to. Returns the number of
    /// deliveries removed.
    pub fn prune(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };
        let mut queue = self.queue();
        let before = queue.deliveries.len();
        queue.deliveries.retain(|d| !d.finished_before(cutoff));
        let removed = before - queue.deliveries.len();
        if removed > 0 {
            let DeliveryQueue { events, deliveries } = &mut *queue;
            events.retain(|id, _| deliveries.iter().any(|d| &d.event_id == id));
        }
        removed
    }

    fn save(&self, delivery: EventDelivery) {
        let mut queue = self.queue();
        if let Some(stored) = queue.deliveries.iter_mut().find(|d| d.id == delivery.id) {
            *stored = delivery;
        }
    }

    /// Updates the subscription's last delivery status under its lock.
    fn record_subscription_status(&self, subscription_id: &str, delivered: bool, now: DateTime<Utc>) {
        let owner = self.options.instance_id.as_str();
        let mut subscription =
            match self
                .subscriptions
                .lock(subscription_id, owner, now, self.options.lock_expiry)
            {
                Ok(s) => s,
                Err(e) => {
                    debug!(subscription_id, "not recording delivery status: {}", e);
                    return;
                }
            };

        match subscription.record_delivery(delivered, now) {
            Ok(true) => {
                if let Err(e) = self.subscriptions.update(subscription, Some(owner)) {
                    error!(subscription_id, "failed to persist subscription: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => error!(subscription_id, "failed to record delivery status: {}", e),
        }

        if let Err(e) = self.subscriptions.unlock(subscription_id, owner) {
            error!(subscription_id, lock_owner = owner, "failed to release subscription lock: {}", e);
        }
    }
}

impl<S: WebhookSender> EventSink for DeliverySupervisor<S> {
    fn emit(&self, event: StateChangeEvent) {
        let queued = self.enqueue(event);
        debug!(queued, "state change queued for delivery");
    }
}
