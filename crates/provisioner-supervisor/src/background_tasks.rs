/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Periodic tasks driving the supervisors.
//!
//! The supervisor loop re-reads its interval and batch size from
//! [`ReloadableConfig`] after every tick, so a reload takes effect without a
//! restart. Delivery cleanup runs on its own, slower schedule.

use crate::delivery::{DeliverySupervisor, WebhookSender};
use crate::supervisor::{ClusterProvisioner, ClusterSupervisor, EventSink};
use chrono::Utc;
use provisioner_utils::{logging, ReloadableConfig, Settings};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval};
use tracing::{debug, error, info};

/// Interval whose first tick fires one period from now.
fn delayed_interval(seconds: u64) -> Interval {
    let period = Duration::from_secs(seconds.max(1));
    interval_at(Instant::now() + period, period)
}

/// Configuration for the delivery cleanup task.
#[derive(Debug, Clone)]
pub struct DeliveryCleanupConfig {
    /// How often to run the cleanup (in seconds).
    pub interval_seconds: u64,
    /// How long finished deliveries are kept.
    pub retention: chrono::Duration,
}

impl Default for DeliveryCleanupConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            retention: chrono::Duration::days(7),
        }
    }
}

impl DeliveryCleanupConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        Self {
            interval_seconds: settings.webhooks.cleanup_interval_seconds,
            retention: chrono::Duration::try_seconds(settings.webhooks.delivery_retention_seconds)
                .unwrap_or(defaults.retention),
        }
    }
}

/// Starts the reconciliation loop.
///
/// Each tick runs one cluster pass followed by one webhook delivery pass,
/// so events emitted by the cluster pass are attempted in the same tick.
pub fn start_supervisor_task<P, E, S>(
    clusters: Arc<ClusterSupervisor<P, E>>,
    deliveries: Arc<DeliverySupervisor<S>>,
    config: ReloadableConfig,
) -> JoinHandle<()>
where
    P: ClusterProvisioner + 'static,
    E: EventSink + 'static,
    S: WebhookSender + 'static,
{
    let mut period = config.tick_interval_seconds();
    info!(
        "Starting supervisor task (instance: {}, interval: {}s)",
        clusters.instance_id(),
        period
    );

    tokio::spawn(async move {
        let mut ticker = delayed_interval(period);
        loop {
            ticker.tick().await;
            let now = Utc::now();

            let processed = clusters.do_tick(now);
            if processed > 0 {
                debug!("Supervised {} clusters", processed);
            }

            let sent = deliveries.do_tick(now, config.delivery_batch_size());
            if sent > 0 {
                debug!("Attempted {} webhook deliveries", sent);
            }

            let configured = config.tick_interval_seconds();
            if configured != period {
                info!("Supervisor interval changed: {}s -> {}s", period, configured);
                period = configured;
                ticker = delayed_interval(period);
            }
        }
    })
}

/// Starts a task that re-reads the configuration sources every
/// `interval_seconds` and applies a changed log level.
pub fn start_config_reload_task(config: ReloadableConfig, interval_seconds: u64) -> JoinHandle<()> {
    info!("Starting config reload task (interval: {}s)", interval_seconds);

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));
        // The first tick completes immediately; the config was just loaded.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match config.reload() {
                Ok(changes) => {
                    for change in &changes {
                        info!(
                            "Configuration changed: {}: '{}' -> '{}'",
                            change.key, change.old_value, change.new_value
                        );
                    }
                    if changes.iter().any(|c| c.key == "log.level") {
                        if let Err(e) = logging::update_log_level(&config.log_level()) {
                            error!("Failed to apply log level: {}", e);
                        }
                    }
                }
                Err(e) => error!("Failed to reload configuration: {}", e),
            }
        }
    })
}

/// Starts a task that periodically drops delivered and failed webhook
/// deliveries older than the retention period.
pub fn start_delivery_cleanup_task<S>(
    deliveries: Arc<DeliverySupervisor<S>>,
    config: DeliveryCleanupConfig,
) -> JoinHandle<()>
where
    S: WebhookSender + 'static,
{
    info!(
        "Starting delivery cleanup task (interval: {}s, retention: {}s)",
        config.interval_seconds,
        config.retention.num_seconds()
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_seconds.max(1)));

        loop {
            ticker.tick().await;

            let removed = deliveries.prune(Utc::now(), config.retention);
            if removed > 0 {
                info!(
                    "Cleaned up {} old webhook deliveries (age > {}s)",
                    removed,
                    config.retention.num_seconds()
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryPolicy;
    use crate::error::Result;
    use crate::store::MemoryStore;
    use crate::supervisor::SupervisorOptions;
    use provisioner_models::models::clusters::{
        Cluster, CreateClusterRequest, CLUSTER_STATE_CREATION_IN_PROGRESS,
        CLUSTER_STATE_CREATION_REQUESTED, CLUSTER_STATE_WAITING_FOR_NODES,
    };
    use provisioner_models::models::events::{StateChangeEvent, EVENT_TYPE_RESOURCE_STATE_CHANGE};
    use provisioner_models::models::subscriptions::CreateSubscriptionRequest;
    use provisioner_models::transitions::ResourceKind;

    struct NoopProvisioner;

    impl ClusterProvisioner for NoopProvisioner {
        fn create_cluster(&self, _: &Cluster) -> Result<()> {
            Ok(())
        }
        fn check_cluster_created(&self, _: &Cluster) -> Result<bool> {
            Ok(true)
        }
        fn check_nodes_created(&self, _: &Cluster) -> Result<bool> {
            Ok(false)
        }
        fn provision_cluster(&self, _: &Cluster) -> Result<()> {
            Ok(())
        }
        fn upgrade_cluster(&self, _: &Cluster) -> Result<()> {
            Ok(())
        }
        fn resize_cluster(&self, _: &Cluster) -> Result<()> {
            Ok(())
        }
        fn create_node_groups(&self, _: &Cluster) -> Result<()> {
            Ok(())
        }
        fn delete_node_groups(&self, _: &Cluster) -> Result<()> {
            Ok(())
        }
        fn refresh_cluster_metadata(&self, _: &mut Cluster) -> Result<()> {
            Ok(())
        }
        fn delete_cluster(&self, _: &Cluster) -> Result<bool> {
            Ok(true)
        }
    }

    struct NullSink;

    impl EventSink for NullSink {
        fn emit(&self, _: StateChangeEvent) {}
    }

    struct NullSender;

    impl WebhookSender for NullSender {
        fn send(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_task_ticks_on_interval() {
        let settings = Settings::new(None).unwrap();
        let options = SupervisorOptions::from_settings(&settings);
        let store = Arc::new(MemoryStore::new(ResourceKind::Cluster));
        let mut request = CreateClusterRequest {
            zones: vec!["us-east-1a".to_string()],
            ..Default::default()
        };
        request.set_defaults("worker");
        store
            .create(request.into_cluster("c1".to_string(), Utc::now()))
            .unwrap();

        let clusters = Arc::new(ClusterSupervisor::new(
            store.clone(),
            NoopProvisioner,
            NullSink,
            options.clone(),
        ));
        let deliveries = Arc::new(DeliverySupervisor::new(
            Arc::new(MemoryStore::new(ResourceKind::Subscription)),
            NullSender,
            options,
            DeliveryPolicy::from_settings(&settings),
        ));
        let config = ReloadableConfig::from_settings(settings, None);
        let period = Duration::from_secs(config.tick_interval_seconds());

        let handle = start_supervisor_task(clusters, deliveries, config);
        // Check between ticks: the first tick fires one full period after start.
        tokio::time::sleep(period / 2).await;
        assert_eq!(store.get("c1").unwrap().state, CLUSTER_STATE_CREATION_REQUESTED);

        tokio::time::sleep(period).await;
        assert_eq!(store.get("c1").unwrap().state, CLUSTER_STATE_CREATION_IN_PROGRESS);

        tokio::time::sleep(period).await;
        assert_eq!(store.get("c1").unwrap().state, CLUSTER_STATE_WAITING_FOR_NODES);
        handle.abort();
    }

    fn state_change(id: &str, timestamp: chrono::DateTime<Utc>) -> StateChangeEvent {
        StateChangeEvent::new(
            id.to_string(),
            timestamp,
            ResourceKind::Cluster,
            "c1",
            "creation-requested",
            "creation-in-progress",
        )
    }

    #[test]
    fn test_cleanup_config_from_settings() {
        let mut settings = Settings::new(None).unwrap();
        let config = DeliveryCleanupConfig::from_settings(&settings);
        assert_eq!(config.interval_seconds, 3600);
        assert_eq!(config.retention, chrono::Duration::days(7));

        settings.webhooks.delivery_retention_seconds = i64::MAX;
        let config = DeliveryCleanupConfig::from_settings(&settings);
        assert_eq!(config.retention, DeliveryCleanupConfig::default().retention);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_cleanup_task_prunes_finished_deliveries() {
        let settings = Settings::new(None).unwrap();
        let deliveries = Arc::new(DeliverySupervisor::new(
            Arc::new(MemoryStore::new(ResourceKind::Subscription)),
            NullSender,
            SupervisorOptions::from_settings(&settings),
            DeliveryPolicy::from_settings(&settings),
        ));
        deliveries
            .subscribe(
                CreateSubscriptionRequest {
                    name: "ops".to_string(),
                    url: "https://hooks.example.com/provisioner".to_string(),
                    owner_id: "ops-team".to_string(),
                    event_type: EVENT_TYPE_RESOURCE_STATE_CHANGE.to_string(),
                    failure_threshold_seconds: 0,
                },
                Utc::now(),
            )
            .unwrap();

        let long_ago = Utc::now() - chrono::Duration::days(8);
        deliveries.enqueue(state_change("e1", long_ago));
        assert_eq!(deliveries.do_tick(long_ago, 10), 1);
        let now = Utc::now();
        deliveries.enqueue(state_change("e2", now));
        assert_eq!(deliveries.do_tick(now, 10), 1);
        assert_eq!(deliveries.deliveries().len(), 2);

        let handle = start_delivery_cleanup_task(
            deliveries.clone(),
            DeliveryCleanupConfig::from_settings(&settings),
        );
        // The first cleanup runs as soon as the task starts.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let remaining = deliveries.deliveries();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event_id, "e2");
        handle.abort();
    }
}
