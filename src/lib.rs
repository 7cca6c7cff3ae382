//! # Notify Engine
//!
//! Priority-based multi-channel notification delivery engine.
//!
//! Work items are enqueued with a bounded priority score, periodically
//! drained in priority order, filtered against per-user preferences (quiet
//! hours, daily caps, channel opt-outs), partitioned by channel, and handed
//! to pluggable channel adapters. Every resolved attempt is recorded
//! transactionally and idempotently in the notification store.
//!
//! ## Architecture
//!
//! - [`store`] - durable work items, preferences, and audit history
//! - [`priority`] - bounded scoring and batch ordering
//! - [`filter`] - per-user eligibility (quiet hours, caps, opt-outs)
//! - [`drain`] - the single-flight drain loop
//! - [`router`] / [`adapters`] - channel dispatch behind a uniform trait
//! - [`triggers`] - interval and daily-at periodic schedules
//! - [`routes`] / [`handlers`] - operational HTTP surface (health, metrics)

pub mod adapters;
pub mod backoff;
pub mod config;
pub mod drain;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod metrics;
pub mod priority;
pub mod router;
pub mod routes;
pub mod store;
pub mod triggers;
pub mod types;

use crate::adapters::{AdapterHealth, ChatPushAdapter, EmailAdapter, MobilePushAdapter, SmsAdapter};
use crate::config::{parse_local_time, EngineConfig};
use crate::drain::{CycleReport, DrainLoop, DrainState};
use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::router::ChannelRouter;
use crate::store::NotificationStore;
use crate::triggers::{TriggerSchedule, TriggerSet};
use crate::types::{Channel, NewWorkItem, WorkItem, WorkItemStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Produces new work items for the periodic triggers: source-condition
/// scans and daily digests. The engine runs without one; the corresponding
/// triggers are simply not armed.
#[async_trait]
pub trait WorkItemProducer: Send + Sync {
    /// Scan source conditions and emit work items for anything actionable
    async fn scan_sources(&self) -> Result<Vec<NewWorkItem>>;

    /// Build the once-daily digest items
    async fn build_daily_digests(&self) -> Result<Vec<NewWorkItem>>;
}

/// The assembled engine: store, router, metrics, and drain loop behind one
/// handle with explicit dependency injection throughout.
pub struct NotificationEngine {
    config: EngineConfig,
    store: Arc<dyn NotificationStore>,
    router: Arc<ChannelRouter>,
    metrics: EngineMetrics,
    drain: Arc<DrainLoop>,
    producer: Option<Arc<dyn WorkItemProducer>>,
}

impl NotificationEngine {
    /// Assemble the engine, registering an adapter for every channel
    /// enabled in configuration. Disabled channels stay unregistered and
    /// fail closed at dispatch time.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn NotificationStore>,
        producer: Option<Arc<dyn WorkItemProducer>>,
    ) -> Result<Self> {
        let metrics = EngineMetrics::new(&config.metrics)?;

        let mut router = ChannelRouter::new(config.channels.clone());
        if config.channels.email.enabled {
            router.register(Channel::Email, Arc::new(EmailAdapter::new(&config.channels.email)?));
        }
        if config.channels.chat_push.enabled {
            router.register(
                Channel::ChatPush,
                Arc::new(ChatPushAdapter::new(&config.channels.chat_push)?),
            );
        }
        if config.channels.sms.enabled {
            router.register(Channel::Sms, Arc::new(SmsAdapter::new(&config.channels.sms)?));
        }
        if config.channels.mobile_push.enabled {
            router.register(
                Channel::MobilePush,
                Arc::new(MobilePushAdapter::new(&config.channels.mobile_push)?),
            );
        }
        let router = Arc::new(router);

        let drain = Arc::new(DrainLoop::new(
            config.drain.clone(),
            Arc::clone(&store),
            Arc::clone(&router),
            metrics.clone(),
        ));

        info!(
            channels = ?router.registered_channels(),
            drain_interval = config.drain.interval_seconds,
            "notification engine assembled"
        );

        Ok(Self {
            config,
            store,
            router,
            metrics,
            drain,
            producer,
        })
    }

    /// Score and enqueue one work item. The score is computed exactly once,
    /// here, and stored with the item.
    pub async fn enqueue(&self, new_item: NewWorkItem) -> Result<Uuid> {
        enqueue_work_item(self.store.as_ref(), new_item).await
    }

    /// Run one drain cycle immediately. A no-op returning `Ok(None)` when a
    /// cycle is already in flight.
    pub async fn drain_now(&self) -> Result<Option<CycleReport>> {
        self.drain.drain().await
    }

    /// Spawn the drain loop and all periodic triggers. The drain loop's
    /// first cycle runs eagerly at startup.
    pub fn start(&self, shutdown: CancellationToken) -> Result<Vec<tokio::task::JoinHandle<()>>> {
        let mut handles = vec![self.drain.spawn(shutdown.clone())];

        let triggers = self.build_triggers()?;
        info!(count = triggers.len(), "arming periodic triggers");
        handles.extend(triggers.spawn_all(shutdown));

        Ok(handles)
    }

    fn build_triggers(&self) -> Result<TriggerSet> {
        let trigger_config = &self.config.triggers;
        let timezone: chrono_tz::Tz = trigger_config
            .timezone
            .parse()
            .map_err(|_| EngineError::config(format!("unknown timezone {}", trigger_config.timezone)))?;
        let cleanup_time = parse_local_time(&trigger_config.cleanup_local_time)
            .map_err(EngineError::config)?;
        let digest_time =
            parse_local_time(&trigger_config.digest_local_time).map_err(EngineError::config)?;

        let mut triggers = TriggerSet::new();

        let store = Arc::clone(&self.store);
        let retention_days = i64::from(trigger_config.retention_days);
        triggers.add(
            "cleanup",
            TriggerSchedule::DailyAt {
                time: cleanup_time,
                timezone,
            },
            Arc::new(move || {
                let store = Arc::clone(&store);
                Box::pin(async move {
                    let horizon = Utc::now() - chrono::Duration::days(retention_days);
                    let removed = store.prune_expired(horizon).await?;
                    info!(removed, "pruned expired notification data");
                    Ok(())
                })
            }),
        );

        if self.config.metrics.enabled {
            let store = Arc::clone(&self.store);
            let metrics = self.metrics.clone();
            triggers.add(
                "metrics-snapshot",
                TriggerSchedule::Interval(std::time::Duration::from_secs(
                    trigger_config.metrics_snapshot_interval_seconds,
                )),
                Arc::new(move || {
                    let store = Arc::clone(&store);
                    let totals = metrics.channel_totals();
                    Box::pin(async move { store.snapshot_metrics(&totals).await })
                }),
            );
        }

        if let Some(producer) = &self.producer {
            let store = Arc::clone(&self.store);
            let scan_producer = Arc::clone(producer);
            triggers.add(
                "source-scan",
                TriggerSchedule::Interval(std::time::Duration::from_secs(
                    trigger_config.source_scan_interval_seconds,
                )),
                Arc::new(move || {
                    let store = Arc::clone(&store);
                    let producer = Arc::clone(&scan_producer);
                    Box::pin(async move {
                        let produced = producer.scan_sources().await?;
                        enqueue_all(store.as_ref(), produced, "source-scan").await;
                        Ok(())
                    })
                }),
            );

            let store = Arc::clone(&self.store);
            let digest_producer = Arc::clone(producer);
            triggers.add(
                "daily-digest",
                TriggerSchedule::DailyAt {
                    time: digest_time,
                    timezone,
                },
                Arc::new(move || {
                    let store = Arc::clone(&store);
                    let producer = Arc::clone(&digest_producer);
                    Box::pin(async move {
                        let produced = producer.build_daily_digests().await?;
                        enqueue_all(store.as_ref(), produced, "daily-digest").await;
                        Ok(())
                    })
                }),
            );
        }

        Ok(triggers)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn drain_state(&self) -> DrainState {
        self.drain.state()
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.drain.last_cycle()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// Health of every registered adapter, for the health endpoint
    pub async fn adapter_health(&self) -> Vec<(Channel, AdapterHealth)> {
        let mut reports = Vec::new();
        for channel in self.router.registered_channels() {
            if let Some(adapter) = self.router.adapter(channel) {
                reports.push((channel, adapter.health_check().await));
            }
        }
        reports
    }
}

/// Score a new item and insert it with `queued` status
pub async fn enqueue_work_item(
    store: &dyn NotificationStore,
    new_item: NewWorkItem,
) -> Result<Uuid> {
    let now = Utc::now();
    let item = WorkItem {
        id: Uuid::new_v4(),
        user_id: new_item.user_id,
        channel: new_item.channel,
        priority_score: priority::score(new_item.base_priority, &new_item.attributes),
        payload: new_item.payload,
        status: WorkItemStatus::Queued,
        scheduled_for: new_item.scheduled_for.unwrap_or(now),
        created_at: now,
        attempts: 0,
    };
    store.enqueue(item).await
}

async fn enqueue_all(store: &dyn NotificationStore, items: Vec<NewWorkItem>, source: &str) {
    let mut enqueued = 0usize;
    for new_item in items {
        match enqueue_work_item(store, new_item).await {
            Ok(_) => enqueued += 1,
            Err(e) => {
                // One bad item must not lose the rest of the batch
                error!(source, error = %e, "failed to enqueue produced item");
            }
        }
    }
    if enqueued > 0 {
        info!(source, enqueued, "enqueued produced work items");
    } else {
        warn!(source, "producer returned no enqueueable items");
    }
}
