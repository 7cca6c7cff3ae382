//! Drain loop
//!
//! The top-level control loop: fetch a bounded, priority-ordered batch of
//! queued work items, drop ineligible ones, partition the survivors by
//! channel, dispatch each partition, and record outcomes. One instance runs
//! per process; a single-flight guard makes concurrent invocations no-ops so
//! timer-triggered and manually-triggered drains can never double-process.

use crate::config::DrainConfig;
use crate::error::Result;
use crate::filter;
use crate::metrics::EngineMetrics;
use crate::priority;
use crate::router::ChannelRouter;
use crate::store::NotificationStore;
use crate::types::{
    Channel, DeliveryOutcome, OutboundMessage, OutcomeStatus, UserNotificationPreference, WorkItem,
};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Extra immediate attempts to persist an outcome before deferring to the
/// next cycle
const RECORD_RETRIES: u32 = 2;
const RECORD_RETRY_DELAY_MS: u64 = 50;

/// Observable state of the drain loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

/// Summary of one completed drain cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped: usize,
    pub sent: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// The drain loop state machine
pub struct DrainLoop {
    config: DrainConfig,
    store: Arc<dyn NotificationStore>,
    router: Arc<ChannelRouter>,
    metrics: EngineMetrics,
    draining: AtomicBool,
    last_cycle: RwLock<Option<CycleReport>>,
}

impl DrainLoop {
    pub fn new(
        config: DrainConfig,
        store: Arc<dyn NotificationStore>,
        router: Arc<ChannelRouter>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            config,
            store,
            router,
            metrics,
            draining: AtomicBool::new(false),
            last_cycle: RwLock::new(None),
        }
    }

    pub fn state(&self) -> DrainState {
        if self.draining.load(Ordering::SeqCst) {
            DrainState::Draining
        } else {
            DrainState::Idle
        }
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().clone()
    }

    /// Run one drain cycle. Returns `Ok(None)` without doing any work when a
    /// cycle is already in flight (the single-flight guard).
    pub async fn drain(&self) -> Result<Option<CycleReport>> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain requested while already draining, skipping");
            return Ok(None);
        }

        let result = self.run_cycle().await;
        self.draining.store(false, Ordering::SeqCst);

        let report = result?;
        *self.last_cycle.write() = Some(report.clone());
        self.metrics.record_cycle(report.duration);
        Ok(Some(report))
    }

    /// Spawn the periodic loop: one eager cycle at startup, then one per
    /// interval tick. Cancellation is only observed between cycles, so the
    /// in-flight cycle always finishes recording outcomes before shutdown.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let drain_loop = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(drain_loop.config.interval_seconds));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match drain_loop.drain().await {
                            Ok(Some(report)) => {
                                if report.fetched > 0 {
                                    info!(
                                        fetched = report.fetched,
                                        skipped = report.skipped,
                                        sent = report.sent,
                                        failed = report.failed,
                                        "drain cycle complete"
                                    );
                                }
                            }
                            Ok(None) => {}
                            // Transient fetch failure: the next tick retries
                            Err(e) => error!(error = %e, "drain cycle aborted"),
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("drain loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let now = Utc::now();

        // A fetch failure aborts the whole cycle and is reported upward
        let mut items = self.store.fetch_eligible(self.config.batch_size, now).await?;

        if items.is_empty() {
            // Expected steady state, not an error
            return Ok(CycleReport {
                fetched: 0,
                skipped: 0,
                sent: 0,
                failed: 0,
                duration: started.elapsed(),
            });
        }

        let fetched = items.len();

        // The store pre-orders, but the ordering invariant must not depend
        // on store implementations
        priority::order_batch(&mut items);

        let (partitions, skipped) = self.filter_and_partition(items, now).await;

        let mut sent = 0;
        let mut failed = 0;

        // Dispatch each partition independently: one channel's failure never
        // affects the others in the same cycle
        for channel in Channel::ALL {
            let Some(messages) = partitions.get(&channel) else {
                continue;
            };

            let outcomes = self.router.dispatch(channel, messages).await;
            for outcome in outcomes {
                match self.record_with_retry(&outcome).await {
                    Ok(()) => match outcome.status {
                        OutcomeStatus::Sent => {
                            sent += 1;
                            self.metrics.record_sent(channel);
                        }
                        OutcomeStatus::Failed => {
                            failed += 1;
                            self.metrics.record_failed(channel);
                        }
                    },
                    Err(e) => error!(
                        work_item_id = %outcome.work_item_id,
                        error = %e,
                        "failed to record outcome, item will be re-dispatched"
                    ),
                }
            }
        }

        Ok(CycleReport {
            fetched,
            skipped,
            sent,
            failed,
            duration: started.elapsed(),
        })
    }

    /// Persist one outcome, retrying a transient store failure a bounded
    /// number of times in place. If recording still fails after a successful
    /// send, the item stays queued and is re-dispatched next cycle, so
    /// delivery is at-least-once across a store outage at exactly this point.
    async fn record_with_retry(&self, outcome: &DeliveryOutcome) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.record_outcome(outcome).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < RECORD_RETRIES => {
                    attempt += 1;
                    warn!(
                        work_item_id = %outcome.work_item_id,
                        attempt,
                        error = %e,
                        "outcome recording failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(RECORD_RETRY_DELAY_MS)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply the eligibility filter and group survivors by channel,
    /// preserving batch order within each partition. Skipped items remain
    /// queued and do not count as attempts.
    async fn filter_and_partition(
        &self,
        items: Vec<WorkItem>,
        now: chrono::DateTime<Utc>,
    ) -> (HashMap<Channel, Vec<OutboundMessage>>, usize) {
        let mut preferences: HashMap<Uuid, Option<UserNotificationPreference>> = HashMap::new();
        let mut partitions: HashMap<Channel, Vec<OutboundMessage>> = HashMap::new();
        let mut skipped = 0;

        for item in items {
            let preference = match preferences.get(&item.user_id) {
                Some(cached) => cached.clone(),
                None => match self.store.fetch_preference(item.user_id).await {
                    Ok(pref) => {
                        preferences.insert(item.user_id, pref.clone());
                        pref
                    }
                    Err(e) => {
                        warn!(
                            user_id = %item.user_id,
                            error = %e,
                            "preference fetch failed, skipping item this cycle"
                        );
                        skipped += 1;
                        self.metrics.record_skipped(item.channel);
                        continue;
                    }
                },
            };

            // No preference row means no channel is configured for the user
            let Some(preference) = preference else {
                skipped += 1;
                self.metrics.record_skipped(item.channel);
                continue;
            };

            if !filter::is_eligible(&item, &preference, now) {
                skipped += 1;
                self.metrics.record_skipped(item.channel);
                continue;
            }

            let recipient = preference
                .channel(item.channel)
                .contact
                .clone()
                .unwrap_or_default();

            partitions.entry(item.channel).or_default().push(OutboundMessage {
                work_item_id: item.id,
                user_id: item.user_id,
                channel: item.channel,
                recipient,
                payload: item.payload,
            });
        }

        (partitions, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterHealth, ChannelAdapter, DeliveryId};
    use crate::config::{ChannelsConfig, MetricsConfig};
    use crate::store::MemoryStore;
    use crate::types::{ChannelPreference, WorkItemStatus};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    struct CountingAdapter {
        delay: Duration,
        sent: std::sync::atomic::AtomicUsize,
    }

    impl CountingAdapter {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                sent: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn sent_count(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelAdapter for CountingAdapter {
        async fn send(&self, message: &OutboundMessage) -> Result<DeliveryId> {
            tokio::time::sleep(self.delay).await;
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(format!("d-{}", message.work_item_id))
        }

        async fn health_check(&self) -> AdapterHealth {
            AdapterHealth::healthy("test")
        }
    }

    /// Delegates to a MemoryStore but fails the first N outcome recordings
    struct FlakyRecordStore {
        inner: Arc<MemoryStore>,
        failures_left: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl NotificationStore for FlakyRecordStore {
        async fn fetch_eligible(
            &self,
            limit: u32,
            now: chrono::DateTime<Utc>,
        ) -> Result<Vec<WorkItem>> {
            self.inner.fetch_eligible(limit, now).await
        }

        async fn fetch_preference(
            &self,
            user_id: Uuid,
        ) -> Result<Option<UserNotificationPreference>> {
            self.inner.fetch_preference(user_id).await
        }

        async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()> {
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(crate::error::EngineError::store("store briefly down"));
            }
            self.inner.record_outcome(outcome).await
        }

        async fn append_history(&self, record: &crate::types::HistoryRecord) -> Result<()> {
            self.inner.append_history(record).await
        }

        async fn increment_daily_count(&self, user_id: Uuid) -> Result<()> {
            self.inner.increment_daily_count(user_id).await
        }

        async fn enqueue(&self, item: WorkItem) -> Result<Uuid> {
            self.inner.enqueue(item).await
        }

        async fn prune_expired(&self, horizon: chrono::DateTime<Utc>) -> Result<u64> {
            self.inner.prune_expired(horizon).await
        }

        async fn snapshot_metrics(
            &self,
            totals: &HashMap<Channel, crate::types::ChannelTotals>,
        ) -> Result<()> {
            self.inner.snapshot_metrics(totals).await
        }
    }

    fn create_test_preference(user_id: Uuid) -> UserNotificationPreference {
        let usable = ChannelPreference {
            enabled: true,
            contact: Some("contact".to_string()),
        };
        UserNotificationPreference {
            user_id,
            email: usable.clone(),
            chat_push: usable.clone(),
            sms: usable.clone(),
            mobile_push: usable,
            quiet_hours_start: None,
            quiet_hours_end: None,
            timezone: "UTC".to_string(),
            max_notifications_per_day: 100,
            daily_sent_count: 0,
        }
    }

    fn create_test_item(user_id: Uuid, channel: Channel, score: i32) -> WorkItem {
        let now = Utc::now();
        WorkItem {
            id: Uuid::new_v4(),
            user_id,
            channel,
            priority_score: score,
            payload: serde_json::json!({}),
            status: WorkItemStatus::Queued,
            scheduled_for: now - ChronoDuration::seconds(1),
            created_at: now,
            attempts: 0,
        }
    }

    struct TestHarness {
        store: Arc<MemoryStore>,
        email_adapter: Arc<CountingAdapter>,
        drain: Arc<DrainLoop>,
    }

    fn create_test_harness(adapter_delay: Duration) -> TestHarness {
        let store = Arc::new(MemoryStore::new());
        let email_adapter = Arc::new(CountingAdapter::new(adapter_delay));

        let mut router = ChannelRouter::new(ChannelsConfig::default());
        router.register(Channel::Email, email_adapter.clone());
        router.register(
            Channel::ChatPush,
            Arc::new(CountingAdapter::new(Duration::ZERO)),
        );

        let metrics = EngineMetrics::new(&MetricsConfig::default()).unwrap();
        let drain = Arc::new(DrainLoop::new(
            DrainConfig {
                interval_seconds: 3600,
                batch_size: 100,
            },
            store.clone() as Arc<dyn NotificationStore>,
            Arc::new(router),
            metrics,
        ));

        TestHarness {
            store,
            email_adapter,
            drain,
        }
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_noop_cycle() {
        let harness = create_test_harness(Duration::ZERO);
        let report = harness.drain.drain().await.unwrap().unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(harness.drain.state(), DrainState::Idle);
    }

    #[tokio::test]
    async fn test_cycle_sends_and_records() {
        let harness = create_test_harness(Duration::ZERO);
        let user_id = Uuid::new_v4();
        harness.store.insert_preference(create_test_preference(user_id));

        let item = create_test_item(user_id, Channel::Email, 50);
        harness.store.enqueue(item.clone()).await.unwrap();

        let report = harness.drain.drain().await.unwrap().unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);

        let stored = harness.store.get_item(item.id).unwrap();
        assert_eq!(stored.status, WorkItemStatus::Sent);
        assert_eq!(stored.attempts, 1);
        assert_eq!(harness.store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_items_not_redispatched() {
        let harness = create_test_harness(Duration::ZERO);
        let user_id = Uuid::new_v4();
        harness.store.insert_preference(create_test_preference(user_id));
        harness
            .store
            .enqueue(create_test_item(user_id, Channel::Email, 50))
            .await
            .unwrap();

        harness.drain.drain().await.unwrap();
        assert_eq!(harness.email_adapter.sent_count(), 1);

        // A second cycle must not touch the now-terminal item
        let report = harness.drain.drain().await.unwrap().unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(harness.email_adapter.sent_count(), 1);
        assert_eq!(harness.store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_ineligible_items_stay_queued_without_attempt() {
        let harness = create_test_harness(Duration::ZERO);
        let user_id = Uuid::new_v4();
        let mut pref = create_test_preference(user_id);
        pref.daily_sent_count = pref.max_notifications_per_day;
        harness.store.insert_preference(pref);

        let item = create_test_item(user_id, Channel::Email, 50);
        harness.store.enqueue(item.clone()).await.unwrap();

        let report = harness.drain.drain().await.unwrap().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 0);

        let stored = harness.store.get_item(item.id).unwrap();
        assert_eq!(stored.status, WorkItemStatus::Queued);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn test_unregistered_partition_does_not_affect_others() {
        let harness = create_test_harness(Duration::ZERO);
        let user_id = Uuid::new_v4();
        harness.store.insert_preference(create_test_preference(user_id));

        // sms has no registered adapter in the harness
        let sms_items: Vec<WorkItem> = (0..3)
            .map(|_| create_test_item(user_id, Channel::Sms, 80))
            .collect();
        for item in &sms_items {
            harness.store.enqueue(item.clone()).await.unwrap();
        }
        let email_item = create_test_item(user_id, Channel::Email, 10);
        harness.store.enqueue(email_item.clone()).await.unwrap();

        let report = harness.drain.drain().await.unwrap().unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 3);

        for item in &sms_items {
            let stored = harness.store.get_item(item.id).unwrap();
            assert_eq!(stored.status, WorkItemStatus::Failed);
        }
        assert_eq!(
            harness.store.get_item(email_item.id).unwrap().status,
            WorkItemStatus::Sent
        );

        let sms_history: Vec<_> = harness
            .store
            .history()
            .into_iter()
            .filter(|r| r.channel == Channel::Sms)
            .collect();
        assert_eq!(sms_history.len(), 3);
        for record in sms_history {
            assert!(record
                .error_message
                .unwrap()
                .contains("channel-not-implemented"));
        }
    }

    #[tokio::test]
    async fn test_transient_record_failure_retried_without_redelivery() {
        let memory = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        memory.insert_preference(create_test_preference(user_id));
        let item = create_test_item(user_id, Channel::Email, 50);
        memory.enqueue(item.clone()).await.unwrap();

        let email_adapter = Arc::new(CountingAdapter::new(Duration::ZERO));
        let mut router = ChannelRouter::new(ChannelsConfig::default());
        router.register(Channel::Email, email_adapter.clone());

        let store = Arc::new(FlakyRecordStore {
            inner: memory.clone(),
            failures_left: std::sync::atomic::AtomicUsize::new(2),
        });
        let drain = DrainLoop::new(
            DrainConfig {
                interval_seconds: 3600,
                batch_size: 100,
            },
            store as Arc<dyn NotificationStore>,
            Arc::new(router),
            EngineMetrics::new(&MetricsConfig::default()).unwrap(),
        );

        let report = drain.drain().await.unwrap().unwrap();

        // The send happened once and the outcome landed despite the flaky
        // store, so the next cycle has nothing to re-dispatch
        assert_eq!(report.sent, 1);
        assert_eq!(email_adapter.sent_count(), 1);
        assert_eq!(
            memory.get_item(item.id).unwrap().status,
            WorkItemStatus::Sent
        );
        assert_eq!(memory.history().len(), 1);

        let second = drain.drain().await.unwrap().unwrap();
        assert_eq!(second.fetched, 0);
        assert_eq!(email_adapter.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_guard() {
        let harness = create_test_harness(Duration::from_millis(100));
        let user_id = Uuid::new_v4();
        harness.store.insert_preference(create_test_preference(user_id));
        harness
            .store
            .enqueue(create_test_item(user_id, Channel::Email, 50))
            .await
            .unwrap();

        let (first, second) = tokio::join!(harness.drain.drain(), harness.drain.drain());

        let reports = [first.unwrap(), second.unwrap()];
        let completed: Vec<_> = reports.iter().flatten().collect();
        assert_eq!(completed.len(), 1, "exactly one drain must run");
        assert_eq!(harness.email_adapter.sent_count(), 1);
        assert_eq!(harness.store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_priority_order_preserved_within_partition() {
        let harness = create_test_harness(Duration::ZERO);
        let user_id = Uuid::new_v4();
        harness.store.insert_preference(create_test_preference(user_id));

        let low = create_test_item(user_id, Channel::Email, 10);
        let high = create_test_item(user_id, Channel::Email, 150);
        harness.store.enqueue(low.clone()).await.unwrap();
        harness.store.enqueue(high.clone()).await.unwrap();

        harness.drain.drain().await.unwrap();

        let history = harness.store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].work_item_id, high.id);
        assert_eq!(history[1].work_item_id, low.id);
    }
}
