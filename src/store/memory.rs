//! In-memory notification store
//!
//! Backs tests and local runs without a database. Mirrors the transactional
//! semantics of the Postgres store: outcome recording is atomic per item and
//! a no-op for items already in a terminal state.

use crate::error::{EngineError, Result};
use crate::priority;
use crate::store::NotificationStore;
use crate::types::{
    Channel, ChannelTotals, DeliveryOutcome, HistoryRecord, OutcomeStatus,
    UserNotificationPreference, WorkItem, WorkItemStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    items: HashMap<Uuid, WorkItem>,
    preferences: HashMap<Uuid, UserNotificationPreference>,
    history: Vec<HistoryRecord>,
    snapshots: Vec<HashMap<Channel, ChannelTotals>>,
}

/// In-memory implementation of [`NotificationStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a preference row (test/setup helper)
    pub fn insert_preference(&self, preference: UserNotificationPreference) {
        self.inner
            .write()
            .preferences
            .insert(preference.user_id, preference);
    }

    /// Current snapshot of one work item
    pub fn get_item(&self, id: Uuid) -> Option<WorkItem> {
        self.inner.read().items.get(&id).cloned()
    }

    /// All audit rows written so far, in append order
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.inner.read().history.clone()
    }

    /// Metrics snapshots persisted so far
    pub fn snapshots(&self) -> Vec<HashMap<Channel, ChannelTotals>> {
        self.inner.read().snapshots.clone()
    }

    pub fn item_count(&self) -> usize {
        self.inner.read().items.len()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn fetch_eligible(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<WorkItem>> {
        let inner = self.inner.read();
        let mut eligible: Vec<WorkItem> = inner
            .items
            .values()
            .filter(|item| item.status == WorkItemStatus::Queued && item.scheduled_for <= now)
            .cloned()
            .collect();
        drop(inner);

        priority::order_batch(&mut eligible);
        eligible.truncate(limit as usize);
        Ok(eligible)
    }

    async fn fetch_preference(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserNotificationPreference>> {
        Ok(self.inner.read().preferences.get(&user_id).cloned())
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()> {
        let mut inner = self.inner.write();

        let item = inner
            .items
            .get_mut(&outcome.work_item_id)
            .ok_or_else(|| {
                EngineError::store(format!("unknown work item {}", outcome.work_item_id))
            })?;

        // Terminal transition happens at most once
        if item.status.is_terminal() {
            return Ok(());
        }

        let status: WorkItemStatus = outcome.status.into();
        item.status = status;
        item.attempts += 1;
        let user_id = item.user_id;
        let channel = item.channel;

        let sent = outcome.status == OutcomeStatus::Sent;
        inner.history.push(HistoryRecord {
            work_item_id: outcome.work_item_id,
            user_id,
            channel,
            status,
            recorded_at: Utc::now(),
            sent_at: sent.then(Utc::now),
            error_message: outcome.error.clone(),
        });

        if sent {
            if let Some(pref) = inner.preferences.get_mut(&user_id) {
                pref.daily_sent_count += 1;
            }
        }

        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        self.inner.write().history.push(record.clone());
        Ok(())
    }

    async fn increment_daily_count(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(pref) = inner.preferences.get_mut(&user_id) {
            pref.daily_sent_count += 1;
        }
        Ok(())
    }

    async fn enqueue(&self, item: WorkItem) -> Result<Uuid> {
        let id = item.id;
        self.inner.write().items.insert(id, item);
        Ok(id)
    }

    async fn prune_expired(&self, horizon: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write();
        let before = inner.items.len() + inner.history.len();

        inner
            .items
            .retain(|_, item| !(item.status.is_terminal() && item.created_at < horizon));
        // Pruned by recording time so failed attempts age out too
        inner.history.retain(|record| record.recorded_at >= horizon);

        Ok((before - (inner.items.len() + inner.history.len())) as u64)
    }

    async fn snapshot_metrics(&self, totals: &HashMap<Channel, ChannelTotals>) -> Result<()> {
        self.inner.write().snapshots.push(totals.clone());
        Ok(())
    }
}
