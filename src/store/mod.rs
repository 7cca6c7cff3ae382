//! Notification store
//!
//! The store is the single source of truth for work items and the sole
//! owner of their mutable state. The engine never caches item status across
//! cycles and never read-modify-writes counters in memory; every counter
//! mutation happens under the store's own concurrency control.

use crate::error::Result;
use crate::types::{
    Channel, ChannelTotals, DeliveryOutcome, HistoryRecord, UserNotificationPreference, WorkItem,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Durable store of work items, preference snapshots, and audit history
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Fetch up to `limit` items with `status = queued` and
    /// `scheduled_for <= now`, ordered by (priority desc, created_at asc).
    /// Terminal items are never returned.
    async fn fetch_eligible(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<WorkItem>>;

    /// Read one user's preference snapshot
    async fn fetch_preference(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserNotificationPreference>>;

    /// Record one resolved attempt transactionally: terminal status,
    /// attempts increment, exactly one history row, and on success the
    /// user's daily counter. A no-op when the item is already terminal, so
    /// concurrent re-runs of the same scan cannot double-record.
    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()>;

    /// Append one audit row. Driven by `record_outcome` in the provided
    /// implementations; exposed for collaborators that resolve attempts
    /// out-of-band.
    async fn append_history(&self, record: &HistoryRecord) -> Result<()>;

    /// Atomically bump the user's daily sent counter
    async fn increment_daily_count(&self, user_id: Uuid) -> Result<()>;

    /// Insert a new work item; used by producers, never by the drain loop
    async fn enqueue(&self, item: WorkItem) -> Result<Uuid>;

    /// Delete terminal work items and history rows older than `horizon`,
    /// returning how many rows were removed
    async fn prune_expired(&self, horizon: DateTime<Utc>) -> Result<u64>;

    /// Persist aggregate per-channel totals for dashboards
    async fn snapshot_metrics(&self, totals: &HashMap<Channel, ChannelTotals>) -> Result<()>;
}
