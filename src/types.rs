//! Core data types for the notification engine
//!
//! Work items, channels, user preferences, history records, and the outcome
//! types exchanged between the drain loop, router, and store.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of delivery channels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    ChatPush,
    Sms,
    MobilePush,
}

impl Channel {
    /// All channels, in the order partitions are dispatched within a cycle
    pub const ALL: [Channel; 4] = [
        Channel::Email,
        Channel::ChatPush,
        Channel::Sms,
        Channel::MobilePush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::ChatPush => "chat_push",
            Channel::Sms => "sms",
            Channel::MobilePush => "mobile_push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "chat_push" => Ok(Channel::ChatPush),
            "sms" => Ok(Channel::Sms),
            "mobile_push" => Ok(Channel::MobilePush),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Lifecycle status of a work item
///
/// `Queued` transitions to `Sent` or `Failed` at most once; terminal items
/// are never re-fetched by the drain loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Queued,
    Sent,
    Failed,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Queued => "queued",
            WorkItemStatus::Sent => "sent",
            WorkItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemStatus::Sent | WorkItemStatus::Failed)
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(WorkItemStatus::Queued),
            "sent" => Ok(WorkItemStatus::Sent),
            "failed" => Ok(WorkItemStatus::Failed),
            other => Err(format!("unknown work item status: {}", other)),
        }
    }
}

/// One unit of pending notification work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    /// Computed once at enqueue time, clamped to [0, 200], never recomputed
    pub priority_score: i32,
    /// Opaque payload understood by the channel adapter
    pub payload: serde_json::Value,
    pub status: WorkItemStatus,
    /// Eligible for drain only when `now >= scheduled_for`
    pub scheduled_for: DateTime<Utc>,
    /// Tie-break key for equal priority scores
    pub created_at: DateTime<Utc>,
    /// Drain attempts that have touched this item
    pub attempts: u32,
}

/// Attributes consulted by the priority scheduler at enqueue time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityAttributes {
    /// Premium-tier or similar high-value signal
    pub high_value: bool,
    /// Discount/urgency percentage, if the payload carries one
    pub discount_percent: Option<f64>,
    /// Urgency level on a 0-10 scale
    pub urgency_level: Option<i32>,
    /// Minutes until the underlying offer expires
    pub expires_in_minutes: Option<i64>,
}

/// Request to create a new work item; the engine assigns id, score, and status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub user_id: Uuid,
    pub channel: Channel,
    pub payload: serde_json::Value,
    pub base_priority: i32,
    #[serde(default)]
    pub attributes: PriorityAttributes,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Per-channel opt-in plus the contact identifier the adapter delivers to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub enabled: bool,
    /// Email address, chat handle, phone number, or device token
    pub contact: Option<String>,
}

impl ChannelPreference {
    /// A channel is usable only when both the flag is set and a contact exists
    pub fn is_usable(&self) -> bool {
        self.enabled && self.contact.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// One row per user, read-only from the engine's perspective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotificationPreference {
    pub user_id: Uuid,
    pub email: ChannelPreference,
    pub chat_push: ChannelPreference,
    pub sms: ChannelPreference,
    pub mobile_push: ChannelPreference,
    /// Local clock times; the window may wrap past midnight
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    /// IANA zone name used to evaluate quiet hours in the user's local time
    pub timezone: String,
    pub max_notifications_per_day: u32,
    /// Maintained by the store's outcome recording, only read here
    pub daily_sent_count: u32,
}

impl UserNotificationPreference {
    pub fn channel(&self, channel: Channel) -> &ChannelPreference {
        match channel {
            Channel::Email => &self.email,
            Channel::ChatPush => &self.chat_push,
            Channel::Sms => &self.sms,
            Channel::MobilePush => &self.mobile_push,
        }
    }
}

/// Append-only audit row, written exactly once per resolved attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub work_item_id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    pub status: WorkItemStatus,
    /// When the attempt was recorded; the retention pruning key, present for
    /// failed attempts too
    pub recorded_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Terminal result of one dispatch attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Sent,
    Failed,
}

impl From<OutcomeStatus> for WorkItemStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Sent => WorkItemStatus::Sent,
            OutcomeStatus::Failed => WorkItemStatus::Failed,
        }
    }
}

/// Per-item dispatch result, aligned 1:1 with the dispatched partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub work_item_id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    pub status: OutcomeStatus,
    /// Provider-assigned id on success
    pub delivery_id: Option<String>,
    pub error: Option<String>,
}

/// What the engine hands a channel adapter for one work item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub work_item_id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    /// Contact identifier from the user's preference row
    pub recipient: String,
    pub payload: serde_json::Value,
}

/// Aggregate totals exposed for observability and the metrics snapshot trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelTotals {
    pub sent: u64,
    pub failed: u64,
}
