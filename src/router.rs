//! Channel routing
//!
//! Maps each channel partition of a drain batch onto its registered adapter
//! and converts raw adapter results back into per-item delivery outcomes,
//! preserving input order.

use crate::adapters::ChannelAdapter;
use crate::config::ChannelsConfig;
use crate::error::{EngineError, Result};
use crate::types::{Channel, DeliveryOutcome, OutboundMessage, OutcomeStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Registry of channel adapters keyed by the closed channel enum
pub struct ChannelRouter {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    channels: ChannelsConfig,
}

impl ChannelRouter {
    pub fn new(channels: ChannelsConfig) -> Self {
        Self {
            adapters: HashMap::new(),
            channels,
        }
    }

    /// Register the adapter for a channel, replacing any previous one
    pub fn register(&mut self, channel: Channel, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(channel, adapter);
    }

    pub fn is_registered(&self, channel: Channel) -> bool {
        self.adapters.contains_key(&channel)
    }

    pub fn adapter(&self, channel: Channel) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel)
    }

    /// Registered channels, for health reporting
    pub fn registered_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.adapters.contains_key(c))
            .collect()
    }

    /// Dispatch one channel partition. The returned outcomes align 1:1 with
    /// the input messages. Never panics and never propagates adapter errors:
    /// an unregistered channel, a timed-out batch, or a batch-level adapter
    /// failure all surface as per-item failed outcomes.
    pub async fn dispatch(
        &self,
        channel: Channel,
        messages: &[OutboundMessage],
    ) -> Vec<DeliveryOutcome> {
        if messages.is_empty() {
            return Vec::new();
        }

        let Some(adapter) = self.adapters.get(&channel) else {
            warn!(channel = %channel, count = messages.len(), "no adapter registered");
            let error = EngineError::channel_not_implemented(channel.as_str());
            return fail_all(messages, &error);
        };

        let timeout = self.channels.timeout(channel);
        let results = match tokio::time::timeout(timeout, adapter.send_batch(messages)).await {
            Ok(results) => results,
            Err(_) => {
                warn!(channel = %channel, ?timeout, "batch dispatch timed out");
                let error =
                    EngineError::timeout(format!("{} batch dispatch after {:?}", channel, timeout));
                return fail_all(messages, &error);
            }
        };

        if results.len() != messages.len() {
            // Adapter broke its alignment contract; the safe reading is
            // all-or-nothing failure for the partition.
            let error = EngineError::delivery(
                channel.as_str(),
                format!(
                    "adapter returned {} results for {} messages",
                    results.len(),
                    messages.len()
                ),
            );
            return fail_all(messages, &error);
        }

        messages
            .iter()
            .zip(results)
            .map(|(message, result)| to_outcome(message, result))
            .collect()
    }
}

fn to_outcome(message: &OutboundMessage, result: Result<String>) -> DeliveryOutcome {
    match result {
        Ok(delivery_id) => DeliveryOutcome {
            work_item_id: message.work_item_id,
            user_id: message.user_id,
            channel: message.channel,
            status: OutcomeStatus::Sent,
            delivery_id: Some(delivery_id),
            error: None,
        },
        Err(e) => DeliveryOutcome {
            work_item_id: message.work_item_id,
            user_id: message.user_id,
            channel: message.channel,
            status: OutcomeStatus::Failed,
            delivery_id: None,
            error: Some(e.to_string()),
        },
    }
}

fn fail_all(messages: &[OutboundMessage], error: &EngineError) -> Vec<DeliveryOutcome> {
    messages
        .iter()
        .map(|message| DeliveryOutcome {
            work_item_id: message.work_item_id,
            user_id: message.user_id,
            channel: message.channel,
            status: OutcomeStatus::Failed,
            delivery_id: None,
            error: Some(error.to_string()),
        })
        .collect()
}
