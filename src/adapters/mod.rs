//! Channel adapters
//!
//! One adapter per delivery channel. The engine treats all adapters
//! uniformly through the [`ChannelAdapter`] trait; the exact external
//! protocol behind each adapter is a collaborator concern.

use crate::error::Result;
use crate::types::OutboundMessage;
use async_trait::async_trait;

pub mod chat;
pub mod email;
pub mod mobile;
pub mod sms;

pub use chat::ChatPushAdapter;
pub use email::EmailAdapter;
pub use mobile::MobilePushAdapter;
pub use sms::SmsAdapter;

/// Provider-assigned identifier for a delivered message
pub type DeliveryId = String;

/// Health report for one adapter
#[derive(Debug, Clone)]
pub struct AdapterHealth {
    pub healthy: bool,
    pub detail: String,
}

impl AdapterHealth {
    pub fn healthy<S: Into<String>>(detail: S) -> Self {
        Self {
            healthy: true,
            detail: detail.into(),
        }
    }

    pub fn unhealthy<S: Into<String>>(detail: S) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// Trait that all channel adapters must implement
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Send a single message, returning the provider's delivery id
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryId>;

    /// Send a batch of messages. The returned vector has the same length
    /// and order as the input; adapters own any internal sub-batching and
    /// inter-batch delay their provider requires.
    async fn send_batch(&self, messages: &[OutboundMessage]) -> Vec<Result<DeliveryId>> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.send(message).await);
        }
        results
    }

    /// Check whether the adapter is ready to deliver
    async fn health_check(&self) -> AdapterHealth;
}
