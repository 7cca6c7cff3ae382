//! Email channel adapter

use crate::adapters::{AdapterHealth, ChannelAdapter, DeliveryId};
use crate::config::ChannelSettings;
use crate::error::{EngineError, Result};
use crate::types::OutboundMessage;
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// Provider-imposed messages-per-connection limit
const SUB_BATCH_SIZE: usize = 25;
const INTER_BATCH_DELAY_MS: u64 = 50;

/// Email adapter delivering through the configured mail relay
pub struct EmailAdapter {
    config: ChannelSettings,
}

impl EmailAdapter {
    pub fn new(config: &ChannelSettings) -> Result<Self> {
        if !config.enabled {
            return Err(EngineError::config("Email channel is disabled"));
        }

        info!("Email adapter initialized");
        Ok(Self {
            config: config.clone(),
        })
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryId> {
        // Stub relay call; the production transport lives behind this seam
        debug!(
            work_item_id = %message.work_item_id,
            recipient = %message.recipient,
            "delivering email"
        );
        tokio::time::sleep(tokio::time::Duration::from_millis(2)).await;
        Ok(format!("email-{}", Uuid::new_v4()))
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryId> {
        if message.recipient.is_empty() {
            return Err(EngineError::delivery("email", "empty recipient address"));
        }
        self.deliver(message).await
    }

    async fn send_batch(&self, messages: &[OutboundMessage]) -> Vec<Result<DeliveryId>> {
        let mut results = Vec::with_capacity(messages.len());
        for chunk in messages.chunks(SUB_BATCH_SIZE) {
            for message in chunk {
                results.push(self.send(message).await);
            }
            if chunk.len() == SUB_BATCH_SIZE {
                tokio::time::sleep(tokio::time::Duration::from_millis(INTER_BATCH_DELAY_MS)).await;
            }
        }
        results
    }

    async fn health_check(&self) -> AdapterHealth {
        if self.config.enabled {
            AdapterHealth::healthy("email relay reachable")
        } else {
            AdapterHealth::unhealthy("email channel disabled")
        }
    }
}
