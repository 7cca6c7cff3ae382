//! Mobile push channel adapter

use crate::adapters::{AdapterHealth, ChannelAdapter, DeliveryId};
use crate::config::ChannelSettings;
use crate::error::{EngineError, Result};
use crate::types::OutboundMessage;
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// Adapter pushing to a registered mobile device token
pub struct MobilePushAdapter {
    config: ChannelSettings,
}

impl MobilePushAdapter {
    pub fn new(config: &ChannelSettings) -> Result<Self> {
        if !config.enabled {
            return Err(EngineError::config("Mobile-push channel is disabled"));
        }

        info!("Mobile-push adapter initialized");
        Ok(Self {
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ChannelAdapter for MobilePushAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryId> {
        if message.recipient.is_empty() {
            return Err(EngineError::delivery("mobile_push", "empty device token"));
        }

        debug!(
            work_item_id = %message.work_item_id,
            "pushing to mobile device"
        );
        tokio::time::sleep(tokio::time::Duration::from_millis(2)).await;
        Ok(format!("push-{}", Uuid::new_v4()))
    }

    async fn health_check(&self) -> AdapterHealth {
        if self.config.enabled {
            AdapterHealth::healthy("push gateway reachable")
        } else {
            AdapterHealth::unhealthy("mobile-push channel disabled")
        }
    }
}
