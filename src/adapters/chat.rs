//! Chat-push channel adapter (messaging-app push delivery)

use crate::adapters::{AdapterHealth, ChannelAdapter, DeliveryId};
use crate::config::ChannelSettings;
use crate::error::{EngineError, Result};
use crate::types::OutboundMessage;
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// Adapter pushing messages to a user's chat handle
pub struct ChatPushAdapter {
    config: ChannelSettings,
}

impl ChatPushAdapter {
    pub fn new(config: &ChannelSettings) -> Result<Self> {
        if !config.enabled {
            return Err(EngineError::config("Chat-push channel is disabled"));
        }

        info!("Chat-push adapter initialized");
        Ok(Self {
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ChannelAdapter for ChatPushAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryId> {
        if message.recipient.is_empty() {
            return Err(EngineError::delivery("chat_push", "empty chat handle"));
        }

        debug!(
            work_item_id = %message.work_item_id,
            recipient = %message.recipient,
            "pushing chat message"
        );
        tokio::time::sleep(tokio::time::Duration::from_millis(2)).await;
        Ok(format!("chat-{}", Uuid::new_v4()))
    }

    async fn health_check(&self) -> AdapterHealth {
        if self.config.enabled {
            AdapterHealth::healthy("chat gateway reachable")
        } else {
            AdapterHealth::unhealthy("chat-push channel disabled")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;

    #[tokio::test]
    async fn test_send_chat_push() {
        let adapter = ChatPushAdapter::new(&ChannelSettings::default()).unwrap();
        let message = OutboundMessage {
            work_item_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel: Channel::ChatPush,
            recipient: "@traveler".to_string(),
            payload: serde_json::json!({"text": "hello"}),
        };

        let id = adapter.send(&message).await.unwrap();
        assert!(id.starts_with("chat-"));
    }

    #[tokio::test]
    async fn test_health_check() {
        let adapter = ChatPushAdapter::new(&ChannelSettings::default()).unwrap();
        assert!(adapter.health_check().await.healthy);
    }
}
