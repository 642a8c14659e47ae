use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clients::{broker::ConnectionManager, publisher::Publisher},
    error::DispatchError,
    models::{
        message::{DEFAULT_PRIORITY, DeliveryTarget, NotificationMessage, PublishOptions},
        request::{EmailRequest, PushRequest, SendReceipt},
        validation::validate_message,
    },
    utils::default_notification_id,
};

/// Producer-facing entry point: turns channel requests into queued messages.
///
/// Sends only read [`ConnectionManager::status`] and never reconnect. The
/// embedding process owns the connection: it must call
/// [`ConnectionManager::acquire`] at startup and again after a connection error,
/// or every send fails with [`DispatchError::BrokerUnavailable`]. In the worker
/// binary the consumer restart loop does this.
#[derive(Clone)]
pub struct NotificationDispatcher {
    manager: Arc<dyn ConnectionManager>,
    publisher: Publisher,
}

impl NotificationDispatcher {
    pub fn new(manager: Arc<dyn ConnectionManager>, publisher: Publisher) -> Self {
        Self { manager, publisher }
    }

    pub async fn send_email(&self, request: EmailRequest) -> Result<SendReceipt, DispatchError> {
        self.ensure_connected()?;

        let target = DeliveryTarget::Email {
            recipient: request.user_email,
        };
        let message = build_message(
            target,
            request.template_code,
            request.template_data,
            request.notification_id,
            request.request_id,
            request.priority,
            request.user_id,
            request.metadata,
        );

        let notification_id = self.dispatch(&message).await?;

        Ok(SendReceipt {
            success: true,
            notification_id,
            request_id: Some(message.request_id),
        })
    }

    pub async fn send_push(&self, request: PushRequest) -> Result<SendReceipt, DispatchError> {
        self.ensure_connected()?;

        let target = DeliveryTarget::Push {
            recipient: request.push_token,
            platform: request.platform,
        };
        let message = build_message(
            target,
            request.template_code,
            request.template_data,
            request.notification_id,
            request.request_id,
            request.priority,
            request.user_id,
            request.metadata,
        );

        let notification_id = self.dispatch(&message).await?;

        Ok(SendReceipt {
            success: true,
            notification_id,
            request_id: None,
        })
    }

    /// Fails fast instead of reconnecting while the broker link is down.
    fn ensure_connected(&self) -> Result<(), DispatchError> {
        if self.manager.status().is_connected() {
            return Ok(());
        }

        warn!("Rejecting notification, message broker channel is not available");
        Err(DispatchError::BrokerUnavailable(
            "Message broker channel is not available".to_string(),
        ))
    }

    async fn dispatch(&self, message: &NotificationMessage) -> Result<String, DispatchError> {
        validate_message(message).map_err(|e| DispatchError::Validation(e.to_string()))?;

        let channel = message.channel();
        let options = PublishOptions::default()
            .with_message_id(message.notification_id.clone())
            .with_priority(message.priority);

        self.publisher
            .publish(channel.routing_key(), message, options)
            .await?;

        info!(
            notification_id = %message.notification_id,
            request_id = %message.request_id,
            channel = %channel,
            priority = message.priority,
            "Notification queued"
        );

        Ok(message.notification_id.clone())
    }
}

#[allow(clippy::too_many_arguments)]
fn build_message(
    target: DeliveryTarget,
    template_code: String,
    variables: std::collections::HashMap<String, serde_json::Value>,
    notification_id: Option<String>,
    request_id: Option<String>,
    priority: Option<u8>,
    user_id: Option<String>,
    metadata: Option<std::collections::HashMap<String, serde_json::Value>>,
) -> NotificationMessage {
    let channel = target.channel();

    NotificationMessage {
        notification_id: notification_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| default_notification_id(channel)),
        target,
        template_code,
        variables,
        priority: priority.unwrap_or(DEFAULT_PRIORITY),
        retry_count: 0,
        created_at: Utc::now(),
        request_id: request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_id,
        metadata,
    }
}
