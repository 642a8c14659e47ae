use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{
    clients::broker::ConnectionManager,
    error::DispatchError,
    models::{
        message::{OutgoingProperties, PublishOptions},
        topology::DIRECT_EXCHANGE,
        validation::validate_priority,
    },
    utils::generate_message_id,
};

/// Publishes JSON payloads to `notifications.direct`.
///
/// The number of publishes awaiting a broker confirm is bounded; past that
/// bound `publish` fails with [`DispatchError::Backpressure`] instead of
/// buffering.
#[derive(Clone)]
pub struct Publisher {
    manager: Arc<dyn ConnectionManager>,
    pending: Arc<Semaphore>,
}

impl Publisher {
    pub fn new(manager: Arc<dyn ConnectionManager>, max_pending_publishes: usize) -> Self {
        Self {
            manager,
            pending: Arc::new(Semaphore::new(max_pending_publishes)),
        }
    }

    /// Returns the message id carried by the published message.
    pub async fn publish<T>(
        &self,
        routing_key: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<String, DispatchError>
    where
        T: Serialize + ?Sized,
    {
        if let Some(priority) = options.priority {
            validate_priority(priority).map_err(|e| DispatchError::Validation(e.to_string()))?;
        }

        let _permit = self.pending.try_acquire().map_err(|_| {
            DispatchError::Backpressure("Too many publishes awaiting broker confirmation".to_string())
        })?;

        let channel = self.manager.acquire().await?;

        let message_id = options.message_id.unwrap_or_else(generate_message_id);
        let timestamp = Utc::now();

        let mut body = serde_json::to_value(payload)?;
        let Value::Object(fields) = &mut body else {
            return Err(DispatchError::Validation(
                "Message payload must be a JSON object".to_string(),
            ));
        };
        fields.insert("timestamp".to_string(), serde_json::to_value(timestamp)?);
        fields.insert("message_id".to_string(), Value::String(message_id.clone()));

        let properties = OutgoingProperties {
            message_id: message_id.clone(),
            content_type: "application/json",
            persistent: true,
            timestamp,
            priority: options.priority,
            expiration: options.expiration,
        };

        let payload = serde_json::to_vec(&body)?;

        if let Err(e) = channel
            .publish(DIRECT_EXCHANGE, routing_key, payload, properties)
            .await
        {
            if matches!(e, DispatchError::Broker(_)) {
                warn!(error = %e, routing_key, "Publish failed on broker channel, invalidating connection");
                self.manager.invalidate().await;
            }
            return Err(e);
        }

        debug!(message_id = %message_id, routing_key, "Message published");

        Ok(message_id)
    }
}
