use std::sync::Arc;

use anyhow::Error;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{
        broker::{ConnectionManager, IncomingDelivery},
        publisher::Publisher,
        redis::StatusStore,
    },
    error::DispatchError,
    models::{
        message::{NotificationMessage, PublishOptions, WireMessage},
        retry::{RetryDecision, RetryPolicy},
        status::{NotificationStatus, StatusRecord},
        validation::validate_message,
    },
};

/// Delivers one notification. An `Err` spends one unit of the message's retry budget.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &NotificationMessage) -> Result<(), Error>;
}

#[derive(Debug)]
enum Disposition {
    Ack,
    Retry {
        wire: Box<WireMessage>,
        next_attempt: u32,
    },
    DeadLetter {
        reason: String,
    },
}

/// Pulls deliveries from a queue and settles each one exactly once.
///
/// A failed message is republished to the tail of its live queue with
/// `retry_count + 1` and the original delivery acked. Once the budget is spent
/// the delivery is nacked without requeue and the queue's dead-letter exchange
/// moves it to `failed.queue`.
pub struct Consumer {
    manager: Arc<dyn ConnectionManager>,
    publisher: Publisher,
    policy: RetryPolicy,
    concurrency: usize,
    status_store: Option<Arc<dyn StatusStore>>,
}

impl Consumer {
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        publisher: Publisher,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            manager,
            publisher,
            policy,
            concurrency: concurrency.max(1),
            status_store: None,
        }
    }

    pub fn with_status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.status_store = Some(store);
        self
    }

    /// Runs until the delivery stream ends or the channel fails.
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), DispatchError> {
        let channel = self.manager.acquire().await?;
        let consumer_tag = format!("{}-{}", queue, Uuid::new_v4().simple());
        let deliveries = channel.consume(queue, &consumer_tag).await?;

        info!(queue, concurrency = self.concurrency, "Consuming messages");

        let result = deliveries
            .try_for_each_concurrent(self.concurrency, |delivery| {
                let handler = Arc::clone(&handler);
                async move { self.process_delivery(queue, delivery, handler.as_ref()).await }
            })
            .await;

        match result {
            Ok(()) => {
                info!(queue, "Delivery stream ended");
                Ok(())
            }
            Err(e) => {
                error!(queue, error = %e, "Consumer stopped on broker error");
                self.manager.invalidate().await;
                Err(e)
            }
        }
    }

    async fn process_delivery(
        &self,
        queue: &str,
        delivery: IncomingDelivery,
        handler: &dyn MessageHandler,
    ) -> Result<(), DispatchError> {
        let disposition = self.evaluate(&delivery, handler).await;
        self.settle(queue, delivery, disposition).await
    }

    async fn evaluate(&self, delivery: &IncomingDelivery, handler: &dyn MessageHandler) -> Disposition {
        let wire = match serde_json::from_slice::<WireMessage>(&delivery.body) {
            Ok(wire) => wire,
            Err(e) => {
                return Disposition::DeadLetter {
                    reason: format!("Undecodable message body: {}", e),
                };
            }
        };

        let message = &wire.message;

        if let Err(e) = validate_message(message) {
            return Disposition::DeadLetter {
                reason: format!("Invalid message: {}", e),
            };
        }

        if self.policy.is_exhausted(message.retry_count) {
            return Disposition::DeadLetter {
                reason: format!(
                    "Retry budget already spent (retry_count={})",
                    message.retry_count
                ),
            };
        }

        if self.already_delivered(&message.notification_id).await {
            info!(
                notification_id = %message.notification_id,
                "Notification already delivered, skipping duplicate"
            );
            return Disposition::Ack;
        }

        info!(
            notification_id = %message.notification_id,
            request_id = %message.request_id,
            channel = %message.channel(),
            retry_count = message.retry_count,
            redelivered = delivery.redelivered,
            "Processing notification message"
        );

        self.record(StatusRecord::new(
            &message.notification_id,
            NotificationStatus::Pending,
            message.retry_count,
        ))
        .await;

        match handler.handle(message).await {
            Ok(()) => {
                self.record(StatusRecord::new(
                    &message.notification_id,
                    NotificationStatus::Delivered,
                    message.retry_count,
                ))
                .await;

                info!(notification_id = %message.notification_id, "Notification delivered");
                Disposition::Ack
            }
            Err(e) => match self.policy.decide(message.retry_count) {
                RetryDecision::Retry { next_attempt } => {
                    warn!(
                        notification_id = %message.notification_id,
                        next_attempt,
                        max_retries = self.policy.max_retries,
                        error = %e,
                        "Handler failed, scheduling retry"
                    );

                    self.record(
                        StatusRecord::new(
                            &message.notification_id,
                            NotificationStatus::Failed,
                            next_attempt,
                        )
                        .with_error(e.to_string()),
                    )
                    .await;

                    Disposition::Retry {
                        wire: Box::new(wire),
                        next_attempt,
                    }
                }
                RetryDecision::DeadLetter => {
                    error!(
                        notification_id = %message.notification_id,
                        max_retries = self.policy.max_retries,
                        error = %e,
                        "Notification permanently failed"
                    );

                    self.record(
                        StatusRecord::new(
                            &message.notification_id,
                            NotificationStatus::DeadLettered,
                            message.retry_count.saturating_add(1),
                        )
                        .with_error(e.to_string()),
                    )
                    .await;

                    Disposition::DeadLetter {
                        reason: format!("Retries exhausted: {}", e),
                    }
                }
            },
        }
    }

    async fn settle(
        &self,
        queue: &str,
        delivery: IncomingDelivery,
        disposition: Disposition,
    ) -> Result<(), DispatchError> {
        let delivery_tag = delivery.delivery_tag;

        match disposition {
            Disposition::Ack => {
                debug!(queue, delivery_tag, "Acknowledging delivery");
                delivery.ack().await
            }
            Disposition::DeadLetter { reason } => {
                warn!(queue, delivery_tag, reason = %reason, "Dead-lettering delivery");
                delivery.nack(false).await
            }
            Disposition::Retry { wire, next_attempt } => {
                let next = wire.message.next_attempt(next_attempt);
                let routing_key = next.channel().routing_key();
                let options = PublishOptions::default()
                    .with_message_id(wire.message_id.clone())
                    .with_priority(next.priority);

                match self.publisher.publish(routing_key, &next, options).await {
                    Ok(_) => {
                        info!(
                            queue,
                            notification_id = %next.notification_id,
                            retry_count = next.retry_count,
                            "Message requeued"
                        );
                        delivery.ack().await
                    }
                    Err(e) => {
                        // The original goes back unchanged; its count is not lost, only not advanced.
                        warn!(
                            queue,
                            delivery_tag,
                            error = %e,
                            "Failed to requeue message copy, returning delivery to queue"
                        );
                        delivery.nack(true).await
                    }
                }
            }
        }
    }

    async fn already_delivered(&self, notification_id: &str) -> bool {
        let Some(store) = &self.status_store else {
            return false;
        };

        match store.get_status(notification_id).await {
            Ok(Some(record)) => record.status == NotificationStatus::Delivered,
            Ok(None) => false,
            Err(e) => {
                warn!(notification_id, error = %e, "Failed to read notification status");
                false
            }
        }
    }

    async fn record(&self, record: StatusRecord) {
        let Some(store) = &self.status_store else {
            return;
        };

        let notification_id = record.notification_id.clone();
        if let Err(e) = store.set_status(record).await {
            warn!(notification_id = %notification_id, error = %e, "Failed to update notification status");
        }
    }
}
