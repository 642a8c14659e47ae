//! Seams between the dispatch logic and the message broker.
//!
//! `ConnectionManager` owns the lazily created connection/channel pair and
//! reports its state; `BrokerChannel` is the handful of channel operations the
//! publisher and consumer need. The RabbitMQ implementation lives in
//! [`crate::clients::rbmq`].

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::{
    error::DispatchError,
    models::{message::OutgoingProperties, topology::ConnectionStatus},
};

#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Returns the live channel, connecting and declaring the topology first if needed.
    async fn acquire(&self) -> Result<Arc<dyn BrokerChannel>, DispatchError>;

    /// Drops the cached connection so the next `acquire` starts over.
    async fn invalidate(&self);

    fn status(&self) -> ConnectionStatus;

    /// Best-effort shutdown: never fails, even on an already dead connection.
    async fn close(&self);
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: OutgoingProperties,
    ) -> Result<(), DispatchError>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, DispatchError>;
}

pub type DeliveryStream = BoxStream<'static, Result<IncomingDelivery, DispatchError>>;

#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), DispatchError>;

    async fn nack(&self, requeue: bool) -> Result<(), DispatchError>;
}

/// One delivery from a queue. Settling consumes it, so it is acked or nacked exactly once.
pub struct IncomingDelivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
    pub body: Vec<u8>,
    acker: Box<dyn DeliveryAcker>,
}

impl IncomingDelivery {
    pub fn new(
        delivery_tag: u64,
        routing_key: String,
        redelivered: bool,
        body: Vec<u8>,
        acker: Box<dyn DeliveryAcker>,
    ) -> Self {
        Self {
            delivery_tag,
            routing_key,
            redelivered,
            body,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), DispatchError> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), DispatchError> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for IncomingDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingDelivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}
