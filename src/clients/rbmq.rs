use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Event, ExchangeKind,
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::{
    clients::broker::{BrokerChannel, ConnectionManager, DeliveryAcker, DeliveryStream, IncomingDelivery},
    config::Config,
    error::DispatchError,
    models::{
        message::OutgoingProperties,
        topology::{ConnectionStatus, ExchangeType, QueueSpec, Topology},
    },
};

struct Session {
    connection: Connection,
    channel: Arc<RabbitChannel>,
}

impl Session {
    fn is_alive(&self) -> bool {
        self.connection.status().connected() && self.channel.channel.status().connected()
    }
}

/// Lazily connected RabbitMQ connection/channel pair.
///
/// Nothing reconnects in the background: a connection error flips the status to
/// `Disconnected` and the next `acquire` builds a fresh connection and redeclares
/// the topology.
pub struct RabbitMqClient {
    url: String,
    prefetch_count: u16,
    topology: Topology,
    session: Mutex<Option<Session>>,
    state: Arc<watch::Sender<ConnectionStatus>>,
    // Bumped per connection so late error callbacks from a replaced one are ignored.
    generation: Arc<AtomicU64>,
}

impl RabbitMqClient {
    pub fn new(config: &Config) -> Self {
        Self::with_topology(&config.rabbitmq_url, config.prefetch_count, Topology::standard())
    }

    pub fn with_topology(url: &str, prefetch_count: u16, topology: Topology) -> Self {
        let (state, _) = watch::channel(ConnectionStatus::Disconnected);

        Self {
            url: url.to_string(),
            prefetch_count,
            topology,
            session: Mutex::new(None),
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Observe `Connected`/`Disconnected` transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.state.subscribe()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.state.send_replace(status);
        if previous != status {
            info!(from = previous.as_str(), to = status.as_str(), "Broker connection state changed");
        }
    }

    async fn establish(&self) -> Result<Session, DispatchError> {
        info!("Connecting to RabbitMQ...");

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| DispatchError::BrokerUnavailable(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let watcher = ConnectionWatcher {
            state: Arc::clone(&self.state),
            current_generation: Arc::clone(&self.generation),
            generation,
        };
        let mut events = Box::pin(connection.events_listener());

        // Ends when the connection is dropped or replaced.
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if !watcher.observe(event) {
                    break;
                }
            }
        });

        info!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| DispatchError::BrokerUnavailable(format!("RabbitMQ channel creation failed: {}", e)))?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        debug!(prefetch_count = self.prefetch_count, "Channel configured");

        declare_topology(&channel, &self.topology).await?;

        info!(
            exchanges = self.topology.exchanges.len(),
            queues = self.topology.queues.len(),
            bindings = self.topology.bindings.len(),
            "Broker topology declared"
        );

        Ok(Session {
            connection,
            channel: Arc::new(RabbitChannel { channel }),
        })
    }
}

/// Reacts to lapin connection events for one connection generation.
struct ConnectionWatcher {
    state: Arc<watch::Sender<ConnectionStatus>>,
    current_generation: Arc<AtomicU64>,
    generation: u64,
}

impl ConnectionWatcher {
    /// Returns `false` once the watched connection has been replaced or invalidated.
    fn observe(&self, event: Event) -> bool {
        if self.current_generation.load(Ordering::SeqCst) != self.generation {
            return false;
        }

        match event {
            Event::Error(err) => {
                warn!(error = %err, "RabbitMQ connection error, invalidating channel");
                self.state.send_replace(ConnectionStatus::Disconnected);
            }
            Event::ConnectionBlocked(reason) => {
                warn!(reason = %reason, "RabbitMQ connection blocked by broker");
            }
            Event::ConnectionUnblocked => info!("RabbitMQ connection unblocked"),
            _ => {}
        }

        true
    }
}

#[async_trait]
impl ConnectionManager for RabbitMqClient {
    async fn acquire(&self) -> Result<Arc<dyn BrokerChannel>, DispatchError> {
        let mut session = self.session.lock().await;

        if let Some(existing) = session.as_ref() {
            if existing.is_alive() && self.status().is_connected() {
                let channel: Arc<dyn BrokerChannel> = existing.channel.clone();
                return Ok(channel);
            }
            warn!("Discarding dead RabbitMQ connection");
        }

        *session = None;

        match self.establish().await {
            Ok(fresh) => {
                let channel: Arc<dyn BrokerChannel> = fresh.channel.clone();
                *session = Some(fresh);
                self.set_status(ConnectionStatus::Connected);
                Ok(channel)
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    async fn invalidate(&self) {
        let mut session = self.session.lock().await;
        *session = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn status(&self) -> ConnectionStatus {
        *self.state.borrow()
    }

    async fn close(&self) {
        let mut session = self.session.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(session) = session.take() {
            if let Err(e) = session.channel.channel.close(200, "Bye").await {
                warn!(error = %e, "Failed to close RabbitMQ channel");
            }

            if let Err(e) = session.connection.close(200, "Bye").await {
                warn!(error = %e, "Failed to close RabbitMQ connection");
            }

            info!("RabbitMQ connection closed");
        }

        self.set_status(ConnectionStatus::Disconnected);
    }
}

pub struct RabbitChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for RabbitChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: OutgoingProperties,
    ) -> Result<(), DispatchError> {
        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                basic_properties(properties),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(DispatchError::Backpressure(format!(
                "Broker refused message on {}/{}",
                exchange, routing_key
            )));
        }

        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, DispatchError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue, consumer_tag, "Consumer created for queue");

        Ok(consumer
            .map(|delivery| delivery.map(into_incoming).map_err(DispatchError::from))
            .boxed())
    }
}

struct RabbitAcker {
    acker: Acker,
}

#[async_trait]
impl DeliveryAcker for RabbitAcker {
    async fn ack(&self) -> Result<(), DispatchError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(DispatchError::from)
    }

    async fn nack(&self, requeue: bool) -> Result<(), DispatchError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await
            .map(|_| ())
            .map_err(DispatchError::from)
    }
}

fn into_incoming(delivery: Delivery) -> IncomingDelivery {
    IncomingDelivery::new(
        delivery.delivery_tag,
        delivery.routing_key.as_str().to_string(),
        delivery.redelivered,
        delivery.data,
        Box::new(RabbitAcker {
            acker: delivery.acker,
        }),
    )
}

fn basic_properties(properties: OutgoingProperties) -> BasicProperties {
    let delivery_mode = if properties.persistent { 2 } else { 1 };

    let mut basic = BasicProperties::default()
        .with_delivery_mode(delivery_mode)
        .with_content_type(properties.content_type.into())
        .with_message_id(properties.message_id.into())
        .with_timestamp(properties.timestamp.timestamp().max(0) as u64);

    if let Some(priority) = properties.priority {
        basic = basic.with_priority(priority);
    }

    if let Some(expiration) = properties.expiration {
        basic = basic.with_expiration(expiration.into());
    }

    basic
}

async fn declare_topology(channel: &Channel, topology: &Topology) -> Result<(), DispatchError> {
    for exchange in &topology.exchanges {
        let kind = match exchange.kind {
            ExchangeType::Direct => ExchangeKind::Direct,
        };

        channel
            .exchange_declare(
                exchange.name,
                kind,
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
    }

    for queue in &topology.queues {
        channel
            .queue_declare(
                queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..Default::default()
                },
                queue_arguments(queue),
            )
            .await?;
    }

    for binding in &topology.bindings {
        channel
            .queue_bind(
                binding.queue,
                binding.exchange,
                binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    Ok(())
}

fn queue_arguments(queue: &QueueSpec) -> FieldTable {
    let mut arguments = FieldTable::default();

    if let Some(exchange) = queue.dead_letter_exchange {
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(exchange.into()),
        );
    }

    if let Some(ttl) = queue.message_ttl_ms {
        arguments.insert("x-message-ttl".into(), AMQPValue::LongInt(ttl));
    }

    arguments
}
