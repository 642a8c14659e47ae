#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{StreamExt, stream};
use notification_dispatch::{
    clients::{
        broker::{BrokerChannel, ConnectionManager, DeliveryAcker, DeliveryStream, IncomingDelivery},
        consumer::MessageHandler,
        redis::StatusStore,
    },
    error::DispatchError,
    models::{
        message::{DeliveryTarget, NotificationMessage, OutgoingProperties},
        status::StatusRecord,
        topology::{ConnectionStatus, Topology},
    },
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

type DeliverySender = UnboundedSender<Result<IncomingDelivery, DispatchError>>;

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Value,
    pub properties: OutgoingProperties,
}

#[derive(Clone)]
struct StoredMessage {
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    consumer: Option<DeliverySender>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<&'static str, QueueState>,
    next_tag: u64,
    settlements: HashMap<u64, u32>,
    published: Vec<PublishedMessage>,
}

struct Shared {
    topology: Topology,
    available: AtomicBool,
    connected: AtomicBool,
    fail_publishes: AtomicBool,
    publish_count: AtomicUsize,
    state: Mutex<BrokerState>,
}

/// In-process broker routing through the same `Topology` the RabbitMQ client declares.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let topology = Topology::standard();
        let mut state = BrokerState::default();
        for queue in &topology.queues {
            state.queues.insert(queue.name, QueueState::default());
        }

        Self {
            shared: Arc::new(Shared {
                topology,
                available: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                fail_publishes: AtomicBool::new(false),
                publish_count: AtomicUsize::new(0),
                state: Mutex::new(state),
            }),
        }
    }

    /// A broker whose channel is already up.
    pub async fn connected() -> Self {
        let broker = Self::new();
        broker
            .acquire()
            .await
            .expect("memory broker should connect");
        broker
    }

    pub fn manager(&self) -> Arc<dyn ConnectionManager> {
        Arc::new(self.clone())
    }

    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
        if !available {
            self.shared.connected.store(false, Ordering::SeqCst);
        }
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.shared.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn publish_count(&self) -> usize {
        self.shared.publish_count.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.state.lock().published.clone()
    }

    /// Messages waiting in `queue` that no consumer has taken.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    pub fn peek(&self, queue: &str) -> Vec<Value> {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| {
                q.ready
                    .iter()
                    .filter_map(|m| serde_json::from_slice(&m.body).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// How many times each delivery tag was acked or nacked.
    pub fn settlements(&self) -> HashMap<u64, u32> {
        self.shared.state.lock().settlements.clone()
    }

    /// Places raw bytes on a queue, bypassing the exchange.
    pub fn inject(&self, queue: &'static str, routing_key: &str, body: &[u8]) {
        let mut state = self.shared.state.lock();
        self.shared.enqueue(
            &mut state,
            queue,
            StoredMessage {
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
                redelivered: false,
            },
            false,
        );
    }
}

impl Shared {
    fn enqueue(self: &Arc<Self>, state: &mut BrokerState, queue: &'static str, message: StoredMessage, front: bool) {
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return;
        };

        if front {
            queue_state.ready.push_front(message);
        } else {
            queue_state.ready.push_back(message);
        }

        self.pump(state, queue);
    }

    fn pump(self: &Arc<Self>, state: &mut BrokerState, queue: &'static str) {
        loop {
            let next_tag = state.next_tag + 1;
            let Some(queue_state) = state.queues.get_mut(queue) else {
                return;
            };
            let Some(sender) = queue_state.consumer.clone() else {
                return;
            };
            let Some(message) = queue_state.ready.pop_front() else {
                return;
            };

            let delivery = IncomingDelivery::new(
                next_tag,
                message.routing_key.clone(),
                message.redelivered,
                message.body.clone(),
                Box::new(MemoryAcker {
                    shared: Arc::clone(self),
                    queue,
                    tag: next_tag,
                    message: message.clone(),
                }),
            );

            if sender.send(Ok(delivery)).is_err() {
                queue_state.ready.push_front(message);
                queue_state.consumer = None;
                return;
            }

            state.next_tag = next_tag;
        }
    }

    fn route(self: &Arc<Self>, state: &mut BrokerState, exchange: &str, message: StoredMessage) {
        for queue in self.topology.route(exchange, &message.routing_key) {
            self.enqueue(state, queue, message.clone(), false);
        }
    }
}

#[async_trait]
impl ConnectionManager for MemoryBroker {
    async fn acquire(&self) -> Result<Arc<dyn BrokerChannel>, DispatchError> {
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(DispatchError::BrokerUnavailable(
                "memory broker is down".to_string(),
            ));
        }

        self.shared.connected.store(true, Ordering::SeqCst);
        Ok(Arc::new(MemoryChannel {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn invalidate(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn status(&self) -> ConnectionStatus {
        if self.shared.connected.load(Ordering::SeqCst) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    async fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let mut state = self.shared.state.lock();
        for queue in state.queues.values_mut() {
            queue.consumer = None;
        }
    }
}

struct MemoryChannel {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: OutgoingProperties,
    ) -> Result<(), DispatchError> {
        if self.shared.fail_publishes.load(Ordering::SeqCst) {
            return Err(DispatchError::BrokerUnavailable(
                "memory broker rejected publish".to_string(),
            ));
        }

        self.shared.publish_count.fetch_add(1, Ordering::SeqCst);

        let mut state = self.shared.state.lock();
        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: serde_json::from_slice(&payload)?,
            properties,
        });

        self.shared.route(
            &mut state,
            exchange,
            StoredMessage {
                routing_key: routing_key.to_string(),
                body: payload,
                redelivered: false,
            },
        );

        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, DispatchError> {
        let (tx, rx) = unbounded_channel();

        let mut state = self.shared.state.lock();
        let Some(name) = state.queues.keys().copied().find(|name| *name == queue) else {
            return Err(DispatchError::BrokerUnavailable(format!("no queue named {}", queue)));
        };

        if let Some(queue_state) = state.queues.get_mut(name) {
            queue_state.consumer = Some(tx);
        }
        self.shared.pump(&mut state, name);

        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(deliveries.boxed())
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: &'static str,
    tag: u64,
    message: StoredMessage,
}

#[async_trait]
impl DeliveryAcker for MemoryAcker {
    async fn ack(&self) -> Result<(), DispatchError> {
        let mut state = self.shared.state.lock();
        *state.settlements.entry(self.tag).or_insert(0) += 1;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), DispatchError> {
        let mut state = self.shared.state.lock();
        *state.settlements.entry(self.tag).or_insert(0) += 1;

        let mut message = self.message.clone();

        if requeue {
            message.redelivered = true;
            self.shared.enqueue(&mut state, self.queue, message, true);
            return Ok(());
        }

        let dead_letter_exchange = self
            .shared
            .topology
            .queue(self.queue)
            .and_then(|spec| spec.dead_letter_exchange);

        if let Some(exchange) = dead_letter_exchange {
            self.shared.route(&mut state, exchange, message);
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<String, StatusRecord>>,
    history: Mutex<Vec<StatusRecord>>,
}

impl MemoryStatusStore {
    pub fn history(&self) -> Vec<StatusRecord> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get_status(&self, notification_id: &str) -> Result<Option<StatusRecord>, Error> {
        Ok(self.records.lock().get(notification_id).cloned())
    }

    async fn set_status(&self, record: StatusRecord) -> Result<(), Error> {
        self.history.lock().push(record.clone());
        self.records
            .lock()
            .insert(record.notification_id.clone(), record);
        Ok(())
    }
}

/// Fails its first `failures` calls, then succeeds.
pub struct ScriptedHandler {
    failures: usize,
    calls: AtomicUsize,
    retry_counts: Mutex<Vec<u32>>,
}

impl ScriptedHandler {
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
            retry_counts: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    pub fn succeeding() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn retry_counts(&self) -> Vec<u32> {
        self.retry_counts.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(&self, message: &NotificationMessage) -> Result<(), Error> {
        tokio::task::yield_now().await;

        self.retry_counts.lock().push(message.retry_count);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if call < self.failures {
            Err(anyhow!("delivery failed on call {}", call + 1))
        } else {
            Ok(())
        }
    }
}

pub fn email_message(notification_id: &str) -> NotificationMessage {
    NotificationMessage {
        notification_id: notification_id.to_string(),
        target: DeliveryTarget::Email {
            recipient: "user@example.com".to_string(),
        },
        template_code: "welcome".to_string(),
        variables: HashMap::from([("name".to_string(), Value::String("Ada".to_string()))]),
        priority: 5,
        retry_count: 0,
        created_at: Utc::now(),
        request_id: format!("req-{}", notification_id),
        user_id: None,
        metadata: None,
    }
}

pub fn push_message(notification_id: &str) -> NotificationMessage {
    NotificationMessage {
        target: DeliveryTarget::Push {
            recipient: "fcm_token_abcdefghijklmnop:APA91b".to_string(),
            platform: Some("android".to_string()),
        },
        ..email_message(notification_id)
    }
}

/// Polls `condition` every 10ms until it holds or two seconds pass.
pub async fn wait_until<F>(condition: F) -> Result<()>
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    if condition() {
        Ok(())
    } else {
        Err(anyhow!("condition not met within 2s"))
    }
}
