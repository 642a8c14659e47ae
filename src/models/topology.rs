pub const DIRECT_EXCHANGE: &str = "notifications.direct";
pub const DEAD_LETTER_EXCHANGE: &str = "notifications.dead_letter";

pub const EMAIL_QUEUE: &str = "email.queue";
pub const PUSH_QUEUE: &str = "push.queue";
pub const FAILED_QUEUE: &str = "failed.queue";

/// 24 hours.
pub const MESSAGE_TTL_MS: i32 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: &'static str,
    pub kind: ExchangeType,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: &'static str,
    pub durable: bool,
    pub dead_letter_exchange: Option<&'static str>,
    pub message_ttl_ms: Option<i32>,
}

impl QueueSpec {
    fn live(name: &'static str) -> Self {
        Self {
            name,
            durable: true,
            dead_letter_exchange: Some(DEAD_LETTER_EXCHANGE),
            message_ttl_ms: Some(MESSAGE_TTL_MS),
        }
    }

    fn sink(name: &'static str) -> Self {
        Self {
            name,
            durable: true,
            dead_letter_exchange: None,
            message_ttl_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub queue: &'static str,
    pub exchange: &'static str,
    pub routing_key: &'static str,
}

/// Exchanges, queues and bindings declared on every (re)connect.
///
/// Dead-lettered messages keep the routing key they were published with, so
/// `failed.queue` is bound to the dead-letter exchange with the empty key and
/// with every live routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    pub fn standard() -> Self {
        let exchanges = vec![
            ExchangeSpec {
                name: DIRECT_EXCHANGE,
                kind: ExchangeType::Direct,
                durable: true,
            },
            ExchangeSpec {
                name: DEAD_LETTER_EXCHANGE,
                kind: ExchangeType::Direct,
                durable: true,
            },
        ];

        let queues = vec![
            QueueSpec::live(EMAIL_QUEUE),
            QueueSpec::live(PUSH_QUEUE),
            QueueSpec::sink(FAILED_QUEUE),
        ];

        let bindings = vec![
            BindingSpec {
                queue: EMAIL_QUEUE,
                exchange: DIRECT_EXCHANGE,
                routing_key: "email",
            },
            BindingSpec {
                queue: PUSH_QUEUE,
                exchange: DIRECT_EXCHANGE,
                routing_key: "push",
            },
            BindingSpec {
                queue: FAILED_QUEUE,
                exchange: DEAD_LETTER_EXCHANGE,
                routing_key: "",
            },
            BindingSpec {
                queue: FAILED_QUEUE,
                exchange: DEAD_LETTER_EXCHANGE,
                routing_key: "email",
            },
            BindingSpec {
                queue: FAILED_QUEUE,
                exchange: DEAD_LETTER_EXCHANGE,
                routing_key: "push",
            },
        ];

        Self {
            exchanges,
            queues,
            bindings,
        }
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|queue| queue.name == name)
    }

    /// Queues a message published to `exchange` with `routing_key` lands in.
    pub fn route(&self, exchange: &str, routing_key: &str) -> Vec<&'static str> {
        self.bindings
            .iter()
            .filter(|binding| binding.exchange == exchange && binding.routing_key == routing_key)
            .map(|binding| binding.queue)
            .collect()
    }

    /// Live queues consumed by delivery workers, paired with their routing key.
    pub fn live_queues(&self) -> Vec<(&'static str, &'static str)> {
        self.bindings
            .iter()
            .filter(|binding| binding.exchange == DIRECT_EXCHANGE)
            .map(|binding| (binding.queue, binding.routing_key))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        *self == ConnectionStatus::Connected
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}
