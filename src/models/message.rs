use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    pub fn routing_key(&self) -> &'static str {
        self.as_str()
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel plus its channel-specific recipient, tagged by `channel` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum DeliveryTarget {
    Email {
        recipient: String,
    },
    Push {
        recipient: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
    },
}

impl DeliveryTarget {
    pub fn channel(&self) -> Channel {
        match self {
            DeliveryTarget::Email { .. } => Channel::Email,
            DeliveryTarget::Push { .. } => Channel::Push,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            DeliveryTarget::Email { recipient } | DeliveryTarget::Push { recipient, .. } => {
                recipient
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub notification_id: String,

    #[serde(flatten)]
    pub target: DeliveryTarget,

    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default)]
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
    pub request_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

pub const DEFAULT_PRIORITY: u8 = 5;

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl NotificationMessage {
    pub fn channel(&self) -> Channel {
        self.target.channel()
    }

    /// Copy carrying the next retry count; identity fields are untouched.
    pub fn next_attempt(&self, retry_count: u32) -> Self {
        let mut next = self.clone();
        next.retry_count = retry_count.max(self.retry_count);
        next
    }
}

/// Body as it travels through the broker: the message plus publish metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(flatten)]
    pub message: NotificationMessage,

    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub message_id: Option<String>,
    pub priority: Option<u8>,
    /// Per-message TTL in milliseconds.
    pub expiration: Option<String>,
}

impl PublishOptions {
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_expiration_ms(mut self, expiration_ms: u64) -> Self {
        self.expiration = Some(expiration_ms.to_string());
        self
    }
}

/// Broker-level properties attached to an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingProperties {
    pub message_id: String,
    pub content_type: &'static str,
    pub persistent: bool,
    pub timestamp: DateTime<Utc>,
    pub priority: Option<u8>,
    pub expiration: Option<String>,
}
