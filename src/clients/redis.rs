use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    models::{
        retry::RetryConfig,
        status::{NotificationStatus, StatusRecord},
    },
    utils::retry_with_backoff,
};

/// Where consumers record the delivery state of each notification.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get_status(&self, notification_id: &str) -> Result<Option<StatusRecord>, Error>;

    async fn set_status(&self, record: StatusRecord) -> Result<(), Error>;
}

pub struct RedisStatusStore {
    connection: MultiplexedConnection,
    ttl_seconds: u64,
    retry_config: RetryConfig,
}

fn status_key(notification_id: &str) -> String {
    format!("notification:status:{}", notification_id)
}

impl RedisStatusStore {
    pub async fn connect(redis_url: &str, config: &Config) -> Result<Self, Error> {
        info!("Connecting to Redis...");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            ttl_seconds: config.status_ttl_seconds,
            retry_config: config.retry_config(),
        })
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn get_status(&self, notification_id: &str) -> Result<Option<StatusRecord>, Error> {
        let key = status_key(notification_id);
        let mut connection = self.connection.clone();

        let value: Option<String> = connection
            .get(&key)
            .await
            .map_err(|e| anyhow!("Failed to get cached status: {}", e))?;

        match value {
            None => Ok(None),
            Some(raw) => match serde_json::from_str::<StatusRecord>(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Unreadable status record, ignoring");
                    Ok(None)
                }
            },
        }
    }

    async fn set_status(&self, record: StatusRecord) -> Result<(), Error> {
        let key = status_key(&record.notification_id);
        let payload = serde_json::to_string(&record)?;
        let ttl = self.ttl_seconds;

        // Losing a `delivered` mark means a duplicate send on redelivery.
        let attempts = if record.status == NotificationStatus::Delivered {
            self.retry_config.clone()
        } else {
            RetryConfig {
                max_attempts: 1,
                ..self.retry_config.clone()
            }
        };

        retry_with_backoff(&attempts, || {
            let key = key.clone();
            let payload = payload.clone();
            let mut connection = self.connection.clone();

            async move {
                connection
                    .set_ex::<_, _, ()>(&key, payload, ttl)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to store status: {}", e))?;

        debug!(key = %key, status = %record.status, "Notification status stored");

        Ok(())
    }
}
