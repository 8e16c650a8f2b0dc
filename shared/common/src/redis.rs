use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::Serialize;

use crate::{AppError, RedisConfig};

/// Thin pub/sub handle over a shared connection manager. The marketplace
/// only ever publishes; subscribers live in the external realtime layer.
#[derive(Clone)]
pub struct RedisService {
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &RedisConfig) -> Result<Self, AppError> {
        let client = Client::open(config.connection_string()).map_err(AppError::Redis)?;

        let manager = ConnectionManager::new(client).await.map_err(AppError::Redis)?;

        tracing::info!("Redis connection established");

        Ok(Self { manager })
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }

    pub async fn publish_json<T>(&self, channel: &str, value: &T) -> Result<(), AppError>
    where
        T: Serialize,
    {
        let payload = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(format!("Serialization error: {}", e)))?;
        self.publish(channel, &payload).await
    }
}
