use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    #[cfg(test)]
    pub(crate) async fn is_connected(&self) -> bool {
        self.manager.read().await.is_some()
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Appends to a list. `Ok(false)` means no connection; the caller keeps the payload.
    pub(crate) async fn push_list(&self, key: &str, payload: &str) -> Result<bool, RedisError> {
        self.push("RPUSH", key, payload).await
    }

    /// Puts a payload back at the head of a list, ahead of everything queued after it.
    pub(crate) async fn push_list_front(
        &self,
        key: &str,
        payload: &str,
    ) -> Result<bool, RedisError> {
        self.push("LPUSH", key, payload).await
    }

    async fn push(&self, command: &str, key: &str, payload: &str) -> Result<bool, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(false);
        };

        cmd(command).arg(key).arg(payload).query_async::<_, i64>(&mut manager).await?;
        Ok(true)
    }

    pub(crate) async fn pop_list(&self, key: &str) -> Result<Option<String>, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(None);
        };

        cmd("LPOP").arg(key).query_async::<_, Option<String>>(&mut manager).await
    }

    pub(crate) async fn list_len(&self, key: &str) -> Result<u64, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(0);
        };

        cmd("LLEN").arg(key).query_async::<_, u64>(&mut manager).await
    }
}
