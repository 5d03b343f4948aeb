use super::{memory::MemoryRingStore, redis::RedisRingStore, RingStore};
use crate::config::RouterConfig;
use crate::error::{Result, RingError};
use std::sync::Arc;

/// Builds a ring store from backend configuration.
#[derive(Debug, Clone, Default)]
pub struct RingStoreBuilder {
    backend: Option<String>,
    ring: Option<String>,
    redis_url: Option<String>,
}

impl RingStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        let mut builder = Self::new()
            .backend(config.backend.clone())
            .ring(config.ring.clone());
        if let Some(url) = &config.redis_url {
            builder = builder.redis_url(url.clone());
        }
        builder
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Ring identifier: namespaces every key the store writes.
    pub fn ring(mut self, ring: impl Into<String>) -> Self {
        self.ring = Some(ring.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    fn resolve_ring(&self) -> Result<String> {
        let ring = self.ring.as_deref().unwrap_or_default().trim().to_string();
        if ring.is_empty() {
            return Err(RingError::Config("ring identifier cannot be empty".to_string()));
        }
        Ok(ring)
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if backend.is_empty() {
            return Err(RingError::Config("store backend cannot be empty".to_string()));
        }
        Ok(backend)
    }

    pub async fn build(&self) -> Result<Arc<dyn RingStore>> {
        let ring = self.resolve_ring()?;
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "redis" => {
                let url = self.redis_url.as_deref().unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(RingError::Config(
                        "redis url is required for the redis backend".to_string(),
                    ));
                }
                let store = RedisRingStore::new(url, &ring).await?;
                Ok(Arc::new(store))
            }
            "memory" => Ok(Arc::new(MemoryRingStore::new())),
            other => Err(RingError::Config(format!(
                "unsupported store backend: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_the_memory_backend() {
        let store = RingStoreBuilder::new()
            .backend("memory")
            .ring("test")
            .build()
            .await
            .unwrap();
        assert!(store.replica_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_missing_ring_and_unknown_backend() {
        let err = RingStoreBuilder::new().backend("memory").build().await;
        assert!(matches!(err, Err(RingError::Config(_))));

        let err = RingStoreBuilder::new()
            .backend("zookeeper")
            .ring("test")
            .build()
            .await;
        assert!(matches!(err, Err(RingError::Config(_))));

        let err = RingStoreBuilder::new().backend("redis").ring("test").build().await;
        assert!(matches!(err, Err(RingError::Config(_))));
    }
}
