//! In-process [`ModeCache`] backed by a map of buckets.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use kgrag_core::{ModeBucket, ModeCache, Result};

/// Mode buckets held in memory. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryModeCache {
    buckets: RwLock<HashMap<String, ModeBucket>>,
}

impl MemoryModeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entry_count(&self) -> usize {
        self.buckets.read().await.values().map(|b| b.len()).sum()
    }
}

#[async_trait]
impl ModeCache for MemoryModeCache {
    async fn get_bucket(&self, mode: &str) -> Result<Option<ModeBucket>> {
        Ok(self.buckets.read().await.get(mode).cloned())
    }

    async fn put_bucket(&self, mode: &str, bucket: ModeBucket) -> Result<()> {
        self.buckets.write().await.insert(mode.to_string(), bucket);
        Ok(())
    }

    async fn drop_modes(&self, modes: &[String]) -> Result<bool> {
        if modes.is_empty() {
            return Ok(false);
        }
        let mut buckets = self.buckets.write().await;
        for mode in modes {
            buckets.remove(mode);
        }
        Ok(true)
    }
}
