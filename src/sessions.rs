//! Sharded table of per-user event buffers
//!
//! Users hash onto a fixed number of shards; each shard is a map guarded by
//! its own lock and each user's buffer sits behind its own mutex, so work for
//! different users never contends on more than a brief shard lookup.

use crate::buffer::EventBuffer;
use crate::types::{UserId, UserMemoryConfig};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shard index for a user id
pub fn shard_for_user(user_id: &str, total_shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    (hasher.finish() % total_shards.max(1) as u64) as usize
}

/// Handle to one user's buffer; lock it to serialize that user's operations
pub type SessionHandle = Arc<Mutex<EventBuffer>>;

type Shard = RwLock<HashMap<UserId, SessionHandle>>;

#[derive(Debug)]
pub struct SessionTable {
    shards: Vec<Shard>,
    defaults: UserMemoryConfig,
}

impl SessionTable {
    pub fn new(shard_count: usize, defaults: UserMemoryConfig) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards, defaults }
    }

    fn shard(&self, user_id: &str) -> &Shard {
        &self.shards[shard_for_user(user_id, self.shards.len())]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Settings given to users seen for the first time
    pub fn defaults(&self) -> &UserMemoryConfig {
        &self.defaults
    }

    /// Existing session, without creating one
    pub async fn get(&self, user_id: &str) -> Option<SessionHandle> {
        self.shard(user_id).read().await.get(user_id).cloned()
    }

    /// Existing session, or a new one with default settings
    pub async fn get_or_create(&self, user_id: &str) -> SessionHandle {
        if let Some(handle) = self.get(user_id).await {
            return handle;
        }

        let mut shard = self.shard(user_id).write().await;
        shard
            .entry(user_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(user_id, "creating session with default config");
                Arc::new(Mutex::new(EventBuffer::new(user_id, self.defaults)))
            })
            .clone()
    }

    /// Number of users with a session
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn user_ids(&self) -> Vec<UserId> {
        let mut ids = Vec::new();
        for shard in &self.shards {
            ids.extend(shard.read().await.keys().cloned());
        }
        ids.sort();
        ids
    }
}
