//! Storage contract for episodic units

use crate::error::Result;
use crate::types::{EpisodicUnit, ScoredEpisode, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage backend for episodic units, partitioned by user id.
///
/// Implementations must treat a unit as expired exactly when `now >= ttl`,
/// in both `query` and `delete_expired`.
#[async_trait]
pub trait UnitStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Insert a new unit. An existing id is a `DuplicateEpisode` error.
    async fn add(&self, unit: &EpisodicUnit) -> Result<()>;

    /// Load one of a user's units, expired or not
    async fn get(&self, user_id: &str, episode_id: &str) -> Result<Option<EpisodicUnit>>;

    /// Persist retention changes (visits, ttl, status) of an existing unit
    async fn update(&self, unit: &EpisodicUnit) -> Result<()>;

    /// Top-k unexpired units by cosine similarity, ties in insertion order
    async fn query(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEpisode>>;

    /// Active units whose TTL has passed (candidates for dormancy)
    async fn expired_active(&self, now: DateTime<Utc>) -> Result<Vec<EpisodicUnit>>;

    /// Permanently delete every expired unit; returns how many went
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// `delete_expired` restricted to one user's partition
    async fn delete_expired_for(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize>;

    /// Every user id with at least one stored unit
    async fn users(&self) -> Result<Vec<UserId>>;

    /// All of a user's units in insertion order
    async fn list_user(&self, user_id: &str) -> Result<Vec<EpisodicUnit>>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_units: usize,
    pub active_units: usize,
    pub dormant_units: usize,
    /// Past their TTL but not yet pruned
    pub expired_units: usize,
    pub users: usize,
}
