//! In-process similarity index, the reference `UnitStore`

use crate::error::{MemoryError, Result};
use crate::storage_traits::{StoreStats, UnitStore};
use crate::types::{EpisodicUnit, ScoredEpisode, UserId};
use crate::vector_search::rank_units;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Units kept in memory, one insertion-ordered list per user
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    by_user: RwLock<HashMap<UserId, Vec<EpisodicUnit>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UnitStore for InMemoryIndex {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn add(&self, unit: &EpisodicUnit) -> Result<()> {
        let mut by_user = self.by_user.write().await;
        let bucket = by_user.entry(unit.user_id.clone()).or_default();
        if bucket.iter().any(|u| u.episode_id == unit.episode_id) {
            return Err(MemoryError::DuplicateEpisode(unit.episode_id.clone()));
        }
        bucket.push(unit.clone());
        Ok(())
    }

    async fn get(&self, user_id: &str, episode_id: &str) -> Result<Option<EpisodicUnit>> {
        let by_user = self.by_user.read().await;
        Ok(by_user
            .get(user_id)
            .and_then(|bucket| bucket.iter().find(|u| u.episode_id == episode_id))
            .cloned())
    }

    async fn update(&self, unit: &EpisodicUnit) -> Result<()> {
        let mut by_user = self.by_user.write().await;
        let stored = by_user
            .get_mut(&unit.user_id)
            .and_then(|bucket| bucket.iter_mut().find(|u| u.episode_id == unit.episode_id))
            .ok_or_else(|| MemoryError::NotFound(unit.episode_id.clone()))?;
        *stored = unit.clone();
        Ok(())
    }

    async fn query(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEpisode>> {
        let by_user = self.by_user.read().await;
        Ok(match by_user.get(user_id) {
            Some(bucket) => rank_units(bucket, query_embedding, top_k, now),
            None => Vec::new(),
        })
    }

    async fn expired_active(&self, now: DateTime<Utc>) -> Result<Vec<EpisodicUnit>> {
        let by_user = self.by_user.read().await;
        Ok(by_user
            .values()
            .flatten()
            .filter(|u| !u.is_dormant() && u.is_expired(now))
            .cloned()
            .collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut by_user = self.by_user.write().await;
        let mut removed = 0;
        for bucket in by_user.values_mut() {
            let before = bucket.len();
            bucket.retain(|u| !u.is_expired(now));
            removed += before - bucket.len();
        }
        by_user.retain(|_, bucket| !bucket.is_empty());
        Ok(removed)
    }

    async fn delete_expired_for(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut by_user = self.by_user.write().await;
        let Some(bucket) = by_user.get_mut(user_id) else {
            return Ok(0);
        };
        let before = bucket.len();
        bucket.retain(|u| !u.is_expired(now));
        let removed = before - bucket.len();
        if bucket.is_empty() {
            by_user.remove(user_id);
        }
        Ok(removed)
    }

    async fn users(&self) -> Result<Vec<UserId>> {
        let by_user = self.by_user.read().await;
        let mut users: Vec<UserId> = by_user.keys().cloned().collect();
        users.sort();
        Ok(users)
    }

    async fn list_user(&self, user_id: &str) -> Result<Vec<EpisodicUnit>> {
        let by_user = self.by_user.read().await;
        Ok(by_user.get(user_id).cloned().unwrap_or_default())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let by_user = self.by_user.read().await;
        let mut stats = StoreStats {
            users: by_user.len(),
            ..StoreStats::default()
        };
        for unit in by_user.values().flatten() {
            stats.total_units += 1;
            if unit.is_dormant() {
                stats.dormant_units += 1;
            } else {
                stats.active_units += 1;
            }
            if unit.is_expired(now) {
                stats.expired_units += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EpisodeProposal, EpisodeStatus};
    use chrono::Duration;

    fn unit(user: &str, summary: &str, embedding: Vec<f32>, ttl: DateTime<Utc>) -> EpisodicUnit {
        let created = ttl - Duration::days(7);
        let proposal = EpisodeProposal::new(user, Vec::new(), summary, embedding, None, created);
        let mut unit = EpisodicUnit::from_proposal(proposal, None, created);
        unit.ttl = ttl;
        unit
    }

    #[tokio::test]
    async fn query_is_partitioned_by_user() {
        let now = Utc::now();
        let index = InMemoryIndex::new();
        index.add(&unit("u1", "mine", vec![1.0], now + Duration::days(1))).await.unwrap();
        index.add(&unit("u2", "theirs", vec![1.0], now + Duration::days(1))).await.unwrap();

        let hits = index.query("u1", &[1.0], 5, now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit.summary, "mine");
        assert!(index.query("nobody", &[1.0], 5, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let now = Utc::now();
        let index = InMemoryIndex::new();
        let u = unit("u1", "a", vec![1.0], now + Duration::days(1));
        index.add(&u).await.unwrap();
        let err = index.add(&u).await.unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateEpisode(_)));
    }

    #[tokio::test]
    async fn delete_expired_removes_past_ttl_and_query_agrees() {
        let now = Utc::now();
        let index = InMemoryIndex::new();
        let stale = unit("u1", "stale", vec![1.0], now - Duration::seconds(1000));
        let fresh = unit("u1", "fresh", vec![1.0], now + Duration::days(3));
        index.add(&stale).await.unwrap();
        index.add(&fresh).await.unwrap();

        let hits = index.query("u1", &[1.0], 5, now).await.unwrap();
        assert!(hits.iter().all(|h| h.unit.episode_id != stale.episode_id));

        assert_eq!(index.delete_expired(now).await.unwrap(), 1);
        assert!(index.get("u1", &stale.episode_id).await.unwrap().is_none());
        assert!(index.get("u1", &fresh.episode_id).await.unwrap().is_some());
        assert_eq!(index.delete_expired(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_expired_for_touches_only_one_user() {
        let now = Utc::now();
        let index = InMemoryIndex::new();
        index.add(&unit("u1", "stale", vec![1.0], now)).await.unwrap();
        index.add(&unit("u2", "stale too", vec![1.0], now)).await.unwrap();

        assert_eq!(index.delete_expired_for("u1", now).await.unwrap(), 1);
        assert_eq!(index.delete_expired_for("nobody", now).await.unwrap(), 0);
        assert_eq!(index.users().await.unwrap(), vec!["u2".to_string()]);
    }

    #[tokio::test]
    async fn update_persists_retention_changes() {
        let now = Utc::now();
        let index = InMemoryIndex::new();
        let mut u = unit("u1", "a", vec![1.0], now + Duration::days(1));
        index.add(&u).await.unwrap();

        u.visits = 4;
        u.status = EpisodeStatus::Dormant;
        index.update(&u).await.unwrap();
        let stored = index.get("u1", &u.episode_id).await.unwrap().unwrap();
        assert_eq!(stored.visits, 4);
        assert!(stored.is_dormant());

        let missing = unit("u1", "never added", vec![1.0], now);
        assert!(matches!(
            index.update(&missing).await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stats_and_expired_active() {
        let now = Utc::now();
        let index = InMemoryIndex::new();
        index.add(&unit("u1", "live", vec![1.0], now + Duration::days(1))).await.unwrap();
        index.add(&unit("u1", "expired", vec![1.0], now)).await.unwrap();
        let mut dormant = unit("u2", "dormant", vec![1.0], now - Duration::days(1));
        dormant.status = EpisodeStatus::Dormant;
        index.add(&dormant).await.unwrap();

        let candidates = index.expired_active(now).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].summary, "expired");

        let stats = index.stats(now).await.unwrap();
        assert_eq!(stats.total_units, 3);
        assert_eq!(stats.active_units, 2);
        assert_eq!(stats.dormant_units, 1);
        assert_eq!(stats.expired_units, 2);
        assert_eq!(stats.users, 2);
    }
}
